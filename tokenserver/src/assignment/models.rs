//! Data models for node assignment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Unique identity record identifier, exposed to clients as the uid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityId(pub u64);

/// A provisioned storage node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub url: String,
    pub capacity: u64,
    pub current_load: u64,
}

impl Node {
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.capacity
    }

    /// Pick the node with the lowest load relative to its capacity among
    /// those with room left. Ties go to the lowest id.
    pub fn least_loaded<'a, I>(nodes: I) -> Option<&'a Node>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        nodes
            .into_iter()
            .filter(|n| n.has_capacity())
            .min_by(|a, b| {
                // compare a.load/a.cap with b.load/b.cap without floats
                let lhs = a.current_load as u128 * b.capacity as u128;
                let rhs = b.current_load as u128 * a.capacity as u128;
                lhs.cmp(&rhs).then(a.id.cmp(&b.id))
            })
    }
}

/// A principal's durable node assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub principal: String,
    pub node_id: NodeId,
    pub created_at: DateTime<Utc>,
}

/// Answer to an `assign` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub identity_id: IdentityId,
    pub node_id: NodeId,
    pub node_url: String,
    /// Whether this call created the record
    pub created: bool,
}
