//! Node assignment
//!
//! Maps a verified principal to the storage node that owns its data,
//! allocating one on first sight. Create-or-read is a single atomic step in
//! every implementation, so concurrent first requests for the same principal
//! all observe the same record.

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::MemoryAssignment;
pub use models::*;
pub use sqlite::SqliteAssignment;

use crate::error::TokenServerError;

/// Result type for assignment operations
pub type StoreResult<T> = Result<T, TokenServerError>;

/// Trait for identity-to-node assignment storage
pub trait NodeAssignment: Send + Sync {
    /// Look up the principal's node, allocating one if it has none.
    ///
    /// Fails with `NodeUnavailable` when a new record is needed and no node
    /// has spare capacity.
    fn assign(&self, principal: &str) -> StoreResult<Assignment>;

    /// Get the identity record for a principal
    fn get_identity(&self, principal: &str) -> StoreResult<Option<IdentityRecord>>;

    /// Register a node, or update the capacity of an already known URL
    fn add_node(&self, url: &str, capacity: u64) -> StoreResult<NodeId>;

    /// List all nodes with their current load
    fn list_nodes(&self) -> StoreResult<Vec<Node>>;
}

impl<T: NodeAssignment + ?Sized> NodeAssignment for std::sync::Arc<T> {
    fn assign(&self, principal: &str) -> StoreResult<Assignment> {
        (**self).assign(principal)
    }

    fn get_identity(&self, principal: &str) -> StoreResult<Option<IdentityRecord>> {
        (**self).get_identity(principal)
    }

    fn add_node(&self, url: &str, capacity: u64) -> StoreResult<NodeId> {
        (**self).add_node(url, capacity)
    }

    fn list_nodes(&self) -> StoreResult<Vec<Node>> {
        (**self).list_nodes()
    }
}

/// Principals are compared case-insensitively
pub fn normalize_principal(principal: &str) -> String {
    principal.trim().to_lowercase()
}
