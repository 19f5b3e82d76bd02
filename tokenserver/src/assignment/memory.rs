//! In-memory node assignment

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::Utc;

use super::{
    normalize_principal, Assignment, IdentityId, IdentityRecord, Node, NodeAssignment, NodeId,
    StoreResult,
};
use crate::error::TokenServerError;

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<NodeId, Node>,
    identities: HashMap<String, IdentityRecord>,
    next_node_id: u64,
    next_identity_id: u64,
}

impl Inner {
    fn assignment(&self, record: &IdentityRecord, created: bool) -> StoreResult<Assignment> {
        let node = self.nodes.get(&record.node_id).ok_or_else(|| {
            TokenServerError::Internal(format!("identity points at unknown node {:?}", record.node_id))
        })?;
        Ok(Assignment {
            identity_id: record.id,
            node_id: node.id,
            node_url: node.url.clone(),
            created,
        })
    }
}

/// In-memory assignment store. One write lock covers lookup, node
/// selection and insert, which makes first-time assignment atomic.
pub struct MemoryAssignment {
    inner: RwLock<Inner>,
}

impl MemoryAssignment {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_node_id: 1,
                next_identity_id: 1,
                ..Default::default()
            }),
        }
    }
}

impl Default for MemoryAssignment {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeAssignment for MemoryAssignment {
    fn assign(&self, principal: &str) -> StoreResult<Assignment> {
        let principal = normalize_principal(principal);

        {
            let inner = self.inner.read().unwrap();
            if let Some(record) = inner.identities.get(&principal) {
                return inner.assignment(record, false);
            }
        }

        let mut inner = self.inner.write().unwrap();
        // another request may have won the race between the two locks
        if let Some(record) = inner.identities.get(&principal) {
            return inner.assignment(record, false);
        }

        let node_id = Node::least_loaded(inner.nodes.values())
            .map(|n| n.id)
            .ok_or(TokenServerError::NodeUnavailable)?;

        let record = IdentityRecord {
            id: IdentityId(inner.next_identity_id),
            principal: principal.clone(),
            node_id,
            created_at: Utc::now(),
        };
        inner.next_identity_id += 1;
        if let Some(node) = inner.nodes.get_mut(&node_id) {
            node.current_load += 1;
        }
        inner.identities.insert(principal, record.clone());

        tracing::info!(principal = %record.principal, node = ?node_id, "Assigned new identity");
        inner.assignment(&record, true)
    }

    fn get_identity(&self, principal: &str) -> StoreResult<Option<IdentityRecord>> {
        let principal = normalize_principal(principal);
        Ok(self.inner.read().unwrap().identities.get(&principal).cloned())
    }

    fn add_node(&self, url: &str, capacity: u64) -> StoreResult<NodeId> {
        let mut inner = self.inner.write().unwrap();
        if let Some(node) = inner.nodes.values_mut().find(|n| n.url == url) {
            node.capacity = capacity;
            return Ok(node.id);
        }

        let id = NodeId(inner.next_node_id);
        inner.next_node_id += 1;
        inner.nodes.insert(
            id,
            Node {
                id,
                url: url.to_string(),
                capacity,
                current_load: 0,
            },
        );
        Ok(id)
    }

    fn list_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self.inner.read().unwrap().nodes.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sight_creates_then_reuses() {
        let store = MemoryAssignment::new();
        store.add_node("https://node1.example", 10).unwrap();

        let first = store.assign("user1@idp.example").unwrap();
        assert!(first.created);
        assert_eq!(first.node_url, "https://node1.example");

        let second = store.assign("USER1@idp.example").unwrap();
        assert!(!second.created);
        assert_eq!(second.identity_id, first.identity_id);
        assert_eq!(second.node_id, first.node_id);
    }

    #[test]
    fn test_no_nodes_is_unavailable() {
        let store = MemoryAssignment::new();
        assert!(matches!(
            store.assign("user1@idp.example"),
            Err(TokenServerError::NodeUnavailable)
        ));
        assert!(store.get_identity("user1@idp.example").unwrap().is_none());
    }

    #[test]
    fn test_spreads_load_and_respects_capacity() {
        let store = MemoryAssignment::new();
        let a = store.add_node("https://a.example", 1).unwrap();
        let b = store.add_node("https://b.example", 1).unwrap();

        let first = store.assign("one@idp.example").unwrap();
        let second = store.assign("two@idp.example").unwrap();
        assert_eq!(first.node_id, a);
        assert_eq!(second.node_id, b);

        assert!(matches!(
            store.assign("three@idp.example"),
            Err(TokenServerError::NodeUnavailable)
        ));
        // existing principals are still served when every node is full
        assert_eq!(store.assign("one@idp.example").unwrap().node_id, a);
    }

    #[test]
    fn test_add_node_is_idempotent_by_url() {
        let store = MemoryAssignment::new();
        let id = store.add_node("https://a.example", 1).unwrap();
        assert_eq!(store.add_node("https://a.example", 5).unwrap(), id);

        let nodes = store.list_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].capacity, 5);
    }
}
