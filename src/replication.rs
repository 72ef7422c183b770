use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;
use uuid::Uuid;

/// A known peer node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    pub node_id: String,
    pub address: String,
}

/// This node's replication identity, reported through the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub replication_enabled: bool,
    pub peer_count: usize,
}

/// Node identity and peer registry.
///
/// The node id comes from `QUERN_NODE_ID` or is generated at startup;
/// `QUERN_REPLICATION_ENABLED=true` turns the peer surface on. Peer state
/// is in-memory only.
pub struct ReplicationState {
    node_id: String,
    enabled: bool,
    peers: DashMap<String, PeerInfo>,
}

impl ReplicationState {
    pub fn from_env() -> Self {
        let node_id = env::var("QUERN_NODE_ID")
            .unwrap_or_else(|_| format!("node_{}", Uuid::new_v4()));
        let enabled = env::var("QUERN_REPLICATION_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        info!(node_id, enabled, "replication state initialized");
        ReplicationState {
            node_id,
            enabled,
            peers: DashMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn add_peer(&self, peer: PeerInfo) {
        self.peers.insert(peer.node_id.clone(), peer);
    }

    pub fn remove_peer(&self, node_id: &str) -> bool {
        self.peers.remove(node_id).is_some()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut list: Vec<PeerInfo> = self.peers.iter().map(|e| e.value().clone()).collect();
        list.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        list
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.node_id.clone(),
            replication_enabled: self.enabled,
            peer_count: self.peers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_registry() {
        let state = ReplicationState {
            node_id: "node_a".into(),
            enabled: true,
            peers: DashMap::new(),
        };
        state.add_peer(PeerInfo {
            node_id: "node_b".into(),
            address: "10.0.0.2:7700".into(),
        });
        state.add_peer(PeerInfo {
            node_id: "node_c".into(),
            address: "10.0.0.3:7700".into(),
        });
        assert_eq!(state.status().peer_count, 2);
        assert_eq!(state.peers()[0].node_id, "node_b");

        assert!(state.remove_peer("node_b"));
        assert!(!state.remove_peer("node_b"));
        assert_eq!(state.status().peer_count, 1);
    }
}
