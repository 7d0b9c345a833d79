use crate::listener::{DescriptionChangedEvent, MonitorListener};
use crate::node_description::{NodeDescription, ServerType};
use dashmap::DashMap;
use docdb_common::types::{ClusterId, Endpoint, NodeId};
use std::sync::Arc;
use tracing::debug;

/// Overall shape of the cluster as seen from the monitored nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Unknown,
    Standalone,
    ReplicaGroup,
    Sharded,
}

impl std::fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterKind::Unknown => write!(f, "Unknown"),
            ClusterKind::Standalone => write!(f, "Standalone"),
            ClusterKind::ReplicaGroup => write!(f, "ReplicaGroup"),
            ClusterKind::Sharded => write!(f, "Sharded"),
        }
    }
}

/// Point-in-time view over every monitored node
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    pub cluster_id: ClusterId,
    pub kind: ClusterKind,
    pub primary: Option<NodeId>,
    pub secondaries: Vec<NodeId>,
    pub routers: Vec<NodeId>,
    pub nodes: Vec<Arc<NodeDescription>>,
}

impl ClusterTopology {
    pub fn get_node(&self, endpoint: &Endpoint) -> Option<&Arc<NodeDescription>> {
        self.nodes.iter().find(|n| n.endpoint() == endpoint)
    }

    pub fn usable_nodes(&self) -> Vec<&Arc<NodeDescription>> {
        self.nodes.iter().filter(|n| n.is_usable()).collect()
    }
}

/// Cluster statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub connected_nodes: usize,
    pub usable_nodes: usize,
    pub has_primary: bool,
}

/// Collects the latest description of every monitored node.
///
/// Subscribed to each node's monitor as a listener. Only nodes added with
/// [`ClusterAggregator::add_node`] are tracked, and an event never replaces
/// a description with a newer revision.
pub struct ClusterAggregator {
    cluster_id: ClusterId,
    nodes: DashMap<NodeId, Arc<NodeDescription>>,
}

impl ClusterAggregator {
    pub fn new(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            nodes: DashMap::new(),
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Start tracking a node with its current description
    pub fn add_node(&self, description: Arc<NodeDescription>) {
        self.nodes.insert(description.node_id().clone(), description);
    }

    pub fn remove_node(&self, node_id: &NodeId) -> Option<Arc<NodeDescription>> {
        self.nodes.remove(node_id).map(|(_, description)| description)
    }

    pub fn description(&self, node_id: &NodeId) -> Option<Arc<NodeDescription>> {
        self.nodes.get(node_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn topology(&self) -> ClusterTopology {
        let mut nodes: Vec<Arc<NodeDescription>> =
            self.nodes.iter().map(|entry| Arc::clone(entry.value())).collect();
        nodes.sort_by(|a, b| a.endpoint().cmp(b.endpoint()));

        let mut primary = None;
        let mut secondaries = Vec::new();
        let mut routers = Vec::new();
        let mut saw_standalone = false;
        let mut saw_replica = false;

        for node in nodes.iter().filter(|n| n.is_connected()) {
            match node.server_type() {
                ServerType::ReplicaPrimary => primary = Some(node.node_id().clone()),
                ServerType::ReplicaSecondary => secondaries.push(node.node_id().clone()),
                ServerType::RouterNode => routers.push(node.node_id().clone()),
                ServerType::Standalone => saw_standalone = true,
                _ => {}
            }
            saw_replica |= node.server_type().is_replica_member();
        }

        let kind = if !routers.is_empty() {
            ClusterKind::Sharded
        } else if saw_replica {
            ClusterKind::ReplicaGroup
        } else if saw_standalone {
            ClusterKind::Standalone
        } else {
            ClusterKind::Unknown
        };

        ClusterTopology {
            cluster_id: self.cluster_id,
            kind,
            primary,
            secondaries,
            routers,
            nodes,
        }
    }

    pub fn stats(&self) -> ClusterStats {
        let topology = self.topology();
        ClusterStats {
            total_nodes: topology.nodes.len(),
            connected_nodes: topology.nodes.iter().filter(|n| n.is_connected()).count(),
            usable_nodes: topology.usable_nodes().len(),
            has_primary: topology.primary.is_some(),
        }
    }
}

impl MonitorListener for ClusterAggregator {
    fn description_changed(&self, event: &DescriptionChangedEvent) {
        let current = &event.current;
        match self.nodes.get_mut(current.node_id()) {
            Some(mut entry) if entry.revision() < current.revision() => {
                *entry = Arc::clone(current);
            }
            Some(_) => {
                debug!(node = %current.node_id(), revision = current.revision(), "Ignoring stale description");
            }
            None => {
                debug!(node = %current.node_id(), "Ignoring description for untracked node");
            }
        }
    }
}
