use crate::capability::NodeCapabilities;
use crate::probe::{BuildInfoResult, IdentityProbeResult};
use docdb_common::types::*;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Connection lifecycle of a monitored node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Disconnected => write!(f, "Disconnected"),
            ServerState::Connecting => write!(f, "Connecting"),
            ServerState::Connected => write!(f, "Connected"),
        }
    }
}

/// Role a node reports for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServerType {
    Unknown,
    Standalone,
    RouterNode,
    ReplicaPrimary,
    ReplicaSecondary,
    ReplicaArbiter,
    ReplicaOther,
    ReplicaGhost,
    ReplicaPassive,
}

impl ServerType {
    pub fn is_replica_member(&self) -> bool {
        matches!(
            self,
            ServerType::ReplicaPrimary
                | ServerType::ReplicaSecondary
                | ServerType::ReplicaArbiter
                | ServerType::ReplicaOther
                | ServerType::ReplicaGhost
                | ServerType::ReplicaPassive
        )
    }

    /// Whether the node holds data and can serve operations
    pub fn is_data_bearing(&self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RouterNode
                | ServerType::ReplicaPrimary
                | ServerType::ReplicaSecondary
        )
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            ServerType::Standalone | ServerType::RouterNode | ServerType::ReplicaPrimary
        )
    }
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Everything one successful heartbeat learned about a node
#[derive(Debug, Clone)]
pub struct HeartbeatResult {
    /// Smoothed round-trip time, already rounded to whole milliseconds
    pub average_round_trip_time: Duration,
    pub identity: IdentityProbeResult,
    pub build_info: BuildInfoResult,
    pub capabilities: Option<NodeCapabilities>,
}

/// Immutable snapshot of one node's observed state.
///
/// Snapshots are replaced, never mutated. Equality and hashing cover every
/// observed field but ignore `revision`, so two probes that saw the same
/// thing compare equal. The derivation helpers return the receiver itself
/// when nothing changed and bump `revision` when something did.
#[derive(Debug, Clone)]
pub struct NodeDescription {
    node_id: NodeId,
    state: ServerState,
    server_type: ServerType,
    average_round_trip_time: Duration,
    replica_group: Option<ReplicaGroupConfig>,
    tags: Option<TagSet>,
    version: Option<ServerVersion>,
    wire_version_range: Option<WireVersionRange>,
    capabilities: Option<Arc<NodeCapabilities>>,
    revision: u64,
}

impl NodeDescription {
    /// Initial description for a node that has not been probed yet
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: ServerState::Disconnected,
            server_type: ServerType::Unknown,
            average_round_trip_time: Duration::ZERO,
            replica_group: None,
            tags: None,
            version: None,
            wire_version_range: None,
            capabilities: None,
            revision: 0,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.node_id.endpoint
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn average_round_trip_time(&self) -> Duration {
        self.average_round_trip_time
    }

    pub fn replica_group(&self) -> Option<&ReplicaGroupConfig> {
        self.replica_group.as_ref()
    }

    pub fn tags(&self) -> Option<&TagSet> {
        self.tags.as_ref()
    }

    pub fn version(&self) -> Option<ServerVersion> {
        self.version
    }

    pub fn wire_version_range(&self) -> Option<WireVersionRange> {
        self.wire_version_range
    }

    pub fn capabilities(&self) -> Option<&NodeCapabilities> {
        self.capabilities.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_connected(&self) -> bool {
        self.state == ServerState::Connected
    }

    pub fn is_data_bearing(&self) -> bool {
        self.is_connected() && self.server_type.is_data_bearing()
    }

    /// Whether operations may be routed to this node
    pub fn is_usable(&self) -> bool {
        self.is_data_bearing()
    }

    /// A disconnected description for the same node.
    ///
    /// Drops everything learned from earlier probes so no stale role, latency
    /// or capability data survives the disconnect.
    pub fn with_disconnected_state(self: &Arc<Self>) -> Arc<Self> {
        self.derive(NodeDescription {
            revision: self.revision,
            ..NodeDescription::new(self.node_id.clone())
        })
    }

    /// A connected description built from a heartbeat's findings
    pub fn with_heartbeat_result(self: &Arc<Self>, result: &HeartbeatResult) -> Arc<Self> {
        self.derive(NodeDescription {
            node_id: self.node_id.clone(),
            state: ServerState::Connected,
            server_type: result.identity.server_type,
            average_round_trip_time: result.average_round_trip_time,
            replica_group: result.identity.replica_group.clone(),
            tags: result.identity.tags.clone(),
            version: Some(result.build_info.version),
            wire_version_range: Some(result.identity.wire_version_range),
            capabilities: result.capabilities.clone().map(Arc::new),
            revision: self.revision,
        })
    }

    fn derive(self: &Arc<Self>, mut candidate: NodeDescription) -> Arc<Self> {
        if candidate == **self {
            return Arc::clone(self);
        }
        candidate.revision = self.revision + 1;
        Arc::new(candidate)
    }
}

impl PartialEq for NodeDescription {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
            && self.state == other.state
            && self.server_type == other.server_type
            && self.average_round_trip_time == other.average_round_trip_time
            && self.replica_group == other.replica_group
            && self.tags == other.tags
            && self.version == other.version
            && self.wire_version_range == other.wire_version_range
            && self.capabilities == other.capabilities
    }
}

impl Eq for NodeDescription {}

impl Hash for NodeDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
        self.state.hash(state);
        self.server_type.hash(state);
        self.average_round_trip_time.hash(state);
        self.replica_group.hash(state);
        self.tags.hash(state);
        self.version.hash(state);
        self.wire_version_range.hash(state);
        self.capabilities.hash(state);
    }
}
