//! Per-node monitoring for a document database client.
//!
//! A [`NodeMonitor`] probes one node on a fixed interval over its own
//! connection and publishes immutable [`NodeDescription`] snapshots. When a
//! [`CapabilityRegistry`] is attached, every successful probe also evaluates
//! which features the node supports.

pub mod aggregator;
pub mod capability;
pub mod capability_set;
pub mod capability_table;
pub mod dependency;
pub mod detector;
pub mod interruptible_wait;
pub mod listener;
pub mod monitor;
pub mod node_description;
pub mod probe;
pub mod settings;
pub mod smoother;

pub use aggregator::{ClusterAggregator, ClusterKind, ClusterStats, ClusterTopology};
pub use capability::{Capability, CapabilityId, CapabilityRegistry, NodeCapabilities};
pub use capability_set::{CapabilityBucket, CapabilitySet};
pub use capability_table::CapabilityTable;
pub use dependency::{CapabilityDependency, Predicate};
pub use detector::CapabilityDetector;
pub use interruptible_wait::{InterruptibleWait, WaitOutcome};
pub use listener::{DescriptionChangedEvent, ListenerRegistry, MonitorListener, Subscription};
pub use monitor::{MonitorState, NodeMonitor};
pub use node_description::{HeartbeatResult, NodeDescription, ServerState, ServerType};
pub use probe::{BuildInfoResult, IdentityProbeResult, ProbeConnection, ProbeConnectionFactory, ProbeContext, ProbeTransport};
pub use settings::{MonitorSettings, MonitorSettingsConfig};
pub use smoother::RoundTripSmoother;
