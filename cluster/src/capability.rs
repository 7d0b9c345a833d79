use crate::capability_set::{default_buckets, CapabilityBucket, CapabilitySet};
use crate::capability_table::{default_detectors, CapabilityTable};
use crate::detector::CapabilityDetector;
use crate::probe::ProbeContext;
use docdb_common::types::VersionRange;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Named behaviours a node may or may not support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityId {
    // Per-flag capabilities (CapabilityTable)
    AggregateCursorResult,
    AggregateOut,
    WriteCommands,
    ScramSha1Authentication,
    FindCommand,
    ReadConcern,
    PartialIndexes,
    Collation,
    Views,
    ArrayFilters,
    ChangeStreams,
    RetryableWrites,
    Transactions,
    UpdateHint,
    LegacyOpcodes,
    TestCommands,
    FailPoints,

    // Release-bucketed behaviours (CapabilitySet)
    BasicCrud,
    TextSearch,
    UserManagementCommands,
    MaxTime,
    ListCollectionsCommand,
    ListIndexesCommand,
    CommandsThatWriteAcceptWriteConcern,
    Decimal128,
    Sessions,
    OpMsg,
    WildcardIndexes,
    MergeStage,
}

impl CapabilityId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityId::AggregateCursorResult => "aggregate-cursor-result",
            CapabilityId::AggregateOut => "aggregate-out",
            CapabilityId::WriteCommands => "write-commands",
            CapabilityId::ScramSha1Authentication => "scram-sha1-authentication",
            CapabilityId::FindCommand => "find-command",
            CapabilityId::ReadConcern => "read-concern",
            CapabilityId::PartialIndexes => "partial-indexes",
            CapabilityId::Collation => "collation",
            CapabilityId::Views => "views",
            CapabilityId::ArrayFilters => "array-filters",
            CapabilityId::ChangeStreams => "change-streams",
            CapabilityId::RetryableWrites => "retryable-writes",
            CapabilityId::Transactions => "transactions",
            CapabilityId::UpdateHint => "update-hint",
            CapabilityId::LegacyOpcodes => "legacy-opcodes",
            CapabilityId::TestCommands => "test-commands",
            CapabilityId::FailPoints => "fail-points",
            CapabilityId::BasicCrud => "basic-crud",
            CapabilityId::TextSearch => "text-search",
            CapabilityId::UserManagementCommands => "user-management-commands",
            CapabilityId::MaxTime => "max-time",
            CapabilityId::ListCollectionsCommand => "list-collections-command",
            CapabilityId::ListIndexesCommand => "list-indexes-command",
            CapabilityId::CommandsThatWriteAcceptWriteConcern => "commands-that-write-accept-write-concern",
            CapabilityId::Decimal128 => "decimal128",
            CapabilityId::Sessions => "sessions",
            CapabilityId::OpMsg => "op-msg",
            CapabilityId::WildcardIndexes => "wildcard-indexes",
            CapabilityId::MergeStage => "merge-stage",
        }
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether one capability is supported, and the version range behind the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub supported: bool,
    pub version_range: Option<VersionRange>,
}

impl Capability {
    /// Answer for an id no detector was registered for
    pub fn unknown(id: CapabilityId) -> Self {
        Self {
            id,
            supported: false,
            version_range: None,
        }
    }
}

/// The detectors and release buckets evaluated on every heartbeat
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    detectors: Vec<CapabilityDetector>,
    buckets: Vec<CapabilityBucket>,
}

static STANDARD_REGISTRY: Lazy<Arc<CapabilityRegistry>> =
    Lazy::new(|| Arc::new(CapabilityRegistry::new(default_detectors(), default_buckets())));

impl CapabilityRegistry {
    pub fn new(detectors: Vec<CapabilityDetector>, buckets: Vec<CapabilityBucket>) -> Self {
        Self { detectors, buckets }
    }

    /// The built-in catalogue, shared by every monitor that uses it
    pub fn standard() -> Arc<Self> {
        Arc::clone(&STANDARD_REGISTRY)
    }

    pub fn detectors(&self) -> &[CapabilityDetector] {
        &self.detectors
    }

    pub fn buckets(&self) -> &[CapabilityBucket] {
        &self.buckets
    }

    /// Distinct `(parameter, environment override)` pairs referenced by any
    /// detector or bucket, in registration order. A parameter checked both
    /// with and without an override appears once for each.
    pub fn runtime_parameters(&self) -> Vec<(String, Option<String>)> {
        let mut parameters: Vec<(String, Option<String>)> = Vec::new();
        let mut collect = |name: &str, env: Option<&str>| {
            let seen = parameters
                .iter()
                .any(|(existing, existing_env)| existing == name && existing_env.as_deref() == env);
            if !seen {
                parameters.push((name.to_string(), env.map(str::to_string)));
            }
        };

        for detector in &self.detectors {
            for dependency in detector.dependencies() {
                dependency.visit_runtime_parameters(&mut collect);
            }
        }
        for bucket in &self.buckets {
            bucket.dependency.visit_runtime_parameters(&mut collect);
        }

        parameters
    }

    pub fn evaluate(&self, context: &ProbeContext<'_>) -> NodeCapabilities {
        NodeCapabilities {
            table: CapabilityTable::build(&self.detectors, context),
            set: CapabilitySet::build(&self.buckets, context),
        }
    }
}

/// Capability facts computed for one node on one heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub table: CapabilityTable,
    pub set: CapabilitySet,
}

impl NodeCapabilities {
    pub fn supports(&self, id: CapabilityId) -> bool {
        self.table.is_supported(id) || self.set.contains(id)
    }
}
