use crate::capability::CapabilityId;
use crate::dependency::CapabilityDependency;
use crate::probe::ProbeContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A group of capabilities that arrived together, and the condition that
/// turns them on
#[derive(Debug, Clone)]
pub struct CapabilityBucket {
    pub dependency: CapabilityDependency,
    pub ids: Vec<CapabilityId>,
}

impl CapabilityBucket {
    pub fn new(dependency: CapabilityDependency, ids: Vec<CapabilityId>) -> Self {
        Self { dependency, ids }
    }
}

/// Capabilities known to be present, answered only as yes/no
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilitySet {
    ids: BTreeSet<CapabilityId>,
}

impl CapabilitySet {
    /// Every id whose bucket's dependency is met
    pub fn build(buckets: &[CapabilityBucket], context: &ProbeContext<'_>) -> Self {
        let ids = buckets
            .iter()
            .filter(|bucket| bucket.dependency.is_met(context))
            .flat_map(|bucket| bucket.ids.iter().copied())
            .collect();
        Self { ids }
    }

    pub fn contains(&self, id: CapabilityId) -> bool {
        self.ids.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = CapabilityId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Built-in release buckets
pub fn default_buckets() -> Vec<CapabilityBucket> {
    use CapabilityDependency as Dep;
    use CapabilityId::*;

    vec![
        CapabilityBucket::new(Dep::And(Vec::new()), vec![BasicCrud]),
        CapabilityBucket::new(Dep::since(2, 4, 0), vec![TextSearch]),
        CapabilityBucket::new(Dep::since(2, 6, 0), vec![UserManagementCommands, MaxTime]),
        CapabilityBucket::new(Dep::since(3, 0, 0), vec![ListCollectionsCommand, ListIndexesCommand]),
        CapabilityBucket::new(Dep::since(3, 4, 0), vec![CommandsThatWriteAcceptWriteConcern, Decimal128]),
        CapabilityBucket::new(Dep::since(3, 6, 0), vec![Sessions]),
        CapabilityBucket::new(Dep::wire_version_from(6), vec![OpMsg]),
        CapabilityBucket::new(Dep::since(4, 2, 0), vec![WildcardIndexes, MergeStage]),
    ]
}
