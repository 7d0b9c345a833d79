use crate::capability::{Capability, CapabilityId};
use crate::dependency::CapabilityDependency;
use crate::detector::CapabilityDetector;
use crate::node_description::ServerType;
use crate::probe::ProbeContext;
use serde::{Deserialize, Serialize};

/// Environment variable that forces the test-command checks on or off
pub const TEST_COMMANDS_ENV_VAR: &str = "DOCDB_ENABLE_TEST_COMMANDS";

/// One capability fact per registered detector, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityTable {
    facts: Vec<Capability>,
}

impl CapabilityTable {
    pub fn build(detectors: &[CapabilityDetector], context: &ProbeContext<'_>) -> Self {
        Self {
            facts: detectors.iter().map(|d| *d.detect(context)).collect(),
        }
    }

    /// The fact for `id`, or an unsupported answer if no detector covers it
    pub fn get(&self, id: CapabilityId) -> Capability {
        self.facts
            .iter()
            .find(|fact| fact.id == id)
            .copied()
            .unwrap_or_else(|| Capability::unknown(id))
    }

    pub fn is_supported(&self, id: CapabilityId) -> bool {
        self.get(id).supported
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.facts.iter()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

fn test_commands_enabled() -> CapabilityDependency {
    CapabilityDependency::runtime_parameter_with_override("enableTestCommands", TEST_COMMANDS_ENV_VAR)
}

/// Built-in per-flag detectors
pub fn default_detectors() -> Vec<CapabilityDetector> {
    use CapabilityDependency as Dep;
    use CapabilityId::*;

    vec![
        CapabilityDetector::new(AggregateCursorResult, vec![Dep::since(2, 6, 0)]),
        CapabilityDetector::new(AggregateOut, vec![Dep::since(2, 6, 0)]),
        CapabilityDetector::new(WriteCommands, vec![Dep::since(2, 6, 0), Dep::wire_version_from(2)]),
        CapabilityDetector::new(ScramSha1Authentication, vec![Dep::since(3, 0, 0)]),
        CapabilityDetector::new(FindCommand, vec![Dep::since(3, 2, 0)]),
        CapabilityDetector::new(ReadConcern, vec![Dep::since(3, 2, 0)]),
        CapabilityDetector::new(PartialIndexes, vec![Dep::since(3, 2, 0)]),
        CapabilityDetector::new(Collation, vec![Dep::since(3, 4, 0)]),
        CapabilityDetector::new(Views, vec![Dep::since(3, 4, 0)]),
        CapabilityDetector::new(ArrayFilters, vec![Dep::since(3, 6, 0)]),
        CapabilityDetector::new(
            ChangeStreams,
            vec![Dep::since(3, 6, 0), Dep::NodeRoleIsNot(ServerType::Standalone)],
        ),
        CapabilityDetector::new(
            RetryableWrites,
            vec![Dep::since(3, 6, 0), Dep::NodeRoleIsNot(ServerType::Standalone)],
        ),
        // Replica groups got transactions in 4.0, routed clusters in 4.2
        CapabilityDetector::new(
            Transactions,
            vec![
                Dep::NodeRoleIsNot(ServerType::Standalone),
                Dep::Or(vec![
                    Dep::And(vec![Dep::since(4, 0, 0), Dep::NodeRoleIsNot(ServerType::RouterNode)]),
                    Dep::since(4, 2, 0),
                ]),
            ],
        ),
        CapabilityDetector::new(UpdateHint, vec![Dep::wire_version_from(8)]),
        CapabilityDetector::new(LegacyOpcodes, vec![Dep::WireVersionRange { min: 0, max: Some(13) }]),
        CapabilityDetector::new(TestCommands, vec![test_commands_enabled()]),
        CapabilityDetector::new(FailPoints, vec![Dep::since(2, 4, 0), test_commands_enabled()]),
    ]
}
