use crate::capability::{Capability, CapabilityId};
use crate::dependency::CapabilityDependency;
use crate::probe::ProbeContext;

/// Decides one capability from an ordered list of dependencies.
///
/// The two possible answers are built once and handed out by reference.
#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    dependencies: Vec<CapabilityDependency>,
    supported: Capability,
    not_supported: Capability,
}

impl CapabilityDetector {
    pub fn new(id: CapabilityId, dependencies: Vec<CapabilityDependency>) -> Self {
        let version_range = dependencies.iter().find_map(CapabilityDependency::version_range);

        Self {
            dependencies,
            supported: Capability {
                id,
                supported: true,
                version_range,
            },
            not_supported: Capability {
                id,
                supported: false,
                version_range,
            },
        }
    }

    pub fn id(&self) -> CapabilityId {
        self.supported.id
    }

    pub fn dependencies(&self) -> &[CapabilityDependency] {
        &self.dependencies
    }

    /// Supported iff every dependency is met; stops at the first unmet one
    pub fn detect(&self, context: &ProbeContext<'_>) -> &Capability {
        if self.dependencies.iter().all(|d| d.is_met(context)) {
            &self.supported
        } else {
            &self.not_supported
        }
    }
}
