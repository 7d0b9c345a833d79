use crate::capability::CapabilityRegistry;
use crate::node_description::ServerType;
use async_trait::async_trait;
use docdb_common::types::*;
use docdb_common::{DocDbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Result of the identity/role probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProbeResult {
    pub server_type: ServerType,
    pub replica_group: Option<ReplicaGroupConfig>,
    pub tags: Option<TagSet>,
    pub wire_version_range: WireVersionRange,
    /// Extra fields the node volunteered in its identity reply
    #[serde(default)]
    pub speculative_hints: BTreeMap<String, Value>,
}

/// Result of the build-info probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfoResult {
    pub version: ServerVersion,
}

/// A connection dedicated to monitoring one node.
///
/// Never shared with operation traffic; owned by the heartbeat loop.
#[async_trait]
pub trait ProbeConnection: Send {
    fn endpoint(&self) -> &Endpoint;

    /// Perform the connection handshake
    async fn open(&mut self) -> Result<()>;

    /// Best-effort close notice; failures are not reported
    async fn close(&mut self);
}

/// Produces monitoring connections
#[async_trait]
pub trait ProbeConnectionFactory: Send + Sync {
    async fn create(&self, node_id: &NodeId) -> Result<Box<dyn ProbeConnection>>;
}

/// Issues probe commands over a monitoring connection
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn run_identity_probe(&self, connection: &mut dyn ProbeConnection) -> Result<IdentityProbeResult>;

    async fn run_build_info_probe(&self, connection: &mut dyn ProbeConnection) -> Result<BuildInfoResult>;

    /// Read one runtime parameter. `Ok(None)` means the node does not expose it.
    async fn run_get_parameter(
        &self,
        _connection: &mut dyn ProbeConnection,
        _name: &str,
    ) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Everything a capability check may look at, for one probe cycle.
///
/// Built fresh on every heartbeat and never persisted.
#[derive(Debug, Clone)]
pub struct ProbeContext<'a> {
    identity: &'a IdentityProbeResult,
    build_info: &'a BuildInfoResult,
    role: ServerType,
    parameters: HashMap<String, Value>,
    overrides: HashMap<String, String>,
}

impl<'a> ProbeContext<'a> {
    pub fn new(identity: &'a IdentityProbeResult, build_info: &'a BuildInfoResult) -> Self {
        Self {
            identity,
            build_info,
            role: identity.server_type,
            parameters: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    /// Build a context, fetching every runtime parameter the registry's
    /// checks reference.
    ///
    /// Every referenced override variable is read from the environment. A
    /// parameter is fetched from the node unless each check on it is covered
    /// by a set override, or the identity probe already volunteered it. A
    /// parameter the node refuses to report is treated as absent.
    pub async fn gather(
        connection: &mut dyn ProbeConnection,
        transport: &dyn ProbeTransport,
        identity: &'a IdentityProbeResult,
        build_info: &'a BuildInfoResult,
        registry: &CapabilityRegistry,
    ) -> Result<ProbeContext<'a>> {
        let mut context = ProbeContext::new(identity, build_info);
        let references = registry.runtime_parameters();

        for var in references.iter().filter_map(|(_, var)| var.as_ref()) {
            if let Ok(value) = std::env::var(var) {
                context.overrides.insert(var.clone(), value);
            }
        }

        for (i, (parameter, _)) in references.iter().enumerate() {
            if references[..i].iter().any(|(name, _)| name == parameter) {
                continue;
            }
            let needs_node = references
                .iter()
                .filter(|(name, _)| name == parameter)
                .any(|(_, var)| var.as_ref().map_or(true, |var| !context.overrides.contains_key(var)));

            if !needs_node
                || identity.speculative_hints.contains_key(parameter)
                || context.parameters.contains_key(parameter)
            {
                continue;
            }

            match transport.run_get_parameter(connection, parameter).await {
                Ok(Some(value)) => {
                    context.parameters.insert(parameter.clone(), value);
                }
                Ok(None) => {}
                Err(e @ (DocDbError::Network { .. } | DocDbError::Timeout { .. } | DocDbError::Cancelled)) => {
                    return Err(e)
                }
                Err(e) => {
                    debug!("Runtime parameter '{}' unavailable: {}", parameter, e);
                }
            }
        }

        Ok(context)
    }

    pub fn with_role(mut self, role: ServerType) -> Self {
        self.role = role;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_override(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(var.into(), value.into());
        self
    }

    pub fn identity(&self) -> &IdentityProbeResult {
        self.identity
    }

    pub fn build_info(&self) -> &BuildInfoResult {
        self.build_info
    }

    pub fn server_version(&self) -> ServerVersion {
        self.build_info.version
    }

    pub fn wire_version_range(&self) -> WireVersionRange {
        self.identity.wire_version_range
    }

    pub fn role(&self) -> ServerType {
        self.role
    }

    /// A runtime parameter, from the fetched snapshot or the identity hints
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .get(name)
            .or_else(|| self.identity.speculative_hints.get(name))
    }

    pub fn env_override(&self, var: &str) -> Option<&str> {
        self.overrides.get(var).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityId;
    use crate::dependency::CapabilityDependency;
    use crate::detector::CapabilityDetector;
    use parking_lot::Mutex;
    use serde_json::json;

    struct NullConnection {
        endpoint: Endpoint,
    }

    #[async_trait]
    impl ProbeConnection for NullConnection {
        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    struct ParameterTransport {
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProbeTransport for ParameterTransport {
        async fn run_identity_probe(&self, _: &mut dyn ProbeConnection) -> Result<IdentityProbeResult> {
            unreachable!()
        }

        async fn run_build_info_probe(&self, _: &mut dyn ProbeConnection) -> Result<BuildInfoResult> {
            unreachable!()
        }

        async fn run_get_parameter(&self, _: &mut dyn ProbeConnection, name: &str) -> Result<Option<Value>> {
            self.requested.lock().push(name.to_string());
            match name {
                "featureA" => Ok(Some(json!(true))),
                "shared" => Ok(Some(json!(false))),
                "restricted" => Err(DocDbError::Protocol {
                    message: "not authorized".to_string(),
                }),
                _ => Ok(None),
            }
        }
    }

    fn identity_with_hint() -> IdentityProbeResult {
        IdentityProbeResult {
            server_type: ServerType::Standalone,
            replica_group: None,
            tags: None,
            wire_version_range: WireVersionRange::new(0, 17).unwrap(),
            speculative_hints: BTreeMap::from([("hinted".to_string(), json!("1"))]),
        }
    }

    #[tokio::test]
    async fn test_gather_fetches_referenced_parameters() {
        let registry = CapabilityRegistry::new(
            vec![
                CapabilityDetector::new(
                    CapabilityId::TestCommands,
                    vec![CapabilityDependency::runtime_parameter("featureA")],
                ),
                CapabilityDetector::new(
                    CapabilityId::FailPoints,
                    vec![CapabilityDependency::And(vec![
                        CapabilityDependency::runtime_parameter("hinted"),
                        CapabilityDependency::runtime_parameter("restricted"),
                    ])],
                ),
            ],
            Vec::new(),
        );
        let transport = ParameterTransport {
            requested: Mutex::new(Vec::new()),
        };
        let mut connection = NullConnection {
            endpoint: "db1".parse().unwrap(),
        };
        let identity = identity_with_hint();
        let build_info = BuildInfoResult {
            version: ServerVersion::new(6, 0, 0),
        };

        let context = ProbeContext::gather(&mut connection, &transport, &identity, &build_info, &registry)
            .await
            .unwrap();

        assert_eq!(*transport.requested.lock(), vec!["featureA", "restricted"]);
        assert_eq!(context.parameter("featureA"), Some(&json!(true)));
        assert_eq!(context.parameter("hinted"), Some(&json!("1")));
        assert_eq!(context.parameter("restricted"), None);
    }

    #[tokio::test]
    async fn test_gather_honours_override_alongside_plain_check() {
        const VAR: &str = "DOCDB_GATHER_TEST_SHARED";
        std::env::set_var(VAR, "1");

        let plain = || {
            CapabilityDetector::new(
                CapabilityId::TestCommands,
                vec![CapabilityDependency::runtime_parameter("shared")],
            )
        };
        let overridden = || {
            CapabilityDetector::new(
                CapabilityId::FailPoints,
                vec![CapabilityDependency::runtime_parameter_with_override("shared", VAR)],
            )
        };
        let identity = identity_with_hint();
        let build_info = BuildInfoResult {
            version: ServerVersion::new(6, 0, 0),
        };

        for detectors in [vec![plain(), overridden()], vec![overridden(), plain()]] {
            let registry = CapabilityRegistry::new(detectors, Vec::new());
            let transport = ParameterTransport {
                requested: Mutex::new(Vec::new()),
            };
            let mut connection = NullConnection {
                endpoint: "db1".parse().unwrap(),
            };

            let context = ProbeContext::gather(&mut connection, &transport, &identity, &build_info, &registry)
                .await
                .unwrap();
            let capabilities = registry.evaluate(&context);

            assert_eq!(*transport.requested.lock(), vec!["shared"]);
            assert!(capabilities.table.is_supported(CapabilityId::FailPoints));
            assert!(!capabilities.table.is_supported(CapabilityId::TestCommands));
        }

        std::env::remove_var(VAR);
    }

    #[tokio::test]
    async fn test_gather_skips_node_when_every_check_is_overridden() {
        const VAR: &str = "DOCDB_GATHER_TEST_ONLY_OVERRIDE";
        std::env::set_var(VAR, "0");

        let registry = CapabilityRegistry::new(
            vec![CapabilityDetector::new(
                CapabilityId::FailPoints,
                vec![CapabilityDependency::runtime_parameter_with_override("featureA", VAR)],
            )],
            Vec::new(),
        );
        let transport = ParameterTransport {
            requested: Mutex::new(Vec::new()),
        };
        let mut connection = NullConnection {
            endpoint: "db1".parse().unwrap(),
        };
        let identity = identity_with_hint();
        let build_info = BuildInfoResult {
            version: ServerVersion::new(6, 0, 0),
        };

        let context = ProbeContext::gather(&mut connection, &transport, &identity, &build_info, &registry)
            .await
            .unwrap();
        std::env::remove_var(VAR);

        assert!(transport.requested.lock().is_empty());
        assert!(!registry.evaluate(&context).table.is_supported(CapabilityId::FailPoints));
    }

    #[test]
    fn test_context_defaults_role_from_identity() {
        let identity = identity_with_hint();
        let build_info = BuildInfoResult {
            version: ServerVersion::new(4, 4, 0),
        };
        let context = ProbeContext::new(&identity, &build_info);
        assert_eq!(context.role(), ServerType::Standalone);
        assert_eq!(context.server_version(), ServerVersion::new(4, 4, 0));
        assert_eq!(context.with_role(ServerType::RouterNode).role(), ServerType::RouterNode);
    }
}
