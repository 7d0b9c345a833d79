pub mod config;

use docdb_cluster::{
    CapabilityId, CapabilityRegistry, ClusterAggregator, ClusterTopology, MonitorListener,
    NodeDescription, NodeMonitor, ProbeConnectionFactory, ProbeTransport, Subscription,
};
use docdb_common::types::{ClusterId, Endpoint, NodeId};
use docdb_common::{DocDbError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

pub use config::*;

/// One monitored node and the subscription that feeds the aggregator
struct MonitoredNode {
    monitor: NodeMonitor,
    _subscription: Subscription,
}

/// Client handle that keeps every seed node under monitoring
pub struct Client {
    cluster_id: ClusterId,
    aggregator: Arc<ClusterAggregator>,
    nodes: Vec<MonitoredNode>,
}

impl Client {
    /// Start one monitor per configured host. Must be called inside a tokio runtime.
    #[instrument(skip_all, fields(hosts = config.hosts.len()))]
    pub fn connect(
        config: ClientConfig,
        connection_factory: Arc<dyn ProbeConnectionFactory>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let settings = config.monitor_settings()?;
        let cluster_id = ClusterId::new();
        let aggregator = Arc::new(ClusterAggregator::new(cluster_id));

        let mut nodes = Vec::new();
        for endpoint in config.endpoints()? {
            let mut monitor = NodeMonitor::new(
                NodeId::new(cluster_id, endpoint),
                settings,
                Arc::clone(&connection_factory),
                Arc::clone(&transport),
            );
            if config.detect_capabilities {
                monitor = monitor.with_capabilities(CapabilityRegistry::standard());
            }

            aggregator.add_node(monitor.current_description());
            let listener: Arc<dyn MonitorListener> = aggregator.clone();
            let subscription = monitor.subscribe(listener);
            nodes.push(MonitoredNode {
                monitor,
                _subscription: subscription,
            });
        }

        for node in &nodes {
            node.monitor.start()?;
        }

        info!(cluster_id = %cluster_id, "Client monitoring {} node(s)", nodes.len());
        Ok(Self {
            cluster_id,
            aggregator,
            nodes,
        })
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn topology(&self) -> ClusterTopology {
        self.aggregator.topology()
    }

    /// Latest description of the node at `endpoint`
    pub fn description(&self, endpoint: &Endpoint) -> Option<Arc<NodeDescription>> {
        self.monitor(endpoint).map(NodeMonitor::current_description)
    }

    /// Whether the node at `endpoint` supports `capability`, as of its last heartbeat.
    ///
    /// Unknown endpoints and nodes without capability data answer `false`.
    pub fn supports(&self, endpoint: &Endpoint, capability: CapabilityId) -> bool {
        self.description(endpoint)
            .and_then(|d| d.capabilities().map(|c| c.supports(capability)))
            .unwrap_or(false)
    }

    /// Ask every monitor to probe its node soon
    pub fn request_heartbeat(&self) {
        for node in &self.nodes {
            node.monitor.request_heartbeat();
        }
    }

    /// Wait until the node at `endpoint` reports a connected state
    pub async fn wait_for_connection(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Arc<NodeDescription>> {
        let monitor = self.monitor(endpoint).ok_or_else(|| DocDbError::Configuration {
            message: format!("{} is not a monitored host", endpoint),
        })?;
        let mut updates = monitor.watch();

        let connected = tokio::time::timeout(timeout, updates.wait_for(|d| d.is_connected()))
            .await
            .map_err(|_| DocDbError::Timeout {
                message: format!("{} did not connect within {:?}", endpoint, timeout),
            })?
            .map_err(|_| DocDbError::Cancelled)?;
        let description = Arc::clone(&connected);
        Ok(description)
    }

    /// Stop every monitor and wait for them to release their connections
    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.monitor.stop().await;
        }
        info!(cluster_id = %self.cluster_id, "Client shut down");
    }

    fn monitor(&self, endpoint: &Endpoint) -> Option<&NodeMonitor> {
        self.nodes
            .iter()
            .map(|node| &node.monitor)
            .find(|monitor| &monitor.node_id().endpoint == endpoint)
    }
}

/// Convenience client builder
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.hosts.push(host.into());
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn min_heartbeat_interval(mut self, minimum: Duration) -> Self {
        self.config.min_heartbeat_interval_ms = minimum.as_millis() as u64;
        self
    }

    pub fn detect_capabilities(mut self, enabled: bool) -> Self {
        self.config.detect_capabilities = enabled;
        self
    }

    pub fn build(
        self,
        connection_factory: Arc<dyn ProbeConnectionFactory>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Result<Client> {
        Client::connect(self.config, connection_factory, transport)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
