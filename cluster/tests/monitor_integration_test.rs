use async_trait::async_trait;
use docdb_cluster::*;
use docdb_common::types::*;
use docdb_common::{DocDbError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct StubConnection {
    endpoint: Endpoint,
}

#[async_trait]
impl ProbeConnection for StubConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

struct StubFactory;

#[async_trait]
impl ProbeConnectionFactory for StubFactory {
    async fn create(&self, node_id: &NodeId) -> Result<Box<dyn ProbeConnection>> {
        Ok(Box::new(StubConnection {
            endpoint: node_id.endpoint.clone(),
        }))
    }
}

/// A node that can be taken up and down, or made slow
struct SwitchableNode {
    up: AtomicBool,
    delay: Duration,
    identity_calls: AtomicUsize,
}

impl SwitchableNode {
    fn new(delay: Duration) -> Self {
        Self {
            up: AtomicBool::new(true),
            delay,
            identity_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProbeTransport for SwitchableNode {
    async fn run_identity_probe(&self, _: &mut dyn ProbeConnection) -> Result<IdentityProbeResult> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.up.load(Ordering::SeqCst) {
            return Err(DocDbError::Network {
                message: "connection refused".to_string(),
            });
        }
        Ok(IdentityProbeResult {
            server_type: ServerType::ReplicaPrimary,
            replica_group: Some(ReplicaGroupConfig {
                name: "rg0".to_string(),
                version: Some(1),
                members: vec!["db1:27017".parse().unwrap()],
                primary: Some("db1:27017".parse().unwrap()),
            }),
            tags: None,
            wire_version_range: WireVersionRange::new(0, 17).unwrap(),
            speculative_hints: BTreeMap::new(),
        })
    }

    async fn run_build_info_probe(&self, _: &mut dyn ProbeConnection) -> Result<BuildInfoResult> {
        Ok(BuildInfoResult {
            version: ServerVersion::new(6, 0, 0),
        })
    }
}

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<DescriptionChangedEvent>>,
    failures: Mutex<Vec<DocDbError>>,
    sent: AtomicUsize,
}

impl MonitorListener for Recorder {
    fn sent_heartbeat(&self, _endpoint: &Endpoint, _round_trip: Duration, _identity: &IdentityProbeResult) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn heartbeat_failed(&self, _endpoint: &Endpoint, error: &DocDbError) {
        self.failures.lock().push(error.clone());
    }

    fn description_changed(&self, event: &DescriptionChangedEvent) {
        self.changes.lock().push(event.clone());
    }
}

struct PanicsOnChange;

impl MonitorListener for PanicsOnChange {
    fn description_changed(&self, _event: &DescriptionChangedEvent) {
        panic!("listener failure");
    }
}

fn fast_settings() -> MonitorSettings {
    MonitorSettings::new(Duration::from_millis(20), Duration::from_secs(1))
        .unwrap()
        .with_min_heartbeat_interval(Duration::from_millis(5))
        .unwrap()
}

fn node_id() -> NodeId {
    NodeId::new(ClusterId::new(), "db1:27017".parse().unwrap())
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_connected_primary_with_capabilities() {
    init_tracing();
    let node = Arc::new(SwitchableNode::new(Duration::ZERO));
    let monitor = NodeMonitor::new(node_id(), fast_settings(), Arc::new(StubFactory), node.clone())
        .with_capabilities(CapabilityRegistry::standard());
    assert_ok!(monitor.start());

    let mut updates = monitor.watch();
    let description = tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|d| d.is_connected()))
        .await
        .unwrap()
        .unwrap()
        .clone();

    assert_eq!(description.state(), ServerState::Connected);
    assert_eq!(description.server_type(), ServerType::ReplicaPrimary);
    assert_eq!(description.version(), Some(ServerVersion::new(6, 0, 0)));
    assert_eq!(description.wire_version_range(), Some(WireVersionRange::new(0, 17).unwrap()));
    assert_eq!(description.replica_group().map(|g| g.name.as_str()), Some("rg0"));
    assert_eq!(description.average_round_trip_time().subsec_nanos() % 1_000_000, 0);
    assert!(description.is_usable());

    let capabilities = description.capabilities().expect("capabilities evaluated");
    assert!(capabilities.supports(CapabilityId::Transactions));
    assert!(capabilities.supports(CapabilityId::Sessions));
    assert!(!capabilities.supports(CapabilityId::LegacyOpcodes));

    monitor.stop().await;
}

#[tokio::test]
async fn test_revisions_increase_while_flapping() {
    init_tracing();
    let node = Arc::new(SwitchableNode::new(Duration::ZERO));
    let recorder = Arc::new(Recorder::default());
    let monitor = NodeMonitor::new(node_id(), fast_settings(), Arc::new(StubFactory), node.clone());
    let _subscription = monitor.subscribe(recorder.clone());
    assert_ok!(monitor.start());

    let expected = [
        ServerState::Connected,
        ServerState::Disconnected,
        ServerState::Connected,
        ServerState::Disconnected,
        ServerState::Connected,
    ];
    for (i, state) in expected.iter().enumerate() {
        wait_until(|| {
            recorder
                .changes
                .lock()
                .last()
                .map_or(false, |e| e.current.state() == *state)
        })
        .await;
        if i + 1 < expected.len() {
            node.up.fetch_xor(true, Ordering::SeqCst);
        }
    }
    monitor.stop().await;

    let changes = recorder.changes.lock();
    for event in changes.iter() {
        assert_eq!(event.current.revision(), event.previous.revision() + 1);
    }
    for pair in changes.windows(2) {
        assert!(pair[1].current.revision() > pair[0].current.revision());
        assert!(Arc::ptr_eq(&pair[1].previous, &pair[0].current));
    }

    // Latency-only updates may repeat a state
    let mut states: Vec<ServerState> = changes.iter().map(|e| e.current.state()).collect();
    states.dedup();
    assert_eq!(states, expected.to_vec());
}

#[tokio::test]
async fn test_disconnect_fires_two_failures_per_cycle() {
    init_tracing();
    let node = Arc::new(SwitchableNode::new(Duration::ZERO));
    node.up.store(false, Ordering::SeqCst);
    let recorder = Arc::new(Recorder::default());
    let settings = MonitorSettings::new(Duration::from_secs(60), Duration::from_secs(1)).unwrap();
    let monitor = NodeMonitor::new(node_id(), settings, Arc::new(StubFactory), node.clone());
    let _subscription = monitor.subscribe(recorder.clone());
    assert_ok!(monitor.start());

    wait_until(|| recorder.failures.lock().len() >= 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.failures.lock().len(), 2);
    assert_eq!(node.identity_calls.load(Ordering::SeqCst), 2);
    assert!(recorder.changes.lock().is_empty());
    assert_eq!(monitor.current_description().state(), ServerState::Disconnected);

    monitor.stop().await;
}

#[tokio::test]
async fn test_slow_probe_times_out() {
    init_tracing();
    let node = Arc::new(SwitchableNode::new(Duration::from_secs(5)));
    let recorder = Arc::new(Recorder::default());
    let settings = MonitorSettings::new(Duration::from_secs(60), Duration::from_millis(30)).unwrap();
    let monitor = NodeMonitor::new(node_id(), settings, Arc::new(StubFactory), node.clone());
    let _subscription = monitor.subscribe(recorder.clone());
    assert_ok!(monitor.start());

    wait_until(|| recorder.failures.lock().len() >= 2).await;
    assert!(recorder
        .failures
        .lock()
        .iter()
        .all(|e| matches!(e, DocDbError::Timeout { .. })));
    assert_eq!(monitor.current_description().state(), ServerState::Disconnected);

    monitor.stop().await;
}

#[tokio::test]
async fn test_panicking_listener_does_not_stop_monitoring() {
    init_tracing();
    let node = Arc::new(SwitchableNode::new(Duration::ZERO));
    let recorder = Arc::new(Recorder::default());
    let monitor = NodeMonitor::new(node_id(), fast_settings(), Arc::new(StubFactory), node.clone());
    let _panics = monitor.subscribe(Arc::new(PanicsOnChange));
    let _recorder = monitor.subscribe(recorder.clone());
    assert_ok!(monitor.start());

    wait_until(|| recorder.changes.lock().len() >= 1).await;
    node.up.store(false, Ordering::SeqCst);
    wait_until(|| recorder.changes.lock().len() >= 2).await;

    assert_eq!(monitor.state(), MonitorState::Running);
    assert_eq!(monitor.current_description().state(), ServerState::Disconnected);

    monitor.stop().await;
}

#[tokio::test]
async fn test_nothing_published_after_stop() {
    init_tracing();
    let node = Arc::new(SwitchableNode::new(Duration::ZERO));
    let recorder = Arc::new(Recorder::default());
    let monitor = NodeMonitor::new(node_id(), fast_settings(), Arc::new(StubFactory), node.clone());
    let _subscription = monitor.subscribe(recorder.clone());
    assert_ok!(monitor.start());

    wait_until(|| recorder.sent.load(Ordering::SeqCst) >= 3).await;
    monitor.stop().await;

    let published = recorder.changes.lock().len();
    let calls = node.identity_calls.load(Ordering::SeqCst);
    let last = monitor.current_description();

    node.up.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.changes.lock().len(), published);
    assert_eq!(node.identity_calls.load(Ordering::SeqCst), calls);
    assert!(Arc::ptr_eq(&last, &monitor.current_description()));
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn test_unsubscribed_listener_sees_nothing() {
    init_tracing();
    let node = Arc::new(SwitchableNode::new(Duration::ZERO));
    let recorder = Arc::new(Recorder::default());
    let monitor = NodeMonitor::new(node_id(), fast_settings(), Arc::new(StubFactory), node.clone());
    monitor.subscribe(recorder.clone()).unsubscribe();
    assert_ok!(monitor.start());

    let mut updates = monitor.watch();
    tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|d| d.is_connected()))
        .await
        .unwrap()
        .unwrap();

    assert!(recorder.changes.lock().is_empty());
    assert_eq!(recorder.sent.load(Ordering::SeqCst), 0);

    monitor.stop().await;
}
