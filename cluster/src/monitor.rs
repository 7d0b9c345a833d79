use crate::capability::CapabilityRegistry;
use crate::interruptible_wait::{InterruptibleWait, WaitOutcome};
use crate::listener::{DescriptionChangedEvent, ListenerRegistry, MonitorListener, Subscription};
use crate::node_description::{HeartbeatResult, NodeDescription};
use crate::probe::{ProbeConnection, ProbeConnectionFactory, ProbeContext, ProbeTransport};
use crate::settings::MonitorSettings;
use crate::smoother::{round_to_millis, RoundTripSmoother};
use docdb_common::types::{Endpoint, NodeId};
use docdb_common::{DocDbError, Result};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Probe attempts per heartbeat: the first try plus one retry on a fresh connection
pub const MAX_HEARTBEAT_ATTEMPTS: u32 = 2;

/// Lifecycle of a [`NodeMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

/// State shared between the monitor handle and its heartbeat loop
struct MonitorShared {
    node_id: NodeId,
    settings: MonitorSettings,
    description: watch::Sender<Arc<NodeDescription>>,
    publish_lock: Mutex<()>,
    listeners: ListenerRegistry,
    next_wait: Mutex<Arc<InterruptibleWait>>,
    cancel: CancellationToken,
}

impl MonitorShared {
    fn current(&self) -> Arc<NodeDescription> {
        Arc::clone(&self.description.borrow())
    }

    fn endpoint(&self) -> &Endpoint {
        &self.node_id.endpoint
    }

    /// Publish `next` if it differs from the current description.
    ///
    /// Read, compare, swap and notify happen under one lock so listeners see
    /// transitions in order. Returns whether anything was published.
    fn publish(&self, next: Arc<NodeDescription>) -> Result<bool> {
        let _guard = self.publish_lock.lock();

        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        let previous = self.current();
        if Arc::ptr_eq(&previous, &next) || *previous == *next {
            return Ok(false);
        }
        if next.revision() <= previous.revision() {
            return Err(DocDbError::Internal {
                message: format!(
                    "description revision went from {} to {} for {}",
                    previous.revision(),
                    next.revision(),
                    self.node_id
                ),
            });
        }

        self.description.send_replace(Arc::clone(&next));

        info!(
            endpoint = %self.endpoint(),
            revision = next.revision(),
            "Node description changed: {}/{} -> {}/{}",
            previous.state(),
            previous.server_type(),
            next.state(),
            next.server_type()
        );
        counter!("docdb.monitor.description_changes").increment(1);

        let event = DescriptionChangedEvent {
            previous,
            current: next,
        };
        self.listeners
            .notify("description_changed", |l| l.description_changed(&event));

        Ok(true)
    }

    /// Replace the pending wait with a fresh one sized to the heartbeat interval
    fn reset_wait(&self) -> Arc<InterruptibleWait> {
        let wait = Arc::new(InterruptibleWait::with_minimum(
            self.settings.heartbeat_interval(),
            self.settings.min_heartbeat_interval(),
        ));
        *self.next_wait.lock() = Arc::clone(&wait);
        wait
    }
}

struct Lifecycle {
    state: MonitorState,
    task: Option<JoinHandle<()>>,
}

/// Background monitor for one node.
///
/// Probes the node every heartbeat interval over a dedicated connection and
/// publishes a new [`NodeDescription`] whenever what it observes changes.
/// Probe failures are absorbed into the description; they never surface to
/// readers of [`NodeMonitor::current_description`].
pub struct NodeMonitor {
    shared: Arc<MonitorShared>,
    connection_factory: Arc<dyn ProbeConnectionFactory>,
    transport: Arc<dyn ProbeTransport>,
    capabilities: Option<Arc<CapabilityRegistry>>,
    lifecycle: Mutex<Lifecycle>,
}

impl NodeMonitor {
    pub fn new(
        node_id: NodeId,
        settings: MonitorSettings,
        connection_factory: Arc<dyn ProbeConnectionFactory>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Self {
        let initial = Arc::new(NodeDescription::new(node_id.clone()));
        let (description, _) = watch::channel(initial);
        let first_wait = InterruptibleWait::new(settings.heartbeat_interval());

        Self {
            shared: Arc::new(MonitorShared {
                node_id,
                settings,
                description,
                publish_lock: Mutex::new(()),
                listeners: ListenerRegistry::new(),
                next_wait: Mutex::new(Arc::new(first_wait)),
                cancel: CancellationToken::new(),
            }),
            connection_factory,
            transport,
            capabilities: None,
            lifecycle: Mutex::new(Lifecycle {
                state: MonitorState::Idle,
                task: None,
            }),
        }
    }

    /// Evaluate capabilities from `registry` on every successful heartbeat
    pub fn with_capabilities(mut self, registry: Arc<CapabilityRegistry>) -> Self {
        self.capabilities = Some(registry);
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.shared.node_id
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> MonitorState {
        self.lifecycle.lock().state
    }

    /// Latest published description; never blocks on the heartbeat loop
    pub fn current_description(&self) -> Arc<NodeDescription> {
        self.shared.current()
    }

    /// Receiver that is notified on every published description
    pub fn watch(&self) -> watch::Receiver<Arc<NodeDescription>> {
        self.shared.description.subscribe()
    }

    pub fn subscribe(&self, listener: Arc<dyn MonitorListener>) -> Subscription {
        self.shared.listeners.subscribe(listener)
    }

    /// Cut the current wait short so the next heartbeat runs soon
    pub fn request_heartbeat(&self) {
        self.shared.next_wait.lock().interrupt();
    }

    /// Spawn the heartbeat loop. Calling it again, or after `stop`, does nothing.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != MonitorState::Idle {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| DocDbError::Internal {
            message: format!("NodeMonitor::start requires a tokio runtime: {}", e),
        })?;

        let heartbeat_loop = HeartbeatLoop {
            shared: Arc::clone(&self.shared),
            connection_factory: Arc::clone(&self.connection_factory),
            transport: Arc::clone(&self.transport),
            capabilities: self.capabilities.clone(),
            connection: None,
            smoother: RoundTripSmoother::default(),
        };
        let span = info_span!("node_monitor", endpoint = %self.shared.endpoint());

        lifecycle.task = Some(runtime.spawn(heartbeat_loop.run().instrument(span)));
        lifecycle.state = MonitorState::Running;
        Ok(())
    }

    /// Cancel the heartbeat loop and wait for it to release its connection
    pub async fn stop(&self) {
        self.shared.cancel.cancel();

        let task = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = MonitorState::Stopped;
            lifecycle.task.take()
        };

        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(endpoint = %self.shared.endpoint(), "Node monitor loop panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for NodeMonitor {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// The background task. Owns the monitoring connection and the smoother.
struct HeartbeatLoop {
    shared: Arc<MonitorShared>,
    connection_factory: Arc<dyn ProbeConnectionFactory>,
    transport: Arc<dyn ProbeTransport>,
    capabilities: Option<Arc<CapabilityRegistry>>,
    connection: Option<Box<dyn ProbeConnection>>,
    smoother: RoundTripSmoother,
}

impl HeartbeatLoop {
    async fn run(mut self) {
        info!("Node monitor started");
        let cancel = self.shared.cancel.clone();

        while !cancel.is_cancelled() {
            let current = self.shared.current();
            let next = match self.heartbeat().await {
                Ok(result) => current.with_heartbeat_result(&result),
                Err(_) if cancel.is_cancelled() => break,
                Err(e) => {
                    debug!("Marking node disconnected: {}", e);
                    self.smoother.reset();
                    current.with_disconnected_state()
                }
            };

            if let Err(e) = self.shared.publish(next) {
                error!("Node monitor stopping after internal error: {}", e);
                break;
            }

            let wait = self.shared.reset_wait();
            if wait.wait(&cancel).await == WaitOutcome::Cancelled {
                break;
            }
        }

        self.discard_connection().await;
        info!("Node monitor stopped");
    }

    /// Probe the node, retrying once on a fresh connection
    async fn heartbeat(&mut self) -> Result<HeartbeatResult> {
        let mut attempt = 1;
        loop {
            match self.probe().await {
                Ok(result) => {
                    counter!("docdb.monitor.heartbeats.succeeded").increment(1);
                    return Ok(result);
                }
                // Only the monitor's own token stops the loop; a collaborator
                // reporting cancellation is an ordinary probe failure.
                Err(_) if self.shared.cancel.is_cancelled() => return Err(DocDbError::Cancelled),
                Err(e) => {
                    warn!(attempt, transient = e.is_transient(), "Heartbeat failed: {}", e);
                    counter!("docdb.monitor.heartbeats.failed").increment(1);
                    let endpoint = self.shared.endpoint();
                    self.shared
                        .listeners
                        .notify("heartbeat_failed", |l| l.heartbeat_failed(endpoint, &e));

                    self.discard_connection().await;
                    if attempt >= MAX_HEARTBEAT_ATTEMPTS {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn probe(&mut self) -> Result<HeartbeatResult> {
        let shared = &self.shared;
        let cancel = &shared.cancel;
        let timeout = shared.settings.heartbeat_timeout();

        if self.connection.is_none() {
            let factory = &self.connection_factory;
            let connection = bounded(cancel, timeout, "opening monitoring connection", async {
                let mut connection = factory.create(&shared.node_id).await?;
                connection.open().await?;
                Ok(connection)
            })
            .await?;
            debug!("Opened monitoring connection");
            self.connection = Some(connection);
        }
        let connection = self
            .connection
            .as_deref_mut()
            .ok_or_else(|| DocDbError::Internal {
                message: "monitoring connection missing after open".to_string(),
            })?;

        let transport = self.transport.as_ref();
        let endpoint = shared.endpoint();
        shared
            .listeners
            .notify("sending_heartbeat", |l| l.sending_heartbeat(endpoint));

        let started = Instant::now();
        let identity = bounded(cancel, timeout, "identity probe", transport.run_identity_probe(&mut *connection)).await?;
        let round_trip = started.elapsed();
        let build_info = bounded(cancel, timeout, "build-info probe", transport.run_build_info_probe(&mut *connection)).await?;

        let capabilities = match &self.capabilities {
            Some(registry) => {
                let context = bounded(
                    cancel,
                    timeout,
                    "runtime parameter probe",
                    ProbeContext::gather(&mut *connection, transport, &identity, &build_info, registry),
                )
                .await?;
                Some(registry.evaluate(&context))
            }
            None => None,
        };

        let average_round_trip_time = round_to_millis(self.smoother.add_sample(round_trip));
        histogram!("docdb.monitor.round_trip_ms").record(round_trip.as_secs_f64() * 1000.0);
        shared
            .listeners
            .notify("sent_heartbeat", |l| l.sent_heartbeat(endpoint, round_trip, &identity));

        Ok(HeartbeatResult {
            average_round_trip_time,
            identity,
            build_info,
            capabilities,
        })
    }

    /// Close and drop the monitoring connection, if any
    async fn discard_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            let timeout = self.shared.settings.heartbeat_timeout();
            if tokio::time::timeout(timeout, connection.close()).await.is_err() {
                debug!("Timed out sending close notice on monitoring connection");
            }
        }
    }
}

/// Run `operation` under the heartbeat timeout, giving up early on cancellation
async fn bounded<T, F>(cancel: &CancellationToken, timeout: Duration, what: &str, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DocDbError::Cancelled),
        outcome = tokio::time::timeout(timeout, operation) => match outcome {
            Ok(result) => result,
            Err(_) => Err(DocDbError::Timeout {
                message: format!("{} exceeded {:?}", what, timeout),
            }),
        },
    }
}
