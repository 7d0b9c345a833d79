use docdb_common::{DocDbError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Heartbeat pacing for a node monitor.
///
/// Immutable once built; the `with_*` helpers return a validated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MonitorSettingsConfig", into = "MonitorSettingsConfig")]
pub struct MonitorSettings {
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    min_heartbeat_interval: Duration,
}

impl MonitorSettings {
    pub fn new(heartbeat_interval: Duration, heartbeat_timeout: Duration) -> Result<Self> {
        Self::default()
            .with_heartbeat_interval(heartbeat_interval)?
            .with_heartbeat_timeout(heartbeat_timeout)
    }

    /// Time between the end of one heartbeat and the start of the next
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Upper bound on opening the monitoring connection and on each probe
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Shortest spacing between heartbeats when a re-probe is requested
    pub fn min_heartbeat_interval(&self) -> Duration {
        self.min_heartbeat_interval
    }

    pub fn with_heartbeat_interval(self, interval: Duration) -> Result<Self> {
        ensure_positive("heartbeat_interval", interval)?;
        Ok(Self {
            heartbeat_interval: interval,
            min_heartbeat_interval: self.min_heartbeat_interval.min(interval),
            ..self
        })
    }

    pub fn with_heartbeat_timeout(self, timeout: Duration) -> Result<Self> {
        ensure_positive("heartbeat_timeout", timeout)?;
        Ok(Self {
            heartbeat_timeout: timeout,
            ..self
        })
    }

    pub fn with_min_heartbeat_interval(self, minimum: Duration) -> Result<Self> {
        if minimum > self.heartbeat_interval {
            return Err(DocDbError::Configuration {
                message: format!(
                    "min_heartbeat_interval ({:?}) must not exceed heartbeat_interval ({:?})",
                    minimum, self.heartbeat_interval
                ),
            });
        }
        Ok(Self {
            min_heartbeat_interval: minimum,
            ..self
        })
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            min_heartbeat_interval: DEFAULT_MIN_HEARTBEAT_INTERVAL,
        }
    }
}

fn ensure_positive(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(DocDbError::Configuration {
            message: format!("{} must be greater than zero", name),
        });
    }
    Ok(())
}

/// Serialized form of [`MonitorSettings`], in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettingsConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_min_heartbeat_interval_ms")]
    pub min_heartbeat_interval_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64
}

fn default_heartbeat_timeout_ms() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT.as_millis() as u64
}

fn default_min_heartbeat_interval_ms() -> u64 {
    DEFAULT_MIN_HEARTBEAT_INTERVAL.as_millis() as u64
}

impl TryFrom<MonitorSettingsConfig> for MonitorSettings {
    type Error = DocDbError;

    fn try_from(config: MonitorSettingsConfig) -> Result<Self> {
        let interval = Duration::from_millis(config.heartbeat_interval_ms);
        let minimum = Duration::from_millis(config.min_heartbeat_interval_ms).min(interval);
        MonitorSettings::new(interval, Duration::from_millis(config.heartbeat_timeout_ms))?
            .with_min_heartbeat_interval(minimum)
    }
}

impl From<MonitorSettings> for MonitorSettingsConfig {
    fn from(settings: MonitorSettings) -> Self {
        Self {
            heartbeat_interval_ms: settings.heartbeat_interval.as_millis() as u64,
            heartbeat_timeout_ms: settings.heartbeat_timeout.as_millis() as u64,
            min_heartbeat_interval_ms: settings.min_heartbeat_interval.as_millis() as u64,
        }
    }
}
