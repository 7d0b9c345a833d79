use docdb_common::{DocDbError, Result};
use std::time::Duration;

/// Exponentially-weighted moving average of observed round-trip times.
///
/// The first sample seeds the average; every later sample is blended in as
/// `alpha * sample + (1 - alpha) * average`. Owned by a single heartbeat loop,
/// so it carries no synchronization of its own.
#[derive(Debug, Clone)]
pub struct RoundTripSmoother {
    alpha: f64,
    average_secs: Option<f64>,
}

impl RoundTripSmoother {
    /// Weight given to new samples by the heartbeat loop
    pub const DEFAULT_ALPHA: f64 = 0.2;

    pub fn new(alpha: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(DocDbError::OutOfRange {
                message: format!("alpha must be within [0, 1], got {}", alpha),
            });
        }

        Ok(Self {
            alpha,
            average_secs: None,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Blend a sample into the average and return the new average
    pub fn add_sample(&mut self, sample: Duration) -> Duration {
        let sample = sample.as_secs_f64();
        let next = match self.average_secs {
            None => sample,
            Some(average) => self.alpha * sample + (1.0 - self.alpha) * average,
        };
        self.average_secs = Some(next);
        Duration::from_secs_f64(next)
    }

    pub fn average(&self) -> Option<Duration> {
        self.average_secs.map(Duration::from_secs_f64)
    }

    /// Forget all samples; the next sample seeds the average again
    pub fn reset(&mut self) {
        self.average_secs = None;
    }
}

impl Default for RoundTripSmoother {
    fn default() -> Self {
        Self {
            alpha: Self::DEFAULT_ALPHA,
            average_secs: None,
        }
    }
}

/// Round a duration to the nearest whole millisecond
pub fn round_to_millis(duration: Duration) -> Duration {
    Duration::from_millis((duration.as_secs_f64() * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(samples: &[u64]) -> u64 {
        let mut smoother = RoundTripSmoother::new(0.2).unwrap();
        let mut average = Duration::ZERO;
        for ms in samples {
            average = smoother.add_sample(Duration::from_millis(*ms));
        }
        round_to_millis(average).as_millis() as u64
    }

    #[test]
    fn test_average_sequence() {
        assert_eq!(feed(&[10]), 10);
        assert_eq!(feed(&[10, 20]), 12);
        assert_eq!(feed(&[10, 20, 12]), 12);
        assert_eq!(feed(&[10, 20, 12, 17]), 13);
    }

    #[test]
    fn test_alpha_bounds() {
        assert!(matches!(
            RoundTripSmoother::new(-0.01),
            Err(DocDbError::OutOfRange { .. })
        ));
        assert!(matches!(
            RoundTripSmoother::new(1.01),
            Err(DocDbError::OutOfRange { .. })
        ));
        assert!(RoundTripSmoother::new(f64::NAN).is_err());
        assert!(RoundTripSmoother::new(0.0).is_ok());
        assert!(RoundTripSmoother::new(1.0).is_ok());
    }

    #[test]
    fn test_reset_reseeds() {
        let mut smoother = RoundTripSmoother::default();
        smoother.add_sample(Duration::from_millis(100));
        assert!(smoother.average().is_some());

        smoother.reset();
        assert!(smoother.average().is_none());
        let seeded = smoother.add_sample(Duration::from_millis(7));
        assert_eq!(round_to_millis(seeded), Duration::from_millis(7));
    }
}
