//! RTT estimation and retransmission timeout.
//!
//! Jacobson/Karels estimator: an exponentially weighted mean of RTT samples
//! plus a deviation term.

use std::time::Duration;

/// RTT timing constants.
pub mod constants {
    use std::time::Duration;

    /// Retransmission timeout before the first RTT sample.
    pub const INITIAL_RTO: Duration = Duration::from_secs(1);

    /// Weight of a new sample in the estimated RTT (1/8).
    pub const ALPHA: f64 = 0.125;

    /// Weight of a new deviation in the RTT deviation (1/4).
    pub const BETA: f64 = 0.25;

    /// Deviation multiplier in the RTO formula.
    pub const RTO_K: f64 = 4.0;

    /// Floor on the deviation term of the RTO (clock granularity), in seconds.
    pub const GRANULARITY_SECS: f64 = 0.1;
}

/// Adaptive RTT estimator.
///
/// - First sample: `estimated = sample`, `dev = sample / 2`.
/// - Later samples: `estimated = (1 - α)·estimated + α·sample`, then
///   `dev = (1 - β)·dev + β·|sample - estimated|`.
/// - `RTO = estimated + max(G, 4·dev)`; [`constants::INITIAL_RTO`] until the
///   first sample arrives.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Estimated RTT in seconds, `None` until the first sample.
    estimated: Option<f64>,
    /// RTT deviation in seconds.
    dev: f64,
    /// Current retransmission timeout.
    rto: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self {
            estimated: None,
            dev: 0.0,
            rto: constants::INITIAL_RTO,
        }
    }

    /// Fold a new RTT sample into the estimate and recompute the RTO.
    pub fn update(&mut self, sample: Duration) {
        let sample = sample.as_secs_f64();

        let estimated = match self.estimated {
            None => {
                self.dev = sample / 2.0;
                sample
            }
            Some(prev) => {
                let estimated = (1.0 - constants::ALPHA) * prev + constants::ALPHA * sample;
                self.dev = (1.0 - constants::BETA) * self.dev
                    + constants::BETA * (sample - estimated).abs();
                estimated
            }
        };
        self.estimated = Some(estimated);

        let rto = estimated + f64::max(constants::GRANULARITY_SECS, constants::RTO_K * self.dev);
        self.rto = Duration::from_secs_f64(rto);
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Estimated RTT, `None` before the first sample.
    pub fn estimated_rtt(&self) -> Option<Duration> {
        self.estimated.map(Duration::from_secs_f64)
    }

    /// Estimated RTT in seconds, `None` before the first sample.
    pub fn estimated_rtt_secs(&self) -> Option<f64> {
        self.estimated
    }

    /// RTT deviation, `None` before the first sample.
    pub fn dev_rtt(&self) -> Option<Duration> {
        self.estimated.map(|_| Duration::from_secs_f64(self.dev))
    }

    /// RTT deviation in seconds, `None` before the first sample.
    pub fn dev_rtt_secs(&self) -> Option<f64> {
        self.estimated.map(|_| self.dev)
    }

    /// Check if at least one sample has been taken.
    pub fn is_initialized(&self) -> bool {
        self.estimated.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_initial() {
        let rtt = RttEstimator::new();
        assert!(!rtt.is_initialized());
        assert_eq!(rtt.rto(), constants::INITIAL_RTO);
        assert_eq!(rtt.estimated_rtt(), None);
        assert_eq!(rtt.dev_rtt(), None);
    }

    #[test]
    fn test_rtt_first_sample_is_taken_verbatim() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_millis(500));

        assert_eq!(rtt.estimated_rtt_secs(), Some(0.5));
        assert_eq!(rtt.dev_rtt_secs(), Some(0.25));
        // RTO = 0.5 + max(0.1, 4 * 0.25) = 1.5s
        assert_eq!(rtt.rto(), Duration::from_millis(1500));
    }

    #[test]
    fn test_rtt_second_sample_moves_by_alpha() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_millis(500));
        let prev = rtt.estimated_rtt_secs().unwrap();

        rtt.update(Duration::from_secs(1));
        let now = rtt.estimated_rtt_secs().unwrap();

        assert_eq!(now - prev, 0.125 * (1.0 - prev));
        assert_eq!(now, 0.5625);
        // dev = 0.75 * 0.25 + 0.25 * |1.0 - 0.5625| = 0.1875 + 0.109375
        assert_eq!(rtt.dev_rtt_secs(), Some(0.296875));
    }

    #[test]
    fn test_rto_granularity_floor() {
        let mut rtt = RttEstimator::new();
        // dev = 5ms, 4 * dev = 20ms < G
        rtt.update(Duration::from_millis(10));

        let rto = rtt.rto().as_secs_f64();
        assert!((rto - 0.11).abs() < 1e-9, "rto was {rto}");
    }

    #[test]
    fn test_rtt_converges() {
        let mut rtt = RttEstimator::new();
        for _ in 0..200 {
            rtt.update(Duration::from_millis(80));
        }
        let estimated = rtt.estimated_rtt_secs().unwrap();
        assert!((estimated - 0.08).abs() < 1e-6);
        // Deviation decays towards zero, so the floor takes over.
        assert!((rtt.rto().as_secs_f64() - 0.18).abs() < 1e-3);
    }
}
