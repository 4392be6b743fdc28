//! In this module, we implement the monitoring logic for the capture.
//! Right now that's the effective sampling rate of each capture, which is the best
//! indicator of whether the sampling loop ran undisturbed.
use tracing::info;

use crate::{capture::Capture, SAMPLE_COUNT};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureStats {
    pub elapsed_ns: u64,
    /// Average time between two samples
    pub period_ns: f64,
    pub sample_rate_hz: f64,
}

impl CaptureStats {
    pub fn new(capture: &Capture) -> Self {
        let elapsed_ns = capture.elapsed_ns();
        let period_ns = elapsed_ns as f64 / SAMPLE_COUNT as f64;
        let sample_rate_hz = if elapsed_ns == 0 {
            0.0
        } else {
            1e9 / period_ns
        };
        Self {
            elapsed_ns,
            period_ns,
            sample_rate_hz,
        }
    }

    pub fn log(&self) {
        info!(
            elapsed_ns = self.elapsed_ns,
            period_ns = self.period_ns,
            rate_msps = self.sample_rate_hz / 1e6,
            "Capture complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let capture = Capture::new(Box::new([0; SAMPLE_COUNT]), 10_000_000);
        let stats = CaptureStats::new(&capture);
        assert_eq!(stats.period_ns, 1000.0);
        assert_eq!(stats.sample_rate_hz, 1e6);
    }

    #[test]
    fn test_zero_elapsed() {
        let capture = Capture::new(Box::new([0; SAMPLE_COUNT]), 0);
        assert_eq!(CaptureStats::new(&capture).sample_rate_hz, 0.0);
    }
}
