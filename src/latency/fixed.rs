//! Constant latency.

use super::LatencyGenerator;
use std::time::Duration;

/// Always delays by the same amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLatency {
    delay: Duration,
}

impl FixedLatency {
    /// Create a generator that always returns `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl LatencyGenerator for FixedLatency {
    #[inline]
    fn generate(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_latency() {
        let generator = FixedLatency::new(Duration::from_millis(25));
        assert_eq!(generator.generate(), Duration::from_millis(25));
        assert_eq!(generator.generate(), Duration::from_millis(25));
    }

    #[test]
    fn test_fixed_latency_default_is_zero() {
        assert_eq!(FixedLatency::default().generate(), Duration::ZERO);
    }
}
