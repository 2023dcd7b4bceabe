//! Time-varying latency built from periodic waveforms.
//!
//! The delay for a chunk read at elapsed time `t` (measured from the
//! generator's reference start) is:
//!
//! ```text
//! base + sine(t) + square(t) + triangle(t) + sawtooth(t) + U(0, jitter)
//! ```
//!
//! clamped at zero. Each waveform term starts at phase zero at the
//! reference instant, so a sine or triangle term starts at zero and a
//! square term starts at `+amplitude`.

use super::LatencyGenerator;
use crate::config::{LatencyConfig, WaveConfig};
use rand::Rng;
use std::f64::consts::TAU;
use std::time::{Duration, Instant};

/// Shape of a periodic latency term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wave {
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

impl Wave {
    /// Normalised value in `[-1, 1]` at `phase` in `[0, 1)`.
    fn value(self, phase: f64) -> f64 {
        match self {
            Wave::Sine => (TAU * phase).sin(),
            Wave::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Wave::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
            Wave::Sawtooth => {
                if phase < 0.5 {
                    2.0 * phase
                } else {
                    2.0 * phase - 2.0
                }
            }
        }
    }
}

/// One periodic summand of the latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveTerm {
    pub wave: Wave,
    pub amplitude: Duration,
    pub period: Duration,
}

impl WaveTerm {
    /// Signed offset in nanoseconds at `elapsed`.
    fn offset_nanos(&self, elapsed: Duration) -> i128 {
        let period = self.period.as_nanos();
        if period == 0 || self.amplitude.is_zero() {
            return 0;
        }
        let phase = (elapsed.as_nanos() % period) as f64 / period as f64;
        (self.amplitude.as_nanos() as f64 * self.wave.value(phase)).round() as i128
    }
}

/// Latency generator combining a base delay, waveform terms and jitter.
#[derive(Debug, Clone)]
pub struct WaveformLatency {
    start: Instant,
    base: Duration,
    jitter: Duration,
    terms: Vec<WaveTerm>,
}

impl WaveformLatency {
    /// Create a generator with only a base delay and jitter.
    pub fn new(start: Instant, base: Duration, jitter: Duration) -> Self {
        Self {
            start,
            base,
            jitter,
            terms: Vec::new(),
        }
    }

    /// Add a waveform term. Terms with a zero period or amplitude are ignored.
    pub fn with_term(mut self, wave: Wave, amplitude: Duration, period: Duration) -> Self {
        if !period.is_zero() && !amplitude.is_zero() {
            self.terms.push(WaveTerm {
                wave,
                amplitude,
                period,
            });
        }
        self
    }

    /// Build from configuration.
    pub fn from_config(config: &LatencyConfig, start: Instant) -> Self {
        let term = |generator: Self, wave: Wave, cfg: &WaveConfig| {
            generator.with_term(wave, cfg.amplitude, cfg.period)
        };

        let generator = Self::new(start, config.base, config.jitter);
        let generator = term(generator, Wave::Sine, &config.sine);
        let generator = term(generator, Wave::Square, &config.square);
        let generator = term(generator, Wave::Triangle, &config.triangle);
        term(generator, Wave::Sawtooth, &config.sawtooth)
    }

    /// Whether every call yields the same value.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty() && self.jitter.is_zero()
    }

    /// The active waveform terms.
    pub fn terms(&self) -> &[WaveTerm] {
        &self.terms
    }

    /// Deterministic part of the latency at `elapsed` since the start instant.
    pub fn latency_at(&self, elapsed: Duration) -> Duration {
        clamp_nanos(self.shaped_nanos(elapsed))
    }

    fn shaped_nanos(&self, elapsed: Duration) -> i128 {
        let waves: i128 = self.terms.iter().map(|t| t.offset_nanos(elapsed)).sum();
        self.base.as_nanos() as i128 + waves
    }

    fn jitter_nanos(&self) -> i128 {
        let bound = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=bound) as i128
    }
}

impl LatencyGenerator for WaveformLatency {
    fn generate(&self) -> Duration {
        let elapsed = self.start.elapsed();
        clamp_nanos(self.shaped_nanos(elapsed) + self.jitter_nanos())
    }
}

fn clamp_nanos(nanos: i128) -> Duration {
    if nanos <= 0 {
        return Duration::ZERO;
    }
    let nanos = u128::try_from(nanos).unwrap_or(0);
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn single(wave: Wave) -> WaveformLatency {
        WaveformLatency::new(Instant::now(), ms(100), Duration::ZERO).with_term(wave, ms(40), ms(1000))
    }

    #[test]
    fn test_base_only() {
        let generator = WaveformLatency::new(Instant::now(), ms(100), Duration::ZERO);
        assert!(generator.is_constant());
        assert_eq!(generator.latency_at(ms(0)), ms(100));
        assert_eq!(generator.latency_at(ms(12345)), ms(100));
        assert_eq!(generator.generate(), ms(100));
    }

    #[test]
    fn test_zero_period_term_is_ignored() {
        let generator =
            WaveformLatency::new(Instant::now(), ms(10), Duration::ZERO).with_term(Wave::Sine, ms(5), Duration::ZERO);
        assert!(generator.terms().is_empty());
        assert_eq!(generator.latency_at(ms(250)), ms(10));
    }

    #[test]
    fn test_sine_wave() {
        let generator = single(Wave::Sine);
        assert_eq!(generator.latency_at(ms(0)), ms(100));
        assert_eq!(generator.latency_at(ms(250)), ms(140));
        assert_eq!(generator.latency_at(ms(500)), ms(100));
        assert_eq!(generator.latency_at(ms(750)), ms(60));
        // Periodic
        assert_eq!(generator.latency_at(ms(1250)), ms(140));
    }

    #[test]
    fn test_square_wave() {
        let generator = single(Wave::Square);
        assert_eq!(generator.latency_at(ms(0)), ms(140));
        assert_eq!(generator.latency_at(ms(499)), ms(140));
        assert_eq!(generator.latency_at(ms(500)), ms(60));
        assert_eq!(generator.latency_at(ms(999)), ms(60));
        assert_eq!(generator.latency_at(ms(1000)), ms(140));
    }

    #[test]
    fn test_triangle_wave() {
        let generator = single(Wave::Triangle);
        assert_eq!(generator.latency_at(ms(0)), ms(100));
        assert_eq!(generator.latency_at(ms(125)), ms(120));
        assert_eq!(generator.latency_at(ms(250)), ms(140));
        assert_eq!(generator.latency_at(ms(500)), ms(100));
        assert_eq!(generator.latency_at(ms(750)), ms(60));
    }

    #[test]
    fn test_sawtooth_wave() {
        let generator = single(Wave::Sawtooth);
        assert_eq!(generator.latency_at(ms(0)), ms(100));
        assert_eq!(generator.latency_at(ms(250)), ms(120));
        assert_eq!(generator.latency_at(ms(500)), ms(60));
        assert_eq!(generator.latency_at(ms(750)), ms(80));
    }

    #[test]
    fn test_negative_total_clamps_to_zero() {
        let generator =
            WaveformLatency::new(Instant::now(), ms(10), Duration::ZERO).with_term(Wave::Square, ms(50), ms(100));
        assert_eq!(generator.latency_at(ms(10)), ms(60));
        assert_eq!(generator.latency_at(ms(60)), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        let generator = WaveformLatency::new(Instant::now(), ms(50), ms(20));
        assert!(!generator.is_constant());
        for _ in 0..1000 {
            let delay = generator.generate();
            assert!(delay >= ms(50), "delay below base: {:?}", delay);
            assert!(delay <= ms(70), "delay above base + jitter: {:?}", delay);
        }
    }

    #[test]
    fn test_from_config() {
        let config = LatencyConfig {
            base: ms(30),
            jitter: Duration::ZERO,
            sine: WaveConfig {
                amplitude: ms(10),
                period: ms(1000),
            },
            sawtooth: WaveConfig {
                amplitude: ms(10),
                period: Duration::ZERO,
            },
            ..LatencyConfig::default()
        };
        let generator = WaveformLatency::from_config(&config, Instant::now());
        assert_eq!(generator.terms().len(), 1);
        assert_eq!(generator.terms()[0].wave, Wave::Sine);
        assert_eq!(generator.latency_at(ms(250)), ms(40));
    }

    #[test]
    fn test_concurrent_generation() {
        let generator = std::sync::Arc::new(WaveformLatency::new(Instant::now(), ms(5), ms(5)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = std::sync::Arc::clone(&generator);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(generator.generate() <= ms(10));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
