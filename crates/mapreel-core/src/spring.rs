//! Deterministic damped-harmonic-oscillator ("spring") evaluation.
//!
//! Springs are evaluated in closed form at `t = frame / fps`, so the value for
//! a frame never depends on which frames were evaluated before it. The
//! transcendental functions come from `libm` rather than the platform math
//! library, which keeps results bit-identical across machines.

use serde::{Deserialize, Serialize};

/// Below this distance from 1.0 the damping ratio is treated as critical.
const CRITICAL_EPSILON: f64 = 1e-9;

/// Physical parameters of a spring channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpringConfig {
    pub damping: f64,
    pub stiffness: f64,
    pub mass: f64,
    /// Stop at the target instead of overshooting it.
    #[serde(default)]
    pub overshoot_clamping: bool,
}

impl SpringConfig {
    pub fn new(damping: f64, stiffness: f64, mass: f64) -> Self {
        Self {
            damping,
            stiffness,
            mass,
            overshoot_clamping: false,
        }
    }

    pub fn with_overshoot_clamping(mut self, clamp: bool) -> Self {
        self.overshoot_clamping = clamp;
        self
    }

    /// Every parameter must be finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        [self.damping, self.stiffness, self.mass]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }

    /// Damping ratio ζ. `< 1` underdamped, `1` critical, `> 1` overdamped.
    pub fn damping_ratio(&self) -> f64 {
        self.damping / (2.0 * libm::sqrt(self.stiffness * self.mass))
    }

    /// Undamped angular frequency ω₀ in radians per second.
    pub fn natural_frequency(&self) -> f64 {
        libm::sqrt(self.stiffness / self.mass)
    }
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self::new(10.0, 100.0, 1.0)
    }
}

/// Normalized spring progress (0 at rest at `from`, 1 at the target) after
/// `seconds` of motion, starting with zero velocity.
fn normalized_progress(seconds: f64, config: &SpringConfig) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    let zeta = config.damping_ratio();
    let omega0 = config.natural_frequency();

    // Displacement from the target, starting at 1.
    let displacement = if (zeta - 1.0).abs() < CRITICAL_EPSILON {
        libm::exp(-omega0 * seconds) * (1.0 + omega0 * seconds)
    } else if zeta < 1.0 {
        let omega_d = omega0 * libm::sqrt(1.0 - zeta * zeta);
        let envelope = libm::exp(-zeta * omega0 * seconds);
        envelope
            * (libm::cos(omega_d * seconds)
                + (zeta * omega0 / omega_d) * libm::sin(omega_d * seconds))
    } else {
        let root = libm::sqrt(zeta * zeta - 1.0);
        let r1 = -omega0 * (zeta - root);
        let r2 = -omega0 * (zeta + root);
        let a = r2 / (r2 - r1);
        let b = -r1 / (r2 - r1);
        a * libm::exp(r1 * seconds) + b * libm::exp(r2 * seconds)
    };

    let progress = 1.0 - displacement;
    if config.overshoot_clamping && progress > 1.0 {
        1.0
    } else {
        progress
    }
}

/// Evaluate a spring moving from `from` to `to` at the given frame.
///
/// Negative frames are clamped to 0 (the spring has not started). When
/// `from == to` the result is exactly `from` for every frame.
pub fn spring_value(frame: f64, fps: f64, from: f64, to: f64, config: &SpringConfig) -> f64 {
    if from == to {
        return from;
    }
    let frame = if frame.is_finite() { frame.max(0.0) } else { 0.0 };
    let progress = normalized_progress(frame / fps, config);
    from + (to - from) * progress
}

/// One animated channel: a spring between two values that starts after a
/// frame delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringChannel {
    pub from: f64,
    pub to: f64,
    pub delay_frames: f64,
    pub config: SpringConfig,
}

impl SpringChannel {
    pub fn new(from: f64, to: f64, config: SpringConfig) -> Self {
        Self {
            from,
            to,
            delay_frames: 0.0,
            config,
        }
    }

    pub fn delayed(mut self, delay_frames: f64) -> Self {
        self.delay_frames = delay_frames;
        self
    }

    /// Value at `frame`; the channel holds `from` until its delay elapses.
    pub fn value_at(&self, frame: f64, fps: f64) -> f64 {
        let offset = (frame - self.delay_frames).max(0.0);
        spring_value(offset, fps, self.from, self.to, &self.config)
    }
}

/// Number of frames until the spring stays within `threshold` of its target
/// (in normalized units). Capped at ten minutes of frames.
pub fn measure_spring(fps: f64, config: &SpringConfig, threshold: f64) -> u64 {
    if !config.is_valid() || !(fps > 0.0) {
        return 0;
    }
    let max_frames = (fps * 600.0).ceil() as u64;
    let threshold = threshold.abs();
    let mut last_outside = 0u64;
    let mut settled_run = 0u64;
    // A spring has settled once it stays inside the band for a full second.
    let settle_window = fps.ceil() as u64;
    for frame in 0..=max_frames {
        let p = normalized_progress(frame as f64 / fps, config);
        if (1.0 - p).abs() > threshold {
            last_outside = frame;
            settled_run = 0;
        } else {
            settled_run += 1;
            if settled_run >= settle_window {
                return last_outside + 1;
            }
        }
    }
    max_frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spring_starts_at_from() {
        let cfg = SpringConfig::new(150.0, 10.0, 20.0);
        assert_eq!(spring_value(0.0, 30.0, 0.0, 45.0, &cfg), 0.0);
        assert_eq!(spring_value(-12.0, 30.0, 0.0, 45.0, &cfg), 0.0);
    }

    #[test]
    fn test_spring_converges_to_target() {
        for cfg in [
            SpringConfig::new(5.0, 100.0, 1.0),  // underdamped
            SpringConfig::new(20.0, 100.0, 1.0), // critical
            SpringConfig::new(60.0, 100.0, 1.0), // overdamped
        ] {
            let v = spring_value(600.0, 30.0, 10.0, 20.0, &cfg);
            assert!((v - 20.0).abs() < 1e-6, "{:?} ended at {}", cfg, v);
        }
    }

    #[test]
    fn test_critical_damping_detected() {
        let cfg = SpringConfig::new(20.0, 100.0, 1.0);
        assert!((cfg.damping_ratio() - 1.0).abs() < 1e-12);
        let v = spring_value(3.0, 30.0, 0.0, 1.0, &cfg);
        assert!(v > 0.0 && v < 1.0);
    }

    #[test]
    fn test_underdamped_spring_overshoots() {
        let cfg = SpringConfig::new(2.0, 200.0, 1.0);
        let peak = (0..60)
            .map(|f| spring_value(f as f64, 30.0, 0.0, 1.0, &cfg))
            .fold(f64::MIN, f64::max);
        assert!(peak > 1.0, "expected overshoot, peak was {}", peak);
    }

    #[test]
    fn test_overshoot_clamping() {
        let cfg = SpringConfig::new(2.0, 200.0, 1.0).with_overshoot_clamping(true);
        for f in 0..90 {
            let v = spring_value(f as f64, 30.0, 0.0, 1.0, &cfg);
            assert!(v <= 1.0);
        }
    }

    #[test]
    fn test_overdamped_is_monotonic() {
        let cfg = SpringConfig::new(150.0, 10.0, 20.0);
        let mut prev = 0.0;
        for f in 0..300 {
            let v = spring_value(f as f64, 30.0, 0.0, 45.0, &cfg);
            assert!(v >= prev);
            assert!(v <= 45.0);
            prev = v;
        }
    }

    #[test]
    fn test_degenerate_spring_is_constant() {
        let cfg = SpringConfig::default();
        for f in [0.0, 1.0, 17.5, 1000.0] {
            assert_eq!(spring_value(f, 30.0, 4.2, 4.2, &cfg), 4.2);
        }
    }

    #[test]
    fn test_evaluation_is_order_independent() {
        let cfg = SpringConfig::new(12.0, 80.0, 1.3);
        let forward: Vec<u64> = (0..120)
            .map(|f| spring_value(f as f64, 30.0, -3.0, 9.0, &cfg).to_bits())
            .collect();
        let backward: Vec<u64> = (0..120)
            .rev()
            .map(|f| spring_value(f as f64, 30.0, -3.0, 9.0, &cfg).to_bits())
            .collect();
        let backward: Vec<u64> = backward.into_iter().rev().collect();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_channel_holds_until_delay() {
        let channel = SpringChannel::new(0.0, 1.0, SpringConfig::default()).delayed(32.0);
        assert_eq!(channel.value_at(0.0, 30.0), 0.0);
        assert_eq!(channel.value_at(32.0, 30.0), 0.0);
        assert!(channel.value_at(40.0, 30.0) > 0.0);
    }

    #[test]
    fn test_measure_spring() {
        let stiff = SpringConfig::new(20.0, 100.0, 1.0);
        let loose = SpringConfig::new(150.0, 10.0, 20.0);
        let a = measure_spring(30.0, &stiff, 0.005);
        let b = measure_spring(30.0, &loose, 0.005);
        assert!(a > 0);
        assert!(b > a);
        assert_eq!(measure_spring(30.0, &SpringConfig::new(0.0, 1.0, 1.0), 0.01), 0);
    }
}
