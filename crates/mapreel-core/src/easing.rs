//! Small easing helpers shared by the frame calculator and the overlay layer.

/// Clamp to the unit interval. NaN maps to 0.
pub fn clamp01(t: f64) -> f64 {
    if t.is_nan() {
        return 0.0;
    }
    t.clamp(0.0, 1.0)
}

/// Hermite smoothstep `3t² − 2t³` on a clamped input.
pub fn smoothstep(t: f64) -> f64 {
    let t = clamp01(t);
    t * t * (3.0 - 2.0 * t)
}
