//! Utilities for numerics.

use std::cmp::Ordering;

/// An `f32` ordered by the IEEE 754 totalOrder predicate, usable as a sort key.
#[derive(Debug, Clone, Copy)]
pub struct TotalF32(pub f32);

impl PartialEq for TotalF32 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF32 {}

impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Applies the standard sigmoid/logistic function to the input.
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Linearly maps `value` from the range `from` to the range `to`, clamping to the target range.
///
/// The ranges may be decreasing (eg. `5.0..=1.0`), in which case the clamping follows the range
/// boundaries rather than their numeric order.
pub fn lerp_clamped(value: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let (a, b) = from;
    let (c, d) = to;
    if a == b {
        return c;
    }
    let t = ((value - a) / (b - a)).clamp(0.0, 1.0);
    c + t * (d - c)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn lerp_maps_and_clamps() {
        let radius = |z| lerp_clamped(z, (-0.15, 0.1), (5.0, 1.0));
        assert_abs_diff_eq!(radius(-0.15), 5.0, epsilon = 1e-5);
        assert_abs_diff_eq!(radius(0.1), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(radius(-0.025), 3.0, epsilon = 1e-5);
        assert_eq!(lerp_clamped(-1.0, (-0.15, 0.1), (5.0, 1.0)), 5.0);
        assert_eq!(lerp_clamped(1.0, (-0.15, 0.1), (5.0, 1.0)), 1.0);
    }

    #[test]
    fn total_order() {
        let mut v = [TotalF32(1.0), TotalF32(-3.0), TotalF32(0.5)];
        v.sort();
        assert_eq!(v.map(|t| t.0), [-3.0, 0.5, 1.0]);
    }
}
