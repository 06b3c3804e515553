//! First-order filtering helpers for the controller derivative terms.
//!
//! The GPS sample interval varies from 10 ms to 1 s, so filter gains are
//! derived from the measured interval each sample rather than fixed.

use core::f32::consts::TAU;

/// Gain of a pt1 low-pass for a given cutoff and sample interval.
/// At 0.8 Hz cutoff: ~0.83 for 1 Hz samples, 0.33 at 10 Hz, 0.17 at 25 Hz.
pub fn pt1_gain(cutoff_hz: f32, dt_s: f32) -> f32 {
    let rc = 1. / (TAU * cutoff_hz);
    dt_s / (rc + dt_s)
}

/// One step of a pt1 low-pass with a precomputed gain `k`.
pub fn pt1_apply(prev: f32, new: f32, k: f32) -> f32 {
    prev + k * (new - prev)
}

/// Two-point moving average. Suits the derivative terms here; GPS velocity
/// and altitude data alternate up and down sample to sample.
pub fn moving_avg2(prev: f32, new: f32) -> f32 {
    0.5 * (prev + new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pt1_gain_reference_points() {
        // 0.8 Hz cutoff across the supported GPS rates.
        assert_relative_eq!(pt1_gain(0.8, 1.0), 0.8341, epsilon = 1e-3);
        assert_relative_eq!(pt1_gain(0.8, 0.2), 0.5013, epsilon = 1e-3);
        assert_relative_eq!(pt1_gain(0.8, 0.1), 0.3345, epsilon = 1e-3);
        assert_relative_eq!(pt1_gain(0.8, 0.04), 0.1674, epsilon = 1e-3);
    }

    #[test]
    fn pt1_converges_to_input() {
        let k = pt1_gain(0.8, 0.1);
        let mut v = 0.;
        for _ in 0..200 {
            v = pt1_apply(v, 10., k);
        }
        assert_relative_eq!(v, 10., epsilon = 1e-3);
    }

    #[test]
    fn moving_avg2_is_midpoint() {
        assert_relative_eq!(moving_avg2(2., 4.), 3.);
    }
}
