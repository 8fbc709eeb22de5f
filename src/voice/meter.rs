//! Volume level estimate for the speaking indicator

/// Root-mean-square level of a frame, scaled to roughly `0..=100`
///
/// Display-only; nothing in the session logic branches on it.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = frame.iter().map(|s| s * s).sum();
    (sum_squares / frame.len() as f32).sqrt() * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_zero() {
        assert!(compute_rms(&[0.0; 4096]).abs() < f32::EPSILON);
    }

    #[test]
    fn full_scale_is_one_hundred() {
        assert!((compute_rms(&[1.0; 4096]) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn empty_frame_is_zero() {
        assert!(compute_rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn sine_is_scaled_by_inverse_sqrt_two() {
        let frame: Vec<f32> = (0..1600)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 16.0).sin())
            .collect();
        let expected = 100.0 / std::f32::consts::SQRT_2;
        assert!((compute_rms(&frame) - expected).abs() < 0.1);
    }
}
