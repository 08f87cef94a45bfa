//! Gain scaling.

/// Multiply every sample by `scale`. A unit scale leaves the samples alone.
pub fn apply_scale(samples: &mut [f32], scale: f32) {
    if is_unity(scale) {
        return;
    }
    for sample in samples {
        *sample *= scale;
    }
}

/// Whether `scale` changes the signal at all.
pub fn is_unity(scale: f32) -> bool {
    (scale - 1.0).abs() < f32::EPSILON
}
