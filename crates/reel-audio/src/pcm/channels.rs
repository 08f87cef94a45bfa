//! Channel count conversion on interleaved `f32` samples.

/// Remap interleaved `input` from `from` channels to `to` channels,
/// appending to `out`.
///
/// Mono is duplicated into every output channel, anything folded down to
/// mono is averaged, and other layouts keep the leading channels (wrapping
/// around when the output has more).
pub fn remap(input: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    debug_assert!(from > 0 && to > 0);
    let frames = input.len() / from;
    out.reserve(frames * to);

    for frame in input.chunks_exact(from) {
        match (from, to) {
            (1, _) => out.extend(std::iter::repeat(frame[0]).take(to)),
            (_, 1) => out.push(frame.iter().sum::<f32>() / from as f32),
            _ => out.extend((0..to).map(|ch| frame[ch % from])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo() {
        let mut out = Vec::new();
        remap(&[0.1, 0.2], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut out = Vec::new();
        remap(&[0.5, -0.5, 1.0, 0.0], 2, 1, &mut out);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn test_surround_to_stereo_keeps_front() {
        let mut out = Vec::new();
        remap(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 6, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_stereo_to_quad_wraps() {
        let mut out = Vec::new();
        remap(&[1.0, 2.0], 2, 4, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 1.0, 2.0]);
    }
}
