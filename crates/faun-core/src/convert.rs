//! Sample conversion into the voice mix format.
//!
//! Decoded audio reaches the engine as interleaved stereo `f32` at the mix
//! rate. These routines perform the supported conversions:
//!
//! - Mono input is duplicated to both channels.
//! - Half-mix-rate (22,050 Hz) input is duplicated in time, so each input
//!   frame becomes two output frames.
//! - S16 samples are scaled by `1/32767`; f32 samples pass through.

use crate::MIX_RATE;

const S16_SCALE: f32 = 1.0 / 32767.0;

/// True if `rate` must be time-doubled to reach the mix rate.
pub(crate) fn is_half_rate(rate: u32) -> bool {
    rate == MIX_RATE / 2
}

/// Number of mix-format output frames produced from `frames` input frames.
pub fn output_frames(frames: u32, rate: u32) -> u32 {
    if is_half_rate(rate) { frames * 2 } else { frames }
}

/// Interleave S16 input into stereo f32 output.
///
/// `src` holds `frames * channels` interleaved samples; only the first two
/// channels of wider layouts are used. `dst` must hold
/// [`output_frames`]`(frames, rate) * 2` samples.
pub fn interleave_s16(dst: &mut [f32], src: &[i16], channels: usize, rate: u32) {
    let frames = src.len() / channels;
    let half = is_half_rate(rate);
    let mut out = dst.iter_mut();
    let mut put = |s: f32| {
        if let Some(slot) = out.next() {
            *slot = s;
        }
    };

    for f in 0..frames {
        let l = f32::from(src[f * channels]) * S16_SCALE;
        let r = if channels >= 2 {
            f32::from(src[f * channels + 1]) * S16_SCALE
        } else {
            l
        };
        put(l);
        put(r);
        if half {
            put(l);
            put(r);
        }
    }
}

/// Interleave f32 input into stereo f32 output (no sample scaling).
///
/// Layout rules match [`interleave_s16`].
pub fn interleave_f32(dst: &mut [f32], src: &[f32], channels: usize, rate: u32) {
    let frames = src.len() / channels;
    let half = is_half_rate(rate);
    let mut out = dst.iter_mut();
    let mut put = |s: f32| {
        if let Some(slot) = out.next() {
            *slot = s;
        }
    };

    for f in 0..frames {
        let l = src[f * channels];
        let r = if channels >= 2 { src[f * channels + 1] } else { l };
        put(l);
        put(r);
        if half {
            put(l);
            put(r);
        }
    }
}

/// Interleave planar (per-channel) f32 data into stereo f32 output.
///
/// Used by streaming decoders that produce separate channel planes.
pub fn interleave_planar(dst: &mut [f32], planes: &[&[f32]], frames: usize, rate: u32) {
    let half = is_half_rate(rate);
    let mut out = dst.iter_mut();
    let mut put = |s: f32| {
        if let Some(slot) = out.next() {
            *slot = s;
        }
    };

    for f in 0..frames {
        let l = planes[0][f];
        let r = if planes.len() >= 2 { planes[1][f] } else { l };
        put(l);
        put(r);
        if half {
            put(l);
            put(r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s16_full_scale_maps_to_unity() {
        let src = [32767i16, -32767];
        let mut dst = [0.0f32; 2];
        interleave_s16(&mut dst, &src, 2, MIX_RATE);
        assert!((dst[0] - 1.0).abs() < 1e-6);
        assert!((dst[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn mono_duplicates_to_both_channels() {
        let src = [0.25f32, -0.5];
        let mut dst = [0.0f32; 4];
        interleave_f32(&mut dst, &src, 1, MIX_RATE);
        assert_eq!(dst, [0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn half_rate_duplicates_in_time() {
        let src = [0.1f32, 0.2];
        let mut dst = [0.0f32; 4];
        interleave_f32(&mut dst, &src, 2, MIX_RATE / 2);
        assert_eq!(dst, [0.1, 0.2, 0.1, 0.2]);
    }

    #[test]
    fn half_rate_mono_expands_four_to_one() {
        let src = [1000i16];
        let mut dst = [0.0f32; 4];
        interleave_s16(&mut dst, &src, 1, MIX_RATE / 2);
        let v = 1000.0 / 32767.0;
        for s in dst {
            assert!((s - v).abs() < 1e-6);
        }
    }

    #[test]
    fn planar_stereo_interleaves() {
        let left = [0.1f32, 0.3];
        let right = [0.2f32, 0.4];
        let mut dst = [0.0f32; 4];
        interleave_planar(&mut dst, &[&left, &right], 2, MIX_RATE);
        assert_eq!(dst, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn output_frame_scaling() {
        assert_eq!(output_frames(100, MIX_RATE), 100);
        assert_eq!(output_frames(100, MIX_RATE / 2), 200);
    }
}
