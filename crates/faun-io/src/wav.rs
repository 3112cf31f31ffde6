//! WAV loading into the voice mix format.
//!
//! Accepts RIFF/WAVE with PCM-S16 or IEEE-float samples at 22,050 or
//! 44,100 Hz, mono or stereo. Everything else is rejected rather than
//! resampled; game assets are expected to be authored at the mix rate or
//! exactly half of it.

use crate::{Error, Result};
use faun_core::{AudioBuffer, MIX_RATE, interleave_f32, interleave_s16, output_frames};
use hound::{SampleFormat, WavReader};
use std::io::{Read, Seek};

/// Read a complete WAV stream into a mix-format buffer.
pub fn load_wav<R: Read + Seek>(reader: R) -> Result<AudioBuffer> {
    let mut wav = WavReader::new(reader)?;
    let spec = wav.spec();

    if spec.sample_rate != MIX_RATE && spec.sample_rate != MIX_RATE / 2 {
        return Err(Error::Unsupported("WAVE sample rate".into()));
    }
    match spec.sample_format {
        SampleFormat::Int if spec.bits_per_sample == 16 => {}
        SampleFormat::Float if spec.bits_per_sample == 32 => {}
        _ => return Err(Error::Unsupported("WAVE bits per sample".into())),
    }

    let channels = usize::from(spec.channels);
    let wav_frames = wav.duration();
    let frames = output_frames(wav_frames, spec.sample_rate);
    let mut buf = AudioBuffer::voice_format(MIX_RATE, frames);

    match spec.sample_format {
        SampleFormat::Int => {
            let samples: std::result::Result<Vec<i16>, _> = wav.samples::<i16>().collect();
            interleave_s16(buf.samples_mut(), &samples?, channels, spec.sample_rate);
        }
        SampleFormat::Float => {
            let samples: std::result::Result<Vec<f32>, _> = wav.samples::<f32>().collect();
            interleave_f32(buf.samples_mut(), &samples?, channels, spec.sample_rate);
        }
    }
    buf.used = frames;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use std::io::Cursor;

    fn write_wav(spec: WavSpec, frames: usize, write: impl Fn(&mut WavWriter<&mut Cursor<Vec<u8>>>, usize)) -> Cursor<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for f in 0..frames {
                write(&mut writer, f);
            }
            writer.finalize().unwrap();
        }
        cursor.set_position(0);
        cursor
    }

    #[test]
    fn s16_stereo_at_mix_rate() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let cursor = write_wav(spec, 100, |w, _| {
            w.write_sample(16384i16).unwrap();
            w.write_sample(-16384i16).unwrap();
        });

        let buf = load_wav(cursor).unwrap();
        assert_eq!(buf.used, 100);
        assert!((buf.samples()[0] - 0.5).abs() < 1e-3);
        assert!((buf.samples()[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn mono_half_rate_quadruples_samples() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let cursor = write_wav(spec, 50, |w, _| {
            w.write_sample(8192i16).unwrap();
        });

        let buf = load_wav(cursor).unwrap();
        assert_eq!(buf.used, 100);
        assert_eq!(buf.rate, MIX_RATE);
        let v = 8192.0 / 32767.0;
        for s in buf.frames() {
            assert!((s - v).abs() < 1e-4);
        }
    }

    #[test]
    fn float_input_passes_through() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let cursor = write_wav(spec, 10, |w, f| {
            w.write_sample(f as f32 * 0.1).unwrap();
            w.write_sample(f as f32 * -0.1).unwrap();
        });

        let buf = load_wav(cursor).unwrap();
        assert_eq!(buf.used, 10);
        assert!((buf.samples()[2] - 0.1).abs() < 1e-6);
        assert!((buf.samples()[3] + 0.1).abs() < 1e-6);
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let cursor = write_wav(spec, 10, |w, _| {
            w.write_sample(0i16).unwrap();
        });
        assert!(matches!(load_wav(cursor), Err(Error::Unsupported(_))));
    }

    #[test]
    fn unsupported_bit_depth_is_rejected() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let cursor = write_wav(spec, 10, |w, _| {
            w.write_sample(0i8).unwrap();
        });
        assert!(matches!(load_wav(cursor), Err(Error::Unsupported(_))));
    }
}
