//! Integration tests for file loading and the probe factory.

use faun_core::{ChannelLayout, DecoderFactory, FileChunk, MIX_RATE};
use faun_io::{Error, ProbeFactory, load_file, sfx};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Write;
use tempfile::NamedTempFile;

/// Write a stereo S16 WAV holding a 440 Hz sine.
fn write_sine_wav(path: &std::path::Path, sample_rate: u32, frames: usize) {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let s = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 16000.0) as i16;
        writer.write_sample(s).unwrap();
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn load_wav_file_at_mix_rate() {
    let file = NamedTempFile::new().unwrap();
    write_sine_wav(file.path(), MIX_RATE, 4410);

    let buf = load_file(file.path(), 0, 0).unwrap();
    assert_eq!(buf.used, 4410);
    assert_eq!(buf.rate, MIX_RATE);
    assert_eq!(buf.channels, ChannelLayout::Stereo);
    assert!((buf.duration() - 0.1).abs() < 1e-3);
    assert!(buf.frames().iter().any(|&s| s.abs() > 0.1));
}

#[test]
fn load_wav_file_at_half_rate_doubles_frames() {
    let file = NamedTempFile::new().unwrap();
    write_sine_wav(file.path(), MIX_RATE / 2, 1000);

    let buf = load_file(file.path(), 0, 0).unwrap();
    assert_eq!(buf.used, 2000);
}

#[test]
fn load_wav_with_offset_window() {
    // The audio sits after 16 bytes of unrelated header data.
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"PACKFILE-HEADER!").unwrap();
    let inner = NamedTempFile::new().unwrap();
    write_sine_wav(inner.path(), MIX_RATE, 100);
    let wav_bytes = std::fs::read(inner.path()).unwrap();
    file.write_all(&wav_bytes).unwrap();
    file.flush().unwrap();

    let buf = load_file(file.path(), 16, wav_bytes.len() as u32).unwrap();
    assert_eq!(buf.used, 100);
}

#[test]
fn load_rfx_file() {
    let params = sfx::SfxParams {
        rand_seed: 7,
        wave: sfx::SfxWave::Sine,
        sustain_time: 0.2,
        decay_time: 0.2,
        start_frequency: 0.4,
        lpf_cutoff: 1.0,
        ..Default::default()
    };

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"rFX ").unwrap();
    file.write_all(&200u16.to_le_bytes()).unwrap();
    file.write_all(&(sfx::RFX_PARAMS_LEN as u16).to_le_bytes())
        .unwrap();
    file.write_all(&params.rand_seed.to_le_bytes()).unwrap();
    file.write_all(&2u32.to_le_bytes()).unwrap(); // Sine
    for v in [
        params.attack_time,
        params.sustain_time,
        params.sustain_punch,
        params.decay_time,
        params.start_frequency,
        params.min_frequency,
        params.slide,
        params.delta_slide,
        params.vibrato_depth,
        params.vibrato_speed,
        params.change_amount,
        params.change_speed,
        params.square_duty,
        params.duty_sweep,
        params.repeat_speed,
        params.phaser_offset,
        params.phaser_sweep,
        params.lpf_cutoff,
        params.lpf_cutoff_sweep,
        params.lpf_resonance,
        params.hpf_cutoff,
        params.hpf_cutoff_sweep,
    ] {
        file.write_all(&v.to_le_bytes()).unwrap();
    }
    file.flush().unwrap();

    let buf = load_file(file.path(), 0, 0).unwrap();
    assert!(buf.used > 0);
    assert!(buf.frames().iter().any(|&s| s != 0.0));
}

#[test]
fn unknown_magic_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"MPEGxxxxxxxx").unwrap();
    file.flush().unwrap();
    assert!(matches!(
        load_file(file.path(), 0, 0),
        Err(Error::UnknownFormat)
    ));
}

#[test]
fn probe_factory_rejects_wav_streams() {
    let file = NamedTempFile::new().unwrap();
    write_sine_wav(file.path(), MIX_RATE, 10);

    let chunk = FileChunk {
        file: file.reopen().unwrap(),
        offset: 0,
        size: 0,
    };
    assert!(ProbeFactory.open(chunk).is_err());
}
