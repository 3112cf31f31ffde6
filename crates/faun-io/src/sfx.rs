//! Procedural sound-effect synthesis from `rFX ` parameter blocks.
//!
//! The `rFX ` container (version 200) is a 96-byte parameter block from the
//! sfxr family of effect generators: a wave type plus envelope, frequency
//! slide, vibrato, duty, repeat, phaser, and filter settings. The renderer
//! below follows the reference synthesis chain (8x supersampled oscillator
//! into low/high-pass filters and a phaser tap) at the 44,100 Hz mix rate,
//! then duplicates the mono result to stereo.

use crate::{Error, Result};
use faun_core::{AudioBuffer, MIX_RATE, interleave_f32};
use std::io::Read;

/// Container magic.
pub const RFX_MAGIC: [u8; 4] = *b"rFX ";
/// Supported container version.
pub const RFX_VERSION: u16 = 200;
/// Byte length of the parameter block.
pub const RFX_PARAMS_LEN: usize = 96;

/// Oscillator wave shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SfxWave {
    /// Square with variable duty.
    #[default]
    Square,
    /// Rising sawtooth.
    Sawtooth,
    /// Sine.
    Sine,
    /// Sample-and-hold noise.
    Noise,
}

/// An sfxr-family effect description.
///
/// All unit-range fields are `0.0..=1.0` unless noted; signed fields are
/// `-1.0..=1.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SfxParams {
    /// Seed for the noise generator.
    pub rand_seed: u32,
    /// Oscillator shape.
    pub wave: SfxWave,
    /// Envelope attack time.
    pub attack_time: f32,
    /// Envelope sustain time.
    pub sustain_time: f32,
    /// Extra gain at sustain start.
    pub sustain_punch: f32,
    /// Envelope decay time.
    pub decay_time: f32,
    /// Initial tone frequency.
    pub start_frequency: f32,
    /// Cutoff frequency; sliding below it ends the sound.
    pub min_frequency: f32,
    /// Frequency slide (signed).
    pub slide: f32,
    /// Slide acceleration (signed).
    pub delta_slide: f32,
    /// Vibrato depth.
    pub vibrato_depth: f32,
    /// Vibrato speed.
    pub vibrato_speed: f32,
    /// Pitch change amount (signed).
    pub change_amount: f32,
    /// Time before the pitch change.
    pub change_speed: f32,
    /// Square duty cycle.
    pub square_duty: f32,
    /// Duty sweep (signed).
    pub duty_sweep: f32,
    /// Retrigger rate.
    pub repeat_speed: f32,
    /// Phaser tap offset (signed).
    pub phaser_offset: f32,
    /// Phaser sweep (signed).
    pub phaser_sweep: f32,
    /// Low-pass filter cutoff.
    pub lpf_cutoff: f32,
    /// Low-pass cutoff sweep (signed).
    pub lpf_cutoff_sweep: f32,
    /// Low-pass resonance.
    pub lpf_resonance: f32,
    /// High-pass filter cutoff.
    pub hpf_cutoff: f32,
    /// High-pass cutoff sweep (signed).
    pub hpf_cutoff_sweep: f32,
}

impl SfxParams {
    /// Parse the little-endian 96-byte parameter block.
    pub fn from_bytes(bytes: &[u8; RFX_PARAMS_LEN]) -> Self {
        let mut pos = 0usize;
        let mut next_u32 = || {
            let v = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
            pos += 4;
            v
        };
        let rand_seed = next_u32();
        let wave = match next_u32() {
            1 => SfxWave::Sawtooth,
            2 => SfxWave::Sine,
            3 => SfxWave::Noise,
            _ => SfxWave::Square,
        };
        let mut next_f32 = {
            let mut pos = 8usize;
            move || {
                let v = f32::from_le_bytes([
                    bytes[pos],
                    bytes[pos + 1],
                    bytes[pos + 2],
                    bytes[pos + 3],
                ]);
                pos += 4;
                v
            }
        };
        Self {
            rand_seed,
            wave,
            attack_time: next_f32(),
            sustain_time: next_f32(),
            sustain_punch: next_f32(),
            decay_time: next_f32(),
            start_frequency: next_f32(),
            min_frequency: next_f32(),
            slide: next_f32(),
            delta_slide: next_f32(),
            vibrato_depth: next_f32(),
            vibrato_speed: next_f32(),
            change_amount: next_f32(),
            change_speed: next_f32(),
            square_duty: next_f32(),
            duty_sweep: next_f32(),
            repeat_speed: next_f32(),
            phaser_offset: next_f32(),
            phaser_sweep: next_f32(),
            lpf_cutoff: next_f32(),
            lpf_cutoff_sweep: next_f32(),
            lpf_resonance: next_f32(),
            hpf_cutoff: next_f32(),
            hpf_cutoff_sweep: next_f32(),
        }
    }
}

/// Read an `rFX ` container and synthesize it.
pub fn load_rfx<R: Read>(mut reader: R) -> Result<AudioBuffer> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    if header[..4] != RFX_MAGIC {
        return Err(Error::UnknownFormat);
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != RFX_VERSION {
        return Err(Error::Unsupported(format!("rFX file version {version}")));
    }
    let mut params = [0u8; RFX_PARAMS_LEN];
    reader.read_exact(&mut params)?;
    Ok(generate(&SfxParams::from_bytes(&params)))
}

/// xorshift32; cheap and reproducible for noise generation.
struct Rng(u32);

impl Rng {
    fn new(seed: u32) -> Self {
        Rng(if seed == 0 { 0x2545_f491 } else { seed })
    }

    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// Uniform float in `-1.0..1.0`.
    fn bipolar(&mut self) -> f32 {
        (self.next() >> 8) as f32 / 8_388_608.0 - 1.0
    }
}

const SUPERSAMPLES: usize = 8;
const PHASER_LEN: usize = 1024;
const NOISE_LEN: usize = 32;
/// Generation is cut off at ten seconds regardless of envelope settings.
const MAX_FRAMES: usize = MIX_RATE as usize * 10;
const MASTER_GAIN: f32 = 0.1;

struct Osc {
    fperiod: f64,
    fmaxperiod: f64,
    fslide: f64,
    fdslide: f64,
    square_duty: f32,
    square_slide: f32,
    arp_mod: f64,
    arp_time: i32,
    arp_limit: i32,
}

impl Osc {
    fn new(p: &SfxParams) -> Self {
        Self {
            fperiod: 100.0 / (f64::from(p.start_frequency).powi(2) + 0.001),
            fmaxperiod: 100.0 / (f64::from(p.min_frequency).powi(2) + 0.001),
            fslide: 1.0 - f64::from(p.slide).powi(3) * 0.01,
            fdslide: -f64::from(p.delta_slide).powi(3) * 0.000001,
            square_duty: 0.5 - p.square_duty * 0.5,
            square_slide: -p.duty_sweep * 0.00005,
            arp_mod: if p.change_amount >= 0.0 {
                1.0 - f64::from(p.change_amount).powi(2) * 0.9
            } else {
                1.0 + f64::from(p.change_amount).powi(2) * 10.0
            },
            arp_time: 0,
            arp_limit: if p.change_speed >= 1.0 {
                0
            } else {
                ((1.0 - p.change_speed).powi(2) * 20000.0 + 32.0) as i32
            },
        }
    }
}

/// Synthesize `params` into a mix-format stereo buffer.
pub fn generate(params: &SfxParams) -> AudioBuffer {
    let mut rng = Rng::new(params.rand_seed);
    let mut osc = Osc::new(params);

    // Envelope stage lengths in samples.
    let env_length = [
        (params.attack_time * params.attack_time * 100_000.0) as i32,
        (params.sustain_time * params.sustain_time * 100_000.0) as i32,
        (params.decay_time * params.decay_time * 100_000.0) as i32,
    ];
    let mut env_stage = 0usize;
    let mut env_time = 0i32;

    // Filters.
    let mut fltp = 0.0f32;
    let mut fltdp = 0.0f32;
    let mut fltw = params.lpf_cutoff.powi(3) * 0.1;
    let fltw_d = 1.0 + params.lpf_cutoff_sweep * 0.0001;
    let mut fltdmp = 5.0 / (1.0 + params.lpf_resonance.powi(2) * 20.0) * (0.01 + fltw);
    if fltdmp > 0.8 {
        fltdmp = 0.8;
    }
    let mut fltphp = 0.0f32;
    let mut flthp = params.hpf_cutoff.powi(2) * 0.1;
    let flthp_d = 1.0 + params.hpf_cutoff_sweep * 0.0003;

    // Vibrato.
    let mut vib_phase = 0.0f64;
    let vib_speed = f64::from(params.vibrato_speed).powi(2) * 0.01;
    let vib_amp = f64::from(params.vibrato_depth) * 0.5;

    // Phaser.
    let mut fphase = params.phaser_offset.powi(2) * 1020.0;
    if params.phaser_offset < 0.0 {
        fphase = -fphase;
    }
    let mut fdphase = params.phaser_sweep.powi(2);
    if params.phaser_sweep < 0.0 {
        fdphase = -fdphase;
    }
    let mut phaser_buffer = [0.0f32; PHASER_LEN];
    let mut ipp = 0usize;

    // Noise.
    let mut noise_buffer = [0.0f32; NOISE_LEN];
    for n in &mut noise_buffer {
        *n = rng.bipolar();
    }

    // Repeat.
    let mut rep_time = 0i32;
    let rep_limit = if params.repeat_speed == 0.0 {
        0
    } else {
        ((1.0 - params.repeat_speed).powi(2) * 20000.0 + 32.0) as i32
    };

    let mut phase = 0i32;
    let mut mono = Vec::new();

    while mono.len() < MAX_FRAMES {
        rep_time += 1;
        if rep_limit != 0 && rep_time >= rep_limit {
            rep_time = 0;
            osc = Osc::new(params);
        }

        // Frequency arpeggio and slide.
        osc.arp_time += 1;
        if osc.arp_limit != 0 && osc.arp_time >= osc.arp_limit {
            osc.arp_limit = 0;
            osc.fperiod *= osc.arp_mod;
        }
        osc.fslide += osc.fdslide;
        osc.fperiod *= osc.fslide;
        if osc.fperiod > osc.fmaxperiod {
            osc.fperiod = osc.fmaxperiod;
            if params.min_frequency > 0.0 {
                break;
            }
        }

        let mut rfperiod = osc.fperiod;
        if vib_amp > 0.0 {
            vib_phase += vib_speed;
            rfperiod = osc.fperiod * (1.0 + vib_phase.sin() * vib_amp);
        }
        let period = (rfperiod as i32).max(8);

        osc.square_duty = (osc.square_duty + osc.square_slide).clamp(0.0, 0.5);

        // Envelope.
        env_time += 1;
        if env_time > env_length[env_stage] {
            env_time = 0;
            env_stage += 1;
            if env_stage == 3 {
                break;
            }
        }
        let env_vol = match env_stage {
            0 => {
                if env_length[0] == 0 {
                    1.0
                } else {
                    env_time as f32 / env_length[0] as f32
                }
            }
            1 => {
                1.0 + if env_length[1] == 0 {
                    0.0
                } else {
                    (1.0 - env_time as f32 / env_length[1] as f32) * 2.0 * params.sustain_punch
                }
            }
            _ => {
                if env_length[2] == 0 {
                    0.0
                } else {
                    1.0 - env_time as f32 / env_length[2] as f32
                }
            }
        };

        // Phaser step.
        fphase += fdphase;
        let iphase = (fphase as i32).unsigned_abs().min(PHASER_LEN as u32 - 1) as usize;

        if flthp_d != 0.0 {
            flthp = (flthp * flthp_d).clamp(0.000_01, 0.1);
        }

        let mut ssample = 0.0f32;
        for _ in 0..SUPERSAMPLES {
            phase += 1;
            if phase >= period {
                phase %= period;
                if params.wave == SfxWave::Noise {
                    for n in &mut noise_buffer {
                        *n = rng.bipolar();
                    }
                }
            }

            let fp = phase as f32 / period as f32;
            let mut sample = match params.wave {
                SfxWave::Square => {
                    if fp < osc.square_duty {
                        0.5
                    } else {
                        -0.5
                    }
                }
                SfxWave::Sawtooth => 1.0 - fp * 2.0,
                SfxWave::Sine => (fp * std::f32::consts::TAU).sin(),
                SfxWave::Noise => noise_buffer[(phase as usize * NOISE_LEN) / period as usize],
            };

            // Low-pass, then high-pass.
            let pp = fltp;
            fltw = (fltw * fltw_d).clamp(0.0, 0.1);
            if params.lpf_cutoff < 1.0 {
                fltdp += (sample - fltp) * fltw;
                fltdp -= fltdp * fltdmp;
            } else {
                fltp = sample;
                fltdp = 0.0;
            }
            fltp += fltdp;

            fltphp += fltp - pp;
            fltphp -= fltphp * flthp;
            sample = fltphp;

            // Phaser tap.
            phaser_buffer[ipp & (PHASER_LEN - 1)] = sample;
            sample += phaser_buffer[(ipp + PHASER_LEN - iphase) & (PHASER_LEN - 1)];
            ipp = (ipp + 1) & (PHASER_LEN - 1);

            ssample += sample * env_vol;
        }

        let out = (ssample / SUPERSAMPLES as f32 * MASTER_GAIN).clamp(-1.0, 1.0);
        mono.push(out);
    }

    let frames = mono.len() as u32;
    let mut buf = AudioBuffer::voice_format(MIX_RATE, frames);
    interleave_f32(buf.samples_mut(), &mono, 1, MIX_RATE);
    buf.used = frames;
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beep() -> SfxParams {
        SfxParams {
            rand_seed: 42,
            wave: SfxWave::Square,
            sustain_time: 0.3,
            decay_time: 0.4,
            start_frequency: 0.5,
            square_duty: 0.5,
            lpf_cutoff: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn generate_produces_bounded_stereo_audio() {
        let buf = generate(&beep());
        assert!(buf.used > 0);
        assert!(buf.used <= MAX_FRAMES as u32);
        assert_eq!(buf.rate, MIX_RATE);

        let frames = buf.frames();
        assert!(frames.iter().any(|&s| s != 0.0));
        assert!(frames.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        // Mono duplicated to both channels.
        for f in frames.chunks_exact(2) {
            assert_eq!(f[0], f[1]);
        }
    }

    #[test]
    fn same_seed_is_reproducible() {
        let mut params = beep();
        params.wave = SfxWave::Noise;
        let a = generate(&params);
        let b = generate(&params);
        assert_eq!(a.frames(), b.frames());
    }

    #[test]
    fn envelope_lengths_scale_duration() {
        let short = generate(&SfxParams {
            sustain_time: 0.1,
            decay_time: 0.1,
            ..beep()
        });
        let long = generate(&SfxParams {
            sustain_time: 0.5,
            decay_time: 0.5,
            ..beep()
        });
        assert!(long.used > short.used);
    }

    #[test]
    fn rfx_header_roundtrip() {
        let params = beep();
        let mut blob = Vec::new();
        blob.extend_from_slice(&RFX_MAGIC);
        blob.extend_from_slice(&RFX_VERSION.to_le_bytes());
        blob.extend_from_slice(&(RFX_PARAMS_LEN as u16).to_le_bytes());
        blob.extend_from_slice(&params.rand_seed.to_le_bytes());
        blob.extend_from_slice(&0u32.to_le_bytes()); // Square
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
            blob.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(blob.len(), 8 + RFX_PARAMS_LEN);

        let buf = load_rfx(std::io::Cursor::new(blob)).unwrap();
        let direct = generate(&params);
        assert_eq!(buf.frames(), direct.frames());
    }

    #[test]
    fn bad_magic_is_unknown_format() {
        let blob = b"WAVExxxx".to_vec();
        assert!(matches!(
            load_rfx(std::io::Cursor::new(blob)),
            Err(Error::UnknownFormat)
        ));
    }

    #[test]
    fn wrong_version_is_unsupported() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&RFX_MAGIC);
        blob.extend_from_slice(&100u16.to_le_bytes());
        blob.extend_from_slice(&[0u8; 2]);
        blob.extend_from_slice(&[0u8; RFX_PARAMS_LEN]);
        assert!(matches!(
            load_rfx(std::io::Cursor::new(blob)),
            Err(Error::Unsupported(_))
        ));
    }
}
