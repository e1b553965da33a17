//! WAV input and output for first-order ambisonic audio, using [hound].

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::borrow::Cow;
use std::f32::consts::PI;
use std::fmt;
use std::path::Path;

/// FOA files carry W, Y, Z, X.
pub const FOA_CHANNELS: u16 = 4;

#[derive(Debug)]
pub enum WavError {
    /// Reading or writing the file failed.
    Hound(hound::Error),

    /// The input is not a 4-channel file.
    ChannelCount(u16),
}

impl fmt::Display for WavError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            WavError::Hound(error) => Cow::from(format!("wav error: {}", error)),
            WavError::ChannelCount(n) => Cow::from(format!(
                "expected {} ambisonic channels, found {}",
                FOA_CHANNELS, n
            )),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for WavError {}

impl From<hound::Error> for WavError {
    fn from(error: hound::Error) -> Self {
        WavError::Hound(error)
    }
}

/// Reads a 4-channel file into frames. Integer samples are scaled to
/// `[-1, 1)`. Returns the frames and the file's sample rate.
pub fn read_foa(path: impl AsRef<Path>) -> Result<(Vec<[f32; 4]>, u32), WavError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != FOA_CHANNELS {
        return Err(WavError::ChannelCount(spec.channels));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let frames = samples
        .chunks_exact(FOA_CHANNELS as usize)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    Ok((frames, spec.sample_rate))
}

/// Writes frames as a 4-channel 32-bit float file.
pub fn write_foa(
    path: impl AsRef<Path>,
    frames: &[[f32; 4]],
    sample_rate: u32,
) -> Result<(), WavError> {
    let spec = WavSpec {
        channels: FOA_CHANNELS,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for frame in frames {
        for &sample in frame {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Encodes a mono signal as a point source in the direction given by
/// `azimuth` (radians, counter-clockwise from straight ahead) and
/// `elevation` (radians, up from the horizon).
pub fn encode_mono_foa(mono: &[f32], azimuth: f32, elevation: f32) -> Vec<[f32; 4]> {
    let (sin_az, cos_az) = azimuth.sin_cos();
    let (sin_el, cos_el) = elevation.sin_cos();
    let gains = [1.0, sin_az * cos_el, sin_el, cos_az * cos_el];
    mono.iter()
        .map(|&s| gains.map(|g| g * s))
        .collect()
}

/// A sine tone with a short fade at both ends.
pub fn test_tone(frequency: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    let fade = (sample_rate as usize / 100).min(len / 2).max(1);
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let edge = i.min(len - 1 - i);
            let gain = (edge as f32 / fade as f32).min(1.0);
            0.5 * gain * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}
