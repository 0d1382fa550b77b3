//! Audio normalizer: arbitrary decoded or encoded audio to mono 16-bit PCM at 16 kHz.
//!
//! Resampling is plain linear interpolation. It aliases above the source
//! Nyquist, which the signature pipeline tolerates.

use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Sample rate of every normalized buffer.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decode an in-memory audio file (WAV, MP3, FLAC) and normalize it.
pub fn normalize_bytes(bytes: &[u8]) -> Result<Vec<i16>> {
    let source = Box::new(Cursor::new(bytes.to_vec()));
    let (channels, rate) = decode(source, Hint::new())?;
    normalize_pcm(&channels, rate)
}

/// Decode an audio file from disk and normalize it. The file extension is
/// used as a format hint.
pub fn normalize_file(path: impl AsRef<Path>) -> Result<Vec<i16>> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let (channels, rate) = decode(Box::new(file), hint)?;
    normalize_pcm(&channels, rate)
}

/// Normalize already-decoded planar audio (one `Vec` per channel, amplitudes
/// in `[-1, 1]`) at `sample_rate`.
pub fn normalize_pcm(channels: &[Vec<f32>], sample_rate: u32) -> Result<Vec<i16>> {
    if sample_rate == 0 {
        return Err(Error::Decode("sample rate is zero".to_string()));
    }
    if let Some(first) = channels.first() {
        if channels.iter().any(|ch| ch.len() != first.len()) {
            return Err(Error::Decode("channels have different lengths".to_string()));
        }
    }

    let mono = downmix(channels);
    let resampled = if sample_rate == TARGET_SAMPLE_RATE {
        mono
    } else {
        resample_linear(&mono, sample_rate, TARGET_SAMPLE_RATE)
    };

    debug!(
        source_rate = sample_rate,
        channels = channels.len(),
        samples = resampled.len(),
        "normalized audio"
    );

    Ok(resampled.iter().map(|&s| quantize(s)).collect())
}

/// Average all channels frame by frame.
pub fn downmix(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels {
        [] => Vec::new(),
        [only] => only.clone(),
        _ => {
            let frames = channels[0].len();
            let count = channels.len() as f32;
            (0..frames)
                .map(|i| channels.iter().map(|ch| ch[i]).sum::<f32>() / count)
                .collect()
        }
    }
}

/// Linear-interpolation resampler.
///
/// The output length is `round(duration * to_rate)`; output samples are
/// evenly spaced query points over the whole source index range, so the
/// first and last source samples are always reproduced exactly.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() {
        return Vec::new();
    }

    let duration = input.len() as f64 / from_rate as f64;
    let out_len = (duration * to_rate as f64).round() as usize;
    match out_len {
        0 => return Vec::new(),
        1 => return vec![input[0]],
        _ => {}
    }

    let last = (input.len() - 1) as f64;
    let step = last / (out_len - 1) as f64;

    (0..out_len)
        .map(|i| {
            let pos = (i as f64 * step).min(last);
            let idx0 = pos.floor() as usize;
            let frac = pos - idx0 as f64;
            let s0 = input[idx0] as f64;
            let s1 = input.get(idx0 + 1).copied().unwrap_or(input[idx0]) as f64;
            (s0 + (s1 - s0) * frac) as f32
        })
        .collect()
}

/// Scale a `[-1, 1]` amplitude to i16, truncating toward zero and saturating
/// out-of-range values.
pub fn quantize(sample: f32) -> i16 {
    // Float-to-int `as` casts truncate and saturate; NaN maps to 0.
    (sample as f64 * i16::MAX as f64) as i16
}

/// Decode every packet of the first audio track into planar f32 channels.
fn decode(source: Box<dyn MediaSource>, hint: Hint) -> Result<(Vec<Vec<f32>>, u32)> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("failed to probe audio: {}", e)))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("no audio tracks found".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("failed to create decoder: {}", e)))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Decode(format!("failed to read packet: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(Error::Decode(format!("failed to decode packet: {}", e))),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }
        sample_rate.get_or_insert(spec.rate);

        let num_channels = spec.channels.count();
        if channels.is_empty() {
            channels = vec![Vec::new(); num_channels];
        }

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_planar_ref(decoded);
        let planar = buf.samples();
        for (ch, out) in channels.iter_mut().enumerate().take(num_channels) {
            out.extend_from_slice(&planar[ch * frames..(ch + 1) * frames]);
        }
    }

    let rate = sample_rate.ok_or_else(|| Error::Decode("sample rate not specified".to_string()))?;
    info!(
        sample_rate = rate,
        channels = channels.len(),
        frames = channels.first().map_or(0, |c| c.len()),
        "decoded audio"
    );

    Ok((channels, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavfile::encode_wav;

    fn sine(freq: f32, rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
        let n = (rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn to_i16(samples: &[f32]) -> Vec<i16> {
        samples.iter().map(|&s| (s * 32767.0) as i16).collect()
    }

    #[test]
    fn test_quantize_truncates_and_saturates() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32767);
        assert_eq!(quantize(2.0), i16::MAX);
        assert_eq!(quantize(-2.0), i16::MIN);
        // 0.5 * 32767 = 16383.5 truncates to 16383
        assert_eq!(quantize(0.5), 16383);
        assert_eq!(quantize(-0.5), -16383);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix(&[vec![1.0, 0.5, -1.0], vec![0.0, 0.5, 1.0]]);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_resample_length() {
        let input = vec![0.0f32; 44100 * 3];
        let out = resample_linear(&input, 44100, 16000);
        assert_eq!(out.len(), 48000);

        // 1000 samples at 44.1 kHz = 0.022675.. s -> 362.8 -> 363
        let out = resample_linear(&vec![0.0f32; 1000], 44100, 16000);
        assert_eq!(out.len(), 363);
    }

    #[test]
    fn test_resample_interpolates_ramp() {
        // A linear ramp stays linear under linear interpolation.
        let input: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let out = resample_linear(&input, 9, 5);
        assert_eq!(out.len(), 5);
        for (i, v) in out.iter().enumerate() {
            assert!((v - (i as f32 * 2.0)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_normalize_pcm_passthrough_rate() {
        let samples = normalize_pcm(&[vec![0.0, 0.25, -0.25, 1.0]], 16000).unwrap();
        assert_eq!(samples, vec![0, 8191, -8191, 32767]);
    }

    #[test]
    fn test_normalize_pcm_rejects_zero_rate() {
        assert!(matches!(normalize_pcm(&[vec![0.0]], 0), Err(Error::Decode(_))));
    }

    #[test]
    fn test_normalize_pcm_rejects_ragged_channels() {
        let err = normalize_pcm(&[vec![0.0; 4], vec![0.0; 3]], 16000).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_normalize_wav_44100_length() {
        let duration = 2.5f32;
        let wav = encode_wav(&to_i16(&sine(440.0, 44100, duration, 0.5)), 44100, 1);
        let samples = normalize_bytes(&wav).unwrap();
        let expected = (duration as f64 * 16000.0).round() as i64;
        assert!((samples.len() as i64 - expected).abs() <= 1);
    }

    #[test]
    fn test_normalize_stereo_wav() {
        // Left and right in opposite phase cancel out when averaged.
        let left = to_i16(&sine(440.0, 16000, 1.0, 0.5));
        let interleaved: Vec<i16> = left.iter().flat_map(|&s| [s, -s]).collect();
        let wav = encode_wav(&interleaved, 16000, 2);

        let samples = normalize_bytes(&wav).unwrap();
        assert_eq!(samples.len(), 16000);
        assert!(samples.iter().all(|&s| s.abs() <= 1));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let wav = encode_wav(&to_i16(&sine(1000.0, 22050, 1.0, 0.8)), 22050, 1);
        assert_eq!(normalize_bytes(&wav).unwrap(), normalize_bytes(&wav).unwrap());
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = normalize_bytes(b"definitely not an audio file").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_normalize_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, encode_wav(&to_i16(&sine(440.0, 8000, 1.0, 0.5)), 8000, 1)).unwrap();
        let samples = normalize_file(&path).unwrap();
        assert_eq!(samples.len(), 16000);
    }
}
