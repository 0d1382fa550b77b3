//! WAV output for 16-bit PCM.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Encode interleaved signed 16-bit samples as a canonical 44-byte-header WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_size = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;

    let mut out = Vec::with_capacity(44 + samples.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(data_size + 36).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Write mono 16-bit PCM to `path` as a WAV file.
pub fn write_wav(path: impl AsRef<Path>, samples: &[i16], sample_rate: u32) -> Result<()> {
    fs::write(path, encode_wav(samples, sample_rate, 1))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_bytes;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    #[test]
    fn test_encode_wav_size() {
        let bytes = encode_wav(&[0, 1000, -1000, 16000, -16000], 44100, 1);
        // Header (44 bytes) + 5 samples * 2 bytes
        assert_eq!(bytes.len(), 54);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[36..40], b"data");
    }

    #[test]
    fn test_header_fields() {
        let bytes = encode_wav(&[1, 2, 3, 4, 5, 6], 48000, 2);
        assert_eq!(u32_at(&bytes, 4), 36 + 12);
        assert_eq!(u16_at(&bytes, 20), 1);
        assert_eq!(u16_at(&bytes, 22), 2);
        assert_eq!(u32_at(&bytes, 24), 48000);
        assert_eq!(u32_at(&bytes, 28), 48000 * 4);
        assert_eq!(u16_at(&bytes, 32), 4);
        assert_eq!(u16_at(&bytes, 34), 16);
        assert_eq!(u32_at(&bytes, 40), 12);
        assert_eq!(u16_at(&bytes, 44), 1);
        assert_eq!(u16_at(&bytes, 54), 6);
    }

    #[test]
    fn test_write_wav_file_decodes_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let samples: Vec<i16> = (0..16000).map(|i| ((i % 200) * 100 - 10000) as i16).collect();
        write_wav(&path, &samples, 16000).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, encode_wav(&samples, 16000, 1));
        assert_eq!(normalize_bytes(&bytes).unwrap().len(), 16000);
    }
}
