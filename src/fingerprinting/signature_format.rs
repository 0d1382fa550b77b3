//! Fingerprint data model and its binary / data-URI wire format.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! 0   u32  magic1 = 0xcafe2580
//! 4   u32  crc32 of every byte from offset 8 to the end
//! 8   u32  total size minus the 48-byte header
//! 12  u32  magic2 = 0x94119c00
//! 16  u32  x3 zero
//! 28  u32  sample rate id << 27
//! 32  u32  x2 zero
//! 40  u32  number_samples + sample_rate * 0.24
//! 44  u32  (15 << 19) + 0x40000
//! 48  u32  0x40000000
//! 52  u32  total size minus the 48-byte header
//! 56  per band: u32 0x60030040 + band, u32 byte length, peak records, zero padding to 4
//! ```
//!
//! A peak record is a u8 frame delta, a u16 magnitude and a u16 corrected
//! frequency bin. A delta of 255 or more is escaped as `0xff` followed by
//! the absolute u32 frame number, then a zero delta.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::fingerprinting::extractor::{FFT_SIZE, HOP_SIZE};

const MAGIC1: u32 = 0xcafe_2580;
const MAGIC2: u32 = 0x9411_9c00;
const FIXED_VALUE: u32 = (15 << 19) + 0x40000;
const CONTENTS_TAG: u32 = 0x4000_0000;
const BAND_TAG_BASE: u32 = 0x6003_0040;
const HEADER_SIZE: usize = 48;

/// Prefix of the text form submitted to the recognition service.
pub const DATA_URI_PREFIX: &str = "data:audio/vnd.shazam.sig;base64,";

/// Frequency bands peaks are grouped by. The discriminant is the wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrequencyBand {
    Hz250To520 = 0,
    Hz520To1450 = 1,
    Hz1450To3500 = 2,
    Hz3500To5500 = 3,
}

impl FrequencyBand {
    pub const ALL: [FrequencyBand; 4] = [
        FrequencyBand::Hz250To520,
        FrequencyBand::Hz520To1450,
        FrequencyBand::Hz1450To3500,
        FrequencyBand::Hz3500To5500,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Array index into per-band state.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One spectral landmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyPeak {
    /// Frame number within the window (frames are [`HOP_SIZE`] samples apart).
    pub fft_pass_number: u32,
    /// Log-scaled spectral power, see [`FrequencyPeak::amplitude_pcm`].
    pub peak_magnitude: u16,
    /// FFT bin index times 64, refined by parabolic interpolation.
    pub corrected_peak_frequency_bin: u16,
    pub sample_rate_hz: u32,
}

impl FrequencyPeak {
    pub fn frequency_hz(&self) -> f32 {
        let bin_hz = self.sample_rate_hz as f32 / FFT_SIZE as f32;
        self.corrected_peak_frequency_bin as f32 * (bin_hz / 64.0)
    }

    /// Approximate linear amplitude of the peak in PCM units.
    pub fn amplitude_pcm(&self) -> f32 {
        let power = ((self.peak_magnitude as f32 - 6144.0) / 1477.3).exp();
        (power * (1 << 17) as f32 / 2.0).sqrt() / 1024.0
    }

    /// Position of the peak relative to the start of its window.
    pub fn seconds(&self) -> f32 {
        (self.fft_pass_number as f32 * HOP_SIZE as f32) / self.sample_rate_hz as f32
    }
}

/// A fingerprint of one analysis window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSignature {
    pub sample_rate_hz: u32,
    pub number_samples: u32,
    pub frequency_band_to_sound_peaks: BTreeMap<FrequencyBand, Vec<FrequencyPeak>>,
}

impl DecodedSignature {
    pub fn new(sample_rate_hz: u32, number_samples: u32) -> Self {
        DecodedSignature {
            sample_rate_hz,
            number_samples,
            frequency_band_to_sound_peaks: BTreeMap::new(),
        }
    }

    /// Total number of peaks across all bands.
    pub fn peak_count(&self) -> usize {
        self.frequency_band_to_sound_peaks.values().map(Vec::len).sum()
    }

    /// Peaks of one band; empty when the band produced none.
    pub fn peaks(&self, band: FrequencyBand) -> &[FrequencyPeak] {
        self.frequency_band_to_sound_peaks
            .get(&band)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Serialize to the binary signature layout.
    pub fn encode_to_binary(&self) -> Result<Vec<u8>> {
        let rate_id = sample_rate_id(self.sample_rate_hz)?;

        let mut contents: Vec<u8> = Vec::new();
        for (band, peaks) in &self.frequency_band_to_sound_peaks {
            if peaks.is_empty() {
                continue;
            }
            let records = encode_peaks(peaks)?;
            put_u32(&mut contents, BAND_TAG_BASE + band.id());
            put_u32(&mut contents, records.len() as u32);
            contents.extend_from_slice(&records);
            contents.resize(contents.len() + padding(records.len()), 0);
        }

        let size_minus_header = u32::try_from(contents.len() + 8)
            .map_err(|_| Error::Signature("signature too large".to_string()))?;
        let samples_field = self
            .number_samples
            .checked_add(rate_offset(self.sample_rate_hz))
            .ok_or_else(|| Error::Signature("number of samples out of range".to_string()))?;

        let mut buf: Vec<u8> = Vec::with_capacity(HEADER_SIZE + 8 + contents.len());
        put_u32(&mut buf, MAGIC1);
        put_u32(&mut buf, 0); // crc32, patched below
        put_u32(&mut buf, size_minus_header);
        put_u32(&mut buf, MAGIC2);
        for _ in 0..3 {
            put_u32(&mut buf, 0);
        }
        put_u32(&mut buf, rate_id << 27);
        for _ in 0..2 {
            put_u32(&mut buf, 0);
        }
        put_u32(&mut buf, samples_field);
        put_u32(&mut buf, FIXED_VALUE);
        put_u32(&mut buf, CONTENTS_TAG);
        put_u32(&mut buf, size_minus_header);
        buf.extend_from_slice(&contents);

        let crc = crc32fast::hash(&buf[8..]);
        buf[4..8].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Serialize to the `data:` URI submitted to the recognition service.
    pub fn encode_to_uri(&self) -> Result<String> {
        let binary = self.encode_to_binary()?;
        Ok(format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(binary)))
    }

    /// Parse a binary signature, validating magics, sizes and checksum.
    pub fn decode_from_binary(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + 8 {
            return Err(Error::Signature(format!("signature too short: {} bytes", data.len())));
        }

        let mut cursor = Cursor::new(data);
        let magic1 = read_u32(&mut cursor)?;
        let crc = read_u32(&mut cursor)?;
        let size_minus_header = read_u32(&mut cursor)?;
        let magic2 = read_u32(&mut cursor)?;
        if magic1 != MAGIC1 || magic2 != MAGIC2 {
            return Err(Error::Signature("bad magic".to_string()));
        }
        if crc != crc32fast::hash(&data[8..]) {
            return Err(Error::Signature("checksum mismatch".to_string()));
        }
        if size_minus_header as usize != data.len() - HEADER_SIZE {
            return Err(Error::Signature(format!(
                "declared size {} does not match {}",
                size_minus_header,
                data.len() - HEADER_SIZE
            )));
        }

        cursor.set_position(28);
        let sample_rate_hz = sample_rate_from_id(read_u32(&mut cursor)? >> 27)?;
        cursor.set_position(40);
        let number_samples = read_u32(&mut cursor)?
            .checked_sub(rate_offset(sample_rate_hz))
            .ok_or_else(|| Error::Signature("number of samples out of range".to_string()))?;
        if read_u32(&mut cursor)? != FIXED_VALUE {
            return Err(Error::Signature("bad fixed header value".to_string()));
        }
        if read_u32(&mut cursor)? != CONTENTS_TAG || read_u32(&mut cursor)? != size_minus_header {
            return Err(Error::Signature("bad contents header".to_string()));
        }

        let mut signature = DecodedSignature::new(sample_rate_hz, number_samples);
        while (cursor.position() as usize) < data.len() {
            let tag = read_u32(&mut cursor)?;
            let band = tag
                .checked_sub(BAND_TAG_BASE)
                .and_then(FrequencyBand::from_id)
                .ok_or_else(|| Error::Signature(format!("unknown band tag {:#x}", tag)))?;
            let len = read_u32(&mut cursor)? as usize;

            let mut records = vec![0u8; len];
            cursor
                .read_exact(&mut records)
                .map_err(|_| Error::Signature("truncated band section".to_string()))?;
            let mut pad = vec![0u8; padding(len)];
            cursor
                .read_exact(&mut pad)
                .map_err(|_| Error::Signature("truncated band padding".to_string()))?;

            let peaks = decode_peaks(&records, sample_rate_hz)?;
            if signature.frequency_band_to_sound_peaks.insert(band, peaks).is_some() {
                return Err(Error::Signature(format!("duplicate band {:?}", band)));
            }
        }

        Ok(signature)
    }

    /// Parse the `data:` URI form.
    pub fn decode_from_uri(uri: &str) -> Result<Self> {
        let encoded = uri
            .strip_prefix(DATA_URI_PREFIX)
            .ok_or_else(|| Error::Signature("missing data URI prefix".to_string()))?;
        let binary = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Signature(format!("invalid base64: {}", e)))?;
        Self::decode_from_binary(&binary)
    }
}

fn sample_rate_id(rate: u32) -> Result<u32> {
    match rate {
        8000 => Ok(1),
        11025 => Ok(2),
        16000 => Ok(3),
        32000 => Ok(4),
        44100 => Ok(5),
        48000 => Ok(6),
        other => Err(Error::Signature(format!("unsupported sample rate {}", other))),
    }
}

fn sample_rate_from_id(id: u32) -> Result<u32> {
    match id {
        1 => Ok(8000),
        2 => Ok(11025),
        3 => Ok(16000),
        4 => Ok(32000),
        5 => Ok(44100),
        6 => Ok(48000),
        other => Err(Error::Signature(format!("unknown sample rate id {}", other))),
    }
}

/// `sample_rate * 0.24`, exact for every supported rate.
fn rate_offset(rate: u32) -> u32 {
    rate * 24 / 100
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn encode_peaks(peaks: &[FrequencyPeak]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(peaks.len() * 5);
    let mut last_pass = 0u32;
    for peak in peaks {
        if peak.fft_pass_number < last_pass {
            return Err(Error::Signature(format!(
                "peaks out of order: frame {} after {}",
                peak.fft_pass_number, last_pass
            )));
        }
        if peak.fft_pass_number - last_pass >= 255 {
            out.push(0xff);
            put_u32(&mut out, peak.fft_pass_number);
            last_pass = peak.fft_pass_number;
        }
        out.push((peak.fft_pass_number - last_pass) as u8);
        put_u16(&mut out, peak.peak_magnitude);
        put_u16(&mut out, peak.corrected_peak_frequency_bin);
        last_pass = peak.fft_pass_number;
    }
    Ok(out)
}

fn decode_peaks(records: &[u8], sample_rate_hz: u32) -> Result<Vec<FrequencyPeak>> {
    let truncated = |_| Error::Signature("truncated peak record".to_string());

    let mut cursor = Cursor::new(records);
    let mut peaks = Vec::new();
    let mut pass = 0u32;
    while (cursor.position() as usize) < records.len() {
        let delta = cursor.read_u8().map_err(truncated)?;
        if delta == 0xff {
            pass = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            continue;
        }
        pass = pass
            .checked_add(delta as u32)
            .ok_or_else(|| Error::Signature("frame number overflow".to_string()))?;
        let peak_magnitude = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let corrected_peak_frequency_bin = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        peaks.push(FrequencyPeak {
            fft_pass_number: pass,
            peak_magnitude,
            corrected_peak_frequency_bin,
            sample_rate_hz,
        });
    }
    Ok(peaks)
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::Signature("truncated header".to_string()))
}
