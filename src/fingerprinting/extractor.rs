//! Spectral peak extraction for one analysis window.
//!
//! The window is cut into overlapping frames of [`FFT_SIZE`] samples every
//! [`HOP_SIZE`] samples, each frame is Hann-windowed and transformed, and
//! the power spectrum is split into the four [`FrequencyBand`]s. For every
//! band the strongest bin of a frame becomes a peak only when it beats that
//! band's adaptive threshold. The threshold decays every frame and jumps
//! to `power * headroom` whenever a peak is taken, so a sustained tone
//! produces a peak now and then instead of one per frame.

use chfft::RFft1D;
use serde::{Deserialize, Serialize};

use crate::fingerprinting::hanning::hanning;
use crate::fingerprinting::signature_format::{DecodedSignature, FrequencyBand, FrequencyPeak};
use crate::normalize::TARGET_SAMPLE_RATE;

/// Samples per analysis frame. Bin indices in the wire format are in these units.
pub const FFT_SIZE: usize = 2048;

/// Samples between consecutive frames. Frame numbers in the wire format are in these units.
pub const HOP_SIZE: usize = 128;

/// Power values are floored here before taking the log.
const POWER_EPSILON: f32 = 1e-10;

/// Tunable extraction constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Lower edges of the four bands followed by the upper edge of the last, in Hz.
    pub band_edges_hz: [f32; 5],
    /// Minimum normalized power for a peak; anything quieter is silence.
    pub power_floor: f32,
    /// Per-frame multiplicative decay of each band threshold.
    pub decay: f32,
    /// Threshold after a peak, as a multiple of the peak's power.
    pub headroom: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            band_edges_hz: [250.0, 520.0, 1450.0, 3500.0, 5500.0],
            power_floor: 1.0 / 64.0,
            decay: 0.98,
            headroom: 4.0,
        }
    }
}

/// Computes fingerprints from 16 kHz mono windows.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractorConfig,
    window: Vec<f32>,
    /// Inclusive bin range searched for each band.
    band_bins: [(usize, usize); 4],
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let bin_hz = TARGET_SAMPLE_RATE as f32 / FFT_SIZE as f32;
        // Neighbours of every candidate bin must exist for interpolation.
        let max_bin = FFT_SIZE / 2 - 1;

        let mut band_bins = [(0usize, 0usize); 4];
        for band in FrequencyBand::ALL {
            let i = band.index();
            let lo = ((config.band_edges_hz[i] / bin_hz).ceil() as usize).clamp(1, max_bin);
            let hi = (((config.band_edges_hz[i + 1] / bin_hz).ceil() as usize).saturating_sub(1))
                .clamp(lo, max_bin);
            band_bins[i] = (lo, hi);
        }

        Extractor {
            config,
            window: hanning(FFT_SIZE),
            band_bins,
        }
    }

    /// Fingerprint one window of 16 kHz mono samples.
    ///
    /// Pure: the same samples always give the same peaks. Frames are only
    /// analysed once a full [`FFT_SIZE`] samples have been seen, so windows
    /// shorter than that come back with no peaks, as do silent ones.
    pub fn extract(&self, samples: &[i16]) -> DecodedSignature {
        let mut signature = DecodedSignature::new(TARGET_SAMPLE_RATE, samples.len() as u32);

        let mut fft = RFft1D::<f32>::new(FFT_SIZE);
        let mut ring = vec![0.0f32; FFT_SIZE];
        let mut ring_pos = 0usize;
        let mut excerpt = vec![0.0f32; FFT_SIZE];
        let mut power = vec![0.0f32; FFT_SIZE / 2 + 1];
        let mut thresholds = [self.config.power_floor; 4];
        let mut written = 0usize;

        for (frame, chunk) in samples.chunks(HOP_SIZE).enumerate() {
            // A short tail chunk is zero-padded to a full hop.
            for i in 0..HOP_SIZE {
                ring[ring_pos] = chunk.get(i).map_or(0.0, |&s| s as f32);
                ring_pos = (ring_pos + 1) % FFT_SIZE;
            }
            written += HOP_SIZE;

            for t in thresholds.iter_mut() {
                *t = (*t * self.config.decay).max(self.config.power_floor);
            }
            if written < FFT_SIZE {
                continue;
            }

            // Oldest sample first.
            let (newer, older) = ring.split_at(ring_pos);
            for (dst, (&s, &w)) in excerpt
                .iter_mut()
                .zip(older.iter().chain(newer.iter()).zip(self.window.iter()))
            {
                *dst = s * w;
            }

            let spectrum = fft.forward(&excerpt);
            for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                *p = (c.norm_sqr() / (1u32 << 17) as f32).max(POWER_EPSILON);
            }

            for band in FrequencyBand::ALL {
                let threshold = &mut thresholds[band.index()];
                let found = self.band_peak(&power, band, frame as u32, *threshold);
                if let Some((peak, peak_power)) = found {
                    *threshold = peak_power * self.config.headroom;
                    signature
                        .frequency_band_to_sound_peaks
                        .entry(band)
                        .or_default()
                        .push(peak);
                }
            }
        }

        signature
    }

    /// Strongest bin of `band`, lowest index on ties.
    fn dominant_bin(&self, power: &[f32], band: FrequencyBand) -> usize {
        let (lo, hi) = self.band_bins[band.index()];
        let mut best = lo;
        for bin in lo + 1..=hi {
            if power[bin] > power[best] {
                best = bin;
            }
        }
        best
    }

    fn band_peak(
        &self,
        power: &[f32],
        band: FrequencyBand,
        frame: u32,
        threshold: f32,
    ) -> Option<(FrequencyPeak, f32)> {
        let bin = self.dominant_bin(power, band);
        if power[bin] <= threshold {
            return None;
        }

        let magnitude = log_magnitude(power[bin], self.config.power_floor);
        let before = log_magnitude(power[bin - 1], self.config.power_floor);
        let after = log_magnitude(power[bin + 1], self.config.power_floor);

        // Parabolic interpolation over log magnitudes; a flat or rising edge
        // at the band boundary is not a spectral peak.
        let variation = magnitude * 2.0 - before - after;
        if variation <= 0.0 {
            return None;
        }
        let shift = (after - before) * 32.0 / variation;
        let corrected_bin = bin as f32 * 64.0 + shift;

        let peak = FrequencyPeak {
            fft_pass_number: frame,
            peak_magnitude: magnitude.clamp(0.0, u16::MAX as f32) as u16,
            corrected_peak_frequency_bin: corrected_bin.clamp(0.0, u16::MAX as f32) as u16,
            sample_rate_hz: TARGET_SAMPLE_RATE,
        };
        Some((peak, power[bin]))
    }
}

/// Log-scaled power as stored in the wire format. The floor maps to about 0.
fn log_magnitude(power: f32, floor: f32) -> f32 {
    power.max(floor).ln() * 1477.3 + 6144.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, seconds: f32, amplitude: f32) -> Vec<i16> {
        let n = (TARGET_SAMPLE_RATE as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / TARGET_SAMPLE_RATE as f32;
                (amplitude * 32767.0 * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn test_silence_has_no_peaks() {
        let sig = Extractor::default().extract(&vec![0i16; 5 * 16000]);
        assert_eq!(sig.number_samples, 80_000);
        assert_eq!(sig.sample_rate_hz, 16000);
        assert_eq!(sig.peak_count(), 0);
        for band in FrequencyBand::ALL {
            assert!(sig.peaks(band).is_empty());
        }
    }

    #[test]
    fn test_short_window_has_no_peaks() {
        let sig = Extractor::default().extract(&tone(1000.0, 0.05, 0.5));
        assert_eq!(sig.number_samples, 800);
        assert_eq!(sig.peak_count(), 0);
    }

    #[test]
    fn test_tone_lands_in_its_band() {
        let sig = Extractor::default().extract(&tone(1000.0, 2.0, 0.5));
        let peaks = sig.peaks(FrequencyBand::Hz520To1450);
        assert!(!peaks.is_empty());
        for p in peaks {
            assert!((p.frequency_hz() - 1000.0).abs() < 8.0, "peak at {} Hz", p.frequency_hz());
        }
    }

    #[test]
    fn test_threshold_limits_peak_density() {
        let samples = tone(2000.0, 2.0, 0.5);
        let frames = samples.len() / HOP_SIZE;
        let sig = Extractor::default().extract(&samples);
        let peaks = sig.peaks(FrequencyBand::Hz1450To3500);
        assert!(!peaks.is_empty());
        assert!(peaks.len() < frames / 4, "{} peaks over {} frames", peaks.len(), frames);
    }

    #[test]
    fn test_peaks_ordered_and_unique_per_frame() {
        let mut samples = tone(440.0, 3.0, 0.3);
        for (s, t) in samples.iter_mut().zip(tone(3000.0, 3.0, 0.3)) {
            *s = s.saturating_add(t);
        }
        let sig = Extractor::default().extract(&samples);
        assert!(sig.peak_count() > 0);
        for peaks in sig.frequency_band_to_sound_peaks.values() {
            assert!(!peaks.is_empty());
            for pair in peaks.windows(2) {
                assert!(pair[0].fft_pass_number < pair[1].fft_pass_number);
            }
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let samples = tone(700.0, 1.5, 0.4);
        let extractor = Extractor::default();
        let a = extractor.extract(&samples);
        let b = extractor.extract(&samples);
        assert_eq!(a, b);
        assert_eq!(a.encode_to_binary().unwrap(), b.encode_to_binary().unwrap());
    }

    #[test]
    fn test_band_bins_cover_edges() {
        let extractor = Extractor::default();
        // 7.8125 Hz per bin
        assert_eq!(extractor.band_bins[0], (32, 66));
        assert_eq!(extractor.band_bins[3], (448, 703));
    }
}
