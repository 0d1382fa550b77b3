//! Incremental signature generator.
//!
//! The generator is fed one normalized buffer and then hands out one
//! fingerprint per call to [`SignatureGenerator::next`], each covering the
//! next window of at most `max_window_seconds` of audio. Windows partition
//! the buffer left to right with no gaps or overlaps.
//!
//! ```text
//! Idle --feed--> Fed --next--> Emitting --next (cursor at end)--> Exhausted
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fingerprinting::extractor::{Extractor, ExtractorConfig};
use crate::fingerprinting::signature_format::DecodedSignature;
use crate::normalize::TARGET_SAMPLE_RATE;

/// Default amount of audio covered by one fingerprint.
pub const DEFAULT_MAX_WINDOW_SECONDS: f64 = 8.0;

const RATE: usize = TARGET_SAMPLE_RATE as usize;
const DEFAULT_WINDOW_SAMPLES: usize = DEFAULT_MAX_WINDOW_SECONDS as usize * RATE;

/// Lifecycle of a [`SignatureGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Idle,
    Fed,
    Emitting,
    Exhausted,
}

/// A span of the fed buffer, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub len: usize,
}

impl Window {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Skip-ahead heuristic for long inputs.
///
/// Buffers longer than `threshold_samples` start
/// `(total / (divisor_seconds * 16000) - retained_windows)` seconds in.
/// Results below zero clamp to no skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipAhead {
    pub threshold_samples: usize,
    pub divisor_seconds: usize,
    pub retained_windows: usize,
}

impl Default for SkipAhead {
    fn default() -> Self {
        SkipAhead {
            // 12 windows of 3 seconds
            threshold_samples: 12 * 3 * RATE,
            divisor_seconds: 16,
            retained_windows: 6,
        }
    }
}

impl SkipAhead {
    /// Samples to skip for a buffer of `total_samples`.
    pub fn skip_samples(&self, total_samples: usize) -> usize {
        if total_samples <= self.threshold_samples || self.divisor_seconds == 0 {
            return 0;
        }
        let units = total_samples / (self.divisor_seconds * RATE);
        (units.saturating_sub(self.retained_windows) * RATE).min(total_samples)
    }
}

/// Windowing policy of a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub max_window_seconds: f64,
    /// `None` disables skip-ahead.
    pub skip_ahead: Option<SkipAhead>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            max_window_seconds: DEFAULT_MAX_WINDOW_SECONDS,
            skip_ahead: Some(SkipAhead::default()),
        }
    }
}

impl GeneratorConfig {
    /// Window length in samples. Fails unless the duration is a positive
    /// number of samples that fits the signature header's u32 sample count.
    pub fn window_samples(&self) -> Result<usize> {
        let samples = (self.max_window_seconds * RATE as f64).round();
        if !samples.is_finite() || samples < 1.0 {
            return Err(Error::InvalidState(format!(
                "max window of {} seconds is not positive",
                self.max_window_seconds
            )));
        }
        if samples > u32::MAX as f64 {
            return Err(Error::InvalidState(format!(
                "max window of {} seconds exceeds {} samples",
                self.max_window_seconds,
                u32::MAX
            )));
        }
        Ok(samples as usize)
    }
}

/// Stateful window-by-window fingerprint producer.
pub struct SignatureGenerator {
    state: GeneratorState,
    samples: Arc<[i16]>,
    window_samples: usize,
    skip_ahead: Option<SkipAhead>,
    initial_skip_samples: usize,
    applied_skip: usize,
    cursor: usize,
    last_window: Option<Window>,
    extractor: Extractor,
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self::with_window(
            DEFAULT_WINDOW_SAMPLES,
            Some(SkipAhead::default()),
            ExtractorConfig::default(),
        )
    }
}

impl SignatureGenerator {
    /// Create an idle generator.
    pub fn new(config: GeneratorConfig, extractor: ExtractorConfig) -> Result<Self> {
        let window_samples = config.window_samples()?;
        Ok(Self::with_window(window_samples, config.skip_ahead, extractor))
    }

    fn with_window(
        window_samples: usize,
        skip_ahead: Option<SkipAhead>,
        extractor: ExtractorConfig,
    ) -> Self {
        SignatureGenerator {
            state: GeneratorState::Idle,
            samples: Arc::from(Vec::new()),
            window_samples,
            skip_ahead,
            initial_skip_samples: 0,
            applied_skip: 0,
            cursor: 0,
            last_window: None,
            extractor: Extractor::new(extractor),
        }
    }

    /// Create a generator and feed it in one step.
    pub fn from_samples(
        samples: Vec<i16>,
        config: GeneratorConfig,
        extractor: ExtractorConfig,
    ) -> Result<Self> {
        let mut generator = Self::new(config, extractor)?;
        generator.feed(samples)?;
        Ok(generator)
    }

    /// Hand over the complete normalized buffer. Allowed exactly once.
    pub fn feed(&mut self, samples: Vec<i16>) -> Result<()> {
        if self.state != GeneratorState::Idle {
            return Err(Error::InvalidState(format!(
                "feed() called in state {:?}; a generator takes one buffer",
                self.state
            )));
        }
        debug!(samples = samples.len(), "generator fed");
        self.samples = Arc::from(samples);
        self.state = GeneratorState::Fed;
        Ok(())
    }

    /// Adjust the window length and explicit start offset. Only allowed
    /// before the first extraction. A non-zero `initial_skip_samples`
    /// replaces the skip-ahead policy.
    pub fn configure(
        &mut self,
        max_window_seconds: f64,
        initial_skip_samples: usize,
    ) -> Result<()> {
        if !matches!(self.state, GeneratorState::Idle | GeneratorState::Fed) {
            return Err(Error::InvalidState(format!(
                "configure() called in state {:?}; extraction already started",
                self.state
            )));
        }
        let window = GeneratorConfig {
            max_window_seconds,
            skip_ahead: None,
        }
        .window_samples()?;
        self.window_samples = window;
        self.initial_skip_samples = initial_skip_samples;
        Ok(())
    }

    /// Replace the skip-ahead policy. Only allowed before the first extraction.
    pub fn set_skip_ahead(&mut self, policy: Option<SkipAhead>) -> Result<()> {
        if !matches!(self.state, GeneratorState::Idle | GeneratorState::Fed) {
            return Err(Error::InvalidState(format!(
                "set_skip_ahead() called in state {:?}",
                self.state
            )));
        }
        self.skip_ahead = policy;
        Ok(())
    }

    /// Produce the fingerprint of the next window.
    ///
    /// Returns `Ok(None)` exactly once, when the cursor has reached the end
    /// of the buffer; any call after that is an [`Error::InvalidState`].
    pub fn next(&mut self) -> Result<Option<DecodedSignature>> {
        match self.state {
            GeneratorState::Idle => {
                return Err(Error::InvalidState("next() called before feed()".to_string()));
            }
            GeneratorState::Exhausted => {
                return Err(Error::InvalidState(
                    "next() called on an exhausted generator".to_string(),
                ));
            }
            GeneratorState::Fed => {
                self.apply_skip();
                self.state = GeneratorState::Emitting;
            }
            GeneratorState::Emitting => {}
        }

        if self.cursor >= self.samples.len() {
            self.state = GeneratorState::Exhausted;
            debug!(samples_processed = self.cursor, "generator exhausted");
            return Ok(None);
        }

        let start = self.cursor;
        let end = start.saturating_add(self.window_samples).min(self.samples.len());
        let signature = self.extractor.extract(&self.samples[start..end]);
        self.cursor = end;
        self.last_window = Some(Window {
            start,
            len: end - start,
        });

        debug!(
            start,
            len = end - start,
            peaks = signature.peak_count(),
            "extracted window"
        );
        Ok(Some(signature))
    }

    fn apply_skip(&mut self) {
        let total = self.samples.len();
        let skip = if self.initial_skip_samples > 0 {
            self.initial_skip_samples.min(total)
        } else {
            self.skip_ahead
                .as_ref()
                .map_or(0, |policy| policy.skip_samples(total))
        };
        if skip > 0 {
            info!(
                skip_seconds = skip as f64 / RATE as f64,
                total_seconds = total as f64 / RATE as f64,
                "skipping ahead into long input"
            );
        }
        self.applied_skip = skip;
        self.cursor = skip;
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Cursor position: samples skipped plus samples covered by emitted windows.
    pub fn samples_processed(&self) -> usize {
        self.cursor
    }

    /// Seconds of source audio behind the cursor.
    pub fn offset_seconds(&self) -> f64 {
        self.cursor as f64 / RATE as f64
    }

    /// Samples skipped before the first window; zero until extraction starts.
    pub fn skip_ahead_samples(&self) -> usize {
        self.applied_skip
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// Span of the most recently emitted window.
    pub fn last_window(&self) -> Option<Window> {
        self.last_window
    }

    /// Read-only handle to the fed buffer, shareable without locking.
    pub fn samples(&self) -> Arc<[i16]> {
        Arc::clone(&self.samples)
    }

    pub fn total_samples(&self) -> usize {
        self.samples.len()
    }
}
