//! Recognition session: drives the generator, encodes each window and
//! hands it to a transport.
//!
//! A session iterates lazily and exactly once. Each window is extracted,
//! encoded and submitted before the next one is touched. A transport
//! failure is reported as that window's outcome and the session moves on;
//! generator or encoder failures are yielded once and end the session.

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::fingerprinting::algorithm::{GeneratorConfig, SignatureGenerator};
use crate::fingerprinting::communication::SignaturePayload;
use crate::fingerprinting::extractor::ExtractorConfig;
use crate::normalize;
use crate::rate_limiter::RateLimiter;

/// The remote side of recognition.
pub trait Transport {
    /// Whatever the service returns for a match.
    type Response;
    type Error: std::error::Error;

    /// Submit one window. `Ok(None)` means the service found no match.
    fn submit(
        &mut self,
        payload: &SignaturePayload,
    ) -> std::result::Result<Option<Self::Response>, Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Response = T::Response;
    type Error = T::Error;

    fn submit(
        &mut self,
        payload: &SignaturePayload,
    ) -> std::result::Result<Option<Self::Response>, Self::Error> {
        (**self).submit(payload)
    }
}

/// Outcome of one submitted window.
#[derive(Debug)]
pub struct Recognition<R, E> {
    pub offset_seconds: f64,
    pub payload: SignaturePayload,
    pub outcome: std::result::Result<Option<R>, E>,
}

impl<R, E> Recognition<R, E> {
    pub fn is_match(&self) -> bool {
        matches!(self.outcome, Ok(Some(_)))
    }
}

/// Lazy sequence of encoded windows over one normalized buffer.
pub struct RecognitionSession {
    generator: SignatureGenerator,
    done: bool,
}

impl RecognitionSession {
    /// Wrap a generator that has already been fed.
    pub fn new(generator: SignatureGenerator) -> Self {
        RecognitionSession {
            generator,
            done: false,
        }
    }

    pub fn from_samples(
        samples: Vec<i16>,
        config: GeneratorConfig,
        extractor: ExtractorConfig,
    ) -> Result<Self> {
        Ok(Self::new(SignatureGenerator::from_samples(samples, config, extractor)?))
    }

    /// Decode and normalize `bytes`, then set up a session with the
    /// windowing and extraction settings from `config`.
    pub fn from_bytes(bytes: &[u8], config: &Config) -> Result<Self> {
        let samples = normalize::normalize_bytes(bytes)?;
        Self::from_samples(samples, config.generator_config(), config.extractor_config())
    }

    pub fn generator(&self) -> &SignatureGenerator {
        &self.generator
    }

    /// Pull the next window and encode it.
    fn next_payload(&mut self) -> Result<Option<SignaturePayload>> {
        let Some(signature) = self.generator.next()? else {
            return Ok(None);
        };
        let payload =
            SignaturePayload::from_signature(&signature, self.generator.offset_seconds())?;
        debug!(
            offset_seconds = payload.offset_seconds,
            peaks = payload.peak_count,
            bytes = payload.encoded_signature.len(),
            "encoded window"
        );
        Ok(Some(payload))
    }

    /// Submit every window through `transport`.
    pub fn recognize<T: Transport>(self, transport: T) -> Recognitions<T> {
        Recognitions {
            session: self,
            transport,
            limiter: None,
        }
    }
}

impl Iterator for RecognitionSession {
    type Item = Result<SignaturePayload>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_payload() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator of per-window recognition outcomes.
pub struct Recognitions<T: Transport> {
    session: RecognitionSession,
    transport: T,
    limiter: Option<RateLimiter>,
}

impl<T: Transport> Recognitions<T> {
    /// Space submissions with `limiter`; failures back it off.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn session(&self) -> &RecognitionSession {
        &self.session
    }
}

impl<T: Transport> Iterator for Recognitions<T> {
    type Item = Result<Recognition<T::Response, T::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = match self.session.next()? {
            Ok(payload) => payload,
            Err(e) => return Some(Err(e)),
        };

        if let Some(limiter) = self.limiter.as_mut() {
            limiter.wait_if_needed();
        }

        let outcome = self.transport.submit(&payload);
        match &outcome {
            Ok(found) => {
                debug!(
                    offset_seconds = payload.offset_seconds,
                    matched = found.is_some(),
                    "window submitted"
                );
                if let Some(limiter) = self.limiter.as_mut() {
                    limiter.report_success();
                }
            }
            Err(e) => {
                warn!(offset_seconds = payload.offset_seconds, "submission failed: {}", e);
                if let Some(limiter) = self.limiter.as_mut() {
                    limiter.report_failure();
                }
            }
        }

        Some(Ok(Recognition {
            offset_seconds: payload.offset_seconds,
            payload,
            outcome,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fingerprinting::signature_format::DecodedSignature;
    use crate::wavfile::encode_wav;
    use std::fmt;
    use std::time::Duration;

    const RATE: usize = 16000;

    #[derive(Debug)]
    struct FakeError;

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection reset")
        }
    }

    impl std::error::Error for FakeError {}

    /// Answers "match" for every window whose index is in `matches`,
    /// fails for indices in `failures`, "no match" otherwise.
    #[derive(Default)]
    struct FakeTransport {
        matches: Vec<usize>,
        failures: Vec<usize>,
        seen: Vec<SignaturePayload>,
    }

    impl Transport for FakeTransport {
        type Response = String;
        type Error = FakeError;

        fn submit(
            &mut self,
            payload: &SignaturePayload,
        ) -> std::result::Result<Option<String>, FakeError> {
            let index = self.seen.len();
            self.seen.push(payload.clone());
            if self.failures.contains(&index) {
                Err(FakeError)
            } else if self.matches.contains(&index) {
                Ok(Some(format!("track at {}", payload.offset_seconds)))
            } else {
                Ok(None)
            }
        }
    }

    fn no_skip(seconds: f64) -> GeneratorConfig {
        GeneratorConfig {
            max_window_seconds: seconds,
            skip_ahead: None,
        }
    }

    #[test]
    fn test_offsets_are_monotonic_and_exact() {
        let session = RecognitionSession::from_samples(
            vec![0; 20 * RATE + 500],
            no_skip(8.0),
            ExtractorConfig::default(),
        )
        .unwrap();

        let payloads: Vec<SignaturePayload> = session.map(|p| p.unwrap()).collect();
        let offsets: Vec<f64> = payloads.iter().map(|p| p.offset_seconds).collect();
        assert_eq!(offsets, vec![8.0, 16.0, (20 * RATE + 500) as f64 / 16000.0]);

        let covered: u32 = payloads.iter().map(|p| p.number_samples).sum();
        assert_eq!(covered as usize, 20 * RATE + 500);
    }

    #[test]
    fn test_silence_session_submits_one_empty_signature() {
        let session = RecognitionSession::from_samples(
            vec![0; 5 * RATE],
            no_skip(8.0),
            ExtractorConfig::default(),
        )
        .unwrap();
        let mut transport = FakeTransport::default();
        let results: Vec<_> = session.recognize(&mut transport).collect();

        assert_eq!(results.len(), 1);
        let recognition = results.into_iter().next().unwrap().unwrap();
        assert_eq!(recognition.offset_seconds, 5.0);
        assert!(matches!(recognition.outcome, Ok(None)));
        assert_eq!(recognition.payload.peak_count, 0);

        let decoded =
            DecodedSignature::decode_from_uri(&transport.seen[0].encoded_signature).unwrap();
        assert_eq!(decoded.number_samples as usize, 5 * RATE);
        assert_eq!(decoded.peak_count(), 0);
    }

    #[test]
    fn test_transport_failure_only_affects_its_window() {
        let session = RecognitionSession::from_samples(
            vec![0; 24 * RATE],
            no_skip(8.0),
            ExtractorConfig::default(),
        )
        .unwrap();
        let transport = FakeTransport {
            matches: vec![2],
            failures: vec![0],
            ..Default::default()
        };

        let results: Vec<_> = session
            .recognize(transport)
            .with_rate_limiter(RateLimiter::new("test", Duration::ZERO, Duration::ZERO, 0))
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.is_err());
        assert!(matches!(results[1].outcome, Ok(None)));
        assert!(results[2].is_match());
        assert_eq!(results[2].offset_seconds, 24.0);
    }

    #[test]
    fn test_long_input_first_offset_is_positive() {
        let mut session = RecognitionSession::from_samples(
            vec![0; 40 * RATE],
            GeneratorConfig::default(),
            ExtractorConfig::default(),
        )
        .unwrap();
        let first = session.next().unwrap().unwrap();
        // 40 s is above the skip threshold but the computed skip is negative.
        assert_eq!(session.generator().skip_ahead_samples(), 0);
        assert_eq!(session.generator().last_window().unwrap().start, 0);
        assert!(first.offset_seconds > 0.0);
        assert_eq!(first.offset_seconds, 8.0);
        assert_eq!(first.number_samples as usize, 8 * RATE);
    }

    #[test]
    fn test_skip_reduces_window_coverage() {
        let total = 120 * RATE;
        let mut session = RecognitionSession::from_samples(
            vec![0; total],
            GeneratorConfig::default(),
            ExtractorConfig::default(),
        )
        .unwrap();

        let first = session.next().unwrap().unwrap();
        let skip = session.generator().skip_ahead_samples();
        assert_eq!(skip, RATE);
        assert_eq!(first.offset_seconds, 9.0);

        let mut covered = first.number_samples as usize;
        for payload in session.by_ref() {
            covered += payload.unwrap().number_samples as usize;
        }
        assert_eq!(covered, total - skip);
        assert!(session.next().is_none());
    }

    #[test]
    fn test_fatal_error_ends_session() {
        // A generator that was never fed fails on the first pull.
        let mut session = RecognitionSession::new(SignatureGenerator::default());
        assert!(matches!(session.next(), Some(Err(Error::InvalidState(_)))));
        assert!(session.next().is_none());
    }

    #[test]
    fn test_from_bytes_normalizes_input() {
        // 3 s of 44.1 kHz stereo silence
        let wav = encode_wav(&vec![0i16; 44100 * 3 * 2], 44100, 2);
        let session = RecognitionSession::from_bytes(&wav, &Config::new()).unwrap();
        assert_eq!(session.generator().total_samples(), 3 * RATE);

        let payloads: Vec<_> = session.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].number_samples as usize, 3 * RATE);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            RecognitionSession::from_bytes(b"garbage", &Config::new()),
            Err(Error::Decode(_))
        ));
    }
}
