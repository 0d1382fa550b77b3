//! Signature generation: windowing, spectral peak extraction and the
//! binary/URI wire format consumed by the recognition service.

pub mod algorithm;
pub mod communication;
pub mod extractor;
pub mod hanning;
pub mod signature_format;

pub use algorithm::{GeneratorConfig, GeneratorState, SignatureGenerator, SkipAhead, Window};
pub use communication::{RecognizeRequest, SignaturePayload};
pub use extractor::{Extractor, ExtractorConfig, FFT_SIZE, HOP_SIZE};
pub use signature_format::{DecodedSignature, FrequencyBand, FrequencyPeak};
