pub mod config;
pub mod error;
pub mod fingerprinting;
pub mod normalize;
pub mod rate_limiter;
pub mod session;
pub mod shazam;
pub mod wavfile;

pub use config::Config;
pub use error::{Error, Result};
pub use fingerprinting::{
    DecodedSignature, ExtractorConfig, FrequencyBand, FrequencyPeak, GeneratorConfig,
    SignatureGenerator, SignaturePayload, SkipAhead,
};
pub use normalize::{normalize_bytes, normalize_file, normalize_pcm, TARGET_SAMPLE_RATE};
pub use rate_limiter::RateLimiter;
pub use session::{Recognition, RecognitionSession, Recognitions, Transport};
pub use shazam::{RecognizeResult, ShazamTransport, TransportError};
