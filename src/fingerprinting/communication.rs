//! What the signature pipeline hands to a transport, and the JSON body the
//! recognition service expects around it.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fingerprinting::signature_format::DecodedSignature;

/// One encoded window, ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignaturePayload {
    /// `data:` URI form of the signature.
    pub encoded_signature: String,
    pub number_samples: u32,
    pub sample_rate_hz: u32,
    /// Source-audio position at submission: samples processed / 16000.
    pub offset_seconds: f64,
    pub peak_count: usize,
}

impl SignaturePayload {
    /// Encode `signature`, stamping it with the generator's current offset.
    pub fn from_signature(signature: &DecodedSignature, offset_seconds: f64) -> Result<Self> {
        Ok(SignaturePayload {
            encoded_signature: signature.encode_to_uri()?,
            number_samples: signature.number_samples,
            sample_rate_hz: signature.sample_rate_hz,
            offset_seconds,
            peak_count: signature.peak_count(),
        })
    }

    /// Window duration in whole milliseconds, truncated.
    pub fn sample_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        self.number_samples as u64 * 1000 / self.sample_rate_hz as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureField {
    pub uri: String,
    pub samplems: u64,
}

/// Body of a recognition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizeRequest {
    pub timezone: String,
    pub signature: SignatureField,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub geolocation: serde_json::Map<String, serde_json::Value>,
}

impl RecognizeRequest {
    pub fn new(payload: &SignaturePayload, timezone: &str, timestamp_ms: u64) -> Self {
        RecognizeRequest {
            timezone: timezone.to_string(),
            signature: SignatureField {
                uri: payload.encoded_signature.clone(),
                samplems: payload.sample_ms(),
            },
            timestamp: timestamp_ms,
            context: serde_json::Map::new(),
            geolocation: serde_json::Map::new(),
        }
    }
}
