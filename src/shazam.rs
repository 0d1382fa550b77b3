//! Shazam recognition API client, implementing [`Transport`].
//!
//! Each window's signature is posted to the reverse-engineered discovery
//! `tag` endpoint. Requests carry fresh UUIDs and a randomly picked Apple
//! user agent.
//!
//! # Example
//! ```no_run
//! use songsig::{Config, RecognitionSession, ShazamTransport};
//!
//! let bytes = std::fs::read("song.wav")?;
//! let config = Config::new();
//! let session = RecognitionSession::from_bytes(&bytes, &config)?;
//! for recognition in session.recognize(ShazamTransport::from_config(&config)) {
//!     let recognition = recognition?;
//!     if let Ok(Some(track)) = &recognition.outcome {
//!         println!("{:.1}s: {}", recognition.offset_seconds, track);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::config::Config;
use crate::fingerprinting::communication::{RecognizeRequest, SignaturePayload};
use crate::session::Transport;

const SEARCH_FROM_FILE_URL: &str = concat!(
    "https://amp.shazam.com/discovery/v5/{language}/{endpoint_country}/{device}/-/tag",
    "/{uuid_1}/{uuid_2}?sync=true&webv3=true&sampling=true",
    "&connected=&shazamapiversion=v3&sharehub=true&hubv5minorversion=v5.1&hidelb=true&video=v3"
);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_7_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.2 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPad; CPU OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1",
    "Shazam/3685 CFNetwork/1197 Darwin/20.0.0",
];

pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_ENDPOINT_COUNTRY: &str = "US";
pub const DEFAULT_TIMEZONE: &str = "America/New_York";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Failure of a single recognition request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("invalid response body: {0}")]
    Body(#[from] io::Error),
}

/// A matched track.
#[derive(Debug, Clone)]
pub struct RecognizeResult {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Shazam track key.
    pub track_id: Option<String>,
    pub cover_art: Option<String>,
    /// The full JSON response.
    pub raw: serde_json::Value,
}

impl fmt::Display for RecognizeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.title, &self.artist) {
            (Some(t), Some(a)) => write!(f, "{} - {}", a, t),
            (Some(t), None) => write!(f, "{}", t),
            _ => write!(f, "(untitled track)"),
        }
    }
}

impl RecognizeResult {
    /// Parse a response; `None` when it carries no `track`, i.e. no match.
    pub fn from_json(raw: serde_json::Value) -> Option<Self> {
        let track = raw.get("track")?;
        let text = |key: &str| track.get(key).and_then(|v| v.as_str()).map(String::from);

        let album = track
            .get("sections")
            .and_then(|s| s.as_array())
            .into_iter()
            .flatten()
            .filter(|sec| sec.get("type").and_then(|v| v.as_str()) == Some("SONG"))
            .filter_map(|sec| sec.get("metadata").and_then(|m| m.as_array()))
            .flatten()
            .find(|item| item.get("title").and_then(|v| v.as_str()) == Some("Album"))
            .and_then(|item| item.get("text"))
            .and_then(|v| v.as_str())
            .map(String::from);

        let cover_art = track
            .get("images")
            .and_then(|i| i.get("coverarthq"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Some(RecognizeResult {
            title: text("title"),
            artist: text("subtitle"),
            album,
            track_id: text("key"),
            cover_art,
            raw,
        })
    }
}

/// Blocking HTTP transport to the Shazam discovery API.
pub struct ShazamTransport {
    language: String,
    endpoint_country: String,
    timezone: String,
    agent: ureq::Agent,
}

impl Default for ShazamTransport {
    fn default() -> Self {
        Self::from_config(&Config::new())
    }
}

impl ShazamTransport {
    /// Build from the configured language, country, timezone and timeout.
    pub fn from_config(config: &Config) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        ShazamTransport {
            language: config.language.clone().unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            endpoint_country: config
                .endpoint_country
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT_COUNTRY.to_string()),
            timezone: config.timezone.clone().unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn tag_url(&self) -> String {
        let uuid_1 = uuid::Uuid::new_v4().to_string().to_uppercase();
        let uuid_2 = uuid::Uuid::new_v4().to_string().to_uppercase();
        SEARCH_FROM_FILE_URL
            .replace("{language}", &self.language)
            .replace("{endpoint_country}", &self.endpoint_country)
            .replace("{device}", "iphone")
            .replace("{uuid_1}", &uuid_1)
            .replace("{uuid_2}", &uuid_2)
    }
}

impl Transport for ShazamTransport {
    type Response = RecognizeResult;
    type Error = TransportError;

    fn submit(
        &mut self,
        payload: &SignaturePayload,
    ) -> Result<Option<RecognizeResult>, TransportError> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        let request = RecognizeRequest::new(payload, &self.timezone, unix_millis());

        let resp: serde_json::Value = self
            .agent
            .post(&self.tag_url())
            .set("X-Shazam-Platform", "IPHONE")
            .set("X-Shazam-AppVersion", "14.1.0")
            .set("Accept", "*/*")
            .set("Accept-Language", &self.language)
            .set("Accept-Encoding", "gzip, deflate")
            .set("User-Agent", user_agent)
            .send_json(&request)
            .map_err(Box::new)?
            .into_json()?;

        debug!(
            offset_seconds = payload.offset_seconds,
            matched = resp.get("track").is_some(),
            "recognition response"
        );
        Ok(RecognizeResult::from_json(resp))
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
