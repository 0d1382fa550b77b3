//! Error taxonomy for the signature pipeline.
//!
//! Transport failures are deliberately absent: they belong to the
//! [`crate::session::Transport`] implementation and only ever affect the
//! window they were raised for.

use std::io;

/// Fatal errors raised by the normalizer, generator and encoder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input bytes could not be parsed as audio.
    #[error("decode error: {0}")]
    Decode(String),

    /// API misuse, e.g. feeding a generator twice or pulling after exhaustion.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A signature could not be assembled or parsed.
    #[error("signature format error: {0}")]
    Signature(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
