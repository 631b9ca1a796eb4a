//! Typed failure modes shared by the sync engine and the query pipeline.
//!
//! Every outcome a caller may want to branch on has its own variant; the
//! HTTP layer maps each variant to a status code and a machine-readable
//! error code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The remote catalogue or file host was unreachable or answered non-2xx.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Login to the file host failed, or no credentials were supplied.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rejected before any external call was made.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unknown or expired results identifier.
    #[error("no query found for results id: {0}")]
    NoQueryFound(String),

    #[error("result index {index} out of range (session has {len} results)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("generator is disabled; set [generator] provider in config")]
    GeneratorDisabled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Fetch { .. } => "fetch_failed",
            Error::Auth(_) => "auth_failed",
            Error::InvalidParameter(_) => "invalid_parameter",
            Error::NoQueryFound(_) => "no_query_found",
            Error::IndexOutOfRange { .. } => "index_out_of_range",
            Error::Retrieval(_) => "retrieval_failed",
            Error::Generation(_) => "generation_failed",
            Error::GeneratorDisabled => "generator_disabled",
            Error::Io(_) | Error::Other(_) => "internal",
        }
    }
}
