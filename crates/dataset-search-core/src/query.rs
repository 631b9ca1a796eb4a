//! Hybrid query parameters.
//!
//! Caller-supplied retrieval parameters are merged with configured defaults
//! and validated here, before any external call is issued.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Vector store query mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Dense (embedding) similarity only.
    Default,
    /// Sparse (keyword) similarity only.
    Sparse,
    /// Dense and sparse blended by `alpha`.
    #[default]
    Hybrid,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Default => "default",
            QueryMode::Sparse => "sparse",
            QueryMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(QueryMode::Default),
            "sparse" => Ok(QueryMode::Sparse),
            "hybrid" => Ok(QueryMode::Hybrid),
            other => Err(Error::InvalidParameter(format!(
                "unknown vector_store_query_mode '{}' (expected default, sparse or hybrid)",
                other
            ))),
        }
    }
}

/// Parameters as supplied by a caller. Omitted fields take the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default, alias = "vector_store_query_mode")]
    pub mode: Option<QueryMode>,
    #[serde(default)]
    pub alpha: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefaults {
    pub top_k: usize,
    /// Upper bound for `top_k`.
    pub max_top_k: usize,
    pub mode: QueryMode,
    pub alpha: f64,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            top_k: 10,
            max_top_k: 50,
            mode: QueryMode::Hybrid,
            alpha: 0.5,
        }
    }
}

/// Parameters that passed validation and are safe to forward.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub top_k: usize,
    pub mode: QueryMode,
    alpha: f64,
}

impl ValidatedQuery {
    /// The blend weight, present only in hybrid mode.
    pub fn alpha(&self) -> Option<f64> {
        match self.mode {
            QueryMode::Hybrid => Some(self.alpha),
            _ => None,
        }
    }
}

impl QueryParams {
    /// Merge with `defaults` and validate.
    ///
    /// `alpha` is range-checked in every mode, even though only hybrid
    /// queries forward it.
    pub fn validate(&self, defaults: &QueryDefaults) -> Result<ValidatedQuery> {
        let top_k = self.top_k.unwrap_or(defaults.top_k);
        if top_k == 0 {
            return Err(Error::InvalidParameter(
                "top_k must be at least 1".to_string(),
            ));
        }
        if top_k > defaults.max_top_k {
            return Err(Error::InvalidParameter(format!(
                "top_k must be at most {} (got {})",
                defaults.max_top_k, top_k
            )));
        }

        let alpha = self.alpha.unwrap_or(defaults.alpha);
        if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
            return Err(Error::InvalidParameter(format!(
                "alpha must be within [0, 1] (got {})",
                alpha
            )));
        }

        Ok(ValidatedQuery {
            top_k,
            mode: self.mode.unwrap_or(defaults.mode),
            alpha,
        })
    }
}
