//! Engine configuration.
//!
//! Only the ghost span is tunable. It defaults to [`DEFAULT_GHOST_SPAN`] and can be overridden
//! from the environment or changed at runtime through `Dict::set_ghost_span`.

use std::env;

use serde::Deserialize;

use crate::error::DictError;

/// Default number of tangle levels below the required frontier that are reported as ghostable.
pub const DEFAULT_GHOST_SPAN: u64 = 32;

/// Environment variable overriding [`DictConfig::ghost_span`].
pub const GHOST_SPAN_ENV: &str = "TANGLE_DICT_GHOST_SPAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DictConfig {
    pub ghost_span: u64,
}

impl Default for DictConfig {
    fn default() -> Self {
        Self {
            ghost_span: DEFAULT_GHOST_SPAN,
        }
    }
}

impl DictConfig {
    pub fn with_ghost_span(ghost_span: u64) -> Self {
        Self { ghost_span }
    }

    /// Defaults, overridden by the environment. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(span) = env::var(GHOST_SPAN_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            config.ghost_span = span;
        }
        config
    }

    pub fn validate(&self) -> Result<(), DictError> {
        validate_ghost_span(self.ghost_span)
    }
}

pub(crate) fn validate_ghost_span(span: u64) -> Result<(), DictError> {
    if span < 1 {
        return Err(DictError::InvalidGhostSpan(span));
    }
    Ok(())
}
