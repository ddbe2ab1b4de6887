//! Engine configuration.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - `max_recurrence_instances` never exceeds `MAX_RECURRENCE_INSTANCES`.

use crate::lifecycle::recurrence::MAX_RECURRENCE_INSTANCES;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_FOLLOW_UP_TITLE_PREFIX: &str = "[확인요청]";
pub const DEFAULT_FOLLOW_UP_TYPE: &str = "confirmation";
pub const DEFAULT_ORDINAL_SUFFIX: &str = "회차";

/// Tunables for delegation and recurrence behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-call expansion cap.
    pub max_recurrence_instances: usize,
    /// Prefix prepended to a parent's title on confirmation tasks.
    pub follow_up_title_prefix: String,
    /// Audit marker written to `follow_up_type`.
    pub follow_up_type: String,
    /// Ordinal marker used in `"{title} ({n}{suffix})"`.
    pub recurrence_ordinal_suffix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_recurrence_instances: MAX_RECURRENCE_INSTANCES,
            follow_up_title_prefix: DEFAULT_FOLLOW_UP_TITLE_PREFIX.to_string(),
            follow_up_type: DEFAULT_FOLLOW_UP_TYPE.to_string(),
            recurrence_ordinal_suffix: DEFAULT_ORDINAL_SUFFIX.to_string(),
        }
    }
}

impl EngineConfig {
    /// Parses camelCase JSON and validates the result.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_recurrence_instances == 0
            || self.max_recurrence_instances > MAX_RECURRENCE_INSTANCES
        {
            return Err(ConfigError::RecurrenceCap(self.max_recurrence_instances));
        }
        if self.follow_up_title_prefix.trim().is_empty() {
            return Err(ConfigError::Blank("followUpTitlePrefix"));
        }
        if self.follow_up_type.trim().is_empty() {
            return Err(ConfigError::Blank("followUpType"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    RecurrenceCap(usize),
    Blank(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid engine config: {message}"),
            Self::RecurrenceCap(value) => write!(
                f,
                "maxRecurrenceInstances must be within 1..={MAX_RECURRENCE_INSTANCES}, got {value}"
            ),
            Self::Blank(key) => write!(f, "`{key}` must not be blank"),
        }
    }
}

impl Error for ConfigError {}
