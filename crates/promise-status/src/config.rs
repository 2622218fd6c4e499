//! Tracker configuration
//!
//! Owners hand options in as signed milliseconds (`TrackerOptions`), which
//! are validated once into a `TrackerConfig`. Options can also be read from
//! the environment:
//!
//! - `PROMISE_STATUS_DELAY_MS`
//! - `PROMISE_STATUS_RESET_FULFILLED_MS`
//! - `PROMISE_STATUS_RESET_REJECTED_MS`

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::status::{Phase, StatusMap};

pub const ENV_DELAY_MS: &str = "PROMISE_STATUS_DELAY_MS";
pub const ENV_RESET_FULFILLED_MS: &str = "PROMISE_STATUS_RESET_FULFILLED_MS";
pub const ENV_RESET_REJECTED_MS: &str = "PROMISE_STATUS_RESET_REJECTED_MS";

/// Validated configuration for one evaluation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Hide `pending` until the operation has been in flight this long
    pub delay: Option<Duration>,
    /// Clear a fulfilled snapshot after this long
    pub reset_fulfilled_delay: Option<Duration>,
    /// Clear a rejected snapshot after this long
    pub reset_rejected_delay: Option<Duration>,
    /// Outward labels
    pub status_map: StatusMap,
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_reset_fulfilled_delay(mut self, delay: Duration) -> Self {
        self.reset_fulfilled_delay = Some(delay);
        self
    }

    pub fn with_reset_rejected_delay(mut self, delay: Duration) -> Self {
        self.reset_rejected_delay = Some(delay);
        self
    }

    pub fn with_status_map(mut self, status_map: StatusMap) -> Self {
        self.status_map = status_map;
        self
    }

    /// Reset delay that applies to a settled `phase`, if any.
    pub fn reset_delay_for(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::Fulfilled => self.reset_fulfilled_delay,
            Phase::Rejected => self.reset_rejected_delay,
            Phase::Idle | Phase::Pending => None,
        }
    }
}

/// Owner-facing options, as they arrive from callers or JSON documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerOptions {
    pub delay_ms: Option<i64>,
    pub reset_fulfilled_delay_ms: Option<i64>,
    pub reset_rejected_delay_ms: Option<i64>,
    #[serde(default)]
    pub status_map: StatusMap,
}

impl TrackerOptions {
    /// Parse options from a JSON document.
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    /// Read delay options from the environment. Unset or unparseable
    /// variables leave the option unset.
    pub fn from_env() -> Self {
        Self {
            delay_ms: get_config_ms(ENV_DELAY_MS),
            reset_fulfilled_delay_ms: get_config_ms(ENV_RESET_FULFILLED_MS),
            reset_rejected_delay_ms: get_config_ms(ENV_RESET_REJECTED_MS),
            status_map: StatusMap::default(),
        }
    }

    /// Overlay every option set in `other` on top of `self`.
    pub fn merge(mut self, other: TrackerOptions) -> Self {
        self.delay_ms = other.delay_ms.or(self.delay_ms);
        self.reset_fulfilled_delay_ms = other.reset_fulfilled_delay_ms.or(self.reset_fulfilled_delay_ms);
        self.reset_rejected_delay_ms = other.reset_rejected_delay_ms.or(self.reset_rejected_delay_ms);
        if other.status_map != StatusMap::default() {
            self.status_map = other.status_map;
        }
        self
    }

    /// Validate into a `TrackerConfig`. Negative delays are rejected.
    pub fn into_config(self) -> Result<TrackerConfig> {
        Ok(TrackerConfig {
            delay: to_duration("delayMs", self.delay_ms)?,
            reset_fulfilled_delay: to_duration("resetFulfilledDelayMs", self.reset_fulfilled_delay_ms)?,
            reset_rejected_delay: to_duration("resetRejectedDelayMs", self.reset_rejected_delay_ms)?,
            status_map: self.status_map,
        })
    }
}

impl TryFrom<TrackerOptions> for TrackerConfig {
    type Error = Error;

    fn try_from(options: TrackerOptions) -> Result<Self> {
        options.into_config()
    }
}

fn to_duration(field: &'static str, ms: Option<i64>) -> Result<Option<Duration>> {
    match ms {
        None => Ok(None),
        Some(value) if value < 0 => Err(Error::invalid_delay(field, value)),
        Some(value) => Ok(Some(Duration::from_millis(value as u64))),
    }
}

/// Get an optional millisecond value from the environment.
fn get_config_ms(key: &str) -> Option<i64> {
    let raw = std::env::var(key).ok().filter(|v| !v.trim().is_empty())?;
    match raw.trim().parse() {
        Ok(value) => {
            debug!("Loaded: {}={}", key, value);
            Some(value)
        }
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
