//! Phases, outward labels and the observable snapshot

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Lifecycle phase of the tracked slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No operation tracked, or its outcome was cleared by an auto-reset
    Idle,
    /// Operation in flight
    Pending,
    /// Operation resolved with a value
    Fulfilled,
    /// Operation rejected with a reason
    Rejected,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Pending => "pending",
            Phase::Fulfilled => "fulfilled",
            Phase::Rejected => "rejected",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Phase::Fulfilled | Phase::Rejected)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outward label for a phase.
///
/// `Null` and `Undefined` are real labels an owner may ask for, distinct from
/// "no mapping configured".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusLabel {
    Text(String),
    Null,
    Undefined,
}

impl StatusLabel {
    pub fn text(label: impl Into<String>) -> Self {
        StatusLabel::Text(label.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StatusLabel::Text(label) => Some(label),
            StatusLabel::Null | StatusLabel::Undefined => None,
        }
    }

    /// JSON rendering; `Undefined` has no JSON form and renders as `None`.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            StatusLabel::Text(label) => Some(serde_json::Value::String(label.clone())),
            StatusLabel::Null => Some(serde_json::Value::Null),
            StatusLabel::Undefined => None,
        }
    }
}

impl From<&str> for StatusLabel {
    fn from(label: &str) -> Self {
        StatusLabel::Text(label.to_string())
    }
}

impl From<String> for StatusLabel {
    fn from(label: String) -> Self {
        StatusLabel::Text(label)
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Text(label) => f.write_str(label),
            StatusLabel::Null => f.write_str("null"),
            StatusLabel::Undefined => f.write_str("undefined"),
        }
    }
}

/// Mapping from phase name to outward label.
///
/// A `None` entry falls back to the phase name itself. In JSON, an absent key
/// means "default" while an explicit `null` maps to `StatusLabel::Null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusMap {
    #[serde(default, deserialize_with = "explicit_label")]
    pub pending: Option<StatusLabel>,
    #[serde(default, deserialize_with = "explicit_label")]
    pub fulfilled: Option<StatusLabel>,
    #[serde(default, deserialize_with = "explicit_label")]
    pub rejected: Option<StatusLabel>,
}

fn explicit_label<'de, D>(deserializer: D) -> Result<Option<StatusLabel>, D::Error>
where
    D: Deserializer<'de>,
{
    // Only called when the key is present, so `null` is an explicit label.
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(Some(label.map(StatusLabel::Text).unwrap_or(StatusLabel::Null)))
}

impl StatusMap {
    pub fn with_pending(mut self, label: impl Into<StatusLabel>) -> Self {
        self.pending = Some(label.into());
        self
    }

    pub fn with_fulfilled(mut self, label: impl Into<StatusLabel>) -> Self {
        self.fulfilled = Some(label.into());
        self
    }

    pub fn with_rejected(mut self, label: impl Into<StatusLabel>) -> Self {
        self.rejected = Some(label.into());
        self
    }

    /// Outward label for `phase`. `Idle` has no label and renders as nothing.
    pub fn label(&self, phase: Phase) -> Option<StatusLabel> {
        let entry = match phase {
            Phase::Idle => return None,
            Phase::Pending => &self.pending,
            Phase::Fulfilled => &self.fulfilled,
            Phase::Rejected => &self.rejected,
        };
        Some(
            entry
                .clone()
                .unwrap_or_else(|| StatusLabel::Text(phase.as_str().to_string())),
        )
    }
}

/// A status worth showing: the mapped label and, once settled, the outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot<T, E> {
    pub status: StatusLabel,
    /// `None` while pending, `Ok` when fulfilled, `Err` when rejected
    pub value: Option<Result<T, E>>,
}

/// What the owner renders. `None` means there is no status to show.
pub type Snapshot<T, E> = Option<StatusSnapshot<T, E>>;

impl<T, E> StatusSnapshot<T, E> {
    pub fn pending(status: StatusLabel) -> Self {
        Self { status, value: None }
    }

    pub fn fulfilled(status: StatusLabel, value: T) -> Self {
        Self {
            status,
            value: Some(Ok(value)),
        }
    }

    pub fn rejected(status: StatusLabel, reason: E) -> Self {
        Self {
            status,
            value: Some(Err(reason)),
        }
    }
}

impl<T: Serialize, E: Serialize> StatusSnapshot<T, E> {
    /// `{"status": ..., "value": ...}`; keys with an undefined value are omitted.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut object = serde_json::Map::new();
        if let Some(status) = self.status.to_json() {
            object.insert("status".to_string(), status);
        }
        match &self.value {
            Some(Ok(value)) => {
                object.insert("value".to_string(), serde_json::to_value(value)?);
            }
            Some(Err(reason)) => {
                object.insert("value".to_string(), serde_json::to_value(reason)?);
            }
            None => {}
        }
        Ok(serde_json::Value::Object(object))
    }
}

/// JSON rendering of a snapshot; hidden snapshots render as `null`.
pub fn snapshot_to_json<T: Serialize, E: Serialize>(
    snapshot: &Snapshot<T, E>,
) -> Result<serde_json::Value, serde_json::Error> {
    match snapshot {
        Some(shown) => shown.to_json(),
        None => Ok(serde_json::Value::Null),
    }
}
