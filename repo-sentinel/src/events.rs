//! Repository events as returned by the GitHub events API.

use serde::Deserialize;
use std::fmt;

/// Kind of a repository event.
///
/// The vocabulary is open: anything that is not a push or a merged pull
/// request is kept as [`EventKind::Other`] with its normalised name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Commits were pushed.
    Push,
    /// A pull request was merged.
    Merge,
    /// Any other event type.
    Other(String),
}

impl EventKind {
    /// Returns true for kinds that should trigger an update.
    pub fn triggers_update(&self) -> bool {
        matches!(self, Self::Push | Self::Merge)
    }

    fn classify(raw_type: &str, payload: Option<&serde_json::Value>) -> Self {
        let name = raw_type.strip_suffix("Event").unwrap_or(raw_type);
        match name {
            "Push" => Self::Push,
            "Merge" => Self::Merge,
            "PullRequest" if is_merged_pull_request(payload) => Self::Merge,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => f.write_str("Push"),
            Self::Merge => f.write_str("Merge"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

fn is_merged_pull_request(payload: Option<&serde_json::Value>) -> bool {
    let Some(payload) = payload else {
        return false;
    };
    let closed = payload.get("action").and_then(|v| v.as_str()) == Some("closed");
    let merged = payload
        .pointer("/pull_request/merged")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    closed && merged
}

/// A single repository event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event kind.
    pub kind: EventKind,

    /// Event id as assigned by GitHub.
    pub id: String,

    /// Creation timestamp (RFC 3339), when supplied.
    pub created_at: Option<String>,
}

impl Event {
    /// Creates an event without a timestamp.
    pub fn new(kind: EventKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            created_at: None,
        }
    }
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Decodes an events response body, keeping the delivered order.
///
/// A blank body decodes to no events.
///
/// # Errors
///
/// Returns the JSON error if the body is not an array of events.
pub fn decode_events(body: &str) -> Result<Vec<Event>, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<RawEvent> = serde_json::from_str(body)?;
    Ok(raw
        .into_iter()
        .map(|event| Event {
            kind: EventKind::classify(&event.kind, event.payload.as_ref()),
            id: event.id,
            created_at: event.created_at,
        })
        .collect())
}

/// Returns the first update-triggering event in the batch.
///
/// Yields nothing when that event is `last_seen`, the one already processed.
pub fn first_trigger<'a>(events: &'a [Event], last_seen: Option<&str>) -> Option<&'a Event> {
    events
        .iter()
        .find(|event| event.kind.triggers_update())
        .filter(|event| Some(event.id.as_str()) != last_seen)
}
