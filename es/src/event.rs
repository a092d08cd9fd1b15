//! Incident records and access-log entries

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap for an event payload and for access-log input/error bodies (64KB)
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Hard cap for an access-log user agent (1KB)
pub const MAX_USER_AGENT_BYTES: usize = 1024;

/// Kind of incident carried by an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Unhandled error surfaced by the application
    Error,
    /// Process or worker crash
    Crash,
    /// Upstream rate limit hit
    RateLimit,
    /// A participant process registered itself
    AgentStart,
    /// A participant process deregistered itself
    AgentStop,
}

impl EventKind {
    /// Wire name, as used in file names and the `type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Crash => "crash",
            Self::RateLimit => "rate_limit",
            Self::AgentStart => "agent_start",
            Self::AgentStop => "agent_stop",
        }
    }

    /// Whether this kind records participant lifecycle rather than an incident
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::AgentStart | Self::AgentStop)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "crash" => Ok(Self::Crash),
            "rate_limit" => Ok(Self::RateLimit),
            "agent_start" => Ok(Self::AgentStart),
            "agent_stop" => Ok(Self::AgentStop),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// A durable record of one runtime incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,

    pub trace_id: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Opaque payload, usually JSON text; never longer than [`MAX_PAYLOAD_BYTES`]
    #[serde(default)]
    pub payload: String,

    #[serde(default)]
    pub consumed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Create an unconsumed event stamped with the current time
    pub fn new(kind: EventKind, trace_id: impl Into<String>, payload: impl Into<String>) -> Self {
        let mut payload = payload.into();
        truncate_utf8(&mut payload, MAX_PAYLOAD_BYTES);
        Self {
            kind,
            trace_id: trace_id.into(),
            timestamp: Utc::now(),
            environment: None,
            feature: None,
            route: None,
            status: None,
            payload,
            consumed: false,
            consumed_at: None,
        }
    }

    /// Override the creation timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Mark as claimed by the caller
    pub fn mark_consumed(&mut self, at: DateTime<Utc>) {
        self.consumed = true;
        self.consumed_at = Some(at);
    }

    /// Re-apply the payload cap (records may be built field by field)
    pub fn enforce_limits(&mut self) {
        truncate_utf8(&mut self.payload, MAX_PAYLOAD_BYTES);
    }

    /// Age relative to `now`; negative ages (clock skew) count as zero
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.timestamp).max(chrono::Duration::zero())
    }
}

/// Per-request telemetry row, stored alongside events by the SQLite backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLog {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AccessLog {
    pub fn new(method: impl Into<String>, path: impl Into<String>, status: u16, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.into(),
            path: path.into(),
            status,
            duration_ms,
            ip: None,
            feature: None,
            request_id: None,
            input: None,
            error: None,
            user_agent: None,
        }
    }

    /// Apply the column caps for input, error and user agent
    pub fn enforce_limits(&mut self) {
        for field in [&mut self.input, &mut self.error] {
            if let Some(value) = field.as_mut() {
                truncate_utf8(value, MAX_PAYLOAD_BYTES);
            }
        }
        if let Some(agent) = self.user_agent.as_mut() {
            truncate_utf8(agent, MAX_USER_AGENT_BYTES);
        }
    }
}

/// Truncate `s` to at most `max` bytes, cutting at a char boundary
///
/// Returns true if anything was removed.
pub fn truncate_utf8(s: &mut String, max: usize) -> bool {
    if s.len() <= max {
        return false;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    true
}
