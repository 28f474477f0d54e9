//! Events published by the polling engine.
//!
//! Each variant maps to one named stream frame. Events for one subject are
//! ordered; nothing is promised across subjects.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::snapshot::Snapshot;

/// Frame name sent once when a stream connection opens.
pub const FRAME_CONNECTED: &str = "connected";

/// Frame name of the periodic keep-alive.
pub const FRAME_HEARTBEAT: &str = "heartbeat";

/// A tagged event on the Event Bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// A cycle fetched a snapshot (emitted on every successful cycle).
    Update { snapshot: Snapshot },
    /// A fetched snapshot differs materially from the previous one.
    Change { snapshot: Snapshot },
    /// A cycle's source call failed or timed out.
    Error {
        subject: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    PollingStarted { subject: String, interval_ms: u64 },
    PollingStopped { subject: String },
    /// Result of an on-demand refresh.
    ManualRefresh { snapshot: Snapshot },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload<'a> {
    subject: &'a str,
    message: &'a str,
    timestamp: DateTime<Utc>,
}

impl PollEvent {
    /// Stream frame name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Change { .. } => "change",
            Self::Error { .. } => "error",
            Self::PollingStarted { .. } => "polling_started",
            Self::PollingStopped { .. } => "polling_stopped",
            Self::ManualRefresh { .. } => "manual_refresh",
        }
    }

    /// Subject this event concerns.
    pub fn subject(&self) -> &str {
        match self {
            Self::Update { snapshot }
            | Self::Change { snapshot }
            | Self::ManualRefresh { snapshot } => &snapshot.subject,
            Self::Error { subject, .. }
            | Self::PollingStarted { subject, .. }
            | Self::PollingStopped { subject } => subject,
        }
    }

    /// JSON payload carried by the stream frame.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Update { snapshot }
            | Self::Change { snapshot }
            | Self::ManualRefresh { snapshot } => serde_json::to_value(snapshot),
            Self::Error {
                subject,
                message,
                timestamp,
            } => serde_json::to_value(ErrorPayload {
                subject,
                message,
                timestamp: *timestamp,
            }),
            Self::PollingStarted {
                subject,
                interval_ms,
            } => Ok(json!({ "subject": subject, "intervalMs": interval_ms })),
            Self::PollingStopped { subject } => Ok(json!({ "subject": subject })),
        }
    }
}

/// Payload of the `connected` and `heartbeat` frames.
pub fn timestamp_payload(at: DateTime<Utc>) -> Value {
    json!({ "timestamp": at.to_rfc3339() })
}
