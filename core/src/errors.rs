//! Error types for the earnwatch core crate.
//!
//! Each consumer maps these errors onto its own surface: the polling engine
//! turns [`FetchError`] into degraded snapshots and `error` events, and the
//! agent's control surface turns [`PollingError`] into JSON-RPC error
//! responses.

use thiserror::Error;

/// Top-level error type encompassing all core error categories.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The source adapter could not produce a snapshot.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A control-surface request was rejected.
    #[error("Polling error: {0}")]
    Polling(#[from] PollingError),

    /// The durable store rejected an upsert.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A configuration error (invalid values, missing fields, parse failures).
    #[error("Config error: {0}")]
    Config(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single source-adapter call.
///
/// Inside a fetch cycle these never propagate: the cycle recovers them into
/// an `unknown`-status snapshot and an `error` event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The adapter did not answer within the configured fetch timeout.
    #[error("Fetch timed out after {0}ms")]
    Timeout(u64),

    /// The upstream source has nothing for this subject.
    #[error("No data for subject: {0}")]
    NotFound(String),

    /// Network or transport failure talking to the upstream source.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The upstream answered, but the payload could not be understood.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Synchronous rejections of control-surface input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollingError {
    /// The polling interval was zero or negative.
    #[error("Invalid interval: {0}ms (must be positive)")]
    InvalidInterval(i64),

    /// The subject was empty after trimming whitespace.
    #[error("Subject must not be empty")]
    EmptySubject,
}

/// Errors raised by a durable snapshot store.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store contents could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
