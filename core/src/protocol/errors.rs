//! Standard and application JSON-RPC 2.0 error codes.

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;

/// The JSON sent is not a valid Request object.
pub const INVALID_REQUEST: i64 = -32600;

/// The method does not exist / is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Invalid method parameter(s).
pub const INVALID_PARAMS: i64 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

// Application error codes (earnwatch-specific).

/// The polling interval was zero or negative.
pub const INVALID_INTERVAL: i64 = -32001;

/// Protocol version mismatch.
pub const VERSION_NOT_SUPPORTED: i64 = -32002;

/// The subject was empty.
pub const INVALID_SUBJECT: i64 = -32003;

/// A one-shot fetch failed at the source.
pub const FETCH_FAILED: i64 = -32004;

/// The connection has not been initialized yet (must call `initialize` first).
pub const NOT_INITIALIZED: i64 = -32007;
