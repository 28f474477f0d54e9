use std::sync::Arc;

use earnwatch_core::errors::{CoreError, FetchError, PollingError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::protocol::errors;
use crate::protocol::messages::{JsonRpcErrorResponse, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::methods::{
    ActiveSessionsResult, Capabilities, EarningsFetchParams, HealthCheckResult, InitializeParams,
    InitializeResult, PollingRefreshParams, PollingStartParams, PollingStatusResult,
    PollingStopParams,
};

/// The agent's protocol version.
const AGENT_PROTOCOL_VERSION: &str = "0.1.0";

/// Frame names advertised in `initialize`.
const FRAMES: [&str; 8] = [
    "connected",
    "update",
    "change",
    "error",
    "polling_started",
    "polling_stopped",
    "manual_refresh",
    "heartbeat",
];

/// Routes one connection's JSON-RPC requests to the engine.
///
/// Each connection owns its own dispatcher, so `initialize` is tracked per
/// connection while the engine is shared.
pub struct Dispatcher {
    engine: Arc<Engine>,
    initialized: bool,
}

/// The result of dispatching a request: either a success or error response.
#[derive(Debug)]
pub enum DispatchResult {
    Success(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

impl DispatchResult {
    /// Serialize the result to a JSON `Value`.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Self::Success(resp) => serde_json::to_value(resp),
            Self::Error(resp) => serde_json::to_value(resp),
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self::Error(JsonRpcErrorResponse::new(id, code, message))
    }

    fn success<T: Serialize>(id: Value, result: T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::Success(JsonRpcResponse::new(id, value)),
            Err(e) => Self::error(id, errors::INTERNAL_ERROR, format!("Failed to encode result: {e}")),
        }
    }
}

fn parse_params<T: DeserializeOwned>(
    request: &JsonRpcRequest,
) -> Result<T, DispatchResult> {
    serde_json::from_value(request.params.clone()).map_err(|e| {
        DispatchResult::error(
            request.id.clone(),
            errors::INVALID_PARAMS,
            format!("Invalid {} params: {e}", request.method),
        )
    })
}

fn polling_error(id: Value, err: PollingError) -> DispatchResult {
    let code = match err {
        PollingError::InvalidInterval(_) => errors::INVALID_INTERVAL,
        PollingError::EmptySubject => errors::INVALID_SUBJECT,
    };
    DispatchResult::error(id, code, err.to_string())
}

fn fetch_error(id: Value, subject: &str, err: FetchError) -> DispatchResult {
    let kind = match err {
        FetchError::Timeout(_) => "timeout",
        FetchError::NotFound(_) => "not_found",
        FetchError::Transport(_) => "transport",
        FetchError::Malformed(_) => "malformed",
    };
    DispatchResult::Error(
        JsonRpcErrorResponse::new(id, errors::FETCH_FAILED, err.to_string())
            .with_data(json!({ "subject": subject, "kind": kind })),
    )
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            initialized: false,
        }
    }

    /// Dispatch a parsed JSON-RPC request to the appropriate handler.
    pub async fn dispatch(&mut self, request: JsonRpcRequest) -> DispatchResult {
        let method = request.method.as_str();

        debug!("Dispatching method: {}", method);

        // The `initialize` method is always allowed
        if method == "initialize" {
            return self.handle_initialize(&request);
        }

        if !self.initialized {
            return DispatchResult::error(
                request.id,
                errors::NOT_INITIALIZED,
                "Agent not initialized, call 'initialize' first",
            );
        }

        let result = match method {
            "polling.start" => self.handle_polling_start(&request).await,
            "polling.stop" => self.handle_polling_stop(&request).await,
            "polling.refresh" => self.handle_polling_refresh(&request).await,
            "polling.status" => self.handle_polling_status(&request).await,
            "earnings.fetch" => self.handle_earnings_fetch(&request).await,
            "health.check" => self.handle_health_check(&request).await,
            _ => {
                warn!("Unknown method: {}", method);
                Err(DispatchResult::error(
                    request.id.clone(),
                    errors::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ))
            }
        };
        result.unwrap_or_else(|e| e)
    }

    fn handle_initialize(&mut self, request: &JsonRpcRequest) -> DispatchResult {
        let params: InitializeParams = match parse_params(request) {
            Ok(p) => p,
            Err(e) => return e,
        };

        // Version negotiation: we only support major version 0
        let major = params
            .protocol_version
            .split('.')
            .next()
            .and_then(|s| s.parse::<u32>().ok());
        if major != Some(0) {
            return DispatchResult::error(
                request.id.clone(),
                errors::VERSION_NOT_SUPPORTED,
                format!(
                    "Unsupported protocol version: {} (agent supports 0.x)",
                    params.protocol_version
                ),
            );
        }

        self.initialized = true;
        debug!(
            "Initialized by {} {}",
            params.client,
            params.client_version.as_deref().unwrap_or("")
        );

        let config = self.engine.config();
        DispatchResult::success(
            request.id.clone(),
            InitializeResult {
                protocol_version: AGENT_PROTOCOL_VERSION.to_string(),
                agent_version: env!("CARGO_PKG_VERSION").to_string(),
                capabilities: Capabilities {
                    frames: FRAMES.iter().map(|f| f.to_string()).collect(),
                    heartbeat_interval_ms: config.heartbeat_interval_ms,
                    default_interval_ms: config.default_interval_ms,
                    min_interval_ms: config.min_interval_ms,
                },
            },
        )
    }

    async fn handle_polling_start(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<DispatchResult, DispatchResult> {
        let params: PollingStartParams = parse_params(request)?;
        let active_sessions = self
            .engine
            .polling()
            .start(&params.subject, params.interval_ms)
            .await
            .map_err(|e| polling_error(request.id.clone(), e))?;
        Ok(DispatchResult::success(
            request.id.clone(),
            ActiveSessionsResult { active_sessions },
        ))
    }

    async fn handle_polling_stop(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<DispatchResult, DispatchResult> {
        let params: PollingStopParams = parse_params(request)?;
        let active_sessions = self
            .engine
            .polling()
            .stop(&params.subject)
            .await
            .map_err(|e| polling_error(request.id.clone(), e))?;
        Ok(DispatchResult::success(
            request.id.clone(),
            ActiveSessionsResult { active_sessions },
        ))
    }

    async fn handle_polling_refresh(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<DispatchResult, DispatchResult> {
        let params: PollingRefreshParams = parse_params(request)?;
        let snapshot = self
            .engine
            .polling()
            .manual_refresh(&params.subject, params.persist)
            .await
            .map_err(|e| polling_error(request.id.clone(), e))?;
        Ok(DispatchResult::success(request.id.clone(), snapshot))
    }

    async fn handle_polling_status(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<DispatchResult, DispatchResult> {
        let sessions = self.engine.polling().status().await;
        Ok(DispatchResult::success(
            request.id.clone(),
            PollingStatusResult { sessions },
        ))
    }

    async fn handle_earnings_fetch(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<DispatchResult, DispatchResult> {
        let params: EarningsFetchParams = parse_params(request)?;
        let id = request.id.clone();
        match self.engine.polling().fetch_once(&params.subject).await {
            Ok(snapshot) => Ok(DispatchResult::success(id, snapshot)),
            Err(CoreError::Polling(e)) => Err(polling_error(id, e)),
            Err(CoreError::Fetch(e)) => {
                warn!("earnings.fetch failed for '{}': {}", params.subject, e);
                Err(fetch_error(id, params.subject.trim(), e))
            }
            Err(e) => Err(DispatchResult::error(id, errors::INTERNAL_ERROR, e.to_string())),
        }
    }

    async fn handle_health_check(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<DispatchResult, DispatchResult> {
        Ok(DispatchResult::success(
            request.id.clone(),
            HealthCheckResult {
                status: "ok".to_string(),
                uptime_secs: self.engine.uptime_secs(),
                active_sessions: self.engine.polling().active_count().await,
                subscribers: self.engine.bus().subscriber_count(),
            },
        ))
    }
}
