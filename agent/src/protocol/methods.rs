use serde::{Deserialize, Serialize};

use crate::polling::SessionStatus;

// ── initialize ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client: String,
    #[serde(default)]
    pub client_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Stream frame names this agent can emit.
    pub frames: Vec<String>,
    pub heartbeat_interval_ms: u64,
    pub default_interval_ms: u64,
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub agent_version: String,
    pub capabilities: Capabilities,
}

// ── polling.start / polling.stop ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingStartParams {
    pub subject: String,
    /// Signed so non-positive values reach validation instead of failing
    /// deserialization.
    #[serde(default)]
    pub interval_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingStopParams {
    pub subject: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionsResult {
    pub active_sessions: Vec<String>,
}

// ── polling.refresh ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PollingRefreshParams {
    pub subject: String,
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_persist() -> bool {
    true
}

// ── polling.status ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PollingStatusResult {
    pub sessions: Vec<SessionStatus>,
}

// ── earnings.fetch ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EarningsFetchParams {
    pub subject: String,
}

// ── health.check ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_params_interval_is_optional_and_signed() {
        let p: PollingStartParams = serde_json::from_value(json!({"subject": "Acme"})).unwrap();
        assert_eq!(p.subject, "Acme");
        assert_eq!(p.interval_ms, None);

        let p: PollingStartParams =
            serde_json::from_value(json!({"subject": "Acme", "intervalMs": -5})).unwrap();
        assert_eq!(p.interval_ms, Some(-5));
    }

    #[test]
    fn refresh_persists_by_default() {
        let p: PollingRefreshParams = serde_json::from_value(json!({"subject": "Acme"})).unwrap();
        assert!(p.persist);
        let p: PollingRefreshParams =
            serde_json::from_value(json!({"subject": "Acme", "persist": false})).unwrap();
        assert!(!p.persist);
    }

    #[test]
    fn missing_subject_fails() {
        assert!(serde_json::from_value::<PollingStopParams>(json!({})).is_err());
        assert!(serde_json::from_value::<EarningsFetchParams>(json!({"name": "x"})).is_err());
    }

    #[test]
    fn results_serialize_camel_case() {
        let v = serde_json::to_value(ActiveSessionsResult {
            active_sessions: vec!["Acme".into()],
        })
        .unwrap();
        assert_eq!(v, json!({"activeSessions": ["Acme"]}));

        let v = serde_json::to_value(HealthCheckResult {
            status: "ok".into(),
            uptime_secs: 3,
            active_sessions: 1,
            subscribers: 2,
        })
        .unwrap();
        assert_eq!(v["uptimeSecs"], 3);
        assert_eq!(v["activeSessions"], 1);
        assert_eq!(v["subscribers"], 2);
    }
}
