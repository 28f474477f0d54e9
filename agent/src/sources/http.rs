//! Source backed by an HTTP JSON feed.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use earnwatch_core::errors::FetchError;
use earnwatch_core::snapshot::{FiscalCalendar, Snapshot, SourceReport};
use earnwatch_core::source::{Clock, SnapshotSource};
use reqwest::{StatusCode, Url};
use tracing::debug;

const USER_AGENT: &str = concat!("earnwatch-agent/", env!("CARGO_PKG_VERSION"));

/// Answers `GET <baseUrl>/<subject>` with a [`SourceReport`] body.
pub struct HttpSource {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    calendar: FiscalCalendar,
    clock: Arc<dyn Clock>,
}

impl HttpSource {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        calendar: FiscalCalendar,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid source baseUrl: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Source baseUrl cannot be a base: {base_url}"));
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
            calendar,
            clock,
        })
    }

    /// URL for `subject`, appended as one percent-encoded path segment.
    pub fn url_for(&self, subject: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(subject);
        }
        url
    }
}

#[async_trait::async_trait]
impl SnapshotSource for HttpSource {
    async fn fetch(&self, subject: &str) -> Result<Snapshot, FetchError> {
        let url = self.url_for(subject);
        debug!("GET {}", url);

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                FetchError::Transport(format!("connection failed: {e}"))
            } else {
                FetchError::Transport(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(subject.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read response body: {e}")))?;
        let report: SourceReport =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        let now = self.clock.now();
        let period = self.calendar.period_for(subject, now);
        Ok(report.into_snapshot(subject, period, now))
    }
}
