use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure of a calendar call. Never propagated past the order service:
/// calendar sync is best-effort and must not block order writes.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("calendar rejected the request: {0}")]
    Rejected(String),
}

/// External calendar collaborator. `upsert_event` is idempotent: calling it
/// again for the same title/date pair retitles and reschedules rather than
/// duplicating.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn upsert_event(
        &self,
        title: &str,
        date: DateTime<Utc>,
    ) -> Result<String, CalendarError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError>;
}

#[derive(Serialize)]
struct UpsertEventRequest<'a> {
    title: &'a str,
    date: DateTime<Utc>,
}

#[derive(Deserialize)]
struct UpsertEventResponse {
    event_id: String,
}

/// HTTP-backed calendar client with a bounded per-request timeout and no
/// retries.
pub struct HttpCalendarClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCalendarClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl CalendarSync for HttpCalendarClient {
    async fn upsert_event(
        &self,
        title: &str,
        date: DateTime<Utc>,
    ) -> Result<String, CalendarError> {
        let response = self
            .client
            .put(format!("{}/events", self.base_url))
            .json(&UpsertEventRequest { title, date })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CalendarError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }
        let body: UpsertEventResponse = response.json().await?;
        Ok(body.event_id)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        let response = self
            .client
            .delete(format!("{}/events/{}", self.base_url, event_id))
            .send()
            .await?;

        // A missing event is an acceptable outcome for an idempotent delete.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            warn!(event_id, status = %response.status(), "calendar delete rejected");
            return Err(CalendarError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Calendar that accepts everything and does nothing. Used in tests and when
/// no calendar endpoint is configured.
pub struct NoopCalendar;

#[async_trait]
impl CalendarSync for NoopCalendar {
    async fn upsert_event(
        &self,
        _title: &str,
        date: DateTime<Utc>,
    ) -> Result<String, CalendarError> {
        Ok(format!("noop-{}", date.timestamp()))
    }

    async fn delete_event(&self, _event_id: &str) -> Result<(), CalendarError> {
        Ok(())
    }
}
