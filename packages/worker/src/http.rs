//! HTTP adapters for the scrape, extraction and club-directory services.

use std::time::Duration;

use chrono::{DateTime, Utc};
use scout_actors::{
    ClubDirectory, CollaboratorError, CollaboratorFuture, EventExtractor, ExtractOutcome,
    ScrapeOutcome, ScrapeProvider,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct HandleRequest<'a> {
    handle: &'a str,
}

#[derive(Serialize)]
struct ResetRequest {
    rotate: bool,
}

#[derive(Serialize)]
struct ProcessedRequest<'a> {
    handle: &'a str,
    processed_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct DueClubs {
    handles: Vec<String>,
}

#[derive(Deserialize)]
struct CleanResult {
    removed: u64,
}

/// One client for every collaborator endpoint under a base URL.
pub struct HttpCollaborator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCollaborator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(unavailable)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await
    }
}

fn unavailable(e: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Unavailable(e.to_string())
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CollaboratorError::Status {
        status: status.as_u16(),
        body,
    })
}

impl ScrapeProvider for HttpCollaborator {
    fn scrape<'a>(&'a self, handle: &'a str) -> CollaboratorFuture<'a, ScrapeOutcome> {
        Box::pin(async move {
            match self.post("/scrape", &HandleRequest { handle }).await {
                Ok(resp) => match resp.json::<serde_json::Value>().await {
                    Ok(profile) => ScrapeOutcome::Success(profile),
                    Err(e) => ScrapeOutcome::TransientError(format!("invalid scrape response: {}", e)),
                },
                Err(CollaboratorError::Status { status: 429, .. }) => ScrapeOutcome::RateLimited,
                Err(e) => ScrapeOutcome::TransientError(e.to_string()),
            }
        })
    }

    fn reset_session(&self, rotate: bool) -> CollaboratorFuture<'_, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.post("/session/reset", &ResetRequest { rotate }).await?;
            tracing::info!(rotate, "Scrape session reset");
            Ok(())
        })
    }
}

impl EventExtractor for HttpCollaborator {
    fn extract<'a>(&'a self, handle: &'a str) -> CollaboratorFuture<'a, ExtractOutcome> {
        Box::pin(async move {
            match self.post("/extract", &HandleRequest { handle }).await {
                Ok(_) => ExtractOutcome::Success,
                Err(e) => ExtractOutcome::TransientError(e.to_string()),
            }
        })
    }
}

impl ClubDirectory for HttpCollaborator {
    fn due_handles(
        &self,
        limit: Option<u32>,
    ) -> CollaboratorFuture<'_, Result<Vec<String>, CollaboratorError>> {
        Box::pin(async move {
            let mut request = self.client.get(self.url("/clubs/due"));
            if let Some(limit) = limit {
                request = request.query(&[("limit", limit)]);
            }
            let resp = check(request.send().await.map_err(unavailable)?).await?;
            let due: DueClubs = resp
                .json()
                .await
                .map_err(|e| CollaboratorError::Decode(e.to_string()))?;
            Ok(due.handles)
        })
    }

    fn mark_last_processed<'a>(
        &'a self,
        handle: &'a str,
        at: DateTime<Utc>,
    ) -> CollaboratorFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.post(
                "/clubs/processed",
                &ProcessedRequest {
                    handle,
                    processed_at: at,
                },
            )
            .await?;
            Ok(())
        })
    }

    fn clean(&self) -> CollaboratorFuture<'_, Result<u64, CollaboratorError>> {
        Box::pin(async move {
            let resp = self.post("/maintenance/clean", &serde_json::json!({})).await?;
            let result: CleanResult = resp
                .json()
                .await
                .map_err(|e| CollaboratorError::Decode(e.to_string()))?;
            Ok(result.removed)
        })
    }
}
