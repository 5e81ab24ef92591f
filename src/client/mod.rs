pub mod queue;

use async_trait::async_trait;
use log::{ debug, error, info, warn };
use reqwest::header::{ HeaderMap, HeaderValue, CONTENT_TYPE };
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use crate::models::api::{ Accepted, ErrorBody };
use crate::models::conversation::ConversationPayload;
use queue::{ DrainOutcome, QueueError, RetryQueue };

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("server rejected submission ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
    },
    #[error("server unreachable: {0}")]
    Unavailable(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl SubmitError {
    /// Failures worth stopping a drain for: the next payload would most likely
    /// fail the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            SubmitError::Rejected { status, .. } =>
                *status >= 500 || *status == 408 || *status == 429,
            SubmitError::Unavailable(_) => true,
            SubmitError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for SubmitError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SubmitError::Malformed(e.to_string())
        } else {
            SubmitError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, payload: &ConversationPayload) -> Result<Accepted, SubmitError>;
}

/// Posts payloads to a running ingress server.
pub struct HttpSubmitter {
    http: reqwest::Client,
    url: Url,
}

impl HttpSubmitter {
    pub fn new(
        endpoint: &str,
        api_key: Option<&str>,
        timeout: Duration
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let mut url = Url::parse(endpoint)
            .map_err(|e| format!("Invalid collector endpoint '{}': {}", endpoint, e))?;
        let path = format!("{}/conversations", url.path().trim_end_matches('/'));
        url.set_path(&path);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            headers.insert(API_KEY_HEADER, HeaderValue::from_str(key)?);
        }

        let http = reqwest::Client::builder().default_headers(headers).timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(&self, payload: &ConversationPayload) -> Result<Accepted, SubmitError> {
        let resp = self.http.post(self.url.clone()).json(payload).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<Accepted>().await?);
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(SubmitError::Rejected { status: status.as_u16(), message })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted(Accepted),
    Queued {
        reason: String,
    },
}

/// Submit-or-queue: failed submissions go to the retry queue, and every
/// successful one triggers a drain of whatever is waiting there.
pub struct Uploader {
    submitter: Arc<dyn Submitter>,
    queue: Arc<RetryQueue>,
}

impl Uploader {
    pub fn new(submitter: Arc<dyn Submitter>, queue: Arc<RetryQueue>) -> Self {
        Self { submitter, queue }
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    pub async fn upload(&self, payload: ConversationPayload) -> Result<UploadOutcome, QueueError> {
        match self.submitter.submit(&payload).await {
            Ok(accepted) => {
                info!("Conversation {} accepted", accepted.conversation_id);
                if !self.queue.is_empty().await {
                    if let Err(e) = self.drain().await {
                        error!("Retry queue drain failed after accepted upload: {}", e);
                    }
                }
                Ok(UploadOutcome::Accepted(accepted))
            }
            Err(e) => {
                warn!("Submission of {} failed: {}", payload.conversation_id, e);
                self.queue.push(payload).await?;
                Ok(UploadOutcome::Queued { reason: e.to_string() })
            }
        }
    }

    pub async fn drain(&self) -> Result<DrainOutcome, QueueError> {
        let outcome = self.queue.drain(self.submitter.as_ref()).await?;
        if outcome == DrainOutcome::AlreadyDraining {
            debug!("Skipped drain, another one is running");
        }
        Ok(outcome)
    }
}
