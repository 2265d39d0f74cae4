use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use crate::db::SyncOutcome;
use crate::parser::ContactRecord;
use crate::settings::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const BASE_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("CRM request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("CRM rejected contact: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl CrmError {
    fn is_retryable(&self) -> bool {
        match self {
            CrmError::Rejected { status, .. } => *status == 429 || *status >= 500,
            CrmError::Request(e) => e.is_timeout() || e.is_connect(),
        }
    }
}

#[derive(Serialize)]
struct CrmPayload<'a> {
    external_id: i64,
    #[serde(flatten)]
    contact: &'a ContactRecord,
}

/// Pushes contacts to the configured CRM endpoint, or to an in-process mock
/// that accepts everything when no endpoint is set.
pub struct CrmClient {
    http: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    max_retries: u32,
}

impl CrmClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, CrmError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: settings.crm_endpoint.clone().filter(|e| !e.trim().is_empty()),
            api_key: settings.crm_api_key.clone(),
            max_retries: settings.max_retries,
        })
    }

    pub fn is_mock(&self) -> bool {
        self.endpoint.is_none()
    }

    /// Returns the CRM's reference for the contact.
    pub async fn push(&self, contact_id: i64, contact: &ContactRecord) -> Result<String, CrmError> {
        let Some(endpoint) = &self.endpoint else {
            info!(contact_id, "Mock CRM accepted contact");
            return Ok(format!("mock-{}", contact_id));
        };

        let mut req = self.http.post(endpoint).json(&CrmPayload {
            external_id: contact_id,
            contact,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CrmError::Rejected {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: Value = resp.json().await.unwrap_or_default();
        let crm_ref = match body.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => contact_id.to_string(),
        };
        Ok(crm_ref)
    }

    async fn push_with_retry(&self, contact_id: i64, contact: &ContactRecord) -> Result<String, CrmError> {
        let mut attempt = 0;
        loop {
            match self.push(contact_id, contact).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff = backoff_delay(attempt);
                    warn!(
                        "CRM push for contact {} failed ({}), attempt {}/{}, backing off {:.1}s",
                        contact_id,
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

struct SyncJob {
    contact_id: i64,
    contact: ContactRecord,
}

/// Background CRM sync queue.
///
/// `enqueue` hands a stored contact to the worker and returns immediately;
/// a failed push only shows up in the outcomes returned by `finish`.
pub struct CrmSync {
    tx: mpsc::UnboundedSender<SyncJob>,
    worker: JoinHandle<Vec<SyncOutcome>>,
}

impl CrmSync {
    pub fn spawn(client: CrmClient, concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(Arc::new(client), rx, concurrency.max(1)));
        Self { tx, worker }
    }

    pub fn enqueue(&self, contact_id: i64, contact: ContactRecord) {
        if self.tx.send(SyncJob { contact_id, contact }).is_err() {
            warn!(contact_id, "CRM sync worker stopped, contact left pending");
        }
    }

    /// Close the queue and wait for in-flight pushes.
    pub async fn finish(self) -> Vec<SyncOutcome> {
        drop(self.tx);
        match self.worker.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!("CRM sync worker failed: {}", e);
                Vec::new()
            }
        }
    }
}

async fn run_worker(
    client: Arc<CrmClient>,
    mut rx: mpsc::UnboundedReceiver<SyncJob>,
    concurrency: usize,
) -> Vec<SyncOutcome> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = sem.acquire().await;
            sync_one(&client, job).await
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => warn!("CRM sync task failed: {}", e),
        }
    }
    info!(
        "CRM sync: {} pushed, {} failed",
        outcomes.iter().filter(|o| o.error.is_none()).count(),
        outcomes.iter().filter(|o| o.error.is_some()).count()
    );
    outcomes
}

async fn sync_one(client: &CrmClient, job: SyncJob) -> SyncOutcome {
    match client.push_with_retry(job.contact_id, &job.contact).await {
        Ok(crm_ref) => SyncOutcome {
            contact_id: job.contact_id,
            crm_ref: Some(crm_ref),
            error: None,
        },
        Err(e) => {
            warn!("CRM sync failed for contact {}: {}", job.contact_id, e);
            SyncOutcome {
                contact_id: job.contact_id,
                crm_ref: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Exponential backoff, capped at `MAX_BACKOFF`.
fn backoff_delay(attempt: u32) -> Duration {
    let millis = BASE_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}
