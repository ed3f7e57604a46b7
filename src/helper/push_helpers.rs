use actix_web::web;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{ApiError, ApiResult};
use crate::helper::db_helpers::with_conn;
use crate::models::db_operations::push_db_operations::{self, TaskWrite};
use crate::models::push_models::{DispatchReport, PushConfig, PushMessage, PushTask, PushTaskStatus};
use crate::DbPool;

/// Tokens handed to the provider per request.
pub const DISPATCH_BATCH_SIZE: usize = 500;

#[derive(Error, Debug)]
pub enum PushError {
    #[error("Push transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Push provider answered HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Rejected(String),
}

/// Delivers one batch of tokens to a provider.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, config: &PushConfig, message: &PushMessage, tokens: &[String]) -> Result<DispatchReport, PushError>;
}

#[derive(Serialize)]
struct OutboundBatch<'a> {
    tokens: &'a [String],
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ProviderReply {
    success: Option<u32>,
    failure: Option<u32>,
}

/// POSTs `{tokens, title, body, data}` to the config's endpoint.
pub struct HttpPushSender {
    client: reqwest::Client,
}

impl HttpPushSender {
    pub fn new(request_timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(HttpPushSender { client })
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, config: &PushConfig, message: &PushMessage, tokens: &[String]) -> Result<DispatchReport, PushError> {
        let batch = OutboundBatch { tokens, title: &message.title, body: &message.body, data: &message.data };
        let mut request = self.client.post(&config.endpoint_url).json(&batch);
        if let Some(api_key) = config.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PushError::Status(status.as_u16()));
        }

        let sent = tokens.len() as u32;
        // Providers that do not report counts accepted the whole batch.
        let report = match response.json::<ProviderReply>().await {
            Ok(ProviderReply { success: Some(success), failure }) => DispatchReport {
                success: success.min(sent),
                failure: failure.unwrap_or(sent.saturating_sub(success)),
            },
            _ => DispatchReport { success: sent, failure: 0 },
        };
        Ok(report)
    }
}

async fn dispatch_batches(
    sender: &dyn PushSender,
    config: &PushConfig,
    message: &PushMessage,
    tokens: &[String],
    report: &mut DispatchReport,
) -> Result<(), PushError> {
    for batch in tokens.chunks(DISPATCH_BATCH_SIZE) {
        let outcome = sender.send(config, message, batch).await?;
        report.success += outcome.success;
        report.failure += outcome.failure;
    }
    Ok(())
}

async fn finish(
    pool: &web::Data<DbPool>,
    task_id: i64,
    status: PushTaskStatus,
    total: usize,
    report: DispatchReport,
    error_message: Option<String>,
) -> ApiResult<()> {
    with_conn(pool, move |conn| {
        push_db_operations::finish_task(
            conn,
            task_id,
            status,
            total as i64,
            report.success as i64,
            report.failure as i64,
            error_message.as_deref(),
        )?;
        Ok(())
    })
    .await
}

/// Runs a pending task to completion: claims it, resolves the audience, and dispatches in
/// batches within `limit`. Returns the task in its final state.
pub async fn execute_task(
    pool: &web::Data<DbPool>,
    sender: Arc<dyn PushSender>,
    task_id: i64,
    limit: Duration,
) -> ApiResult<PushTask> {
    match with_conn(pool, move |conn| Ok(push_db_operations::start_task(conn, task_id)?)).await? {
        TaskWrite::Done => {}
        TaskWrite::NotFound => return Err(ApiError::not_found("Push task")),
        TaskWrite::NotPending(status) => {
            return Err(ApiError::Conflict(format!(
                "Push task is {} and cannot be executed.",
                status.as_str()
            )))
        }
    }
    log::info!("Push task {} started", task_id);

    let plan = with_conn(pool, move |conn| Ok(push_db_operations::load_dispatch_plan(conn, task_id)?)).await?;
    let mut report = DispatchReport::default();

    let (status, total, error_message) = match plan {
        None => (PushTaskStatus::Failed, 0, Some("Template or push config no longer exists.".to_string())),
        Some(plan) if !plan.config.is_active => (
            PushTaskStatus::Failed,
            plan.tokens.len(),
            Some(format!("Push config '{}' is inactive.", plan.config.name)),
        ),
        Some(plan) => {
            let message = PushMessage {
                title: plan.template.title.clone(),
                body: plan.template.body.clone(),
                data: plan.template.payload.clone(),
            };
            let total = plan.tokens.len();
            let dispatch = dispatch_batches(sender.as_ref(), &plan.config, &message, &plan.tokens, &mut report);
            match actix_web::rt::time::timeout(limit, dispatch).await {
                Ok(Ok(())) => (PushTaskStatus::Completed, total, None),
                Ok(Err(e)) => (PushTaskStatus::Failed, total, Some(e.to_string())),
                Err(_) => (
                    PushTaskStatus::Failed,
                    total,
                    Some(format!("Dispatch timed out after {}s.", limit.as_secs())),
                ),
            }
        }
    };

    match &error_message {
        Some(reason) => log::warn!("Push task {} failed: {}", task_id, reason),
        None => log::info!(
            "Push task {} completed: {} sent, {} failed",
            task_id,
            report.success,
            report.failure
        ),
    }
    finish(pool, task_id, status, total, report, error_message).await?;

    with_conn(pool, move |conn| push_db_operations::get_task(conn, task_id)?.ok_or_else(|| ApiError::not_found("Push task")))
        .await
}
