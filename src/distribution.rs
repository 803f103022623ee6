// Batch distribution planner: chunk pending token distributions into
// gas-bounded batches and persist the plan for manual execution

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::{
    parse_uuid, AuditEntry, Batch, BatchRecipient, DistributionJob, UserInvestment, WalletAddress,
};
use crate::AppState;

pub const DEFAULT_BATCH_SIZE: u32 = 50;
pub const MAX_BATCH_SIZE: u32 = 200;
/// Rough per-batch gas estimate in native token units
pub const GAS_PER_BATCH: f64 = 0.01;

pub const JOB_STATUS_PENDING: &str = "pending";
pub const AUDIT_ACTION_PLAN: &str = "create_distribution_batches";
pub const MSG_TOTAL_OVERFLOW: &str = "token total exceeds representable range";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PlanRequest {
    pub project_id: Option<String>,
    pub batch_size: Option<u32>,
    pub admin_wallet: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_batches: u32,
    pub total_recipients: u32,
    pub total_tokens: Decimal,
    pub estimated_gas: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanInstructions {
    pub step1: String,
    pub step2: String,
    pub step3: String,
    pub note: String,
}

impl Default for PlanInstructions {
    fn default() -> Self {
        Self {
            step1: "Review each batch and confirm recipient addresses and amounts".to_string(),
            step2: "Execute batches in order against the distribution contract".to_string(),
            step3: "Mark each investment as distributed once its batch is confirmed".to_string(),
            note: "Batches are not executed automatically".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub batches: Vec<Batch>,
    pub summary: PlanSummary,
    pub instructions: PlanInstructions,
}

/// Sum token amounts, failing instead of overflowing `Decimal`.
pub fn total_tokens(amounts: impl IntoIterator<Item = Decimal>) -> Result<Decimal, ApiError> {
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| ApiError::BadRequest(MSG_TOTAL_OVERFLOW.to_string()))
    })
}

/// Split investments into contiguous chunks of `batch_size`, keeping order.
pub fn plan_batches(
    investments: &[UserInvestment],
    batch_size: usize,
) -> Result<Vec<Batch>, ApiError> {
    investments
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| {
            let recipients: Vec<BatchRecipient> = chunk
                .iter()
                .map(|inv| BatchRecipient {
                    address: inv.wallet_address.clone(),
                    amount: inv.tokens_received,
                    investment_id: inv.id,
                })
                .collect();
            Ok(Batch {
                batch_number: index as u32 + 1,
                total_recipients: recipients.len() as u32,
                total_tokens: total_tokens(recipients.iter().map(|r| r.amount))?,
                recipients,
            })
        })
        .collect()
}

pub fn summarize(batches: &[Batch]) -> Result<PlanSummary, ApiError> {
    let total_batches = batches.len() as u32;
    Ok(PlanSummary {
        total_batches,
        total_recipients: batches.iter().map(|b| b.total_recipients).sum(),
        total_tokens: total_tokens(batches.iter().map(|b| b.total_tokens))?,
        estimated_gas: f64::from(total_batches) * GAS_PER_BATCH,
    })
}

/// Plan distribution batches for a project's active investments
pub async fn create_distribution_plan(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<PlanRequest>,
) -> Result<Response, ApiError> {
    let project_id = parse_uuid("projectId", req.project_id.as_deref())?;
    let batch_size = req.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(ApiError::BadRequest(format!(
            "batchSize must be between 1 and {}",
            MAX_BATCH_SIZE
        )));
    }
    let admin_wallet = req
        .admin_wallet
        .as_deref()
        .map(WalletAddress::parse)
        .transpose()?;
    if let Some(admin) = &admin_wallet {
        if !state.config.is_admin(admin) {
            warn!("Distribution: plan for {} rejected, {} is not an admin", project_id, admin);
            return Err(ApiError::Forbidden("Admin access required".to_string()));
        }
    }

    if !state.store.project_exists(project_id).await? {
        return Err(ApiError::BadRequest(format!("Project not found: {}", project_id)));
    }

    let investments = state.store.active_investments(project_id).await?;
    if investments.is_empty() {
        info!("Distribution: no pending investments for project {}", project_id);
        return Ok(Json(json!({
            "success": true,
            "message": "No pending distributions found",
            "batches": [],
        }))
        .into_response());
    }

    let batches = plan_batches(&investments, batch_size as usize)?;
    let summary = summarize(&batches)?;
    let now = Utc::now();

    let job = DistributionJob {
        id: Uuid::new_v4(),
        project_id,
        total_batches: summary.total_batches as i32,
        total_recipients: summary.total_recipients as i32,
        total_tokens: summary.total_tokens,
        status: JOB_STATUS_PENDING.to_string(),
        batches,
        created_at: now,
    };
    let audit = AuditEntry {
        admin_wallet,
        action: AUDIT_ACTION_PLAN.to_string(),
        target: project_id.to_string(),
        details: json!({
            "job_id": job.id,
            "total_batches": summary.total_batches,
            "total_recipients": summary.total_recipients,
            "total_tokens": summary.total_tokens,
            "batch_size": batch_size,
        }),
        created_at: now,
    };

    state.store.create_distribution_job(&job, &audit).await?;

    info!(
        "Distribution: job {} planned for project {} ({} batches, {} recipients, {} tokens)",
        job.id, project_id, summary.total_batches, summary.total_recipients, summary.total_tokens
    );

    Ok(Json(PlanResponse {
        success: true,
        job_id: job.id,
        batches: job.batches,
        summary,
        instructions: PlanInstructions::default(),
    })
    .into_response())
}
