// KYC submission, admin review and provider webhook handlers

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::{
    parse_country_code, AuditEntry, KycReview, KycStatus, KycSubmission, WalletAddress,
};
use crate::AppState;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";
pub const AUDIT_ACTION_REVIEW: &str = "review_kyc";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SubmitKycRequest {
    pub wallet_address: Option<String>,
    pub country_code: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReviewKycRequest {
    pub admin_wallet: Option<String>,
    pub wallet_address: Option<String>,
    pub decision: Option<KycStatus>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct KycWebhookRequest {
    pub wallet_address: Option<String>,
    pub status: Option<KycStatus>,
    pub country_code: Option<String>,
    pub reference: Option<String>,
}

fn required<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))
}

/// Submit (or resubmit) KYC details for review
pub async fn submit_kyc(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<SubmitKycRequest>,
) -> Result<Json<KycSubmission>, ApiError> {
    let wallet = WalletAddress::parse(required("walletAddress", req.wallet_address.as_deref())?)?;
    let country_code = parse_country_code(required("countryCode", req.country_code.as_deref())?)?;

    if let Some(existing) = state.store.get_kyc(&wallet).await? {
        if existing.status == KycStatus::Approved {
            return Err(ApiError::Conflict(format!("KYC already approved for {}", wallet)));
        }
    }

    let submission = KycSubmission {
        wallet_address: wallet.clone(),
        status: KycStatus::Pending,
        country_code: Some(country_code),
        full_name: req.full_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        provider_reference: None,
        submitted_at: Utc::now(),
        reviewed_at: None,
        reviewed_by: None,
        rejection_reason: None,
    };
    let saved = state.store.upsert_kyc(&submission).await?;
    info!("KYC: submission received for {}", wallet);

    Ok(Json(saved))
}

/// Approve or reject a pending submission (admin only)
pub async fn review_kyc(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<ReviewKycRequest>,
) -> Result<Json<KycSubmission>, ApiError> {
    let admin = WalletAddress::parse(required("adminWallet", req.admin_wallet.as_deref())?)?;
    let wallet = WalletAddress::parse(required("walletAddress", req.wallet_address.as_deref())?)?;
    let decision = match req.decision {
        Some(d @ (KycStatus::Approved | KycStatus::Rejected)) => d,
        Some(KycStatus::Pending) => {
            return Err(ApiError::BadRequest("decision must be approved or rejected".to_string()))
        }
        None => return Err(ApiError::BadRequest("decision is required".to_string())),
    };

    if !state.config.is_admin(&admin) {
        warn!("KYC: review of {} rejected, {} is not an admin", wallet, admin);
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    let now = Utc::now();
    let reason = req.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    let review = KycReview {
        status: decision,
        reviewed_by: Some(admin.clone()),
        reason: reason.clone(),
        reviewed_at: now,
    };
    let audit = AuditEntry {
        admin_wallet: Some(admin.clone()),
        action: AUDIT_ACTION_REVIEW.to_string(),
        target: wallet.to_string(),
        details: json!({ "decision": decision.as_str(), "reason": reason }),
        created_at: now,
    };

    let updated = state
        .store
        .review_kyc(&wallet, &review, &audit)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No KYC submission for {}", wallet)))?;

    info!("KYC: {} {} by {}", wallet, decision.as_str(), admin);
    Ok(Json(updated))
}

fn secret_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Status callback from the KYC provider
pub async fn kyc_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<KycWebhookRequest>,
) -> Result<Json<KycSubmission>, ApiError> {
    let expected = state
        .config
        .kyc_webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Forbidden("KYC webhook is not configured".to_string()))?;
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secret_matches(provided, expected) {
        warn!("KYC webhook: invalid secret");
        return Err(ApiError::Forbidden("Invalid webhook secret".to_string()));
    }

    let wallet = WalletAddress::parse(required("walletAddress", req.wallet_address.as_deref())?)?;
    let status = req
        .status
        .ok_or_else(|| ApiError::BadRequest("status is required".to_string()))?;
    let country_code = req.country_code.as_deref().map(parse_country_code).transpose()?;

    let now = Utc::now();
    let existing = state.store.get_kyc(&wallet).await?;
    let country_code =
        country_code.or_else(|| existing.as_ref().and_then(|e| e.country_code.clone()));
    // Approved records always carry a country for the geo check.
    if status == KycStatus::Approved && country_code.is_none() {
        return Err(ApiError::BadRequest("countryCode is required".to_string()));
    }

    let submission = KycSubmission {
        wallet_address: wallet.clone(),
        status,
        country_code,
        full_name: existing.as_ref().and_then(|e| e.full_name.clone()),
        provider_reference: req
            .reference
            .or_else(|| existing.as_ref().and_then(|e| e.provider_reference.clone())),
        submitted_at: existing.as_ref().map(|e| e.submitted_at).unwrap_or(now),
        reviewed_at: (status != KycStatus::Pending).then_some(now),
        reviewed_by: None,
        rejection_reason: None,
    };
    let saved = state.store.upsert_kyc(&submission).await?;
    info!("KYC webhook: {} is now {}", wallet, status.as_str());

    Ok(Json(saved))
}

/// Current KYC record for a wallet
pub async fn get_kyc_status(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<KycSubmission>, ApiError> {
    let wallet = WalletAddress::parse(&wallet)?;
    let submission = state
        .store
        .get_kyc(&wallet)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No KYC submission for {}", wallet)))?;
    Ok(Json(submission))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("s3cret", "s3cret"));
        assert!(!secret_matches("s3creT", "s3cret"));
        assert!(!secret_matches("s3cre", "s3cret"));
        assert!(!secret_matches("", "s3cret"));
    }
}
