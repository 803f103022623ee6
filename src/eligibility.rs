// Eligibility gate: KYC + geo-blocking + sanctions admission verdict

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::{EligibilityCheck, KycStatus, KycSubmission, WalletAddress};
use crate::AppState;

pub const MSG_KYC_REQUIRED: &str = "KYC verification required. Please complete KYC to participate.";
pub const MSG_GEO_BLOCKED: &str = "Participation is not available in your jurisdiction.";
pub const MSG_SANCTIONS: &str = "Wallet failed sanctions screening.";
pub const MSG_ELIGIBLE: &str = "Wallet is eligible to participate.";

/// Country denylist applied to approved KYC records
#[derive(Debug, Clone)]
pub struct GeoPolicy {
    blocked: Vec<String>,
}

impl GeoPolicy {
    pub fn new<I, S>(blocked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked: blocked
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn is_blocked(&self, country: &str) -> bool {
        let country = country.trim();
        self.blocked.iter().any(|c| c.eq_ignore_ascii_case(country))
    }

    /// Compute the verdict for a wallet from its KYC record.
    ///
    /// Only an approved record counts; its country drives the geo check.
    pub fn evaluate(
        &self,
        wallet: &WalletAddress,
        kyc: Option<&KycSubmission>,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> EligibilityCheck {
        let approved = kyc.filter(|k| k.status == KycStatus::Approved);
        let country_code = approved.and_then(|k| k.country_code.clone());
        let geo_blocked = country_code.as_deref().is_some_and(|c| self.is_blocked(c));

        EligibilityCheck {
            wallet_address: wallet.clone(),
            kyc_approved: approved.is_some(),
            geo_blocked,
            // Placeholder until a real screening provider is wired in.
            sanctions_check: !geo_blocked,
            country_code,
            ip_address: ip_address.map(str::to_string),
            last_checked_at: now,
        }
    }
}

impl EligibilityCheck {
    pub fn eligible(&self) -> bool {
        self.kyc_approved && !self.geo_blocked && self.sanctions_check
    }

    pub fn message(&self) -> &'static str {
        if !self.kyc_approved {
            MSG_KYC_REQUIRED
        } else if self.geo_blocked {
            MSG_GEO_BLOCKED
        } else if !self.sanctions_check {
            MSG_SANCTIONS
        } else {
            MSG_ELIGIBLE
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EligibilityRequest {
    pub wallet_address: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EligibilityResponse {
    pub eligible: bool,
    pub kyc_approved: bool,
    pub geo_blocked: bool,
    pub sanctions_check: bool,
    pub country: Option<String>,
    pub message: String,
}

impl From<&EligibilityCheck> for EligibilityResponse {
    fn from(check: &EligibilityCheck) -> Self {
        Self {
            eligible: check.eligible(),
            kyc_approved: check.kyc_approved,
            geo_blocked: check.geo_blocked,
            sanctions_check: check.sanctions_check,
            country: check.country_code.clone(),
            message: check.message().to_string(),
        }
    }
}

/// Check and record whether a wallet may participate in sales
pub async fn check_eligibility(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<EligibilityRequest>,
) -> Result<Json<EligibilityResponse>, ApiError> {
    let wallet = WalletAddress::parse(req.wallet_address.as_deref().unwrap_or_default())?;
    let ip_address = req
        .ip_address
        .as_deref()
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let check = state
        .store
        .evaluate_eligibility(&wallet, ip_address, &state.geo_policy, Utc::now())
        .await?;

    let response = EligibilityResponse::from(&check);
    info!(
        "Eligibility for {}: eligible={}, kyc={}, geo_blocked={}, country={:?}",
        wallet, response.eligible, check.kyc_approved, check.geo_blocked, check.country_code
    );

    Ok(Json(response))
}
