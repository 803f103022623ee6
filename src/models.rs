// Database models for the launchpad backend

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ApiError;

/// EVM wallet address, always stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse a user-supplied address (`0x` + 40 hex digits, any case).
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ApiError::BadRequest("Wallet address is required".to_string()));
        }

        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| invalid_address(trimmed))?;
        let bytes = hex::decode(digits).map_err(|_| invalid_address(trimmed))?;
        if bytes.len() != 20 {
            return Err(invalid_address(trimmed));
        }

        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn invalid_address(raw: &str) -> ApiError {
    ApiError::BadRequest(format!("Invalid wallet address: {}", raw))
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a required UUID field from a request body or query string.
pub fn parse_uuid(field: &str, raw: Option<&str>) -> Result<Uuid, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid {}: {}", field, raw)))
}

// ============================================================================
// KYC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum KycStatus {
    Pending,
    Approved,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "pending",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
        }
    }
}

/// KYC submission, one row per wallet
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KycSubmission {
    pub wallet_address: WalletAddress,
    pub status: KycStatus,
    pub country_code: Option<String>,
    pub full_name: Option<String>,
    pub provider_reference: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<WalletAddress>,
    pub rejection_reason: Option<String>,
}

/// Review decision applied by an admin or by the KYC provider
#[derive(Debug, Clone)]
pub struct KycReview {
    pub status: KycStatus,
    pub reviewed_by: Option<WalletAddress>,
    pub reason: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// Normalize an ISO 3166 alpha-2 country code.
pub fn parse_country_code(raw: &str) -> Result<String, ApiError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(ApiError::BadRequest(format!("Invalid country code: {}", raw)))
    }
}

/// Last computed eligibility verdict for a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EligibilityCheck {
    pub wallet_address: WalletAddress,
    pub kyc_approved: bool,
    pub geo_blocked: bool,
    pub sanctions_check: bool,
    pub country_code: Option<String>,
    pub ip_address: Option<String>,
    pub last_checked_at: DateTime<Utc>,
}

// ============================================================================
// QUEUE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TicketStatus {
    Waiting,
    Active,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueTicket {
    pub id: Uuid,
    pub wallet_address: WalletAddress,
    pub project_id: Uuid,
    pub priority: bool,
    pub position: i64,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Ticket fields known before the store allocates a position
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub wallet_address: WalletAddress,
    pub project_id: Uuid,
    pub priority: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// DISTRIBUTION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserInvestment {
    pub id: Uuid,
    pub wallet_address: WalletAddress,
    pub project_id: Uuid,
    pub tokens_received: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecipient {
    pub address: WalletAddress,
    pub amount: Decimal,
    pub investment_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_number: u32,
    pub recipients: Vec<BatchRecipient>,
    pub total_recipients: u32,
    pub total_tokens: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionJob {
    pub id: Uuid,
    pub project_id: Uuid,
    pub total_batches: i32,
    pub total_recipients: i32,
    pub total_tokens: Decimal,
    pub status: String,
    pub batches: Vec<Batch>,
    pub created_at: DateTime<Utc>,
}

/// Admin action record, written in the same transaction as the change it describes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub admin_wallet: Option<WalletAddress>,
    pub action: String,
    pub target: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_address_is_lowercased() {
        let upper = WalletAddress::parse("0xABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        let lower = WalletAddress::parse(" 0xabcdef0123456789abcdef0123456789abcdef01 ").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_wallet_address_rejects_garbage() {
        assert!(WalletAddress::parse("").is_err());
        assert!(WalletAddress::parse("   ").is_err());
        assert!(WalletAddress::parse("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(WalletAddress::parse("0x1234").is_err());
        assert!(WalletAddress::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_country_code() {
        assert_eq!(parse_country_code("us").unwrap(), "US");
        assert!(parse_country_code("USA").is_err());
        assert!(parse_country_code("1A").is_err());
    }

    #[test]
    fn test_parse_uuid_required() {
        assert!(parse_uuid("projectId", None).is_err());
        assert!(parse_uuid("projectId", Some("")).is_err());
        assert!(parse_uuid("projectId", Some("not-a-uuid")).is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid("projectId", Some(&id.to_string())).unwrap(), id);
    }
}
