// Persistence seam shared by the Postgres and in-memory stores

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::eligibility::GeoPolicy;
use crate::error::StoreResult;
use crate::models::{
    AuditEntry, DistributionJob, EligibilityCheck, KycReview, KycSubmission, NewTicket,
    QueueTicket, UserInvestment, WalletAddress,
};

/// Typed access to the launchpad tables.
///
/// Operations that touch more than one row are atomic: an implementation
/// either commits every write of a call or none of them.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check connectivity to the backing store.
    async fn health_check(&self) -> StoreResult<()>;

    // ---- KYC -------------------------------------------------------------

    async fn get_kyc(&self, wallet: &WalletAddress) -> StoreResult<Option<KycSubmission>>;

    /// Insert or replace the wallet's submission.
    async fn upsert_kyc(&self, submission: &KycSubmission) -> StoreResult<KycSubmission>;

    /// Apply a review decision and record the audit entry in one transaction.
    /// Returns `None` when the wallet has no submission.
    async fn review_kyc(
        &self,
        wallet: &WalletAddress,
        review: &KycReview,
        audit: &AuditEntry,
    ) -> StoreResult<Option<KycSubmission>>;

    // ---- Eligibility -----------------------------------------------------

    /// Read the approved KYC record, compute the verdict with `policy` and
    /// upsert it, all in one transaction.
    async fn evaluate_eligibility(
        &self,
        wallet: &WalletAddress,
        ip_address: Option<&str>,
        policy: &GeoPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<EligibilityCheck>;

    async fn get_eligibility(
        &self,
        wallet: &WalletAddress,
    ) -> StoreResult<Option<EligibilityCheck>>;

    // ---- Queue -----------------------------------------------------------

    async fn find_waiting_ticket(
        &self,
        wallet: &WalletAddress,
        project_id: Uuid,
    ) -> StoreResult<Option<QueueTicket>>;

    async fn is_priority_whitelisted(
        &self,
        wallet: &WalletAddress,
        project_id: Uuid,
    ) -> StoreResult<bool>;

    /// Allocate the next position for the project and insert the ticket.
    /// If a waiting ticket already exists for the pair, that ticket is
    /// returned and nothing is written.
    async fn insert_ticket(&self, ticket: &NewTicket) -> StoreResult<QueueTicket>;

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<QueueTicket>>;

    /// Number of waiting tickets in the project with a lower position.
    async fn count_waiting_ahead(&self, project_id: Uuid, position: i64) -> StoreResult<i64>;

    /// Mark a ticket expired. Returns `false` if the ticket does not exist.
    async fn expire_ticket(&self, id: Uuid) -> StoreResult<bool>;

    /// Expire every waiting ticket whose `expires_at` is not after `now`.
    async fn expire_stale_tickets(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // ---- Distribution ----------------------------------------------------

    async fn project_exists(&self, project_id: Uuid) -> StoreResult<bool>;

    /// Active investments of the project in creation order.
    async fn active_investments(&self, project_id: Uuid) -> StoreResult<Vec<UserInvestment>>;

    /// Persist the job and its audit entry in one transaction.
    async fn create_distribution_job(
        &self,
        job: &DistributionJob,
        audit: &AuditEntry,
    ) -> StoreResult<()>;
}
