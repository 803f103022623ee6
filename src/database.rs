// Postgres store for the launchpad backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, Pool, Postgres};
use tracing::{info, warn};
use uuid::Uuid;

use crate::eligibility::GeoPolicy;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AuditEntry, DistributionJob, EligibilityCheck, KycReview, KycStatus, KycSubmission, NewTicket,
    QueueTicket, UserInvestment, WalletAddress,
};
use crate::store::Store;

pub type DbPool = Pool<Postgres>;

const KYC_COLUMNS: &str = "wallet_address, status, country_code, full_name, provider_reference, \
     submitted_at, reviewed_at, reviewed_by, rejection_reason";

const TICKET_COLUMNS: &str =
    "id, wallet_address, project_id, priority, position, status, created_at, expires_at";

pub struct Database;

impl Database {
    /// Initialize database connection pool
    pub async fn init(database_url: &str, max_connections: u32) -> StoreResult<DbPool> {
        info!("Connecting to database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        // Run migrations
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(pool)
    }
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO admin_logs (admin_wallet, action, target, details, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.admin_wallet.as_ref().map(WalletAddress::as_str))
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(Json(&entry.details))
        .bind(entry.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_kyc(&self, wallet: &WalletAddress) -> StoreResult<Option<KycSubmission>> {
        let row = sqlx::query_as::<_, KycSubmission>(&format!(
            "SELECT {KYC_COLUMNS} FROM kyc_submissions WHERE lower(wallet_address) = $1"
        ))
        .bind(wallet.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert_kyc(&self, submission: &KycSubmission) -> StoreResult<KycSubmission> {
        let row = sqlx::query_as::<_, KycSubmission>(&format!(
            "INSERT INTO kyc_submissions ({KYC_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT ((lower(wallet_address))) DO UPDATE SET
                wallet_address = EXCLUDED.wallet_address,
                status = EXCLUDED.status,
                country_code = EXCLUDED.country_code,
                full_name = EXCLUDED.full_name,
                provider_reference = EXCLUDED.provider_reference,
                submitted_at = EXCLUDED.submitted_at,
                reviewed_at = EXCLUDED.reviewed_at,
                reviewed_by = EXCLUDED.reviewed_by,
                rejection_reason = EXCLUDED.rejection_reason
             RETURNING {KYC_COLUMNS}"
        ))
        .bind(submission.wallet_address.as_str())
        .bind(submission.status.as_str())
        .bind(&submission.country_code)
        .bind(&submission.full_name)
        .bind(&submission.provider_reference)
        .bind(submission.submitted_at)
        .bind(submission.reviewed_at)
        .bind(submission.reviewed_by.as_ref().map(WalletAddress::as_str))
        .bind(&submission.rejection_reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn review_kyc(
        &self,
        wallet: &WalletAddress,
        review: &KycReview,
        audit: &AuditEntry,
    ) -> StoreResult<Option<KycSubmission>> {
        let rejection_reason = if review.status == KycStatus::Rejected {
            review.reason.clone()
        } else {
            None
        };

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query_as::<_, KycSubmission>(&format!(
            "UPDATE kyc_submissions
             SET status = $2, reviewed_at = $3, reviewed_by = $4, rejection_reason = $5
             WHERE lower(wallet_address) = $1
             RETURNING {KYC_COLUMNS}"
        ))
        .bind(wallet.as_str())
        .bind(review.status.as_str())
        .bind(review.reviewed_at)
        .bind(review.reviewed_by.as_ref().map(WalletAddress::as_str))
        .bind(rejection_reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn evaluate_eligibility(
        &self,
        wallet: &WalletAddress,
        ip_address: Option<&str>,
        policy: &GeoPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<EligibilityCheck> {
        let mut tx = self.pool.begin().await?;

        let kyc = sqlx::query_as::<_, KycSubmission>(&format!(
            "SELECT {KYC_COLUMNS} FROM kyc_submissions
             WHERE lower(wallet_address) = $1 AND status = 'approved'
             ORDER BY reviewed_at DESC NULLS LAST
             LIMIT 1
             FOR SHARE"
        ))
        .bind(wallet.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let check = policy.evaluate(wallet, kyc.as_ref(), ip_address, now);

        sqlx::query(
            "INSERT INTO eligibility_checks (
                wallet_address, kyc_approved, geo_blocked, sanctions_check,
                country_code, ip_address, last_checked_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (wallet_address) DO UPDATE SET
                kyc_approved = EXCLUDED.kyc_approved,
                geo_blocked = EXCLUDED.geo_blocked,
                sanctions_check = EXCLUDED.sanctions_check,
                country_code = EXCLUDED.country_code,
                ip_address = EXCLUDED.ip_address,
                last_checked_at = EXCLUDED.last_checked_at",
        )
        .bind(check.wallet_address.as_str())
        .bind(check.kyc_approved)
        .bind(check.geo_blocked)
        .bind(check.sanctions_check)
        .bind(&check.country_code)
        .bind(&check.ip_address)
        .bind(check.last_checked_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(check)
    }

    async fn get_eligibility(
        &self,
        wallet: &WalletAddress,
    ) -> StoreResult<Option<EligibilityCheck>> {
        let row = sqlx::query_as::<_, EligibilityCheck>(
            "SELECT wallet_address, kyc_approved, geo_blocked, sanctions_check,
                    country_code, ip_address, last_checked_at
             FROM eligibility_checks WHERE wallet_address = $1",
        )
        .bind(wallet.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_waiting_ticket(
        &self,
        wallet: &WalletAddress,
        project_id: Uuid,
    ) -> StoreResult<Option<QueueTicket>> {
        let row = sqlx::query_as::<_, QueueTicket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM queue_tickets
             WHERE wallet_address = $1 AND project_id = $2 AND status = 'waiting'"
        ))
        .bind(wallet.as_str())
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn is_priority_whitelisted(
        &self,
        wallet: &WalletAddress,
        project_id: Uuid,
    ) -> StoreResult<bool> {
        let listed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM priority_whitelist
                WHERE lower(wallet_address) = $1 AND project_id = $2
             )",
        )
        .bind(wallet.as_str())
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(listed)
    }

    async fn insert_ticket(&self, ticket: &NewTicket) -> StoreResult<QueueTicket> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the counter serialises joins for the same project.
        let position = sqlx::query_scalar::<_, i64>(
            "INSERT INTO queue_counters (project_id, last_position) VALUES ($1, 1)
             ON CONFLICT (project_id)
             DO UPDATE SET last_position = queue_counters.last_position + 1
             RETURNING last_position",
        )
        .bind(ticket.project_id)
        .fetch_one(&mut *tx)
        .await?;

        let inserted = sqlx::query_as::<_, QueueTicket>(&format!(
            "INSERT INTO queue_tickets ({TICKET_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, 'waiting', $6, $7)
             ON CONFLICT (wallet_address, project_id) WHERE status = 'waiting' DO NOTHING
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(ticket.id)
        .bind(ticket.wallet_address.as_str())
        .bind(ticket.project_id)
        .bind(ticket.priority)
        .bind(position)
        .bind(ticket.created_at)
        .bind(ticket.expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(inserted) = inserted {
            tx.commit().await?;
            return Ok(inserted);
        }

        // Lost a race with a concurrent join for the same wallet.
        tx.rollback().await?;
        warn!(
            "Concurrent join for {} on project {}, returning existing ticket",
            ticket.wallet_address, ticket.project_id
        );
        self.find_waiting_ticket(&ticket.wallet_address, ticket.project_id)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "waiting ticket for {} on project {} disappeared",
                    ticket.wallet_address, ticket.project_id
                ))
            })
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<QueueTicket>> {
        let row = sqlx::query_as::<_, QueueTicket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM queue_tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn count_waiting_ahead(&self, project_id: Uuid, position: i64) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_tickets
             WHERE project_id = $1 AND status = 'waiting' AND position < $2",
        )
        .bind(project_id)
        .bind(position)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn expire_ticket(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE queue_tickets SET status = 'expired' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expire_stale_tickets(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE queue_tickets SET status = 'expired'
             WHERE status = 'waiting' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn project_exists(&self, project_id: Uuid) -> StoreResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1)")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn active_investments(&self, project_id: Uuid) -> StoreResult<Vec<UserInvestment>> {
        let rows = sqlx::query_as::<_, UserInvestment>(
            "SELECT id, lower(wallet_address) AS wallet_address, project_id,
                    tokens_received, status, created_at
             FROM user_investments
             WHERE project_id = $1 AND status = 'active'
             ORDER BY created_at, id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_distribution_job(
        &self,
        job: &DistributionJob,
        audit: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO distribution_jobs (
                id, project_id, total_batches, total_recipients,
                total_tokens, status, batches, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(job.id)
        .bind(job.project_id)
        .bind(job.total_batches)
        .bind(job.total_recipients)
        .bind(job.total_tokens)
        .bind(&job.status)
        .bind(Json(&job.batches))
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }
}

// These run against a scratch database created by `sqlx::test` from DATABASE_URL:
// `cargo test -- --ignored`
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use sqlx::PgPool;

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn new_ticket(wallet: WalletAddress, project_id: Uuid) -> NewTicket {
        let now = Utc::now();
        NewTicket {
            id: Uuid::new_v4(),
            wallet_address: wallet,
            project_id,
            priority: false,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        }
    }

    async fn seed_approved_kyc(pool: &PgPool, raw_wallet: &str, country: &str) {
        sqlx::query(
            "INSERT INTO kyc_submissions (wallet_address, status, country_code, reviewed_at)
             VALUES ($1, 'approved', $2, NOW())",
        )
        .bind(raw_wallet)
        .bind(country)
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_ticket_positions_are_sequential(pool: PgPool) {
        let store = PgStore::new(pool);
        let project = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mut positions = Vec::new();
        for n in 1..=3 {
            let ticket = store.insert_ticket(&new_ticket(wallet(n), project)).await.unwrap();
            positions.push(ticket.position);
        }
        assert_eq!(positions, vec![1, 2, 3]);

        let first = store.insert_ticket(&new_ticket(wallet(1), other)).await.unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(store.count_waiting_ahead(project, 3).await.unwrap(), 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_join_returns_one_ticket(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let project = Uuid::new_v4();

        let a = new_ticket(wallet(7), project);
        let b = new_ticket(wallet(7), project);
        let (first, second) = tokio::join!(store.insert_ticket(&a), store.insert_ticket(&b));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.id, second.id);

        let waiting = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_tickets WHERE project_id = $1 AND status = 'waiting'",
        )
        .bind(project)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(waiting, 1);

        // Joining again after leaving gets a fresh ticket behind the old one.
        assert!(store.expire_ticket(first.id).await.unwrap());
        let rejoined = store.insert_ticket(&new_ticket(wallet(7), project)).await.unwrap();
        assert_ne!(rejoined.id, first.id);
        assert!(rejoined.position > first.position);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_mixed_case_kyc_rows_match(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let w = wallet(0xab);
        seed_approved_kyc(&pool, &w.as_str().to_uppercase().replacen("0X", "0x", 1), "DE").await;

        let policy = GeoPolicy::new(["US"]);
        let check = store
            .evaluate_eligibility(&w, Some("10.0.0.1"), &policy, Utc::now())
            .await
            .unwrap();
        assert!(check.kyc_approved);
        assert!(!check.geo_blocked);
        assert_eq!(check.country_code.as_deref(), Some("DE"));
        let stored = store.get_eligibility(&w).await.unwrap().unwrap();
        assert!(stored.kyc_approved);
        assert_eq!(stored.ip_address.as_deref(), Some("10.0.0.1"));

        let found = store.get_kyc(&w).await.unwrap().unwrap();
        assert_eq!(found.status, KycStatus::Approved);

        let review = KycReview {
            status: KycStatus::Rejected,
            reviewed_by: None,
            reason: Some("mismatch".to_string()),
            reviewed_at: Utc::now(),
        };
        let audit = AuditEntry {
            admin_wallet: None,
            action: "review_kyc".to_string(),
            target: w.to_string(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        let reviewed = store.review_kyc(&w, &review, &audit).await.unwrap().unwrap();
        assert_eq!(reviewed.status, KycStatus::Rejected);

        // Upsert lands on the seeded row and rewrites it to the canonical address.
        let resubmitted = store
            .upsert_kyc(&KycSubmission {
                wallet_address: w.clone(),
                status: KycStatus::Pending,
                reviewed_at: None,
                rejection_reason: None,
                ..found
            })
            .await
            .unwrap();
        assert_eq!(resubmitted.wallet_address, w);
        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM kyc_submissions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_distribution_job_writes_audit(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let project = Uuid::new_v4();
        sqlx::query("INSERT INTO projects (id, name, status) VALUES ($1, 'Sale', 'completed')")
            .bind(project)
            .execute(&pool)
            .await
            .unwrap();
        assert!(store.project_exists(project).await.unwrap());

        let job = DistributionJob {
            id: Uuid::new_v4(),
            project_id: project,
            total_batches: 0,
            total_recipients: 0,
            total_tokens: Decimal::ZERO,
            status: "pending".to_string(),
            batches: Vec::new(),
            created_at: Utc::now(),
        };
        let audit = AuditEntry {
            admin_wallet: Some(wallet(1)),
            action: "create_distribution_batches".to_string(),
            target: project.to_string(),
            details: serde_json::json!({ "job_id": job.id }),
            created_at: Utc::now(),
        };
        store.create_distribution_job(&job, &audit).await.unwrap();

        let (jobs, logs) = tokio::join!(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM distribution_jobs").fetch_one(&pool),
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM admin_logs").fetch_one(&pool),
        );
        assert_eq!((jobs.unwrap(), logs.unwrap()), (1, 1));

        // Unknown project violates the foreign key; the audit row must not survive.
        let orphan = DistributionJob {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            ..job
        };
        assert!(store.create_distribution_job(&orphan, &audit).await.is_err());
        let logs = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM admin_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(logs, 1);
    }
}
