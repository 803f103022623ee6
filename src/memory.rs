// In-memory store, used when no DATABASE_URL is configured

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::eligibility::GeoPolicy;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AuditEntry, DistributionJob, EligibilityCheck, KycReview, KycStatus, KycSubmission, NewTicket,
    Project, QueueTicket, TicketStatus, UserInvestment, WalletAddress,
};
use crate::store::Store;

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    kyc: HashMap<WalletAddress, KycSubmission>,
    eligibility: HashMap<WalletAddress, EligibilityCheck>,
    whitelist: HashSet<(WalletAddress, Uuid)>,
    counters: HashMap<Uuid, i64>,
    tickets: Vec<QueueTicket>,
    investments: Vec<UserInvestment>,
    jobs: Vec<DistributionJob>,
    audit: Vec<AuditEntry>,
}

/// Every operation runs under a single lock, so multi-row writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Corrupt("memory store lock poisoned".to_string()))
    }

    pub fn add_project(&self, project: Project) -> StoreResult<()> {
        self.lock()?.projects.insert(project.id, project);
        Ok(())
    }

    pub fn add_to_whitelist(&self, wallet: WalletAddress, project_id: Uuid) -> StoreResult<()> {
        self.lock()?.whitelist.insert((wallet, project_id));
        Ok(())
    }

    pub fn add_investment(&self, investment: UserInvestment) -> StoreResult<()> {
        self.lock()?.investments.push(investment);
        Ok(())
    }

    pub fn distribution_jobs(&self) -> StoreResult<Vec<DistributionJob>> {
        Ok(self.lock()?.jobs.clone())
    }

    pub fn audit_log(&self) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.lock()?.audit.clone())
    }

    pub fn tickets(&self, project_id: Uuid) -> StoreResult<Vec<QueueTicket>> {
        Ok(self
            .lock()?
            .tickets
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }
}

fn waiting_for<'a>(
    tables: &'a Tables,
    wallet: &WalletAddress,
    project_id: Uuid,
) -> Option<&'a QueueTicket> {
    tables.tickets.iter().find(|t| {
        &t.wallet_address == wallet
            && t.project_id == project_id
            && t.status == TicketStatus::Waiting
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn get_kyc(&self, wallet: &WalletAddress) -> StoreResult<Option<KycSubmission>> {
        Ok(self.lock()?.kyc.get(wallet).cloned())
    }

    async fn upsert_kyc(&self, submission: &KycSubmission) -> StoreResult<KycSubmission> {
        self.lock()?
            .kyc
            .insert(submission.wallet_address.clone(), submission.clone());
        Ok(submission.clone())
    }

    async fn review_kyc(
        &self,
        wallet: &WalletAddress,
        review: &KycReview,
        audit: &AuditEntry,
    ) -> StoreResult<Option<KycSubmission>> {
        let mut tables = self.lock()?;
        let Some(record) = tables.kyc.get_mut(wallet) else {
            return Ok(None);
        };

        record.status = review.status;
        record.reviewed_at = Some(review.reviewed_at);
        record.reviewed_by = review.reviewed_by.clone();
        record.rejection_reason = if review.status == KycStatus::Rejected {
            review.reason.clone()
        } else {
            None
        };
        let updated = record.clone();

        tables.audit.push(audit.clone());
        Ok(Some(updated))
    }

    async fn evaluate_eligibility(
        &self,
        wallet: &WalletAddress,
        ip_address: Option<&str>,
        policy: &GeoPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<EligibilityCheck> {
        let mut tables = self.lock()?;
        let approved = tables
            .kyc
            .get(wallet)
            .filter(|k| k.status == KycStatus::Approved);
        let check = policy.evaluate(wallet, approved, ip_address, now);
        tables.eligibility.insert(wallet.clone(), check.clone());
        Ok(check)
    }

    async fn get_eligibility(
        &self,
        wallet: &WalletAddress,
    ) -> StoreResult<Option<EligibilityCheck>> {
        Ok(self.lock()?.eligibility.get(wallet).cloned())
    }

    async fn find_waiting_ticket(
        &self,
        wallet: &WalletAddress,
        project_id: Uuid,
    ) -> StoreResult<Option<QueueTicket>> {
        let tables = self.lock()?;
        Ok(waiting_for(&tables, wallet, project_id).cloned())
    }

    async fn is_priority_whitelisted(
        &self,
        wallet: &WalletAddress,
        project_id: Uuid,
    ) -> StoreResult<bool> {
        Ok(self
            .lock()?
            .whitelist
            .contains(&(wallet.clone(), project_id)))
    }

    async fn insert_ticket(&self, ticket: &NewTicket) -> StoreResult<QueueTicket> {
        let mut tables = self.lock()?;
        if let Some(existing) = waiting_for(&tables, &ticket.wallet_address, ticket.project_id) {
            return Ok(existing.clone());
        }

        let counter = tables.counters.entry(ticket.project_id).or_insert(0);
        *counter += 1;
        let inserted = QueueTicket {
            id: ticket.id,
            wallet_address: ticket.wallet_address.clone(),
            project_id: ticket.project_id,
            priority: ticket.priority,
            position: *counter,
            status: TicketStatus::Waiting,
            created_at: ticket.created_at,
            expires_at: ticket.expires_at,
        };
        tables.tickets.push(inserted.clone());
        Ok(inserted)
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<QueueTicket>> {
        Ok(self.lock()?.tickets.iter().find(|t| t.id == id).cloned())
    }

    async fn count_waiting_ahead(&self, project_id: Uuid, position: i64) -> StoreResult<i64> {
        let count = self
            .lock()?
            .tickets
            .iter()
            .filter(|t| {
                t.project_id == project_id
                    && t.status == TicketStatus::Waiting
                    && t.position < position
            })
            .count();
        Ok(count as i64)
    }

    async fn expire_ticket(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.tickets.iter_mut().find(|t| t.id == id) {
            Some(ticket) => {
                ticket.status = TicketStatus::Expired;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_stale_tickets(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let mut expired = 0;
        for ticket in tables
            .tickets
            .iter_mut()
            .filter(|t| t.status == TicketStatus::Waiting && t.expires_at <= now)
        {
            ticket.status = TicketStatus::Expired;
            expired += 1;
        }
        Ok(expired)
    }

    async fn project_exists(&self, project_id: Uuid) -> StoreResult<bool> {
        Ok(self.lock()?.projects.contains_key(&project_id))
    }

    async fn active_investments(&self, project_id: Uuid) -> StoreResult<Vec<UserInvestment>> {
        let mut rows: Vec<UserInvestment> = self
            .lock()?
            .investments
            .iter()
            .filter(|i| i.project_id == project_id && i.status == "active")
            .cloned()
            .collect();
        rows.sort_by_key(|i| (i.created_at, i.id));
        Ok(rows)
    }

    async fn create_distribution_job(
        &self,
        job: &DistributionJob,
        audit: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables.jobs.push(job.clone());
        tables.audit.push(audit.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn new_ticket(wallet: WalletAddress, project_id: Uuid, now: DateTime<Utc>) -> NewTicket {
        NewTicket {
            id: Uuid::new_v4(),
            wallet_address: wallet,
            project_id,
            priority: false,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn test_positions_are_unique_per_project() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let other = Uuid::new_v4();
        let now = Utc::now();

        let a = store.insert_ticket(&new_ticket(wallet(1), project, now)).await.unwrap();
        let b = store.insert_ticket(&new_ticket(wallet(2), project, now)).await.unwrap();
        let c = store.insert_ticket(&new_ticket(wallet(1), other, now)).await.unwrap();
        assert_eq!((a.position, b.position, c.position), (1, 2, 1));

        store.expire_ticket(a.id).await.unwrap();
        let d = store.insert_ticket(&new_ticket(wallet(3), project, now)).await.unwrap();
        assert_eq!(d.position, 3);
        assert_eq!(store.count_waiting_ahead(project, d.position).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_returns_existing_waiting_ticket() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let now = Utc::now();

        let first = store.insert_ticket(&new_ticket(wallet(1), project, now)).await.unwrap();
        let second = store.insert_ticket(&new_ticket(wallet(1), project, now)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.tickets(project).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expire_stale_tickets() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let now = Utc::now();

        let old = store
            .insert_ticket(&new_ticket(wallet(1), project, now - Duration::minutes(20)))
            .await
            .unwrap();
        let fresh = store.insert_ticket(&new_ticket(wallet(2), project, now)).await.unwrap();

        assert_eq!(store.expire_stale_tickets(now).await.unwrap(), 1);
        assert_eq!(
            store.get_ticket(old.id).await.unwrap().unwrap().status,
            TicketStatus::Expired
        );
        assert_eq!(
            store.get_ticket(fresh.id).await.unwrap().unwrap().status,
            TicketStatus::Waiting
        );
        assert_eq!(store.expire_stale_tickets(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_review_missing_submission() {
        let store = MemoryStore::new();
        let review = KycReview {
            status: KycStatus::Approved,
            reviewed_by: None,
            reason: None,
            reviewed_at: Utc::now(),
        };
        let audit = AuditEntry {
            admin_wallet: None,
            action: "review_kyc".to_string(),
            target: wallet(1).to_string(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        assert!(store.review_kyc(&wallet(1), &review, &audit).await.unwrap().is_none());
        assert!(store.audit_log().unwrap().is_empty());
    }
}
