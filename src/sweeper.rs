// Background sweep that expires queue tickets past their deadline

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::StoreResult;
use crate::store::Store;

pub struct TicketSweeper {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl TicketSweeper {
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(&self) {
        info!("Starting ticket sweeper (every {:?})", self.interval);

        loop {
            if let Err(e) = self.sweep_once().await {
                error!("Error expiring queue tickets: {}", e);
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    pub async fn sweep_once(&self) -> StoreResult<u64> {
        let expired = self.store.expire_stale_tickets(Utc::now()).await?;
        if expired > 0 {
            info!("Expired {} stale queue tickets", expired);
        }
        Ok(expired)
    }
}
