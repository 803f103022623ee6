// Service configuration loaded from the environment

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use crate::models::WalletAddress;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_GEO_BLOCKED: &str = "US,CN,IR,KP,SY";
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL; `None` runs against the in-memory store
    pub database_url: Option<String>,
    pub port: u16,
    pub max_connections: u32,
    pub geo_blocked_countries: Vec<String>,
    pub admin_wallets: Vec<WalletAddress>,
    pub kyc_webhook_secret: Option<String>,
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            geo_blocked_countries: parse_country_list(DEFAULT_GEO_BLOCKED),
            admin_wallets: Vec::new(),
            kyc_webhook_secret: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("PORT") {
            Some(p) => p.parse::<u16>().with_context(|| format!("invalid PORT: {}", p))?,
            None => DEFAULT_PORT,
        };
        let max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(n) => n
                .parse::<u32>()
                .with_context(|| format!("invalid DATABASE_MAX_CONNECTIONS: {}", n))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        let sweep_interval = match var("QUEUE_SWEEP_INTERVAL_SECS") {
            Some(s) => {
                let secs = s
                    .parse::<u64>()
                    .with_context(|| format!("invalid QUEUE_SWEEP_INTERVAL_SECS: {}", s))?;
                if secs == 0 {
                    return Err(anyhow!("QUEUE_SWEEP_INTERVAL_SECS must be positive"));
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_SWEEP_INTERVAL,
        };

        let admin_wallets = var("ADMIN_WALLETS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| WalletAddress::parse(s).map_err(|e| anyhow!("ADMIN_WALLETS: {}", e)))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            database_url: var("DATABASE_URL"),
            port,
            max_connections,
            geo_blocked_countries: parse_country_list(
                &var("GEO_BLOCKED_COUNTRIES").unwrap_or_else(|| DEFAULT_GEO_BLOCKED.to_string()),
            ),
            admin_wallets,
            kyc_webhook_secret: var("KYC_WEBHOOK_SECRET"),
            sweep_interval,
        })
    }

    pub fn is_admin(&self, wallet: &WalletAddress) -> bool {
        self.admin_wallets.contains(wallet)
    }
}

fn parse_country_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}
