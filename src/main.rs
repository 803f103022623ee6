// Launchpad Backend Server
// Eligibility gate, sale queue ticketing, distribution planner and KYC workflow

use anyhow::Result;
use launchpad_backend::config::Config;
use launchpad_backend::database::{Database, PgStore};
use launchpad_backend::memory::MemoryStore;
use launchpad_backend::store::Store;
use launchpad_backend::sweeper::TicketSweeper;
use launchpad_backend::{router, AppState};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("launchpad_backend=info".parse()?)
                .add_directive("tower_http=info".parse()?)
                .add_directive("sqlx=warn".parse()?),
        )
        .init();

    info!("Starting Launchpad Backend Server");

    // Load configuration
    let config = Config::from_env()?;

    info!("Configuration:");
    info!(
        "  Database: {}",
        if config.database_url.is_some() { "postgres" } else { "in-memory" }
    );
    info!("  Server Port: {}", config.port);
    info!("  Geo-blocked: {}", config.geo_blocked_countries.join(","));
    info!("  Admin wallets: {}", config.admin_wallets.len());
    info!(
        "  KYC webhook: {}",
        if config.kyc_webhook_secret.is_some() { "(configured)" } else { "(disabled)" }
    );

    // Initialize store
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = Database::init(url, config.max_connections).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    // Start ticket expiry sweep in background
    let sweeper = TicketSweeper::new(store.clone(), config.sweep_interval);
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let port = config.port;
    let state = Arc::new(AppState::new(store, config));
    let app = router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Launchpad Backend listening on {}", listener.local_addr()?);
    info!("Endpoints:");
    info!("  POST /api/eligibility          - Eligibility verdict for a wallet");
    info!("  POST /api/queue?action=...     - Join, inspect or leave a sale queue");
    info!("  POST /api/distribution/plan    - Plan token distribution batches");
    info!("  POST /api/kyc/submit|review|webhook, GET /api/kyc/:wallet");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
