use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_backup_server::db::{create_pool, run_migrations, MemoryStore, PgStore};
use fleet_backup_server::gp51::SyncService;
use fleet_backup_server::security::run_self_test;
use fleet_backup_server::{routes, AppState, Config};

const MAX_DB_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_backup_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fleet Backup Server...");

    // Load configuration
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        "Environment: {}, Server: {}",
        config.environment,
        config.server_address()
    );

    let self_test = run_self_test();
    if !self_test.passed {
        anyhow::bail!("Credential hash self-test failed: {:?}", self_test.failures);
    }

    let state = match config.database_url.as_deref() {
        Some(url) => {
            let pool = create_pool(url, MAX_DB_CONNECTIONS).await?;
            run_migrations(&pool).await?;
            AppState::new(Arc::new(PgStore::new(pool)), config.clone())?
        }
        None => {
            if config.is_production() {
                anyhow::bail!("DATABASE_URL must be set in production");
            }
            tracing::warn!("DATABASE_URL not set, using in-memory store; data is lost on exit");
            let tables: Vec<&str> = config
                .backup_core_tables
                .iter()
                .chain(&config.backup_system_tables)
                .map(String::as_str)
                .collect();
            let store = MemoryStore::with_tables(&tables).await;
            AppState::new(Arc::new(store), config.clone())?
        }
    };

    if config.sync_interval_secs > 0 {
        spawn_sync_loop(state.sync.clone(), Duration::from_secs(config.sync_interval_secs));
    }

    // Configure CORS
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run a full vendor sync every `period`; a held lock just waits for the next tick
fn spawn_sync_loop(sync: SyncService, period: Duration) {
    tracing::info!("Periodic vendor sync every {:?}", period);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = sync.perform_full_sync().await;
            if let Some(key) = &report.skipped_by {
                tracing::debug!("Scheduled sync skipped, {} is held", key);
            } else if report.success {
                tracing::info!(
                    "Scheduled sync finished: {} devices, {} positions",
                    report.devices_fetched,
                    report.positions_fetched
                );
            } else {
                tracing::warn!(
                    "Scheduled sync failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    });
}
