mod repl;

use std::sync::Arc;
use std::time::Duration;

use cogito_core::config::CogitoCfg;
use cogito_core::persistence::{FileSnapshotStore, PgSnapshotStore, SnapshotStore};
use cogito_core::runtime::Runtime;
use cogito_core::workers::WorkerRegistry;
use cogito_llm::provider::LlmProvider;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;
const DEFAULT_LOG_PATH: &str = "/tmp/cogito.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to a file when RUST_LOG is set; stdout belongs to the REPL.
    if std::env::var("RUST_LOG").is_ok() {
        let path = std::env::var("COGITO_LOG").unwrap_or_else(|_| DEFAULT_LOG_PATH.to_owned());
        let file = std::fs::File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    // DATABASE_URL is optional; without it config is default and state is ephemeral.
    let mut notices = Vec::new();
    let pool = match std::env::var("DATABASE_URL") {
        Ok(url) => match connect(&url).await {
            Ok(pool) => Some(pool),
            Err(reason) => {
                tracing::warn!(%reason, "falling back to ephemeral mode");
                notices.push(format!("note: {reason}; running without a database."));
                None
            }
        },
        Err(_) => None,
    };

    let cfg = match &pool {
        Some(pool) => CogitoCfg::load(pool).await?,
        None => CogitoCfg::default(),
    };
    let cfg = Arc::new(cfg);

    let registry = match cogito_llm::http::from_env() {
        Some(provider) => {
            notices.push(format!("reasoning backend: {}", provider.name()));
            WorkerRegistry::llm(Arc::new(provider))
        }
        None => WorkerRegistry::heuristic(),
    };

    let store: Option<Arc<dyn SnapshotStore>> = match (&pool, std::env::var("COGITO_SNAPSHOT")) {
        (Some(pool), _) => Some(Arc::new(PgSnapshotStore::new(pool.clone()))),
        (None, Ok(path)) => Some(Arc::new(FileSnapshotStore::new(path))),
        (None, Err(_)) => None,
    };

    let (runtime, event_tx, decision_rx, status_rx) = Runtime::new(Arc::clone(&cfg), registry);
    let mut runtime = match store {
        Some(store) => runtime.with_store(store),
        None => runtime,
    };
    let token = runtime.token();
    repl::spawn_sigint_canceler(token.clone());

    // This binary is the periodic tick source for affect decay.
    let ticker = cogito_core::affect::ticker::spawn(runtime.affect(), cfg.tick_interval(), token.clone());

    let session = repl::Session {
        event_tx,
        decision_rx,
        status_rx,
        affect: runtime.affect(),
        dispatcher: runtime.dispatcher(),
        token: token.clone(),
        notices,
    };

    let runtime_fut = runtime.run();
    let repl_fut = repl::run(session);
    tokio::pin!(runtime_fut);
    tokio::pin!(repl_fut);

    let result = tokio::select! {
        _ = &mut runtime_fut => {
            token.cancel();
            (&mut repl_fut).await
        }
        result = &mut repl_fut => {
            token.cancel();
            (&mut runtime_fut).await;
            result
        }
    };
    let _ = ticker.await;
    result
}

/// Connect with a timeout and apply migrations.
async fn connect(url: &str) -> Result<sqlx::PgPool, String> {
    let pool = tokio::time::timeout(
        Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
        sqlx::postgres::PgPoolOptions::new().max_connections(4).connect(url),
    )
    .await
    .map_err(|_| format!("database connect timed out ({DB_CONNECT_TIMEOUT_SECS}s)"))?
    .map_err(|e| format!("cannot connect to DATABASE_URL: {e}"))?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| format!("database migration failed: {e}"))?;
    tracing::info!("database connected and migrations applied");
    Ok(pool)
}
