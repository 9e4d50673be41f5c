use anyhow::Context;
use payhub::api::{self, AppState};
use payhub::audit::AuditChain;
use payhub::config::AppConfig;
use payhub::discovery::StaticDirectory;
use payhub::invoker::{BackoffPolicy, HttpTransport, ResilientInvoker};
use payhub::model::Merchant;
use payhub::orchestrator::Orchestrator;
use payhub::providers::{self, ConnectorClient};
use payhub::reconcile::{HttpLedgerClient, Reconciler};
use payhub::store::{MemoryStore, MerchantStore, PostgresStore, TransactionStore};
use payhub::workers::{ExpiryWorker, ReconcileWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().context("loading configuration")?;
    init_tracing(&config);

    let (tx_store, merchant_store) = build_stores(&config).await?;

    let audit = Arc::new(AuditChain::new());
    let directory = Arc::new(StaticDirectory::from_env().context("loading discovery entries")?);
    let transport = Arc::new(HttpTransport::new().context("building http transport")?);
    let invoker = Arc::new(ResilientInvoker::new(
        directory,
        transport,
        audit.clone(),
        BackoffPolicy {
            max_attempts: config.invoker.max_attempts,
            base_delay: config.backoff_base_delay(),
            multiplier: config.invoker.multiplier,
        },
        config.call_timeout(),
    ));

    let connector = ConnectorClient::new(invoker);
    let registry = Arc::new(providers::standard_registry(
        connector,
        &config.reconcile.crypto_asset,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        tx_store.clone(),
        merchant_store,
        registry,
        audit.clone(),
        &config.checkout_url_template,
        &config.finalize_url(),
    ));

    let ledger = Arc::new(
        HttpLedgerClient::new(&config.reconcile.ledger_base_url, config.call_timeout())
            .context("building ledger client")?,
    );
    let reconciler = Arc::new(Reconciler::new(
        tx_store.clone(),
        ledger,
        audit.clone(),
        config.reconcile.tolerance_units,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_worker = ReconcileWorker::new(
        tx_store.clone(),
        reconciler,
        Duration::from_secs(config.reconcile.poll_interval_secs),
    );
    let expiry_worker = ExpiryWorker::new(
        tx_store,
        audit,
        Duration::from_secs(config.expiry.max_age_secs),
        Duration::from_secs(config.expiry.sweep_interval_secs),
    );
    let reconcile_handle = tokio::spawn(reconcile_worker.run(shutdown_rx.clone()));
    let expiry_handle = tokio::spawn(expiry_worker.run(shutdown_rx));

    let app = api::router(AppState { orchestrator });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving")?;

    let _ = shutdown_tx.send(true);
    let _ = reconcile_handle.await;
    let _ = expiry_handle.await;
    info!("stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_stores(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn TransactionStore>, Arc<dyn MerchantStore>)> {
    match &config.store.database_url {
        Some(url) => {
            let store = Arc::new(
                PostgresStore::connect(url)
                    .await
                    .context("connecting to postgres")?,
            );
            Ok((store.clone(), store))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            let store = Arc::new(MemoryStore::new());
            seed_demo_merchant(&store);
            Ok((store.clone(), store))
        }
    }
}

/// Standalone runs have no merchant table; seed one from the environment so
/// the engine is usable out of the box.
fn seed_demo_merchant(store: &MemoryStore) {
    let (Ok(merchant_id), Ok(secret)) =
        (std::env::var("MERCHANT_ID"), std::env::var("MERCHANT_SECRET"))
    else {
        return;
    };
    store.add_merchant(Merchant::with_secret(&merchant_id, &secret));
    let methods = std::env::var("MERCHANT_METHODS").unwrap_or_else(|_| "CARD".to_string());
    for method in methods.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        store.subscribe(&merchant_id, &method.to_uppercase(), "");
    }
    info!(%merchant_id, "seeded demo merchant");
}
