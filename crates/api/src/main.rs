//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, Gateways};
use gateways::{FalQueueClient, LogNotifier, PhonePeGateway, PublicUrlResolver, TwilioSms};
use metrics_exporter_prometheus::PrometheusHandle;
use services::TrackerConfig;
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true),
            )
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Real provider clients where credentials are configured, fakes elsewhere.
fn build_gateways(config: &Config) -> Gateways {
    let mut gateways = Gateways::in_memory();
    gateways.notifier = Arc::new(LogNotifier);

    match &config.phonepe {
        Some(phonepe) => gateways.payments = Arc::new(PhonePeGateway::new(phonepe.clone())),
        None => tracing::warn!("PhonePe credentials missing, using in-memory payment gateway"),
    }
    match &config.fal {
        Some(fal) => gateways.try_on = Arc::new(FalQueueClient::new(fal.clone())),
        None => tracing::warn!("FAL_KEY missing, using in-memory try-on generator"),
    }
    match &config.twilio {
        Some(twilio) => gateways.sms = Arc::new(TwilioSms::new(twilio.clone())),
        None => tracing::warn!("Twilio credentials missing, using in-memory SMS sender"),
    }
    gateways
}

async fn serve<S: Store + 'static>(
    store: Arc<S>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) {
    let state = Arc::new(AppState::new(
        store,
        build_gateways(config),
        PublicUrlResolver::new(config.public_base_url.clone()),
        TrackerConfig::default(),
    ));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration (.env first, then the process environment)
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // 2. Initialize tracing
    init_tracing(&config);

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick the store and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(Arc::new(store), &config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            serve(Arc::new(InMemoryStore::new()), &config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
