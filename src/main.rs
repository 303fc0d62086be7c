use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use greenspace_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Storage
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Event channel and its consumer
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Payment provider
    if cfg.payment_gateway_url.is_none() {
        warn!("Payment gateway not configured; checkout intents will be rejected");
    }
    let provider: Arc<dyn api::services::PaymentProvider> =
        Arc::new(api::services::HttpPaymentProvider::from_config(&cfg));

    // Service layer shared by the HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        Arc::new(event_sender.clone()),
        provider,
        cfg.default_currency.clone(),
        cfg.intent_expiry_secs,
    );

    // Background sweeper for stale checkout intents
    let sweep_checkout = services.checkout.clone();
    let sweep_interval = Duration::from_secs(cfg.intent_sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_checkout.expire_stale().await {
                error!("Intent sweep failed: {}", e);
            }
        }
    });

    // Shared state handed to every handler
    let app_state = api::AppState {
        db: db_arc.clone(),
        config: cfg.clone(),
        event_sender,
        services,
    };

    // CORS comes from config in deployment; only development falls back
    // to permissive
    let origins = parse_cors_origins(cfg.cors_allowed_origins.as_deref());
    let cors_layer = match origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None if cfg.is_development() => {
            info!("Using permissive CORS (development environment)");
            CorsLayer::permissive()
        }
        None => {
            error!("Missing CORS configuration; set APP__CORS_ALLOWED_ORIGINS");
            return Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS".into());
        }
    };

    let app = Router::<api::AppState>::new()
        .route("/", get(|| async { "greenspace-api up" }))
        .nest("/api/v1", api::api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors_layer)
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Splits a comma-separated origin list into header values, ignoring
/// blanks and entries that are not valid header values. Returns None
/// when nothing usable remains.
fn parse_cors_origins(raw: Option<&str>) -> Option<Vec<HeaderValue>> {
    let origins: Vec<HeaderValue> = raw?
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if origins.is_empty() {
        None
    } else {
        Some(origins)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
