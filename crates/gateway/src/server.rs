use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::State,
        middleware,
        response::{IntoResponse, Json},
        routing::get,
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    wahub_accounts::SqliteAccountStore,
    wahub_config::WahubConfig,
    wahub_whatsapp::{SessionRegistry, SidecarClientFactory},
};

use crate::{
    accounts::{AccountServiceConfig, LiveAccountService},
    auth,
    routes::account_routes,
    state::{AppState, GatewayState},
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway: state };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = account_routes().route_layer(middleware::from_fn_with_state(
        app_state.clone(),
        auth::require_token,
    ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open storage, restore sessions and serve HTTP until ctrl-c / SIGTERM.
pub async fn start_gateway(config: WahubConfig) -> anyhow::Result<()> {
    let resolved_auth = auth::resolve_auth(
        std::env::var(auth::TOKEN_ENV).ok(),
        config.server.api_token.clone(),
    );

    let data_dir = config.data_dir();
    tokio::fs::create_dir_all(&data_dir).await?;
    let store = Arc::new(SqliteAccountStore::connect(&config.database_url()).await?);

    let factory = Arc::new(SidecarClientFactory::new(
        config.whatsapp.sidecar_port,
        config.whatsapp.device_name.clone(),
    ));
    let accounts = LiveAccountService::new(
        store,
        Arc::new(SessionRegistry::new()),
        factory,
        AccountServiceConfig::from_config(&config),
    );
    let restored = accounts.restore_sessions().await?;

    let state = GatewayState::new(resolved_auth, Arc::clone(&accounts));
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("wahub gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("data dir: {}", data_dir.display()),
        format!("sessions restored: {restored}"),
        format!(
            "auth: {}",
            if state.auth.token.is_some() {
                "bearer token"
            } else {
                "open"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));
    if state.auth.token.is_none() {
        warn!("no API token configured, the account API is unauthenticated");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    accounts.shutdown().await;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "accounts": state.gateway.accounts.registry().len().await,
        "uptime_secs": state.gateway.uptime_secs(),
    }))
}
