use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{
            ConnectInfo, Path, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection,
        },
        http::{HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    axum_extra::extract::cookie::CookieJar,
    serde::Serialize,
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{AllowOrigin, Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    bidfeed_config::BidfeedConfig,
    bidfeed_ingress::{EventSink, spawn_ingress},
    bidfeed_protocol::{AuctionId, Topic},
};

use crate::{
    auth::{MemorySessionStore, SessionAuthorizer, UpgradeGate},
    hub::{Hub, HubHandle, HubStats},
    ws::handle_connection,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub gate: UpgradeGate,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_all_handler))
        .route("/auction/{id}", get(ws_auction_handler))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// Serve `state` on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cors_origins: &[String],
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_gateway_app(state, cors_origins);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    Ok(())
}

/// Start the hub, the configured ingress source and the HTTP + WebSocket
/// server with sessions from config, and run until `shutdown` fires.
pub async fn start_gateway(config: BidfeedConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let sessions = Arc::new(MemorySessionStore::from_config(&config.auth));
    run_gateway(config, sessions, shutdown).await
}

/// Like [`start_gateway`], with sessions resolved by `authorizer`.
pub async fn run_gateway(
    config: BidfeedConfig,
    authorizer: Arc<dyn SessionAuthorizer>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    config.validate()?;

    let (hub, hub_task) = Hub::spawn(&config.hub, shutdown.clone());
    let sink: Arc<dyn EventSink> = Arc::new(hub.clone());
    let ingress_task = match spawn_ingress(&config.ingress, sink, shutdown.clone()) {
        Ok(task) => task,
        Err(e) => {
            shutdown.cancel();
            let _ = hub_task.await;
            return Err(e).context("ingress failed to start");
        },
    };

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.bind, config.server.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let lines = [
        format!("bidfeed gateway v{}", env!("CARGO_PKG_VERSION")),
        format!("listening on {addr}"),
        format!("ingress: {}", config.ingress.source),
        format!(
            "auth: {} (cookie '{}')",
            if config.auth.required { "required" } else { "optional" },
            config.auth.cookie_name
        ),
        format!("shutdown policy: {:?}", config.hub.shutdown_policy),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let state = AppState {
        hub,
        gate: UpgradeGate::new(&config.auth, authorizer),
    };
    let served = serve(listener, state, &config.server.cors_origins, shutdown.clone()).await;

    // The server also stops on error; make sure the background tasks follow.
    shutdown.cancel();
    match ingress_task.await {
        Ok(stats) => info!(
            forwarded = stats.forwarded,
            dropped = stats.dropped,
            errors = stats.errors,
            "ingress stopped"
        ),
        Err(e) => warn!(error = %e, "ingress task failed"),
    }
    match hub_task.await {
        Ok(stats) => info!(
            events = stats.events,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "hub stopped"
        ),
        Err(e) => warn!(error = %e, "hub task failed"),
    }
    served
}

// ── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    stats: HubStats,
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            stats,
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn ws_all_handler(
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, ws, &jar, remote, Topic::All).await
}

async fn ws_auction_handler(
    Path(id): Path<i64>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(state, ws, &jar, remote, Topic::Auction(AuctionId(id))).await
}

/// Authorize first; nothing is allocated for a rejected request or a failed
/// handshake.
async fn upgrade(
    state: AppState,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    jar: &CookieJar,
    remote: SocketAddr,
    topic: Topic,
) -> Response {
    let auth = state.gate.check(jar).await;
    if !auth.ok {
        warn!(
            remote = %remote,
            topic = %topic,
            reason = auth.reason.unwrap_or("unauthorized"),
            "rejected viewer"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(remote = %remote, error = %rejection, "websocket handshake rejected");
            return rejection.into_response();
        },
    };

    // The id and phase tracker only exist once the socket is live.
    let hub = state.hub;
    ws.on_failed_upgrade(move |e| {
        warn!(remote = %remote, topic = %topic, error = %e, "websocket upgrade failed");
    })
    .on_upgrade(move |socket| handle_connection(socket, hub, topic, auth.user_id, remote))
}
