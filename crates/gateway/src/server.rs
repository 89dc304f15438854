use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    parley_app::App,
    parley_common::{Activity, Error},
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

pub const ROUTES_MATCHED_HEADER: HeaderName = HeaderName::from_static("x-parley-routes-matched");
pub const STREAM_ID_HEADER: HeaderName = HeaderName::from_static("x-parley-stream-id");

// ── Shared state ─────────────────────────────────────────────────────────────

/// What every request handler needs.
pub struct GatewayState {
    pub app: Arc<App>,
    /// Plugin that replies to webhook activities.
    pub sender_key: String,
    pub version: String,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(app: Arc<App>, sender_key: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            app,
            sender_key: sender_key.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutdown: CancellationToken::new(),
        })
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([ROUTES_MATCHED_HEADER, STREAM_ID_HEADER]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/messages", post(messages_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `state.shutdown` is cancelled.
pub async fn start_gateway(bind: &str, port: u16, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, sender = %state.sender_key, "gateway listening");

    let shutdown = state.shutdown.clone();
    let app = build_gateway_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("gateway stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "routes": state.app.router().len(),
        "plugins": state.app.plugins().names(),
    }))
}

async fn messages_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let activity = match decode_activity(&body) {
        Ok(activity) => activity,
        Err(e) => {
            debug!(error = %e, "rejecting undecodable activity");
            return error_response(&e);
        },
    };

    let token = bearer_token(&headers);
    // Dropping the guard cancels the turn if the client goes away.
    let cancel = state.shutdown.child_token();
    let guard = cancel.clone().drop_guard();
    let result = state
        .app
        .process(&state.sender_key, token, activity, cancel)
        .await;
    let _ = guard.disarm();

    match result {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
            let mut http = match response.body {
                Some(body) => (status, Json(body)).into_response(),
                None => status.into_response(),
            };
            let headers = http.headers_mut();
            headers.insert(
                ROUTES_MATCHED_HEADER,
                HeaderValue::from(response.meta.routes_matched),
            );
            if let Some(stream_id) = response.meta.stream_id
                && let Ok(value) = HeaderValue::from_str(&stream_id)
            {
                headers.insert(STREAM_ID_HEADER, value);
            }
            http
        },
        Err(e) => {
            if !e.is_client_error() {
                warn!(error = %e, "activity processing failed");
            }
            error_response(&e)
        },
    }
}

fn decode_activity(body: &[u8]) -> Result<Activity, Error> {
    let value = serde_json::from_slice(body)
        .map_err(|e| Error::validation(format!("body is not JSON: {e}")))?;
    Activity::from_json(value)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

fn error_response(error: &Error) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": error.to_string() }))).into_response()
}
