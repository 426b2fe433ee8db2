//! HTTP endpoint receiving analytics records
//!
//! Request handling, in order:
//! 1. CORS headers for allow-listed origins (preflights answered without body)
//! 2. method check (POST only)
//! 3. `X-Analytics-Token` check
//! 4. JSON body check
//! 5. session log append, enrichment, rotation, main log append
//! 6. summary mail and session cleanup on `session_end`

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL, CONTENT_TYPE,
            HOST, PRAGMA,
        },
        HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};

use super::anonymize::{anonymize_addr, UNKNOWN_IP};
use super::error_log::ErrorLog;
use super::storage::{sanitize_session_id, EventLog};
use super::summary::{summary_mail, Mailer, SendmailMailer};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-analytics-token");

/// Rejections, each mapped to a status and a JSON error body
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Invalid security token")]
    InvalidToken,

    #[error("Invalid JSON data")]
    InvalidJson,

    #[error("Failed to store data")]
    Storage,
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        let status = match self {
            TrackError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            TrackError::InvalidToken => StatusCode::FORBIDDEN,
            TrackError::InvalidJson => StatusCode::BAD_REQUEST,
            TrackError::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        };

        json_response(status, "error", &self.to_string())
    }
}

fn json_response(status: StatusCode, outcome: &str, message: &str) -> Response {
    let mut response = (
        status,
        Json(serde_json::json!({ "status": outcome, "message": message })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Shared state of the collector
pub struct CollectorState {
    config: CollectorConfig,
    log: EventLog,
    errors: ErrorLog,
    mailer: Arc<dyn Mailer>,
    notification_email: Option<String>,
}

impl CollectorState {
    /// Builds the state, mailing summaries through sendmail.
    pub fn new(config: CollectorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            log: EventLog::new(&config),
            errors: ErrorLog::new(&config.error_log),
            mailer: Arc::new(SendmailMailer::new(&config.sendmail_path)),
            notification_email: config.notification_address(),
            config,
        })
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_notification_email(mut self, address: Option<String>) -> Self {
        self.notification_email = address;
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Persists one record. Blocking; run it off the async executor.
    pub fn ingest(
        &self,
        mut data: Map<String, Value>,
        remote: Option<IpAddr>,
        host: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), TrackError> {
        let session_id = data
            .get("sessionId")
            .and_then(|value| match value {
                Value::String(s) => Some(sanitize_session_id(s)),
                Value::Number(n) => Some(sanitize_session_id(&n.to_string())),
                _ => None,
            })
            .filter(|id| !id.is_empty());

        if let Some(session_id) = &session_id {
            if let Err(e) = self.log.append_session(session_id, &data) {
                self.errors
                    .log(&format!("Failed to write session file {session_id}: {e}"));
            }
        }

        data.insert(
            "server_timestamp".to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, false)),
        );
        data.insert(
            "anonymized_ip".to_string(),
            Value::String(
                remote
                    .map(|ip| anonymize_addr(ip).to_string())
                    .unwrap_or_else(|| UNKNOWN_IP.to_string()),
            ),
        );

        match self.log.append(&data, now) {
            Ok(rotated) => {
                if let Some(backup) = rotated {
                    tracing::debug!(backup = %backup.display(), "Main log rotated before append");
                }
            }
            Err(e) => {
                self.errors
                    .log(&format!("Failed to write to data file: {e}"));
                return Err(TrackError::Storage);
            }
        }

        let is_session_end = data.get("type").and_then(Value::as_str) == Some("session_end");
        if is_session_end {
            if let (Some(session_id), Some(to)) = (&session_id, &self.notification_email) {
                self.finish_session(session_id, to, host);
            }
        }

        Ok(())
    }

    /// Mails the summary of a finished session and removes its log.
    ///
    /// The log is read and removed under its lock, so a concurrent append
    /// either makes it into the summary or starts a fresh log.
    fn finish_session(&self, session_id: &str, to: &str, host: &str) {
        let lines = match self.log.take_session(session_id) {
            Ok(Some(lines)) => lines,
            Ok(None) => return,
            Err(e) => {
                self.errors
                    .log(&format!("Failed to read session file {session_id}: {e}"));
                return;
            }
        };

        // a lone session_end means the visitor never interacted
        if lines.len() > 1 {
            let mail = summary_mail(to, host, session_id, &lines);
            match self.mailer.send(&mail) {
                Ok(()) => tracing::info!(session_id, events = lines.len(), "Session summary sent"),
                Err(e) => self
                    .errors
                    .log(&format!("Failed to send summary for session {session_id}: {e}")),
            }
        }
    }
}

/// Builds the router with CORS for the configured origins.
pub fn router(state: Arc<CollectorState>) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "Ignoring invalid allowed origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, TOKEN_HEADER])
        .max_age(Duration::from_secs(60 * 60 * 24));

    Router::new()
        .route(&state.config.path, any(track_handler))
        .layer(cors)
        .layer(middleware::map_response(strip_unmatched_cors))
        .with_state(state)
}

/// Drops the preflight grants the CORS layer adds for origins it did not
/// match, so a foreign origin sees no `Access-Control-*` headers at all.
async fn strip_unmatched_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    if !headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
        for name in [
            ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_MAX_AGE,
        ] {
            headers.remove(name);
        }
    }
    response
}

async fn track_handler(State(state): State<Arc<CollectorState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    if parts.method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    if parts.method != Method::POST {
        return TrackError::MethodNotAllowed.into_response();
    }

    if state.config.require_token {
        let token = parts
            .headers
            .get(&TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if token != state.config.security_token {
            tracing::debug!("Rejected request with invalid token");
            return TrackError::InvalidToken.into_response();
        }
    }

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            state.errors.log(&format!("Failed to read request body: {e}"));
            return TrackError::InvalidJson.into_response();
        }
    };

    let data = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(data)) => data,
        _ => {
            state.errors.log(&format!(
                "Invalid JSON received: {}",
                String::from_utf8_lossy(&bytes)
            ));
            return TrackError::InvalidJson.into_response();
        }
    };

    let remote = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let host = state
        .config
        .server_name
        .clone()
        .unwrap_or_else(|| request_host(&parts.headers));

    let worker = Arc::clone(&state);
    let outcome =
        tokio::task::spawn_blocking(move || worker.ingest(data, remote, &host, Utc::now())).await;

    match outcome {
        Ok(Ok(())) => json_response(StatusCode::OK, "success", "Data received"),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            state.errors.log(&format!("Ingest task failed: {e}"));
            TrackError::Storage.into_response()
        }
    }
}

/// Host name from the request, used for the summary sender address when no
/// `server_name` is configured.
fn request_host(headers: &axum::http::HeaderMap) -> String {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");

    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.split(':').next().unwrap_or(host)
    };

    if name.is_empty() {
        "localhost".to_string()
    } else {
        name.to_string()
    }
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve<F>(state: CollectorState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let address = state.config.bind.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {address}: {e}")))?;

    serve_listener(listener, state, shutdown).await
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve_listener<F>(listener: TcpListener, state: CollectorState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr()?;
    tracing::info!(%address, path = %state.config.path, "Collector listening");

    let app = router(Arc::new(state));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("Collector stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
