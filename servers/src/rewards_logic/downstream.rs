//! # Admin HTTP Surface
//!
//! - `GET /health`: connection state and online count.
//! - `POST /admin/command`: body is one console command, reply is
//!   `{"replies": [..]}`.
//! - `GET /admin/contacts.csv`: the contacts report as an attachment.
//!
//! `/admin/*` requires `Authorization: Bearer <token>` when a token is
//! configured.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{error, info, warn};

use lib_rewards::BridgeError;
use lib_rewards::core::{AdminConsole, ConnectionSupervisor, PresenceTracker};

#[derive(Clone)]
pub struct AdminState {
    pub console: Arc<AdminConsole>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub presence: Arc<PresenceTracker>,
    pub token: Option<String>,
}

#[derive(Debug)]
enum AppError {
    Unauthorized,
    Upstream(BridgeError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthorized => {
                warn!("rejected admin request without a valid token");
                (
                    StatusCode::UNAUTHORIZED,
                    json!({ "error_type": "Unauthorized", "message": "missing or invalid bearer token" }),
                )
            }
            AppError::Upstream(e) => {
                error!("admin request failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error_type": "UpstreamError", "message": e.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn authorize(state: &AdminState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(token) = &state.token else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(p) if p == token => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/admin/command", post(command_handler))
        .route("/admin/contacts.csv", get(contacts_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let connection = format!("{:?}", state.supervisor.state().await);
    Json(json!({
        "status": "ok",
        "connection": connection,
        "online": state.presence.len(),
    }))
}

async fn command_handler(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &headers)?;
    info!(command = %body.trim(), "admin command over http");
    let replies = state.console.handle(&body).await;
    Ok(Json(json!({ "replies": replies })))
}

async fn contacts_handler(
    State(state): State<AdminState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, &headers)?;
    let report = state.console.contacts_report().await.map_err(AppError::Upstream)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"contacts.csv\""),
        ],
        report.csv,
    ))
}

/// Serves until `shutdown_guard` is cancelled.
pub async fn run(bind: String, state: AdminState, shutdown_guard: tokio_graceful::ShutdownGuard) {
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("admin http: failed to bind {}: {}", bind, e);
            return;
        }
    };
    info!("admin http listening on {}", bind);
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_guard.cancelled().await;
            info!("admin http shutting down");
        })
        .await;
    if let Err(e) = served {
        error!("admin http server error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_rewards::configs::{VoucherConfig, WithdrawConfig};
    use lib_rewards::core::{Ledger, RetryPolicy, VoucherLedger};
    use lib_rewards::testing::{MemoryLedgerStore, MockNetwork, RecordingEscalation, RecordingNotifier, contact};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn state(token: Option<&str>) -> AdminState {
        let network = Arc::new(MockNetwork::new());
        network.set_contacts(vec![contact("AA", "alice", 4096)]);
        let store = Arc::new(MemoryLedgerStore::new());
        let presence = Arc::new(PresenceTracker::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(ConnectionSupervisor::new(
            network.clone(),
            Arc::new(RecordingEscalation::default()),
            notifier.clone(),
            tx,
            RetryPolicy::default(),
            false,
            CancellationToken::new(),
        ));
        let console = Arc::new(AdminConsole::new(
            network,
            Arc::new(Ledger::new(store.clone())),
            Arc::new(VoucherLedger::new(store, &VoucherConfig::default())),
            presence.clone(),
            notifier,
            "CHAN".to_string(),
            WithdrawConfig::default(),
        ));
        AdminState {
            console,
            supervisor,
            presence,
            token: token.map(str::to_string),
        }
    }

    async fn serve(state: AdminState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let base = serve(state(Some("secret"))).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connection"], "Disconnected");
    }

    #[tokio::test]
    async fn test_command_requires_token() {
        let base = serve(state(Some("secret"))).await;
        let http = reqwest::Client::new();

        let denied = http.post(format!("{base}/admin/command")).body("help").send().await.unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

        let allowed = http
            .post(format!("{base}/admin/command"))
            .bearer_auth("secret")
            .body("help")
            .send()
            .await
            .unwrap();
        assert!(allowed.status().is_success());
        let body: serde_json::Value = allowed.json().await.unwrap();
        assert!(body["replies"].as_array().unwrap().len() > 1);
    }

    #[tokio::test]
    async fn test_contacts_csv() {
        let base = serve(state(None)).await;
        let response = reqwest::get(format!("{base}/admin/contacts.csv")).await.unwrap();
        assert_eq!(response.headers()[reqwest::header::CONTENT_TYPE], "text/csv; charset=utf-8");
        let text = response.text().await.unwrap();
        assert_eq!(text, "identity,display_name,status_code,in_channel\nAA,alice,4096,false\n");
    }
}
