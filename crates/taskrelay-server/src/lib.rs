//! Webhook endpoint relaying Bitrix24 task events to Telegram.
//!
//! Each request runs one linear flow to completion: parse envelope →
//! normalize → filter → resolve recipient → dispatch → respond. There is no
//! queueing and no retry; the only blocking point is the outbound Telegram
//! call, bounded by the client timeout. Filter rejections are acknowledged
//! with 200: a skipped notification is not an error from the upstream
//! platform's perspective, and neither is a downstream delivery failure it
//! cannot fix by retrying its webhook.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use taskrelay_event::{
    evaluate_filters, normalize_event, FilterConfig, FilterDecision, RejectReason, TaskEvent,
};
use taskrelay_mapping::{FileMappingStore, MappingStore};
use taskrelay_telegram::{render_task_notification, TelegramClient};

const WEBHOOK_TASKS_ENDPOINT: &str = "/webhook_tasks";
const HEALTH_ENDPOINT: &str = "/health";
const SERVICE_NAME: &str = "taskrelay";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub mappings_file: PathBuf,
    pub telegram_bot_token: String,
    pub telegram_api_base: String,
    pub portal_domain: Option<String>,
    pub urgent_priority_threshold: i64,
    pub urgent_deadline_hours: i64,
    pub request_timeout_ms: u64,
}

pub struct AppState {
    mappings: Arc<dyn MappingStore>,
    telegram: TelegramClient,
    filter: FilterConfig,
    portal_domain: Option<String>,
}

impl AppState {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let telegram = TelegramClient::new(
            &config.telegram_api_base,
            &config.telegram_bot_token,
            config.request_timeout_ms,
        )?;
        Ok(Self {
            mappings: Arc::new(FileMappingStore::new(config.mappings_file.clone())),
            telegram,
            filter: FilterConfig {
                urgent_priority_threshold: config.urgent_priority_threshold,
                urgent_deadline_hours: config.urgent_deadline_hours,
            },
            portal_domain: config.portal_domain.clone(),
        })
    }

    pub fn new(
        mappings: Arc<dyn MappingStore>,
        telegram: TelegramClient,
        filter: FilterConfig,
        portal_domain: Option<String>,
    ) -> Self {
        Self {
            mappings,
            telegram,
            filter,
            portal_domain,
        }
    }
}

/// Terminal state of one webhook request past normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Rejected(RejectReason),
    Delivered { chat_id: String },
    DispatchFailed { detail: String },
}

/// Binds the listener and serves until ctrl-c.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid --bind '{}': expected host:port", config.bind))?;
    let state = Arc::new(AppState::from_config(&config)?);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve webhook listen address")?;
    tracing::info!(
        addr = %local_addr,
        mappings_file = %config.mappings_file.display(),
        urgent_priority_threshold = config.urgent_priority_threshold,
        urgent_deadline_hours = config.urgent_deadline_hours,
        "taskrelay webhook listening"
    );

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("webhook server exited unexpectedly")?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(WEBHOOK_TASKS_ENDPOINT, post(handle_webhook_tasks))
        .with_state(state)
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": SERVICE_NAME })),
    )
        .into_response()
}

async fn handle_webhook_tasks(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let envelope: Value = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!(%error, "webhook body is not valid json");
            return malformed_payload_response(&error.to_string());
        }
    };

    let event = match normalize_event(&envelope, state.portal_domain.as_deref()) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(%error, "webhook envelope failed normalization");
            return malformed_payload_response(&error.to_string());
        }
    };

    let outcome = process_event(&state, &event).await;
    match outcome {
        WebhookOutcome::Rejected(reason) => {
            tracing::info!(
                task_id = %event.task_id,
                kind = event.kind.label(),
                reason = reason.as_str(),
                "event rejected, no notification sent"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "outcome": "rejected",
                    "reason": reason.as_str(),
                })),
            )
                .into_response()
        }
        WebhookOutcome::Delivered { chat_id } => {
            tracing::info!(
                task_id = %event.task_id,
                kind = event.kind.label(),
                chat_id = %chat_id,
                "notification delivered"
            );
            (
                StatusCode::OK,
                Json(json!({ "status": "ok", "outcome": "delivered" })),
            )
                .into_response()
        }
        WebhookOutcome::DispatchFailed { detail } => {
            // Acknowledged anyway: the upstream platform retrying its webhook
            // cannot fix a Telegram-side failure.
            tracing::error!(
                task_id = %event.task_id,
                kind = event.kind.label(),
                detail = %detail,
                "notification dispatch failed"
            );
            (
                StatusCode::OK,
                Json(json!({ "status": "ok", "outcome": "dispatch_failed" })),
            )
                .into_response()
        }
    }
}

/// Filter and dispatch pipeline for one normalized event. One mapping
/// snapshot covers both the authority check and recipient resolution.
pub async fn process_event(state: &AppState, event: &TaskEvent) -> WebhookOutcome {
    let table = state.mappings.snapshot();
    let now = chrono::Local::now().naive_local();

    if let FilterDecision::Rejected(reason) = evaluate_filters(event, &table, &state.filter, now) {
        return WebhookOutcome::Rejected(reason);
    }

    let Some(chat_id) = table.resolve_chat(&event.responsible_id) else {
        return WebhookOutcome::Rejected(RejectReason::NoRecipientMapping);
    };

    let text = render_task_notification(event);
    match state.telegram.send_message(&chat_id, &text).await {
        Ok(()) => WebhookOutcome::Delivered { chat_id },
        Err(error) => WebhookOutcome::DispatchFailed {
            detail: error.to_string(),
        },
    }
}

fn malformed_payload_response(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "code": "malformed_payload",
                "message": message,
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;
    use taskrelay_mapping::{save_table, MappingTable};
    use tower::ServiceExt;

    use super::*;

    const SEND_MESSAGE_PATH: &str = "/bottest-token/sendMessage";

    fn mapped_table() -> MappingTable {
        let mut table = MappingTable::default();
        table.add_leader("123");
        table.set_chat("456", "987654321");
        table
    }

    fn test_router(telegram_base: &str, table: &MappingTable) -> (Router, tempfile::TempDir) {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let mappings_file = tempdir.path().join("user_mappings.json");
        save_table(&mappings_file, table).expect("save mappings");

        let state = Arc::new(
            AppState::from_config(&ServerConfig {
                bind: "127.0.0.1:0".to_string(),
                mappings_file,
                telegram_bot_token: "test-token".to_string(),
                telegram_api_base: telegram_base.to_string(),
                portal_domain: Some("corp.bitrix24.ru".to_string()),
                urgent_priority_threshold: 2,
                urgent_deadline_hours: 24,
                request_timeout_ms: 5_000,
            })
            .expect("state"),
        );
        (build_router(state), tempdir)
    }

    fn webhook_request(payload: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(WEBHOOK_TASKS_ENDPOINT)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    async fn response_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("parse body")
    }

    #[tokio::test]
    async fn integration_important_urgent_task_from_leader_is_delivered() {
        let telegram = MockServer::start_async().await;
        let sent = telegram.mock(|when, then| {
            when.method(POST)
                .path(SEND_MESSAGE_PATH)
                .json_body_includes(r#"{"chat_id":"987654321"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"ok":true,"result":{"message_id":1}}"#);
        });
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let response = app
            .oneshot(webhook_request(json!({
                "event": "ONTASKADD",
                "data": {
                    "ID": "42",
                    "TITLE": "Board deck",
                    "PRIORITY": "3",
                    "IMPORTANT": "1",
                    "CREATED_BY": "123",
                    "RESPONSIBLE_ID": "456",
                }
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["outcome"], "delivered");
        sent.assert();
    }

    #[tokio::test]
    async fn integration_deadline_window_satisfies_urgency_for_low_priority() {
        let telegram = MockServer::start_async().await;
        let sent = telegram.mock(|when, then| {
            when.method(POST).path(SEND_MESSAGE_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"ok":true,"result":{"message_id":2}}"#);
        });
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let deadline = (chrono::Local::now().naive_local() + chrono::Duration::hours(2))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let response = app
            .oneshot(webhook_request(json!({
                "event": "ONTASKUPDATE",
                "data": {
                    "ID": "43",
                    "TITLE": "Due soon",
                    "PRIORITY": "1",
                    "DEADLINE": deadline,
                    "IMPORTANT": "1",
                    "CREATED_BY": "123",
                    "RESPONSIBLE_ID": "456",
                }
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["outcome"], "delivered");
        sent.assert();
    }

    #[tokio::test]
    async fn regression_low_priority_without_deadline_is_rejected_not_urgent() {
        let telegram = MockServer::start_async().await;
        let sent = telegram.mock(|when, then| {
            when.method(POST).path(SEND_MESSAGE_PATH);
            then.status(200).body(r#"{"ok":true}"#);
        });
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let response = app
            .oneshot(webhook_request(json!({
                "event": "ONTASKADD",
                "data": {
                    "ID": "44",
                    "TITLE": "Someday",
                    "PRIORITY": "1",
                    "IMPORTANT": "1",
                    "CREATED_BY": "123",
                    "RESPONSIBLE_ID": "456",
                }
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["outcome"], "rejected");
        assert_eq!(body["reason"], "not_urgent");
        sent.assert_calls(0);
    }

    #[tokio::test]
    async fn regression_non_leader_creator_is_rejected_without_outbound_call() {
        let telegram = MockServer::start_async().await;
        let sent = telegram.mock(|when, then| {
            when.method(POST).path(SEND_MESSAGE_PATH);
            then.status(200).body(r#"{"ok":true}"#);
        });
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let response = app
            .oneshot(webhook_request(json!({
                "event": "ONTASKADD",
                "data": {
                    "ID": "45",
                    "TITLE": "From the side",
                    "PRIORITY": "3",
                    "IMPORTANT": "1",
                    "CREATED_BY": "999",
                    "RESPONSIBLE_ID": "456",
                }
            })))
            .await
            .expect("response");

        let body = response_json(response).await;
        assert_eq!(body["reason"], "creator_not_leader");
        sent.assert_calls(0);
    }

    #[tokio::test]
    async fn regression_unmapped_responsible_user_sends_nothing() {
        let telegram = MockServer::start_async().await;
        let sent = telegram.mock(|when, then| {
            when.method(POST).path(SEND_MESSAGE_PATH);
            then.status(200).body(r#"{"ok":true}"#);
        });
        let mut table = mapped_table();
        table.remove_chat("456");
        let (app, _guard) = test_router(&telegram.base_url(), &table);

        let response = app
            .oneshot(webhook_request(json!({
                "event": "ONTASKADD",
                "data": {
                    "ID": "46",
                    "TITLE": "No target",
                    "PRIORITY": "3",
                    "IMPORTANT": "1",
                    "CREATED_BY": "123",
                    "RESPONSIBLE_ID": "456",
                }
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["reason"], "no_recipient_mapping");
        sent.assert_calls(0);
    }

    #[tokio::test]
    async fn regression_dispatch_failure_still_acknowledges_the_event() {
        let telegram = MockServer::start_async().await;
        telegram.mock(|when, then| {
            when.method(POST).path(SEND_MESSAGE_PATH);
            then.status(500).body("internal");
        });
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let response = app
            .oneshot(webhook_request(json!({
                "event": "ONTASKADD",
                "data": {
                    "ID": "47",
                    "TITLE": "Flaky downstream",
                    "PRIORITY": "3",
                    "IMPORTANT": "1",
                    "CREATED_BY": "123",
                    "RESPONSIBLE_ID": "456",
                }
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["outcome"], "dispatch_failed");
    }

    #[tokio::test]
    async fn regression_unparseable_body_returns_client_error() {
        let telegram = MockServer::start_async().await;
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let request = Request::builder()
            .method("POST")
            .uri(WEBHOOK_TASKS_ENDPOINT)
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["error"]["code"], "malformed_payload");
    }

    #[tokio::test]
    async fn regression_unknown_event_kind_returns_client_error() {
        let telegram = MockServer::start_async().await;
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let response = app
            .oneshot(webhook_request(json!({
                "event": "ONTASKCOMMENTADD",
                "data": { "ID": "48" }
            })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unit_process_event_runs_against_an_injected_store() {
        let telegram = MockServer::start_async().await;
        let sent = telegram.mock(|when, then| {
            when.method(POST).path(SEND_MESSAGE_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"ok":true,"result":{"message_id":3}}"#);
        });
        let state = AppState::new(
            Arc::new(taskrelay_mapping::StaticMappingStore::new(mapped_table())),
            TelegramClient::new(&telegram.base_url(), "test-token", 5_000).expect("client"),
            FilterConfig::default(),
            None,
        );

        let event = normalize_event(
            &json!({
                "event": "ONTASKADD",
                "data": {
                    "ID": "49",
                    "TITLE": "Injected store",
                    "PRIORITY": "3",
                    "IMPORTANT": "1",
                    "CREATED_BY": "123",
                    "RESPONSIBLE_ID": "456",
                }
            }),
            None,
        )
        .expect("normalize");

        let outcome = process_event(&state, &event).await;
        assert_eq!(
            outcome,
            WebhookOutcome::Delivered {
                chat_id: "987654321".to_string()
            }
        );
        sent.assert();
    }

    #[tokio::test]
    async fn unit_health_endpoint_reports_service_liveness() {
        let telegram = MockServer::start_async().await;
        let (app, _guard) = test_router(&telegram.base_url(), &mapped_table());

        let request = Request::builder()
            .method("GET")
            .uri(HEALTH_ENDPOINT)
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_NAME);
    }
}
