//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use sos_core::SubjectView;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{RelayError, Result};
use crate::health::{self, HealthResponse};
use crate::metrics::SMS_REQUESTS_TOTAL;
use crate::relay::{RelayHandle, spawn_relay};
use crate::shutdown::ShutdownCoordinator;
use crate::sms::SmsGateway;
use crate::websocket::dispatcher::Dispatcher;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Submitter for the relay task.
    pub relay: RelayHandle,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
    /// SMS gateway for `/send-sms`, if configured.
    pub sms: Option<Arc<dyn SmsGateway>>,
}

/// The SOS relay server.
///
/// Owns one [`ConnectionRegistry`] and one relay task, so several servers
/// can run side by side in one process.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    relay: RelayHandle,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
    sms: Option<Arc<dyn SmsGateway>>,
}

impl RelayServer {
    /// Create a server and start its relay task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (relay, relay_task) = spawn_relay(
            Dispatcher::new(Arc::clone(&registry)),
            config.relay_queue_capacity,
            shutdown.token(),
        );
        let _ = shutdown.spawn(async move {
            if let Err(e) = relay_task.await {
                error!(error = %e, "relay task failed");
            }
        });
        Self {
            config: Arc::new(config),
            registry,
            relay,
            shutdown,
            start_time: Instant::now(),
            metrics_handle: None,
            sms: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Forward `/send-sms` requests to `gateway`.
    #[must_use]
    pub fn with_sms_gateway(mut self, gateway: Arc<dyn SmsGateway>) -> Self {
        self.sms = Some(gateway);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            relay: self.relay.clone(),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            config: Arc::clone(&self.config),
            metrics_handle: self.metrics_handle.clone(),
            sms: self.sms.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/subjects", get(subjects_handler))
            .route("/send-sms", post(send_sms_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "relay server listening");

        let handle = self.shutdown.spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Stop accepting, close every session and wait for the listener,
    /// sessions and relay task to finish.
    ///
    /// Returns `false` if something was still running at `timeout`.
    pub async fn stop(&self, timeout: Option<Duration>) -> bool {
        self.shutdown.drain(timeout).await
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Relay task submitter.
    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws and GET /: WebSocket upgrade.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(slot) = state.registry.try_reserve(state.config.max_connections) else {
        warn!(
            max = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let ctx = SessionContext {
        registry: Arc::clone(&state.registry),
        relay: state.relay.clone(),
        outbound_capacity: state.config.outbound_queue_capacity,
        heartbeat_interval: state.config.heartbeat_interval(),
        heartbeat_timeout: state.config.heartbeat_timeout(),
        shutdown: state.shutdown.token(),
    };
    let shutdown = Arc::clone(&state.shutdown);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| shutdown.track(run_ws_session(socket, ctx, slot)))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.relay.subject_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /subjects: read-only view of the subject table.
async fn subjects_handler(State(state): State<AppState>) -> Response {
    match state.relay.snapshot().await {
        Ok(subjects) => Json::<Vec<SubjectView>>(subjects).into_response(),
        Err(RelayError::Stopped) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "relay stopped" }))).into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SendSmsRequest {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// POST /send-sms
async fn send_sms_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let req: SendSmsRequest = serde_json::from_slice(&body).unwrap_or_default();
    let phone = req.phone.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let message = req.message.as_deref().filter(|s| !s.trim().is_empty());

    let (Some(phone), Some(message)) = (phone, message) else {
        counter!(SMS_REQUESTS_TOTAL, "outcome" => "invalid_request").increment(1);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Phone number and message are required" })),
        )
            .into_response();
    };

    let Some(gateway) = &state.sms else {
        counter!(SMS_REQUESTS_TOTAL, "outcome" => "unconfigured").increment(1);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "SMS gateway is not configured" })),
        )
            .into_response();
    };

    match gateway.send(phone, message).await {
        Ok(sms_response) => {
            counter!(SMS_REQUESTS_TOTAL, "outcome" => "sent").increment(1);
            (
                StatusCode::OK,
                Json(json!({ "message": "SMS sent successfully", "smsResponse": sms_response })),
            )
                .into_response()
        }
        Err(e) => {
            counter!(SMS_REQUESTS_TOTAL, "outcome" => e.outcome()).increment(1);
            error!(error = %e, "failed to send SMS");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to send SMS" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::sms::SmsError;

    fn make_server() -> RelayServer {
        RelayServer::new(ServerConfig::default())
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    struct FakeGateway {
        fail: bool,
    }

    #[async_trait]
    impl SmsGateway for FakeGateway {
        async fn send(&self, phone: &str, message: &str) -> std::result::Result<Value, SmsError> {
            if self.fail {
                Err(SmsError::Transport("down".into()))
            } else {
                Ok(json!({ "to": phone, "text": message }))
            }
        }
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["subjects"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn subjects_endpoint_reflects_relay_state() {
        let server = make_server();
        let rikas = sos_core::SubjectId::parse("Rikas").unwrap();
        server.relay().submit(sos_core::Event::sos(rikas), None).await.unwrap();

        let req = Request::builder().uri("/subjects").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json[0]["subject"], "Rikas");
        assert_eq!(json[0]["status"], "alerting");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders_text() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let app = make_server().with_metrics(handle).router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_rejected() {
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_sms_requires_phone_and_message() {
        let app = make_server()
            .with_sms_gateway(Arc::new(FakeGateway { fail: false }))
            .router();
        for body in [r#"{"phone":"123"}"#, r#"{"message":"hi"}"#, r#"{"phone":" ","message":"hi"}"#, "junk"] {
            let resp = app.clone().oneshot(post_json("/send-sms", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {body}");
            let json = body_json(resp).await;
            assert_eq!(json["error"], "Phone number and message are required");
        }
    }

    #[tokio::test]
    async fn send_sms_success() {
        let app = make_server()
            .with_sms_gateway(Arc::new(FakeGateway { fail: false }))
            .router();
        let resp = app
            .oneshot(post_json("/send-sms", r#"{"phone":"+977","message":"help"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "SMS sent successfully");
        assert_eq!(json["smsResponse"]["to"], "+977");
    }

    #[tokio::test]
    async fn send_sms_gateway_failure_is_500() {
        let app = make_server()
            .with_sms_gateway(Arc::new(FakeGateway { fail: true }))
            .router();
        let resp = app
            .oneshot(post_json("/send-sms", r#"{"phone":"+977","message":"help"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["error"], "Failed to send SMS");
    }

    #[tokio::test]
    async fn send_sms_unconfigured_is_503() {
        let resp = make_server()
            .router()
            .oneshot(post_json("/send-sms", r#"{"phone":"+977","message":"help"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.stop(Some(Duration::from_secs(2))).await);
        assert!(handle.is_finished());
        assert!(server.shutdown().is_shutting_down());
        assert!(server.relay().is_stopped());
        assert_eq!(server.shutdown().active_tasks(), 0);
    }
}
