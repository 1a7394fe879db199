//! HTTP front door for the cal-concierge Gateway.
//!
//! JSON endpoints over axum. Handlers are thin: they hand the request to
//! the [`Gateway`] and serialize what comes back.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::events::{EventBusStats, GatewayEvent};
use super::session::SessionInfo;
use super::Gateway;
use crate::calendar::CreatedEvent;
use crate::error::{GatewayError, SessionError};
use crate::types::{hhmm, Intent, SlotState};

/// `POST /chat` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub calendar_id: Option<String>,
}

/// `POST /chat` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub intent: Option<Intent>,
    pub availability: Option<bool>,
    pub booking_confirmed: Option<bool>,
    pub suggestions: Option<Vec<String>>,
    pub needs_more_info: Option<bool>,
    pub session_id: String,
}

impl ChatResponse {
    pub fn from_state(session_id: String, state: &SlotState) -> Self {
        let clock = |t: Option<chrono::NaiveTime>| t.map(|t| t.format(hhmm::FORMAT).to_string());
        Self {
            response: state.response.clone(),
            date: state.date,
            start_time: clock(state.start_time),
            end_time: clock(state.end_time),
            intent: Some(state.intent),
            availability: state.availability,
            booking_confirmed: Some(state.booking_confirmed),
            suggestions: Some(state.suggestions.clone()),
            needs_more_info: Some(state.needs_more_info),
            session_id,
        }
    }
}

/// `POST /new-session` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSessionRequest {
    #[serde(default)]
    pub calendar_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionResponse {
    pub session_id: String,
    pub message: String,
}

/// `GET /session/{id}` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub state: SlotState,
}

/// `POST /quick-book` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickBookRequest {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`, 24-hour, UTC
    pub time: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

/// Details of a booked event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDetails {
    pub event_id: String,
    pub link: String,
    pub summary: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

impl EventDetails {
    pub fn new(created: CreatedEvent, state: &SlotState) -> Self {
        let clock = |t: Option<chrono::NaiveTime>| {
            t.map(|t| t.format(hhmm::FORMAT).to_string()).unwrap_or_default()
        };
        Self {
            event_id: created.id,
            link: created.link,
            summary: state.summary.clone(),
            date: state.date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
            start_time: clock(state.start_time),
            end_time: clock(state.end_time),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickBookResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_details: Option<EventDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl QuickBookResponse {
    /// Failure before any calendar call.
    pub fn rejected(message: String) -> Self {
        Self {
            success: false,
            message,
            event_details: None,
            availability: None,
            suggestions: None,
        }
    }
}

/// `POST /check-availability` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAvailabilityRequest {
    pub date: String,
    #[serde(default)]
    pub calendar_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAvailabilityResponse {
    pub date: String,
    pub available_slots: Vec<String>,
    pub message: String,
}

/// `GET /sessions` reply.
#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    pub active_sessions: usize,
    /// Most recently active first
    pub session_ids: Vec<String>,
    pub sessions: Vec<SessionInfo>,
}

/// `GET /stats` reply.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Server version
    pub version: String,
    /// Number of stored sessions
    pub session_count: usize,
    pub events: EventBusStats,
}

/// Error body: `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError(GatewayError);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError(GatewayError::Session(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::Session(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self.0 {
            GatewayError::Session(_) => "Session not found".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Gateway HTTP server.
pub struct GatewayServer {
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Routes with tracing and, if enabled, permissive CORS.
    pub fn router(&self) -> Router {
        let mut app = Router::new()
            .route("/", get(Self::health_handler))
            .route("/chat", post(Self::chat_handler))
            .route("/new-session", post(Self::new_session_handler))
            .route(
                "/session/:session_id",
                get(Self::get_session_handler).delete(Self::delete_session_handler),
            )
            .route("/quick-book", post(Self::quick_book_handler))
            .route("/check-availability", post(Self::check_availability_handler))
            .route("/sessions", get(Self::sessions_handler))
            .route("/stats", get(Self::stats_handler))
            .layer(TraceLayer::new_for_http());

        if self.gateway.config().server.cors_enabled {
            app = app.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        app.with_state(self.gateway.clone())
    }

    /// Bind, start the expiry sweep, and serve until Ctrl-C.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = self
            .gateway
            .config()
            .server_addr()
            .parse()
            .map_err(|e| GatewayError::ServerError(format!("Invalid address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|e| GatewayError::ServerError(e.to_string()))?;

        tracing::info!("Gateway server listening on {}", local);
        self.gateway
            .events()
            .publish(GatewayEvent::GatewayStarted { address: local.to_string() })
            .await;

        let sweeper = self.gateway.spawn_sweeper();
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            })
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()));
        sweeper.abort();

        self.gateway
            .events()
            .publish(GatewayEvent::GatewayStopped { reason: "shutdown".to_string() })
            .await;
        served
    }

    async fn health_handler() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "status": "ok",
            "service": crate::NAME,
            "version": crate::VERSION,
        }))
    }

    async fn chat_handler(
        State(gateway): State<Arc<Gateway>>,
        Json(request): Json<ChatRequest>,
    ) -> Json<ChatResponse> {
        Json(gateway.chat(request).await)
    }

    async fn new_session_handler(
        State(gateway): State<Arc<Gateway>>,
        body: Option<Json<NewSessionRequest>>,
    ) -> Json<NewSessionResponse> {
        let request = body.map(|Json(r)| r).unwrap_or_default();
        Json(gateway.new_session(request.calendar_id).await)
    }

    async fn get_session_handler(
        State(gateway): State<Arc<Gateway>>,
        Path(session_id): Path<String>,
    ) -> Result<Json<SessionResponse>, ApiError> {
        Ok(Json(gateway.session(&session_id).await?))
    }

    async fn delete_session_handler(
        State(gateway): State<Arc<Gateway>>,
        Path(session_id): Path<String>,
    ) -> Result<Json<serde_json::Value>, ApiError> {
        gateway.delete_session(&session_id).await?;
        Ok(Json(serde_json::json!({
            "message": format!("Session {} deleted", session_id)
        })))
    }

    async fn quick_book_handler(
        State(gateway): State<Arc<Gateway>>,
        Json(request): Json<QuickBookRequest>,
    ) -> Json<QuickBookResponse> {
        Json(gateway.quick_book(request).await)
    }

    async fn check_availability_handler(
        State(gateway): State<Arc<Gateway>>,
        Json(request): Json<CheckAvailabilityRequest>,
    ) -> Json<CheckAvailabilityResponse> {
        Json(gateway.check_availability(request).await)
    }

    async fn sessions_handler(State(gateway): State<Arc<Gateway>>) -> Json<SessionsResponse> {
        let sessions = gateway.sessions().list().await;
        Json(SessionsResponse {
            active_sessions: sessions.len(),
            session_ids: sessions.iter().map(|s| s.id.clone()).collect(),
            sessions,
        })
    }

    async fn stats_handler(State(gateway): State<Arc<Gateway>>) -> Json<StatsResponse> {
        Json(StatsResponse {
            version: crate::VERSION.to_string(),
            session_count: gateway.sessions().count().await,
            events: gateway.events().stats().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use serde_json::{json, Value};

    async fn spawn_server() -> String {
        let gateway = Arc::new(Gateway::from_config(GatewayConfig::for_testing()).unwrap());
        let app = GatewayServer::new(gateway).router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let response = ApiError::from(SessionError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            ApiError(GatewayError::ServerError("boom".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_chat_request_defaults() {
        let request: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(request.session_id, None);
        assert_eq!(request.calendar_id, None);
    }

    #[tokio::test]
    async fn test_http_session_lifecycle() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let health: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");

        let created: Value = client
            .post(format!("{}/new-session", base))
            .json(&json!({"calendar_id": "team@example.com"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let session_id = created["session_id"].as_str().unwrap().to_string();

        let listed: Value = client
            .get(format!("{}/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["active_sessions"], 1);
        assert_eq!(listed["session_ids"], json!([session_id.clone()]));

        let chat: Value = client
            .post(format!("{}/chat", base))
            .json(&json!({"message": "hello", "session_id": session_id}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(chat["intent"], "unknown");
        assert_eq!(chat["needs_more_info"], true);
        assert_eq!(chat["session_id"], session_id.as_str());

        let session: Value = client
            .get(format!("{}/session/{}", base, session_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["state"]["calendar_id"], "team@example.com");
        assert_eq!(session["state"]["history"].as_array().unwrap().len(), 3);

        let deleted = client
            .delete(format!("{}/session/{}", base, session_id))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::OK);

        let missing = client
            .get(format!("{}/session/{}", base, session_id))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = missing.json().await.unwrap();
        assert_eq!(body["detail"], "Session not found");
    }

    #[tokio::test]
    async fn test_http_bypass_endpoints() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let booked: Value = client
            .post(format!("{}/quick-book", base))
            .json(&json!({"date": "2030-01-15", "time": "10:00", "summary": "Kickoff"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(booked["success"], true);
        assert_eq!(booked["event_details"]["summary"], "Kickoff");

        let slots: Value = client
            .post(format!("{}/check-availability", base))
            .json(&json!({"date": "2030-01-15"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(slots["date"], "2030-01-15");
        assert_eq!(slots["available_slots"][0], "09:00");
        assert_eq!(slots["available_slots"][1], "11:00");

        let stats: Value = client
            .get(format!("{}/stats", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["events"]["events_by_type"]["booking_confirmed"], 1);

        let sessions: Value = client
            .get(format!("{}/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(sessions["active_sessions"], 0);
        assert_eq!(sessions["session_ids"], json!([]));
    }
}
