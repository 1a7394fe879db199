//! Gateway module for cal-concierge.
//!
//! The Gateway owns the session store and the dialogue engine and is what
//! both the HTTP server and the terminal chat talk to.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       Gateway                          │
//! │  ┌────────────┐   ┌────────────────┐   ┌───────────┐  │
//! │  │  Session   │──▶│ DialogueEngine │──▶│ Calendar  │  │
//! │  │   Store    │   │  (NLU inside)  │   │  Backend  │  │
//! │  └────────────┘   └────────────────┘   └───────────┘  │
//! │                           │                            │
//! │                     ┌───────────┐                      │
//! │                     │ Event Bus │                      │
//! │                     └───────────┘                      │
//! └───────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod events;
pub mod server;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use crate::calendar::{CalendarBackend, GoogleCalendar, InMemoryCalendar};
use crate::dialogue::{DialogueEngine, TurnOutcome};
use crate::error::{GatewayError, SessionError};
use crate::nlu::{GeminiProvider, IntentInterpreter, NluProvider};
use crate::types::{parse_clock_time, parse_date, Intent, SlotState};

pub use config::GatewayConfig;
pub use events::{EventBus, GatewayEvent};
pub use server::{
    ChatRequest, ChatResponse, CheckAvailabilityRequest, CheckAvailabilityResponse, EventDetails,
    GatewayServer, NewSessionResponse, QuickBookRequest, QuickBookResponse, SessionResponse,
};
pub use session::{SessionInfo, SessionStore};

/// Session used by `/chat` when the request names none.
pub const DEFAULT_SESSION_ID: &str = "default";

/// First assistant turn of an explicitly created session.
pub const GREETING: &str = "Hello! I'm your calendar assistant. I can book meetings, check your \
                            availability, or show your upcoming meetings. How can I help?";

/// Main Gateway structure.
pub struct Gateway {
    config: GatewayConfig,
    sessions: Arc<SessionStore>,
    engine: DialogueEngine,
    events: EventBus,
}

impl Gateway {
    /// Create a gateway around an existing engine.
    pub fn new(config: GatewayConfig, engine: DialogueEngine) -> Self {
        Self {
            sessions: Arc::new(SessionStore::with_config(config.session_store_config())),
            config,
            engine,
            events: EventBus::new(),
        }
    }

    /// Build the provider and calendar backend named by `config`.
    ///
    /// Secrets come from the environment variables the config names. A
    /// missing NLU key degrades to fallback extraction; a missing calendar
    /// token is an error.
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;

        let provider: Option<Arc<dyn NluProvider>> = match config.nlu.provider {
            config::NluProviderKind::Gemini => match std::env::var(&config.nlu.api_key_env) {
                Ok(key) if !key.trim().is_empty() => Some(Arc::new(GeminiProvider::new(
                    &config.nlu.api_base,
                    &config.nlu.model,
                    key.trim(),
                ))),
                _ => {
                    tracing::warn!(
                        env = %config.nlu.api_key_env,
                        "no NLU API key set, using fallback extraction only"
                    );
                    None
                }
            },
            config::NluProviderKind::None => None,
        };

        let calendar: Arc<dyn CalendarBackend> = match config.calendar.backend {
            config::CalendarBackendKind::Google => {
                let token = std::env::var(&config.calendar.access_token_env)
                    .ok()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        GatewayError::InvalidConfig(format!(
                            "calendar access token missing: set {}",
                            config.calendar.access_token_env
                        ))
                    })?;
                Arc::new(
                    GoogleCalendar::new(&config.calendar.api_base, token.trim())
                        .with_retry_policy(config.retry_policy()),
                )
            }
            config::CalendarBackendKind::Memory => Arc::new(InMemoryCalendar::new()),
        };

        tracing::info!(
            provider = provider.as_ref().map(|p| p.name()).unwrap_or("fallback"),
            calendar = calendar.name(),
            "gateway configured"
        );

        let interpreter =
            IntentInterpreter::new(provider, Duration::from_millis(config.nlu.timeout_ms))
                .with_max_history_turns(config.nlu.max_history_turns);
        let engine = DialogueEngine::new(
            interpreter,
            calendar,
            Duration::from_millis(config.calendar.timeout_ms),
            config.dialogue_settings(),
        );
        Ok(Self::new(config, engine))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn engine(&self) -> &DialogueEngine {
        &self.engine
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn calendar_or_default(&self, calendar_id: Option<String>) -> String {
        calendar_id
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| self.config.calendar.default_calendar_id.clone())
    }

    /// Run one conversational turn. Unknown sessions are created.
    pub async fn chat(&self, request: ChatRequest) -> ChatResponse {
        let session_id = request
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
        let default_calendar = self.config.calendar.default_calendar_id.clone();

        let mut state = self
            .sessions
            .checkout_or_create(&session_id, || self.engine.new_state(&default_calendar))
            .await;
        if state.created() {
            self.events
                .publish(GatewayEvent::SessionCreated { session_id: session_id.clone() })
                .await;
        }
        if let Some(calendar_id) = request.calendar_id.filter(|c| !c.trim().is_empty()) {
            state.calendar_id = calendar_id;
        }

        tracing::info!(session_id = %session_id, "chat turn");
        let outcome = self.engine.run_turn(&mut state, &request.message).await;
        self.record(&session_id, &state, &outcome).await;

        ChatResponse::from_state(session_id, &state)
    }

    /// Create a session and return its id with the greeting.
    pub async fn new_session(&self, calendar_id: Option<String>) -> NewSessionResponse {
        let mut state = self.engine.new_state(&self.calendar_or_default(calendar_id));
        state.response = GREETING.to_string();
        state.push_assistant(GREETING);

        let session_id = self.sessions.create(state).await;
        self.events
            .publish(GatewayEvent::SessionCreated { session_id: session_id.clone() })
            .await;

        NewSessionResponse { session_id, message: GREETING.to_string() }
    }

    /// Current state of a session. Never creates one.
    pub async fn session(&self, session_id: &str) -> Result<SessionResponse, SessionError> {
        let state = self.sessions.snapshot(session_id).await?;
        Ok(SessionResponse { session_id: session_id.to_string(), state })
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        if !self.sessions.remove(session_id).await {
            return Err(SessionError::NotFound);
        }
        self.events
            .publish(GatewayEvent::SessionDeleted { session_id: session_id.to_string() })
            .await;
        Ok(())
    }

    /// Book a slot directly, without interpretation or confirmation.
    pub async fn quick_book(&self, request: QuickBookRequest) -> QuickBookResponse {
        let (Some(date), Some(time)) = (parse_date(&request.date), parse_clock_time(&request.time))
        else {
            return QuickBookResponse::rejected(format!(
                "Invalid date or time '{} {}'. Use YYYY-MM-DD and HH:MM (24-hour).",
                request.date, request.time
            ));
        };

        let mut state = self.engine.new_state(&self.calendar_or_default(request.calendar_id));
        state.date = Some(date);
        self.engine.set_start_time(&mut state, time);
        if let Some(summary) = request.summary.filter(|s| !s.trim().is_empty()) {
            state.summary = summary;
        }
        state.description = request.description;
        for attendee in &request.attendees {
            state.add_attendee(attendee);
        }

        tracing::info!(calendar_id = %state.calendar_id, %date, %time, "quick book");
        let outcome = self.engine.run_direct(&mut state, Intent::Book).await;
        if let Some(created) = &outcome.created {
            self.publish_booking(&state, created).await;
        }

        QuickBookResponse {
            success: state.booking_confirmed,
            message: state.response.clone(),
            event_details: outcome.created.map(|created| EventDetails::new(created, &state)),
            availability: state.availability,
            suggestions: (!state.suggestions.is_empty()).then(|| state.suggestions.clone()),
        }
    }

    /// List the free slots of one day.
    pub async fn check_availability(
        &self,
        request: CheckAvailabilityRequest,
    ) -> CheckAvailabilityResponse {
        let Some(date) = parse_date(&request.date) else {
            return CheckAvailabilityResponse {
                date: request.date.clone(),
                available_slots: Vec::new(),
                message: format!("Invalid date '{}'. Use YYYY-MM-DD.", request.date),
            };
        };

        let mut state = self.engine.new_state(&self.calendar_or_default(request.calendar_id));
        state.date = Some(date);
        self.engine.run_direct(&mut state, Intent::Check).await;

        CheckAvailabilityResponse {
            date: date.format("%Y-%m-%d").to_string(),
            available_slots: state.suggestions,
            message: state.response,
        }
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gateway = Arc::clone(self);
        let period = Duration::from_secs(self.config.session.cleanup_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for session_id in gateway.sessions.cleanup_expired().await {
                    gateway.events.publish(GatewayEvent::SessionExpired { session_id }).await;
                }
            }
        })
    }

    async fn record(&self, session_id: &str, state: &SlotState, outcome: &TurnOutcome) {
        if outcome.used_fallback() {
            self.events
                .publish(GatewayEvent::ProviderFallback { session_id: session_id.to_string() })
                .await;
        }
        if let Some(created) = &outcome.created {
            self.publish_booking(state, created).await;
        }
        self.events
            .publish(GatewayEvent::TurnCompleted {
                session_id: session_id.to_string(),
                intent: state.intent.to_string(),
                last_step: outcome.last_step.as_str().to_string(),
            })
            .await;
    }

    async fn publish_booking(&self, state: &SlotState, created: &crate::calendar::CreatedEvent) {
        self.events
            .publish(GatewayEvent::BookingConfirmed {
                calendar_id: state.calendar_id.clone(),
                event_id: created.id.clone(),
                link: created.link.clone(),
            })
            .await;
    }
}
