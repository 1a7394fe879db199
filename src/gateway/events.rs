//! Event bus for cal-concierge.
//!
//! The gateway publishes what happens to sessions and bookings here.
//! Subscribers are optional; counters are always kept and served by
//! `GET /stats`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use serde::{Serialize, Deserialize};

/// Event types that can be published on the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// A session was created
    SessionCreated { session_id: String },

    /// A session was deleted on request
    SessionDeleted { session_id: String },

    /// A session was dropped after idling past its TTL
    SessionExpired { session_id: String },

    /// A dialogue turn finished
    TurnCompleted {
        session_id: String,
        intent: String,
        last_step: String,
    },

    /// The NLU provider was bypassed for the fallback extractor
    ProviderFallback { session_id: String },

    /// An event was inserted into a calendar
    BookingConfirmed {
        calendar_id: String,
        event_id: String,
        link: String,
    },

    /// Gateway started
    GatewayStarted { address: String },

    /// Gateway stopped
    GatewayStopped { reason: String },
}

impl GatewayEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            GatewayEvent::SessionCreated { .. } => "session_created",
            GatewayEvent::SessionDeleted { .. } => "session_deleted",
            GatewayEvent::SessionExpired { .. } => "session_expired",
            GatewayEvent::TurnCompleted { .. } => "turn_completed",
            GatewayEvent::ProviderFallback { .. } => "provider_fallback",
            GatewayEvent::BookingConfirmed { .. } => "booking_confirmed",
            GatewayEvent::GatewayStarted { .. } => "gateway_started",
            GatewayEvent::GatewayStopped { .. } => "gateway_stopped",
        }
    }
}

/// Statistics about event bus usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventBusStats {
    /// Total events published
    pub events_published: u64,
    /// Events by type
    pub events_by_type: HashMap<String, u64>,
    /// Current subscribers
    pub subscriber_count: usize,
}

/// Event bus for gateway-wide communication.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
    stats: Arc<RwLock<EventBusStats>>,
    /// Recent events, kept only when enabled
    history: Arc<RwLock<Vec<GatewayEvent>>>,
    max_history: usize,
    keep_history: bool,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create an event bus with a specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
            history: Arc::new(RwLock::new(Vec::new())),
            max_history: 1000,
            keep_history: false,
        }
    }

    /// Enable event history for debugging.
    pub fn with_history(mut self, max_size: usize) -> Self {
        self.keep_history = true;
        self.max_history = max_size;
        self
    }

    /// Publish an event to all subscribers.
    pub async fn publish(&self, event: GatewayEvent) {
        {
            let mut stats = self.stats.write().await;
            stats.events_published += 1;
            *stats.events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
        }

        if self.keep_history {
            let mut history = self.history.write().await;
            if history.len() >= self.max_history {
                history.remove(0);
            }
            history.push(event.clone());
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get event statistics.
    pub async fn stats(&self) -> EventBusStats {
        let mut stats = self.stats.read().await.clone();
        stats.subscriber_count = self.subscriber_count();
        stats
    }

    /// Get event history (if enabled).
    pub async fn history(&self) -> Vec<GatewayEvent> {
        self.history.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
