//! In-process calendar.
//!
//! Keeps busy intervals and events per calendar id in memory. Used by the
//! test suite and by `calendar.backend = "memory"` for offline runs. Call
//! counters and failure switches let tests observe what the dialogue
//! pipeline asked for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{BusyInterval, CalendarBackend, CreatedEvent, NewEvent, UpcomingEvent};
use crate::error::CalendarError;

#[derive(Debug, Clone)]
struct StoredEvent {
    id: String,
    event: NewEvent,
    link: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    busy: HashMap<String, Vec<BusyInterval>>,
    events: HashMap<String, Vec<StoredEvent>>,
}

/// Calendar backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    state: RwLock<MemoryState>,
    latency: Option<Duration>,
    fail_queries: AtomicBool,
    fail_inserts: AtomicBool,
    busy_queries: AtomicUsize,
    inserts: AtomicUsize,
    listings: AtomicUsize,
}

impl InMemoryCalendar {
    /// Create an empty calendar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a busy interval.
    pub fn with_busy(mut self, calendar_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.state
            .get_mut()
            .busy
            .entry(calendar_id.to_string())
            .or_default()
            .push(BusyInterval::new(start, end));
        self
    }

    /// Delay every call, to exercise timeouts and concurrency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make busy queries and listings fail.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make event insertion fail.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Add a busy interval after construction.
    pub async fn add_busy(&self, calendar_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.state
            .write()
            .await
            .busy
            .entry(calendar_id.to_string())
            .or_default()
            .push(BusyInterval::new(start, end));
    }

    /// Number of busy queries served.
    pub fn busy_query_count(&self) -> usize {
        self.busy_queries.load(Ordering::SeqCst)
    }

    /// Number of insert attempts, failed ones included.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Number of upcoming-event listings served.
    pub fn listing_count(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    /// Total calendar calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.busy_query_count() + self.insert_count() + self.listing_count()
    }

    /// Number of stored events on a calendar.
    pub async fn event_count(&self, calendar_id: &str) -> usize {
        self.state
            .read()
            .await
            .events
            .get(calendar_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendar {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        self.busy_queries.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(CalendarError::ConnectionFailed("memory calendar offline".to_string()));
        }

        let state = self.state.read().await;
        let seeded = state.busy.get(calendar_id).into_iter().flatten().copied();
        let booked = state
            .events
            .get(calendar_id)
            .into_iter()
            .flatten()
            .map(|e| BusyInterval::new(e.event.start, e.event.end));

        let mut busy: Vec<BusyInterval> = seeded
            .chain(booked)
            .filter(|b| b.overlaps(start, end))
            .collect();
        busy.sort_by_key(|b| b.start);
        Ok(busy)
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(CalendarError::Rejected("memory calendar refused the event".to_string()));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let link = format!("https://calendar.local/{}/events/{}", calendar_id, id);
        self.state
            .write()
            .await
            .events
            .entry(calendar_id.to_string())
            .or_default()
            .push(StoredEvent { id: id.clone(), event: event.clone(), link: link.clone() });

        tracing::debug!(calendar_id, event_id = %id, "memory calendar stored event");
        Ok(CreatedEvent { id, link })
    }

    async fn list_upcoming(
        &self,
        calendar_id: &str,
        max_count: usize,
    ) -> Result<Vec<UpcomingEvent>, CalendarError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(CalendarError::ConnectionFailed("memory calendar offline".to_string()));
        }

        let now = Utc::now();
        let state = self.state.read().await;
        let mut upcoming: Vec<&StoredEvent> = state
            .events
            .get(calendar_id)
            .into_iter()
            .flatten()
            .filter(|e| e.event.end > now)
            .collect();
        upcoming.sort_by_key(|e| e.event.start);

        Ok(upcoming
            .into_iter()
            .take(max_count)
            .map(|e| UpcomingEvent {
                summary: e.event.summary.clone(),
                start: e.event.start.to_rfc3339(),
                link: e.link.clone(),
            })
            .collect())
    }
}
