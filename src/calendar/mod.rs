//! Calendar backends for cal-concierge.
//!
//! The dialogue pipeline talks to exactly one calendar service through the
//! [`CalendarBackend`] trait. Backends are thin adapters; slot arithmetic
//! lives in [`planner`].
//!
//! ## Backends
//!
//! | Backend            | Use                                  |
//! |--------------------|--------------------------------------|
//! | `GoogleCalendar`   | Google Calendar v3 REST API          |
//! | `InMemoryCalendar` | tests and offline demos              |
//! | `TimeoutCalendar`  | wraps any backend with a deadline    |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

pub mod google;
pub mod memory;
pub mod planner;
pub mod retry;

pub use google::GoogleCalendar;
pub use memory::InMemoryCalendar;
pub use planner::{free_slots, WorkWindow};
pub use retry::RetryPolicy;

/// A busy `[start, end)` interval reported by the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `[start, end)` intersects this interval. Empty intervals intersect nothing.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < self.end && start < self.end && end > self.start
    }
}

/// Event to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub summary: String,
    pub description: Option<String>,
    pub attendees: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Confirmation of an inserted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub id: String,
    /// Link the user can open to see the event
    pub link: String,
}

/// Entry of the upcoming-events listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub summary: String,
    /// RFC 3339 timestamp, or a bare date for all-day events
    pub start: String,
    pub link: String,
}

/// Trait that all calendar services must implement.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Backend identifier (e.g., "google", "memory").
    fn name(&self) -> &str;

    /// Busy intervals intersecting `[start, end)`.
    async fn query_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError>;

    /// Insert an event. Either the event exists afterwards or an error is returned.
    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CreatedEvent, CalendarError>;

    /// Next events from now on, soonest first.
    async fn list_upcoming(
        &self,
        calendar_id: &str,
        max_count: usize,
    ) -> Result<Vec<UpcomingEvent>, CalendarError>;
}

/// Bounds every call of the wrapped backend by a deadline.
///
/// A call that runs out of time yields [`CalendarError::Timeout`].
pub struct TimeoutCalendar {
    inner: Arc<dyn CalendarBackend>,
    timeout: Duration,
}

impl TimeoutCalendar {
    pub fn new(inner: Arc<dyn CalendarBackend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CalendarError>
    where
        F: std::future::Future<Output = Result<T, CalendarError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(backend = self.inner.name(), "calendar call timed out");
                Err(CalendarError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

#[async_trait]
impl CalendarBackend for TimeoutCalendar {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn query_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        self.bounded(self.inner.query_busy(calendar_id, start, end)).await
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        self.bounded(self.inner.insert_event(calendar_id, event)).await
    }

    async fn list_upcoming(
        &self,
        calendar_id: &str,
        max_count: usize,
    ) -> Result<Vec<UpcomingEvent>, CalendarError> {
        self.bounded(self.inner.list_upcoming(calendar_id, max_count)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_overlap_is_half_open() {
        let busy = BusyInterval::new(at(10, 0), at(11, 0));
        assert!(busy.overlaps(at(10, 30), at(11, 30)));
        assert!(busy.overlaps(at(9, 30), at(10, 30)));
        assert!(!busy.overlaps(at(11, 0), at(12, 0)));
        assert!(!busy.overlaps(at(9, 0), at(10, 0)));

        let empty = BusyInterval::new(at(10, 0), at(10, 0));
        assert!(!empty.overlaps(at(9, 30), at(10, 30)));
    }

    #[tokio::test]
    async fn test_timeout_wrapper_passes_through() {
        let memory = Arc::new(InMemoryCalendar::new().with_busy("cal", at(10, 0), at(11, 0)));
        let bounded = TimeoutCalendar::new(memory, Duration::from_secs(1));

        let busy = bounded.query_busy("cal", at(9, 0), at(18, 0)).await.unwrap();
        assert_eq!(busy.len(), 1);
        assert_eq!(bounded.name(), "memory");
    }

    #[tokio::test]
    async fn test_timeout_wrapper_times_out() {
        let memory = Arc::new(InMemoryCalendar::new().with_latency(Duration::from_millis(200)));
        let bounded = TimeoutCalendar::new(memory, Duration::from_millis(20));

        let err = bounded.list_upcoming("cal", 5).await.unwrap_err();
        assert!(matches!(err, CalendarError::Timeout(20)));
    }
}
