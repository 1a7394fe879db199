//! Google Calendar v3 backend.
//!
//! Talks to the REST API with a bearer access token. Obtaining and
//! refreshing the token is the operator's job; the token is read from the
//! environment variable named in the config.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::retry::{with_retry, RetryPolicy};
use super::{BusyInterval, CalendarBackend, CreatedEvent, NewEvent, UpcomingEvent};
use crate::error::CalendarError;

/// Public API root.
pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar REST client.
pub struct GoogleCalendar {
    client: Client,
    api_base: String,
    access_token: String,
    retry: RetryPolicy,
}

impl GoogleCalendar {
    /// Create a client against `api_base` (normally [`GOOGLE_CALENDAR_API_BASE`]).
    pub fn new(api_base: &str, access_token: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for read-only calls.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, CalendarError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| CalendarError::ConnectionFailed(format!("invalid api base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| CalendarError::ConnectionFailed("api base cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn free_busy_once(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let body = FreeBusyRequest {
            time_min: start.to_rfc3339(),
            time_max: end.to_rfc3339(),
            time_zone: "UTC",
            items: vec![FreeBusyItem { id: calendar_id }],
        };

        let response = self
            .client
            .post(self.url(&["freeBusy"])?)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let parsed: FreeBusyResponse = decode(response).await?;

        let calendar = parsed
            .calendars
            .get(calendar_id)
            .ok_or_else(|| CalendarError::CalendarNotFound(calendar_id.to_string()))?;
        if let Some(error) = calendar.errors.first() {
            return Err(match error.reason.as_str() {
                "notFound" => CalendarError::CalendarNotFound(calendar_id.to_string()),
                other => CalendarError::Rejected(format!("{}: {}", error.domain, other)),
            });
        }

        calendar
            .busy
            .iter()
            .map(|b| {
                Ok(BusyInterval::new(parse_timestamp(&b.start)?, parse_timestamp(&b.end)?))
            })
            .collect()
    }

    async fn list_once(
        &self,
        calendar_id: &str,
        max_count: usize,
    ) -> Result<Vec<UpcomingEvent>, CalendarError> {
        let query = [
            ("timeMin", Utc::now().to_rfc3339()),
            ("maxResults", max_count.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];

        let response = self
            .client
            .get(self.url(&["calendars", calendar_id, "events"])?)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;
        let parsed: EventList = decode(response).await?;

        Ok(parsed
            .items
            .into_iter()
            .map(|item| UpcomingEvent {
                summary: item
                    .summary
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "(No Title)".to_string()),
                start: item.start.date_time.or(item.start.date).unwrap_or_default(),
                link: item.html_link.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    fn name(&self) -> &str {
        "google"
    }

    async fn query_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        with_retry(&self.retry, "freeBusy", || self.free_busy_once(calendar_id, start, end)).await
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        let body = EventInsert {
            summary: &event.summary,
            description: event.description.as_deref(),
            start: EventTime { date_time: event.start.to_rfc3339(), time_zone: "UTC" },
            end: EventTime { date_time: event.end.to_rfc3339(), time_zone: "UTC" },
            attendees: event.attendees.iter().map(|email| Attendee { email }).collect(),
        };

        let response = self
            .client
            .post(self.url(&["calendars", calendar_id, "events"])?)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let created: InsertedEvent = decode(response).await?;

        tracing::info!(calendar_id, event_id = %created.id, "google calendar event created");
        Ok(CreatedEvent {
            id: created.id,
            link: created.html_link.unwrap_or_else(|| "N/A".to_string()),
        })
    }

    async fn list_upcoming(
        &self,
        calendar_id: &str,
        max_count: usize,
    ) -> Result<Vec<UpcomingEvent>, CalendarError> {
        with_retry(&self.retry, "events.list", || self.list_once(calendar_id, max_count)).await
    }
}

fn transport_error(e: reqwest::Error) -> CalendarError {
    if e.is_timeout() {
        CalendarError::Timeout(0)
    } else {
        CalendarError::ConnectionFailed(e.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, CalendarError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                CalendarError::AuthenticationFailed(body)
            }
            StatusCode::NOT_FOUND => CalendarError::CalendarNotFound(body),
            _ => CalendarError::BadStatus { status: status.as_u16(), body },
        });
    }

    response
        .json()
        .await
        .map_err(|e| CalendarError::InvalidResponse(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CalendarError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CalendarError::InvalidResponse(format!("bad timestamp '{}': {}", raw, e)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest<'a> {
    time_min: String,
    time_max: String,
    time_zone: &'a str,
    items: Vec<FreeBusyItem<'a>>,
}

#[derive(Serialize)]
struct FreeBusyItem<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<FreeBusyPeriod>,
    #[serde(default)]
    errors: Vec<FreeBusyError>,
}

#[derive(Deserialize)]
struct FreeBusyPeriod {
    start: String,
    end: String,
}

#[derive(Deserialize)]
struct FreeBusyError {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    reason: String,
}

#[derive(Serialize)]
struct EventInsert<'a> {
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    start: EventTime<'a>,
    end: EventTime<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attendees: Vec<Attendee<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventTime<'a> {
    date_time: String,
    time_zone: &'a str,
}

#[derive(Serialize)]
struct Attendee<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertedEvent {
    id: String,
    html_link: Option<String>,
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventItem {
    summary: Option<String>,
    start: EventStart,
    html_link: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventStart {
    date_time: Option<String>,
    date: Option<String>,
}
