//! Core types for cal-concierge.
//!
//! This module defines the Slot State threaded through the dialogue
//! pipeline, the intent vocabulary, and transcript turns.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default meeting title when the user never names one.
pub const DEFAULT_SUMMARY: &str = "Meeting";

/// What the user wants this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Intent {
    /// Book a specific slot
    Book,
    /// Whole-day availability query
    Check,
    /// Cancel an appointment
    Cancel,
    /// List upcoming meetings
    ShowMeetings,
    /// Anything else
    #[default]
    Unknown,
}

impl Intent {
    /// Parse a provider label. Unrecognised labels become `Unknown`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "book" => Intent::Book,
            "check" => Intent::Check,
            "cancel" => Intent::Cancel,
            "show_meetings" | "show_appointments" | "list_meetings" | "list_appointments" => {
                Intent::ShowMeetings
            }
            _ => Intent::Unknown,
        }
    }

    /// Stable label, as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Book => "book",
            Intent::Check => "check",
            Intent::Cancel => "cancel",
            Intent::ShowMeetings => "show_meetings",
            Intent::Unknown => "unknown",
        }
    }

    /// Intents that may reach the calendar through the availability step.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Intent::Book | Intent::Check)
    }
}

impl From<String> for Intent {
    fn from(label: String) -> Self {
        Intent::parse(&label)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-session record carried across turns.
///
/// Only the dialogue pipeline mutates it, one turn at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    /// Classified goal of the current turn
    #[serde(default)]
    pub intent: Intent,

    /// Target day
    #[serde(default)]
    pub date: Option<NaiveDate>,

    /// Target start (UTC)
    #[serde(default, with = "hhmm")]
    pub start_time: Option<NaiveTime>,

    /// `start_time` plus the slot length
    #[serde(default, with = "hhmm")]
    pub end_time: Option<NaiveTime>,

    /// Result of the last availability check
    #[serde(default)]
    pub availability: Option<bool>,

    /// Whether this turn inserted an event
    #[serde(default)]
    pub booking_confirmed: bool,

    /// Free start times ("HH:MM") found by the last availability check
    #[serde(default)]
    pub suggestions: Vec<String>,

    pub calendar_id: String,

    pub summary: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub attendees: Vec<String>,

    #[serde(default)]
    pub needs_more_info: bool,

    #[serde(default)]
    pub response: String,

    #[serde(default)]
    pub history: Vec<ChatTurn>,

    /// Slot last reported free and awaiting the user's go-ahead
    #[serde(default)]
    pub offered_slot: Option<DateTime<Utc>>,
}

impl SlotState {
    /// Create an empty state for a calendar.
    pub fn new(calendar_id: impl Into<String>) -> Self {
        Self {
            intent: Intent::Unknown,
            date: None,
            start_time: None,
            end_time: None,
            availability: None,
            booking_confirmed: false,
            suggestions: Vec::new(),
            calendar_id: calendar_id.into(),
            summary: DEFAULT_SUMMARY.to_string(),
            description: None,
            attendees: Vec::new(),
            needs_more_info: false,
            response: String::new(),
            history: Vec::new(),
            offered_slot: None,
        }
    }

    /// Override the default meeting title.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Record an inbound message and reset the per-turn flags.
    pub fn begin_turn(&mut self, message: &str) {
        if !message.is_empty() {
            self.history.push(ChatTurn::user(message));
        }
        self.booking_confirmed = false;
        self.needs_more_info = false;
    }

    /// Append an assistant turn to the transcript.
    pub fn push_assistant(&mut self, content: &str) {
        self.history.push(ChatTurn::assistant(content));
    }

    /// Latest user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
    }

    /// Requested start as a UTC timestamp.
    pub fn requested_start(&self) -> Option<DateTime<Utc>> {
        let naive = self.date?.and_time(self.start_time?);
        Some(Utc.from_utc_datetime(&naive))
    }

    /// Add an attendee unless already present.
    pub fn add_attendee(&mut self, email: &str) {
        let email = email.trim();
        if !email.is_empty() && !self.attendees.iter().any(|a| a.eq_ignore_ascii_case(email)) {
            self.attendees.push(email.to_string());
        }
    }

    /// Whether the requested slot is the one previously reported free.
    pub fn requested_slot_was_offered(&self) -> bool {
        self.availability == Some(true)
            && self.offered_slot.is_some()
            && self.offered_slot == self.requested_start()
    }
}

/// Serde helpers for `Option<NaiveTime>` as 24-hour `HH:MM`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => serializer.serialize_str(&t.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => super::parse_clock_time(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid time: {}", s))),
            None => Ok(None),
        }
    }
}

/// Parse `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Parse `HH:MM` (seconds tolerated).
pub fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// Format a timestamp's clock time as `HH:MM`.
pub fn format_hhmm(at: &DateTime<Utc>) -> String {
    at.format(hhmm::FORMAT).to_string()
}
