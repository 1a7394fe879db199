//! Dialogue pipeline.
//!
//! One inbound message runs a fixed sequence of steps over the session's
//! [`SlotState`]:
//!
//! ```text
//! Interpret ──▶ AvailabilityCheck ──▶ Booking
//!     │                │
//!     └─ Stop          └─ Stop
//! ```
//!
//! Each step mutates the state in place and returns a [`Flow`]. The driver
//! never loops; the next message re-enters at `Interpret` with the state
//! left by this one. Provider and calendar failures are turned into
//! response text inside the steps, so a turn always completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};

use crate::calendar::{CalendarBackend, CreatedEvent, TimeoutCalendar, WorkWindow};
use crate::nlu::{IntentInterpreter, InterpretationSource};
use crate::types::{Intent, SlotState, DEFAULT_SUMMARY};

mod availability;
mod booking;
mod interpret;

/// Whether the driver moves on to the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Pipeline step names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Interpret,
    AvailabilityCheck,
    Booking,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Interpret => "interpret",
            Step::AvailabilityCheck => "availability_check",
            Step::Booking => "booking",
        }
    }
}

/// What happened during one turn, beyond the state itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Last step that ran
    pub last_step: Step,
    /// Origin of the interpretation, if the Interpret step ran
    pub source: Option<InterpretationSource>,
    /// Event inserted this turn
    pub created: Option<CreatedEvent>,
}

impl TurnOutcome {
    fn new(first: Step) -> Self {
        Self { last_step: first, source: None, created: None }
    }

    pub fn used_fallback(&self) -> bool {
        self.source == Some(InterpretationSource::Fallback)
    }
}

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct DialogueSettings {
    pub window: WorkWindow,
    pub slot_length: chrono::Duration,
    /// Free slots kept in `suggestions`
    pub max_suggestions: usize,
    /// Alternatives quoted in a "busy" reply
    pub inline_suggestions: usize,
    pub upcoming_limit: usize,
    pub default_summary: String,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            window: WorkWindow::default(),
            slot_length: chrono::Duration::minutes(60),
            max_suggestions: 5,
            inline_suggestions: 3,
            upcoming_limit: 5,
            default_summary: DEFAULT_SUMMARY.to_string(),
        }
    }
}

/// Runs dialogue turns against one calendar backend.
pub struct DialogueEngine {
    interpreter: IntentInterpreter,
    calendar: Arc<dyn CalendarBackend>,
    settings: DialogueSettings,
    today: Option<NaiveDate>,
}

impl DialogueEngine {
    /// Create an engine. Every calendar call is bounded by `calendar_timeout`.
    pub fn new(
        interpreter: IntentInterpreter,
        calendar: Arc<dyn CalendarBackend>,
        calendar_timeout: Duration,
        settings: DialogueSettings,
    ) -> Self {
        Self {
            interpreter,
            calendar: Arc::new(TimeoutCalendar::new(calendar, calendar_timeout)),
            settings,
            today: None,
        }
    }

    /// Pin the current date, for reproducible relative dates.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    pub fn calendar(&self) -> &Arc<dyn CalendarBackend> {
        &self.calendar
    }

    /// Current date in UTC.
    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Fresh state for a session on `calendar_id`.
    pub fn new_state(&self, calendar_id: &str) -> SlotState {
        SlotState::new(calendar_id).with_summary(self.settings.default_summary.clone())
    }

    /// Set the start time and derive the end time.
    pub fn set_start_time(&self, state: &mut SlotState, start: NaiveTime) {
        state.start_time = Some(start);
        state.end_time = Some(start + self.settings.slot_length);
    }

    /// Run one conversational turn for `message`.
    ///
    /// The final response is appended to the transcript as the assistant
    /// turn.
    pub async fn run_turn(&self, state: &mut SlotState, message: &str) -> TurnOutcome {
        state.begin_turn(message);
        let mut outcome = TurnOutcome::new(Step::Interpret);

        if interpret::run(self, state, &mut outcome).await == Flow::Continue {
            self.continue_from_availability(state, true, &mut outcome).await;
        }

        let response = state.response.clone();
        state.push_assistant(&response);
        tracing::debug!(
            intent = %state.intent,
            last_step = outcome.last_step.as_str(),
            needs_more_info = state.needs_more_info,
            "turn complete"
        );
        outcome
    }

    /// Run the pipeline from the availability check with `intent` already
    /// decided, skipping interpretation and the confirmation gate.
    ///
    /// The caller fills in date and time first. Nothing is added to the
    /// transcript.
    pub async fn run_direct(&self, state: &mut SlotState, intent: Intent) -> TurnOutcome {
        state.intent = intent;
        state.booking_confirmed = false;
        state.needs_more_info = false;

        let mut outcome = TurnOutcome::new(Step::AvailabilityCheck);
        self.continue_from_availability(state, false, &mut outcome).await;
        outcome
    }

    async fn continue_from_availability(
        &self,
        state: &mut SlotState,
        confirm_gate: bool,
        outcome: &mut TurnOutcome,
    ) {
        outcome.last_step = Step::AvailabilityCheck;
        if availability::run(self, state, confirm_gate).await == Flow::Stop {
            return;
        }

        outcome.last_step = Step::Booking;
        outcome.created = booking::run(self, state).await;
    }
}

/// `YYYY-MM-DD`.
fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `HH:MM`.
fn fmt_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::InMemoryCalendar;
    use crate::nlu::ScriptedProvider;
    use chrono::{DateTime, TimeZone};
    use proptest::prelude::*;
    use serde_json::json;

    const CAL: &str = "team@example.com";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn tomorrow_at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, hour, 0, 0).unwrap()
    }

    fn engine(provider: Option<Arc<ScriptedProvider>>, calendar: Arc<InMemoryCalendar>) -> DialogueEngine {
        let provider = provider.map(|p| p as Arc<dyn crate::nlu::NluProvider>);
        DialogueEngine::new(
            IntentInterpreter::new(provider, Duration::from_secs(1)),
            calendar,
            Duration::from_secs(1),
            DialogueSettings::default(),
        )
        .with_today(today())
    }

    #[tokio::test]
    async fn test_three_turn_booking() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_json(json!({
                    "reply": "Sure, booking tomorrow at 14:00.",
                    "intent": "book", "date": "2026-10-17", "time": "14:00",
                    "summary": null, "email": null
                }))
                .reply_json(json!({
                    "reply": "Thanks!", "intent": "book",
                    "date": null, "time": null, "email": "a@b.com"
                }))
                .reply_json(json!({"reply": "Booking now.", "intent": "book"})),
        );
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = engine(Some(provider), calendar.clone());
        let mut state = engine.new_state(CAL);

        engine.run_turn(&mut state, "book a meeting tomorrow at 2pm").await;
        assert!(state.needs_more_info);
        assert_eq!(state.response, "What is your email address so I can send you the invite?");
        assert_eq!(calendar.total_calls(), 0);

        engine.run_turn(&mut state, "my email is a@b.com").await;
        assert!(!state.needs_more_info);
        assert_eq!(state.availability, Some(true));
        assert!(!state.booking_confirmed);
        assert!(state.response.contains("Shall I book it"));
        assert_eq!(state.end_time, NaiveTime::from_hms_opt(15, 0, 0));
        assert_eq!(calendar.insert_count(), 0);

        let outcome = engine.run_turn(&mut state, "yes").await;
        assert!(state.booking_confirmed);
        assert_eq!(outcome.last_step, Step::Booking);
        assert!(state.response.contains("https://calendar.local/"));
        assert_eq!(calendar.event_count(CAL).await, 1);
        assert_eq!(state.offered_slot, None);

        // Six turns: three user, three assistant
        assert_eq!(state.history.len(), 6);
    }

    #[tokio::test]
    async fn test_repeated_yes_does_not_double_book() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_json(json!({"intent": "book", "date": "2026-10-17", "time": "10:00", "email": "a@b.com"}))
                .reply_json(json!({"intent": "book"}))
                .reply_json(json!({"intent": "book"})),
        );
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = engine(Some(provider), calendar.clone());
        let mut state = engine.new_state(CAL);

        engine.run_turn(&mut state, "book tomorrow 10:00, a@b.com").await;
        engine.run_turn(&mut state, "yes").await;
        assert!(state.booking_confirmed);

        engine.run_turn(&mut state, "yes").await;
        assert!(!state.booking_confirmed);
        assert_eq!(state.availability, Some(false));
        assert_eq!(calendar.event_count(CAL).await, 1);
    }

    #[tokio::test]
    async fn test_declined_offer_is_not_booked() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_json(json!({"intent": "book", "date": "2026-10-17", "time": "10:00", "email": "a@b.com"}))
                .reply_json(json!({"intent": "unknown", "reply": "No problem, I won't book it."})),
        );
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = engine(Some(provider), calendar.clone());
        let mut state = engine.new_state(CAL);

        engine.run_turn(&mut state, "book tomorrow 10:00, a@b.com").await;
        assert!(state.response.contains("Shall I book it"));

        let outcome = engine.run_turn(&mut state, "no, that's not ok").await;
        assert_eq!(state.intent, Intent::Unknown);
        assert!(!state.booking_confirmed);
        assert!(outcome.created.is_none());
        assert_eq!(state.offered_slot, None);
        assert_eq!(state.response, "No problem, I won't book it.");
        assert_eq!(calendar.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_offer_needs_fresh_confirmation() {
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = engine(None, calendar.clone());
        let mut state = engine.new_state(CAL);
        state.add_attendee("a@b.com");

        engine.run_turn(&mut state, "book tomorrow at 10am").await;
        assert!(state.offered_slot.is_some());

        engine.run_turn(&mut state, "hello").await;
        engine.run_turn(&mut state, "ok").await;
        assert_eq!(calendar.insert_count(), 0);
        assert!(!state.booking_confirmed);
    }

    #[tokio::test]
    async fn test_busy_slot_offers_alternatives() {
        let calendar = Arc::new(
            InMemoryCalendar::new()
                .with_busy(CAL, tomorrow_at(9), tomorrow_at(10))
                .with_busy(CAL, tomorrow_at(14), tomorrow_at(15)),
        );
        let provider = Arc::new(ScriptedProvider::new().reply_json(json!({
            "intent": "book", "date": "2026-10-17", "time": "14:30", "email": "a@b.com"
        })));
        let engine = engine(Some(provider), calendar.clone());
        let mut state = engine.new_state(CAL);

        engine.run_turn(&mut state, "book 2:30pm tomorrow").await;

        assert_eq!(state.availability, Some(false));
        assert_eq!(state.suggestions, vec!["10:00", "11:00", "12:00", "13:00", "15:00"]);
        assert_eq!(
            state.response,
            "Sorry, 14:30 on 2026-10-17 is not available. How about: 10:00, 11:00, 12:00?"
        );
        assert_eq!(calendar.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_full_day_reports_no_alternatives() {
        let calendar = Arc::new(InMemoryCalendar::new().with_busy(CAL, tomorrow_at(8), tomorrow_at(19)));
        let engine = engine(None, calendar);
        let mut state = engine.new_state(CAL);
        state.add_attendee("a@b.com");

        engine.run_turn(&mut state, "book tomorrow at 11am").await;

        assert_eq!(state.availability, Some(false));
        assert!(state.suggestions.is_empty());
        assert!(state.response.ends_with("and no other slots are free that day."));
    }

    #[tokio::test]
    async fn test_check_lists_free_slots() {
        let calendar = Arc::new(InMemoryCalendar::new().with_busy(CAL, tomorrow_at(9), tomorrow_at(12)));
        let engine = engine(None, calendar);
        let mut state = engine.new_state(CAL);

        let outcome = engine.run_turn(&mut state, "am I free tomorrow?").await;

        assert_eq!(state.intent, Intent::Check);
        assert_eq!(outcome.last_step, Step::AvailabilityCheck);
        assert!(outcome.used_fallback());
        assert_eq!(state.suggestions, vec!["12:00", "13:00", "14:00", "15:00", "16:00"]);
        assert_eq!(
            state.response,
            "Available slots on 2026-10-17: 12:00, 13:00, 14:00, 15:00, 16:00"
        );
    }

    #[tokio::test]
    async fn test_unknown_intent_makes_no_calendar_calls() {
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = engine(None, calendar.clone());
        let mut state = engine.new_state(CAL);

        let outcome = engine.run_turn(&mut state, "hello").await;

        assert_eq!(state.intent, Intent::Unknown);
        assert!(state.needs_more_info);
        assert_eq!(outcome.last_step, Step::Interpret);
        assert_eq!(calendar.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_nulls_keep_known_fields() {
        let provider = Arc::new(ScriptedProvider::new().reply_json(json!({
            "reply": "ok", "intent": "book", "date": null, "time": null, "summary": null
        })));
        let calendar = Arc::new(InMemoryCalendar::new().with_busy(CAL, tomorrow_at(0), tomorrow_at(23)));
        let engine = engine(Some(provider), calendar);

        let mut state = engine.new_state(CAL).with_summary("Design review");
        state.date = NaiveDate::from_ymd_opt(2026, 10, 17);
        engine.set_start_time(&mut state, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        state.add_attendee("a@b.com");

        engine.run_turn(&mut state, "book it").await;

        assert_eq!(state.date, NaiveDate::from_ymd_opt(2026, 10, 17));
        assert_eq!(state.start_time, NaiveTime::from_hms_opt(10, 0, 0));
        assert_eq!(state.summary, "Design review");
        assert_eq!(state.attendees, vec!["a@b.com".to_string()]);
    }

    #[tokio::test]
    async fn test_show_meetings_bypasses_availability() {
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = engine(None, calendar.clone());
        let mut state = engine.new_state(CAL);

        engine.run_turn(&mut state, "show my upcoming meetings").await;
        assert_eq!(state.response, "You have no upcoming meetings or appointments.");
        assert_eq!(calendar.listing_count(), 1);
        assert_eq!(calendar.busy_query_count(), 0);
    }

    #[tokio::test]
    async fn test_calendar_failure_becomes_response() {
        let calendar = Arc::new(InMemoryCalendar::new());
        calendar.set_fail_queries(true);
        let engine = engine(None, calendar);
        let mut state = engine.new_state(CAL);

        engine.run_turn(&mut state, "any slots tomorrow?").await;

        assert!(state.response.starts_with("Error checking availability:"));
        assert_eq!(state.availability, None);
    }

    #[tokio::test]
    async fn test_calendar_timeout_becomes_response() {
        let calendar = Arc::new(InMemoryCalendar::new().with_latency(Duration::from_millis(200)));
        let engine = DialogueEngine::new(
            IntentInterpreter::new(None, Duration::from_secs(1)),
            calendar,
            Duration::from_millis(20),
            DialogueSettings::default(),
        )
        .with_today(today());
        let mut state = engine.new_state(CAL);

        engine.run_turn(&mut state, "check tomorrow").await;
        assert!(state.response.contains("timed out"));
    }

    #[tokio::test]
    async fn test_direct_booking_skips_confirmation() {
        let calendar = Arc::new(InMemoryCalendar::new());
        let engine = engine(None, calendar.clone());
        let mut state = engine.new_state(CAL);
        state.date = NaiveDate::from_ymd_opt(2026, 10, 17);
        engine.set_start_time(&mut state, NaiveTime::from_hms_opt(16, 0, 0).unwrap());

        let outcome = engine.run_direct(&mut state, Intent::Book).await;

        assert!(state.booking_confirmed);
        assert!(outcome.created.is_some());
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn test_booking_failure_keeps_flag_false() {
        let calendar = Arc::new(InMemoryCalendar::new());
        calendar.set_fail_inserts(true);
        let engine = engine(None, calendar);
        let mut state = engine.new_state(CAL);
        state.date = NaiveDate::from_ymd_opt(2026, 10, 17);
        engine.set_start_time(&mut state, NaiveTime::from_hms_opt(16, 0, 0).unwrap());

        let outcome = engine.run_direct(&mut state, Intent::Book).await;

        assert!(!state.booking_confirmed);
        assert!(outcome.created.is_none());
        assert!(state.response.starts_with("Booking failed:"));
    }

    fn scripted_turn() -> impl Strategy<Value = (serde_json::Value, &'static str)> {
        (
            prop::sample::select(vec!["book", "check", "cancel", "show_meetings", "unknown"]),
            prop::option::of(prop::sample::select(vec!["2026-10-17", "2026-10-18"])),
            prop::option::of(prop::sample::select(vec!["09:00", "10:00", "14:30", "17:00"])),
            prop::option::of(Just("a@b.com")),
            prop::sample::select(vec![
                "yes",
                "ok",
                "no",
                "not ok",
                "no, that's not ok",
                "hello",
                "book tomorrow at 10am with a@b.com",
            ]),
        )
            .prop_map(|(intent, date, time, email, message)| {
                let reply =
                    json!({"reply": "ok", "intent": intent, "date": date, "time": time, "email": email});
                (reply, message)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_insert_only_when_available_and_booking(
            turns in prop::collection::vec(scripted_turn(), 1..8),
            busy_morning in any::<bool>(),
        ) {
            tokio_test::block_on(async {
                let mut provider = ScriptedProvider::new();
                for (reply, _) in &turns {
                    provider = provider.reply_json(reply.clone());
                }
                let mut calendar = InMemoryCalendar::new();
                if busy_morning {
                    calendar = calendar.with_busy(CAL, tomorrow_at(9), tomorrow_at(12));
                }
                let calendar = Arc::new(calendar);
                let engine = engine(Some(Arc::new(provider)), calendar.clone());
                let mut state = engine.new_state(CAL);

                for (reply, message) in &turns {
                    let before = calendar.insert_count();
                    engine.run_turn(&mut state, message).await;
                    if reply["intent"] != "book" {
                        prop_assert_eq!(calendar.insert_count(), before);
                    }
                    if calendar.insert_count() > before {
                        prop_assert_eq!(state.intent, Intent::Book);
                        prop_assert_eq!(state.availability, Some(true));
                        prop_assert!(state.booking_confirmed);
                    }
                }
                Ok(())
            })?;
        }
    }
}
