//! Interpret step: merge the interpreter's reading of the latest message
//! into the state and decide whether anything is missing.

use super::{DialogueEngine, Flow, TurnOutcome};
use crate::nlu::{fallback, Interpretation, InterpretationSource, PromptContext};
use crate::types::{Intent, SlotState};

const ASK_EMAIL: &str = "What is your email address so I can send you the invite?";

pub(super) async fn run(
    engine: &DialogueEngine,
    state: &mut SlotState,
    outcome: &mut TurnOutcome,
) -> Flow {
    let context = PromptContext::from_state(state, engine.today());
    let mut reading = engine.interpreter.interpret(&state.history, &context).await;
    outcome.source = Some(reading.source);

    // A provider that says "unknown" means it
    if reading.source == InterpretationSource::Fallback {
        if reading.intent == Intent::Unknown {
            reading.intent = carried_intent(state, &reading);
        }
        tracing::info!(intent = %reading.intent, "interpreted with fallback extractor");
    }

    merge(engine, state, &reading);
    if state.intent != Intent::Book && state.offered_slot.take().is_some() {
        tracing::debug!(intent = %state.intent, "offered slot withdrawn");
    }

    match state.intent {
        Intent::ShowMeetings => {
            state.response = upcoming(engine, state).await;
            Flow::Stop
        }
        Intent::Book | Intent::Check => {
            let missing = Missing::of(state);
            state.needs_more_info = missing.any();
            if state.intent == Intent::Book && missing.only_attendee() {
                state.response = ASK_EMAIL.to_string();
            } else if state.needs_more_info && reading.source == InterpretationSource::Fallback {
                state.response = missing.question(state.intent);
            }

            if state.needs_more_info {
                Flow::Stop
            } else {
                Flow::Continue
            }
        }
        Intent::Cancel | Intent::Unknown => {
            state.needs_more_info = true;
            Flow::Stop
        }
    }
}

/// Intent for a message the fallback extractor could not classify.
///
/// A bare "yes" right after a slot was offered is a go-ahead for that
/// slot, and a message that only supplies details continues the previous
/// request.
fn carried_intent(state: &SlotState, reading: &Interpretation) -> Intent {
    let affirmed = state.offered_slot.is_some()
        && state.last_user_message().is_some_and(fallback::is_affirmative);
    if affirmed {
        return Intent::Book;
    }

    let supplies_details =
        reading.date.is_some() || reading.time.is_some() || reading.attendee_email.is_some();
    if supplies_details && state.intent.is_actionable() {
        state.intent
    } else {
        Intent::Unknown
    }
}

/// Copy supplied values into the state. Absent values never clear known ones.
fn merge(engine: &DialogueEngine, state: &mut SlotState, reading: &Interpretation) {
    state.intent = reading.intent;
    state.response = reading.reply.clone();

    if let Some(date) = reading.date {
        state.date = Some(date);
    }
    if let Some(time) = reading.time {
        engine.set_start_time(state, time);
    }
    if let Some(summary) = &reading.summary {
        state.summary = summary.clone();
    }
    if let Some(email) = &reading.attendee_email {
        state.add_attendee(email);
    }
}

async fn upcoming(engine: &DialogueEngine, state: &SlotState) -> String {
    let listed = engine
        .calendar
        .list_upcoming(&state.calendar_id, engine.settings.upcoming_limit)
        .await;

    match listed {
        Ok(events) if events.is_empty() => {
            "You have no upcoming meetings or appointments.".to_string()
        }
        Ok(events) => {
            let lines: Vec<String> = events
                .iter()
                .map(|e| format!("- {} at {} [link]({})", e.summary, e.start, e.link))
                .collect();
            format!("Here are your next meetings:\n{}", lines.join("\n"))
        }
        Err(e) => {
            tracing::warn!(calendar_id = %state.calendar_id, error = %e, "listing upcoming events failed");
            format!("Error fetching your meetings: {}", e)
        }
    }
}

/// Required fields still absent for the current intent.
struct Missing {
    date: bool,
    time: bool,
    attendee: bool,
}

impl Missing {
    fn of(state: &SlotState) -> Self {
        let booking = state.intent == Intent::Book;
        Self {
            date: state.date.is_none(),
            time: booking && state.start_time.is_none(),
            attendee: booking && state.attendees.is_empty(),
        }
    }

    fn any(&self) -> bool {
        self.date || self.time || self.attendee
    }

    fn only_attendee(&self) -> bool {
        self.attendee && !self.date && !self.time
    }

    /// Deterministic follow-up when no provider reply is available.
    fn question(&self, intent: Intent) -> String {
        match (self.date, self.time) {
            (true, true) => "What date and time would you like to meet?".to_string(),
            (true, false) if intent == Intent::Check => {
                "Which day should I check? You can say \"today\", \"tomorrow\" or a date like 2026-10-17."
                    .to_string()
            }
            (true, false) => "What date would you like?".to_string(),
            (false, true) => "What time would you like?".to_string(),
            (false, false) => ASK_EMAIL.to_string(),
        }
    }
}
