//! Availability check step.
//!
//! `check` scans the whole working day; `book` checks only the requested slot
//! and, when it is taken, offers alternatives from the same day.

use chrono::{DateTime, NaiveDate, Utc};

use super::{fmt_date, fmt_time, DialogueEngine, Flow};
use crate::calendar::free_slots;
use crate::error::CalendarError;
use crate::types::{format_hhmm, Intent, SlotState};

pub(super) async fn run(engine: &DialogueEngine, state: &mut SlotState, confirm_gate: bool) -> Flow {
    state.suggestions.clear();

    match state.intent {
        Intent::Check => {
            check_day(engine, state).await;
            Flow::Stop
        }
        Intent::Book => check_slot(engine, state, confirm_gate).await,
        _ => Flow::Stop,
    }
}

async fn check_day(engine: &DialogueEngine, state: &mut SlotState) {
    state.offered_slot = None;
    let Some(date) = state.date else {
        state.needs_more_info = true;
        state.response = "I need a valid date to check availability.".to_string();
        return;
    };

    match day_slots(engine, state, date).await {
        Ok(slots) => {
            state.availability = Some(!slots.is_empty());
            state.suggestions = slots.iter().map(format_hhmm).collect();
            state.response = if slots.is_empty() {
                format!("No free slots found on {}.", fmt_date(date))
            } else {
                format!("Available slots on {}: {}", fmt_date(date), state.suggestions.join(", "))
            };
        }
        Err(e) => report_failure(state, e),
    }
}

async fn check_slot(engine: &DialogueEngine, state: &mut SlotState, confirm_gate: bool) -> Flow {
    let (Some(date), Some(time), Some(start)) = (state.date, state.start_time, state.requested_start())
    else {
        state.needs_more_info = true;
        state.response = "I need a valid date and time to check availability.".to_string();
        return Flow::Stop;
    };
    let end = start + engine.settings.slot_length;
    state.end_time = Some(end.time());

    // The user is answering an earlier offer for this exact slot
    let confirming = state.requested_slot_was_offered();

    let busy = match engine.calendar.query_busy(&state.calendar_id, start, end).await {
        Ok(busy) => busy,
        Err(e) => {
            report_failure(state, e);
            return Flow::Stop;
        }
    };

    if busy.iter().all(|b| !b.overlaps(start, end)) {
        state.availability = Some(true);
        if !confirm_gate || confirming {
            return Flow::Continue;
        }
        state.offered_slot = Some(start);
        state.response = format!(
            "Great! The slot on {} at {} is available. Shall I book it for you?",
            fmt_date(date),
            fmt_time(time)
        );
        return Flow::Stop;
    }

    state.availability = Some(false);
    state.offered_slot = None;
    match day_slots(engine, state, date).await {
        Ok(slots) => {
            state.suggestions = slots.iter().map(format_hhmm).collect();
            state.response = if slots.is_empty() {
                format!(
                    "Sorry, {} on {} is not available, and no other slots are free that day.",
                    fmt_time(time),
                    fmt_date(date)
                )
            } else {
                let inline: Vec<&str> = state
                    .suggestions
                    .iter()
                    .take(engine.settings.inline_suggestions)
                    .map(String::as_str)
                    .collect();
                format!(
                    "Sorry, {} on {} is not available. How about: {}?",
                    fmt_time(time),
                    fmt_date(date),
                    inline.join(", ")
                )
            };
        }
        Err(e) => {
            tracing::warn!(calendar_id = %state.calendar_id, error = %e, "looking up alternatives failed");
            state.response = format!(
                "Sorry, {} on {} is not available.",
                fmt_time(time),
                fmt_date(date)
            );
        }
    }
    Flow::Stop
}

/// Free slot starts within the working window on `date`.
async fn day_slots(
    engine: &DialogueEngine,
    state: &SlotState,
    date: NaiveDate,
) -> Result<Vec<DateTime<Utc>>, CalendarError> {
    let settings = &engine.settings;
    let (window_start, window_end) = settings.window.on(date);
    let busy = engine
        .calendar
        .query_busy(&state.calendar_id, window_start, window_end)
        .await?;
    Ok(free_slots(
        &busy,
        window_start,
        window_end,
        settings.slot_length,
        settings.max_suggestions,
    ))
}

fn report_failure(state: &mut SlotState, error: CalendarError) {
    tracing::warn!(calendar_id = %state.calendar_id, error = %error, "availability check failed");
    state.availability = None;
    state.offered_slot = None;
    state.response = format!("Error checking availability: {}", error);
}
