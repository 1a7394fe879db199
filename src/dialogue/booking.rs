//! Booking step. Inserts the event; never retried.

use super::{fmt_date, fmt_time, DialogueEngine};
use crate::calendar::{CreatedEvent, NewEvent};
use crate::types::SlotState;

pub(super) async fn run(engine: &DialogueEngine, state: &mut SlotState) -> Option<CreatedEvent> {
    let (Some(date), Some(time), Some(start)) = (state.date, state.start_time, state.requested_start())
    else {
        state.needs_more_info = true;
        state.response = "I need a date and time before I can book.".to_string();
        return None;
    };
    let end = start + engine.settings.slot_length;

    let event = NewEvent {
        summary: state.summary.clone(),
        description: state.description.clone(),
        attendees: state.attendees.clone(),
        start,
        end,
    };

    match engine.calendar.insert_event(&state.calendar_id, &event).await {
        Ok(created) => {
            tracing::info!(
                calendar_id = %state.calendar_id,
                event_id = %created.id,
                start = %start,
                "meeting booked"
            );
            state.booking_confirmed = true;
            state.offered_slot = None;
            state.end_time = Some(end.time());
            state.response = format!(
                "Perfect! Your '{}' is booked for {} at {}. Event link: {}",
                state.summary,
                fmt_date(date),
                fmt_time(time),
                created.link
            );
            Some(created)
        }
        Err(e) => {
            tracing::error!(calendar_id = %state.calendar_id, error = %e, "booking failed");
            state.booking_confirmed = false;
            state.response = format!("Booking failed: {}", e);
            None
        }
    }
}
