//! Free-slot planning.
//!
//! Pure functions: no I/O, no clock. The caller fetches busy intervals
//! from a [`CalendarBackend`](super::CalendarBackend) and hands them in.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use super::BusyInterval;

/// Working hours searched for free slots, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for WorkWindow {
    fn default() -> Self {
        Self { start_hour: 9, end_hour: 18 }
    }
}

impl WorkWindow {
    /// `[start, end)` of the window on `date`.
    ///
    /// `end_hour == 24` means midnight of the following day.
    pub fn on(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
        (
            midnight + Duration::hours(self.start_hour as i64),
            midnight + Duration::hours(self.end_hour as i64),
        )
    }
}

/// Starts of up to `max_results` free slots of length `slot` inside
/// `[window_start, window_end)`.
///
/// Sweeps a cursor from `window_start`. A candidate that overlaps a busy
/// interval moves the cursor to that interval's end; an accepted slot
/// moves it to the slot's end. Results are strictly increasing and
/// pairwise disjoint.
pub fn free_slots(
    busy: &[BusyInterval],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    slot: Duration,
    max_results: usize,
) -> Vec<DateTime<Utc>> {
    let mut slots = Vec::new();
    if slot <= Duration::zero() || max_results == 0 {
        return slots;
    }

    let mut intervals: Vec<BusyInterval> = busy
        .iter()
        .copied()
        .filter(|b| b.end > b.start)
        .collect();
    intervals.sort_by_key(|b| (b.start, b.end));

    let mut cursor = window_start;
    while slots.len() < max_results && cursor + slot <= window_end {
        let slot_end = cursor + slot;
        match intervals.iter().find(|b| b.overlaps(cursor, slot_end)) {
            Some(conflict) => cursor = conflict.end,
            None => {
                slots.push(cursor);
                cursor = slot_end;
            }
        }
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, hour, minute, 0).unwrap()
    }

    fn hm(slots: &[DateTime<Utc>]) -> Vec<String> {
        slots.iter().map(|s| s.format("%H:%M").to_string()).collect()
    }

    #[test]
    fn test_empty_calendar() {
        let slots = free_slots(&[], at(9, 0), at(18, 0), Duration::minutes(60), 3);
        assert_eq!(hm(&slots), vec!["09:00", "10:00", "11:00"]);
    }

    #[test]
    fn test_skips_to_end_of_busy_interval() {
        let busy = vec![
            BusyInterval::new(at(9, 30), at(10, 15)),
            BusyInterval::new(at(11, 0), at(12, 0)),
        ];
        let slots = free_slots(&busy, at(9, 0), at(18, 0), Duration::minutes(60), 3);
        assert_eq!(hm(&slots), vec!["12:00", "13:00", "14:00"]);
    }

    #[test]
    fn test_unsorted_input() {
        let busy = vec![
            BusyInterval::new(at(13, 0), at(18, 0)),
            BusyInterval::new(at(9, 0), at(12, 0)),
        ];
        let slots = free_slots(&busy, at(9, 0), at(18, 0), Duration::minutes(60), 10);
        assert_eq!(hm(&slots), vec!["12:00"]);
    }

    #[test]
    fn test_full_day() {
        let busy = vec![BusyInterval::new(at(8, 0), at(19, 0))];
        assert!(free_slots(&busy, at(9, 0), at(18, 0), Duration::minutes(60), 3).is_empty());
    }

    #[test]
    fn test_slot_must_fit_window() {
        let slots = free_slots(&[], at(17, 30), at(18, 0), Duration::minutes(60), 3);
        assert!(slots.is_empty());
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(free_slots(&[], at(9, 0), at(18, 0), Duration::zero(), 3).is_empty());
        assert!(free_slots(&[], at(9, 0), at(18, 0), Duration::minutes(60), 0).is_empty());

        // Zero-length busy intervals block nothing
        let busy = vec![BusyInterval::new(at(9, 0), at(9, 0))];
        let slots = free_slots(&busy, at(9, 0), at(11, 0), Duration::minutes(60), 5);
        assert_eq!(hm(&slots), vec!["09:00", "10:00"]);
    }

    #[test]
    fn test_work_window() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let (start, end) = WorkWindow::default().on(date);
        assert_eq!(start, at(9, 0));
        assert_eq!(end, at(18, 0));
    }

    fn busy_strategy() -> impl Strategy<Value = Vec<BusyInterval>> {
        prop::collection::vec((0i64..900, 0i64..240), 0..12).prop_map(|raw| {
            raw.into_iter()
                .map(|(offset, len)| {
                    let start = at(6, 0) + Duration::minutes(offset);
                    BusyInterval::new(start, start + Duration::minutes(len))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_slots_are_ordered_disjoint_and_free(
            busy in busy_strategy(),
            start_offset in 0i64..240,
            window_len in 0i64..720,
            slot_minutes in 15i64..120,
            max_results in 0usize..20,
        ) {
            let window_start = at(7, 0) + Duration::minutes(start_offset);
            let window_end = window_start + Duration::minutes(window_len);
            let slot = Duration::minutes(slot_minutes);

            let slots = free_slots(&busy, window_start, window_end, slot, max_results);

            prop_assert!(slots.len() <= max_results);
            for pair in slots.windows(2) {
                prop_assert!(pair[0] + slot <= pair[1]);
            }
            for s in &slots {
                prop_assert!(*s >= window_start);
                prop_assert!(*s + slot <= window_end);
                for b in &busy {
                    prop_assert!(!b.overlaps(*s, *s + slot));
                }
            }
        }

        #[test]
        fn prop_first_slot_is_earliest_free(
            busy in busy_strategy(),
            slot_minutes in 15i64..120,
        ) {
            let slot = Duration::minutes(slot_minutes);
            let slots = free_slots(&busy, at(9, 0), at(18, 0), slot, 1);

            // No earlier minute-aligned start in the window is free
            let limit = slots.first().copied().unwrap_or(at(18, 0));
            let mut cursor = at(9, 0);
            while cursor < limit && cursor + slot <= at(18, 0) {
                prop_assert!(busy.iter().any(|b| b.overlaps(cursor, cursor + slot)));
                cursor = cursor + Duration::minutes(1);
            }
        }
    }
}
