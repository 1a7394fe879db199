//! Deterministic extraction used when the NLU provider is unavailable or
//! returns something unusable.
//!
//! Works on the latest user message only: keyword intent classification,
//! clock-time patterns, `today`/`tomorrow`, and an email address.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate, NaiveTime};
use regex::Regex;

use super::{Interpretation, InterpretationSource};
use crate::types::Intent;

const BOOK_KEYWORDS: &[&str] = &["book", "schedule", "reserve", "set up", "arrange"];
const CHECK_KEYWORDS: &[&str] = &["free", "available", "busy", "slots", "check"];
const CANCEL_KEYWORDS: &[&str] = &["cancel", "delete", "remove"];
const SHOW_KEYWORDS: &[&str] = &[
    "upcoming",
    "my meetings",
    "my appointments",
    "list meetings",
    "show meetings",
];

const AFFIRMATIVE: &[&str] = &[
    "yes", "yeah", "yep", "sure", "ok", "okay", "confirm", "go ahead", "please do", "book it",
];

const NEGATIONS: &[&str] = &[
    "no", "not", "nope", "nah", "never", "dont", "don't", "wait", "hold", "stop", "cancel",
];

/// `H:MM` with optional am/pm, `H am/pm`, bare `H:MM`; tried in order.
fn time_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)\b(\d{1,2}):(\d{2})\s*(am|pm)?\b").expect("valid time pattern"),
            Regex::new(r"(?i)\b(\d{1,2})\s*(am|pm)\b").expect("valid time pattern"),
            Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("valid time pattern"),
        ]
    })
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email pattern")
    })
}

/// Classify the message by keyword family.
pub fn classify(message: &str) -> Intent {
    let lower = message.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has_any(BOOK_KEYWORDS) {
        Intent::Book
    } else if has_any(CHECK_KEYWORDS) {
        Intent::Check
    } else if has_any(CANCEL_KEYWORDS) {
        Intent::Cancel
    } else if has_any(SHOW_KEYWORDS) {
        Intent::ShowMeetings
    } else {
        Intent::Unknown
    }
}

/// Short go-ahead replies such as "yes" or "sure, go ahead".
///
/// Any negation ("no", "not", "don't", "wait", ...) disqualifies the message.
pub fn is_affirmative(message: &str) -> bool {
    let lower = message.trim().to_lowercase().replace('\u{2019}', "'");
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() || words.len() > 6 {
        return false;
    }
    if words.iter().any(|w| NEGATIONS.contains(w) || w.ends_with("n't")) {
        return false;
    }
    let padded = format!(" {} ", words.join(" "));
    AFFIRMATIVE.iter().any(|phrase| padded.contains(&format!(" {} ", phrase)))
}

/// First clock time mentioned, converted to 24-hour.
pub fn extract_time(message: &str) -> Option<NaiveTime> {
    for (index, pattern) in time_patterns().iter().enumerate() {
        let Some(caps) = pattern.captures(message) else {
            continue;
        };

        let (hour, minute, meridiem) = match index {
            0 => (&caps[1], &caps[2], caps.get(3)),
            1 => (&caps[1], "0", caps.get(2)),
            _ => (&caps[1], &caps[2], None),
        };
        let mut hour: u32 = hour.parse().ok()?;
        let minute: u32 = minute.parse().ok()?;
        let meridiem = meridiem.map(|m| m.as_str().to_ascii_lowercase());

        match meridiem.as_deref() {
            Some("pm") if hour != 12 => hour += 12,
            Some("am") if hour == 12 => hour = 0,
            _ => {}
        }

        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    None
}

/// `tomorrow` or `today`, resolved against `today`.
pub fn extract_relative_date(message: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = message.to_lowercase();
    if lower.contains("tomorrow") {
        Some(today + Duration::days(1))
    } else if lower.contains("today") {
        Some(today)
    } else {
        None
    }
}

/// First email address mentioned.
pub fn extract_email(message: &str) -> Option<String> {
    email_pattern().find(message).map(|m| m.as_str().to_string())
}

/// Build a full interpretation from `message` alone.
pub fn extract(message: &str, today: NaiveDate) -> Interpretation {
    let intent = classify(message);
    Interpretation {
        reply: canned_reply(intent).to_string(),
        intent,
        date: extract_relative_date(message, today),
        time: extract_time(message),
        summary: None,
        attendee_email: extract_email(message),
        source: InterpretationSource::Fallback,
    }
}

fn canned_reply(intent: Intent) -> &'static str {
    match intent {
        Intent::Book => "Let me look into booking that for you.",
        Intent::Check => "Let me check your availability.",
        Intent::Cancel => {
            "I can't cancel meetings yet, but I can book a meeting or check your availability."
        }
        Intent::ShowMeetings => "Let me fetch your upcoming meetings.",
        Intent::Unknown => {
            "Sorry, I didn't understand that. I can book meetings, check your availability, \
             or show your upcoming meetings."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn hm(time: Option<NaiveTime>) -> Option<String> {
        time.map(|t| t.format("%H:%M").to_string())
    }

    #[test]
    fn test_book_tomorrow_at_2pm() {
        let result = extract("Book a meeting tomorrow at 2pm", today());
        assert_eq!(result.intent, Intent::Book);
        assert_eq!(result.date, NaiveDate::from_ymd_opt(2026, 10, 17));
        assert_eq!(hm(result.time).as_deref(), Some("14:00"));
        assert_eq!(result.source, InterpretationSource::Fallback);
    }

    #[test]
    fn test_meridiem_edges() {
        assert_eq!(hm(extract_time("12am")).as_deref(), Some("00:00"));
        assert_eq!(hm(extract_time("12pm")).as_deref(), Some("12:00"));
        assert_eq!(hm(extract_time("at 12:30 AM")).as_deref(), Some("00:30"));
        assert_eq!(hm(extract_time("9 am please")).as_deref(), Some("09:00"));
    }

    #[test]
    fn test_time_pattern_priority() {
        assert_eq!(hm(extract_time("2:30 pm")).as_deref(), Some("14:30"));
        assert_eq!(hm(extract_time("14:45")).as_deref(), Some("14:45"));
        assert_eq!(hm(extract_time("between 3pm and 16:00")).as_deref(), Some("16:00"));
    }

    #[test]
    fn test_invalid_times_are_dropped() {
        assert_eq!(extract_time("13pm"), None);
        assert_eq!(extract_time("at 25:00"), None);
        assert_eq!(extract_time("no time here"), None);
    }

    #[test]
    fn test_intent_keywords() {
        assert_eq!(classify("Can you schedule a call?"), Intent::Book);
        assert_eq!(classify("Am I free on Friday?"), Intent::Check);
        assert_eq!(classify("please cancel my 3pm"), Intent::Cancel);
        assert_eq!(classify("show my upcoming meetings"), Intent::ShowMeetings);
        assert_eq!(classify("hello"), Intent::Unknown);
    }

    #[test]
    fn test_affirmative() {
        assert!(is_affirmative("yes"));
        assert!(is_affirmative("Sure, go ahead!"));
        assert!(!is_affirmative("yesterday was busy"));
        assert!(!is_affirmative("no thanks"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_negated_affirmative() {
        assert!(!is_affirmative("no, that's not ok"));
        assert!(!is_affirmative("ok wait"));
        assert!(!is_affirmative("sure, but don't book it"));
        assert!(!is_affirmative("I can't, sorry. ok?"));
        assert!(!is_affirmative("yes, cancel it"));
        assert!(is_affirmative("ok, that's fine"));
    }

    #[test]
    fn test_relative_dates() {
        assert_eq!(extract_relative_date("today works", today()), Some(today()));
        assert_eq!(extract_relative_date("next friday", today()), None);
    }

    #[test]
    fn test_email() {
        let result = extract("my email is a@b.com", today());
        assert_eq!(result.attendee_email.as_deref(), Some("a@b.com"));
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.date, None);
    }
}
