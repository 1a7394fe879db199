//! Natural-language understanding for cal-concierge.
//!
//! An [`NluProvider`] turns the conversation into raw text that should
//! contain a JSON document. The [`IntentInterpreter`] wraps the provider:
//! it bounds the call with a timeout, strips markup, decodes the document
//! into a typed [`Interpretation`], and falls back to [`fallback::extract`]
//! whenever any of that fails. Callers always get an `Interpretation`.
//!
//! ```text
//! transcript ─▶ provider ─▶ strip fences ─▶ decode ─▶ Interpretation
//!                   │ error/timeout              │ malformed
//!                   └──────────▶ fallback ◀──────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::NluError;
use crate::types::{parse_clock_time, parse_date, ChatTurn, Intent, Role, SlotState};

pub mod fallback;
pub mod gemini;

pub use gemini::GeminiProvider;

/// Reply used when the provider's document has no reply text.
pub const DEFAULT_REPLY: &str = "Sorry, I didn't understand that.";

/// What a provider is asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NluRequest {
    /// Role description and output contract
    pub instructions: String,
    /// Conversation window, oldest first
    pub transcript: Vec<ChatTurn>,
}

impl NluRequest {
    /// Render the transcript as `User: ...` / `Assistant: ...` lines.
    pub fn render_transcript(&self) -> String {
        self.transcript
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", speaker, turn.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trait that all NLU providers must implement.
#[async_trait]
pub trait NluProvider: Send + Sync {
    /// Provider identifier (e.g., "gemini").
    fn name(&self) -> &str;

    /// Produce raw text for the request. No shape guarantee.
    async fn generate(&self, request: &NluRequest) -> Result<String, NluError>;
}

/// Where an interpretation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretationSource {
    Provider,
    Fallback,
}

/// Normalised understanding of the latest turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub reply: String,
    pub intent: Intent,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub summary: Option<String>,
    pub attendee_email: Option<String>,
    pub source: InterpretationSource,
}

/// Facts already known for the session, included in the prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub today: Option<NaiveDate>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub attendees: Vec<String>,
}

impl PromptContext {
    pub fn from_state(state: &SlotState, today: NaiveDate) -> Self {
        Self {
            today: Some(today),
            date: state.date,
            start_time: state.start_time,
            attendees: state.attendees.clone(),
        }
    }
}

/// Wraps an optional provider with decoding and the deterministic fallback.
pub struct IntentInterpreter {
    provider: Option<Arc<dyn NluProvider>>,
    timeout: Duration,
    max_history_turns: usize,
}

impl IntentInterpreter {
    /// Create an interpreter. `None` means fallback extraction only.
    pub fn new(provider: Option<Arc<dyn NluProvider>>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            max_history_turns: 20,
        }
    }

    /// Limit how many of the newest turns are sent to the provider.
    pub fn with_max_history_turns(mut self, turns: usize) -> Self {
        self.max_history_turns = turns.max(1);
        self
    }

    /// Interpret the conversation. Never fails.
    pub async fn interpret(&self, history: &[ChatTurn], context: &PromptContext) -> Interpretation {
        let today = context.today.unwrap_or_else(|| chrono::Utc::now().date_naive());
        let latest = history
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
            .unwrap_or("");

        let Some(provider) = &self.provider else {
            return fallback::extract(latest, today);
        };

        let request = self.build_request(history, context, today);
        let raw = match tokio::time::timeout(self.timeout, provider.generate(&request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(provider = provider.name(), error = %e, "provider failed, using fallback");
                return fallback::extract(latest, today);
            }
            Err(_) => {
                let e = NluError::Timeout(self.timeout.as_millis() as u64);
                tracing::warn!(provider = provider.name(), error = %e, "provider timed out, using fallback");
                return fallback::extract(latest, today);
            }
        };

        match decode(&raw) {
            Ok(interpretation) => interpretation,
            Err(e) => {
                tracing::warn!(provider = provider.name(), error = %e, "undecodable provider output, using fallback");
                tracing::debug!(raw = %raw, "provider output");
                fallback::extract(latest, today)
            }
        }
    }

    fn build_request(&self, history: &[ChatTurn], context: &PromptContext, today: NaiveDate) -> NluRequest {
        let skip = history.len().saturating_sub(self.max_history_turns);
        NluRequest {
            instructions: instructions(context, today),
            transcript: history[skip..].to_vec(),
        }
    }
}

fn instructions(context: &PromptContext, today: NaiveDate) -> String {
    let known = |v: Option<String>| v.unwrap_or_else(|| "unknown".to_string());
    let attendees = if context.attendees.is_empty() {
        "unknown".to_string()
    } else {
        context.attendees.join(", ")
    };

    format!(
        r#"You are a friendly calendar assistant that books meetings, checks availability and lists upcoming meetings.
Today is {today} and all times are UTC.
Already known: date={date}, time={time}, attendees={attendees}.

Reply naturally to the latest user message. If details are missing, ask for them. If the user is making small talk, respond appropriately.
Resolve relative dates such as "tomorrow" or "next Friday" against today.

Respond with ONLY a JSON object of this exact shape:
{{"reply": "...", "intent": "book|check|cancel|show_meetings|unknown", "date": "YYYY-MM-DD or null", "time": "HH:MM (24-hour) or null", "summary": "meeting title or null", "email": "attendee email or null"}}"#,
        today = today.format("%Y-%m-%d"),
        date = known(context.date.map(|d| d.format("%Y-%m-%d").to_string())),
        time = known(context.start_time.map(|t| t.format("%H:%M").to_string())),
        attendees = attendees,
    )
}

/// Provider document, loosely typed.
#[derive(Debug, Default, Deserialize)]
struct ProviderReply {
    #[serde(default)]
    reply: Option<Value>,
    #[serde(default)]
    intent: Option<Value>,
    #[serde(default)]
    date: Option<Value>,
    #[serde(default)]
    time: Option<Value>,
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default, alias = "attendee_email")]
    email: Option<Value>,
}

/// Remove Markdown code fences and anything around the JSON object.
pub fn strip_markup(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string ("json") on the opening fence line
        text = rest.split_once('\n').map_or("", |(_, body)| body);
    }
    if let Some(body) = text.trim_end().strip_suffix("```") {
        text = body;
    }
    let text = text.trim();

    match (text.find('{'), text.rfind('}')) {
        (Some(open), Some(close)) if open < close => &text[open..=close],
        _ => text,
    }
}

/// Decode raw provider text into an interpretation.
pub fn decode(raw: &str) -> Result<Interpretation, NluError> {
    let body = strip_markup(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|e| NluError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(NluError::Malformed(format!("expected an object, got {}", value)));
    }
    let reply: ProviderReply =
        serde_json::from_value(value).map_err(|e| NluError::Malformed(e.to_string()))?;

    Ok(Interpretation {
        reply: text(reply.reply).unwrap_or_else(|| DEFAULT_REPLY.to_string()),
        intent: text(reply.intent).map(|i| Intent::parse(&i)).unwrap_or_default(),
        date: text(reply.date).and_then(|d| parse_date(&d)),
        time: text(reply.time).and_then(|t| parse_clock_time(&t)),
        summary: text(reply.summary),
        attendee_email: text(reply.email).filter(|e| e.contains('@')),
        source: InterpretationSource::Provider,
    })
}

/// Non-empty textual content of a JSON scalar.
fn text(value: Option<Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let s = s.trim();
    match s.to_ascii_lowercase().as_str() {
        "" | "null" | "none" | "..." => None,
        _ => Some(s.to_string()),
    }
}

/// Provider that replays queued responses. Records every request.
///
/// When the queue is empty it fails, which exercises the fallback path.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, NluError>>>,
    requests: Mutex<Vec<NluRequest>>,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw text reply.
    pub fn reply(mut self, raw: impl Into<String>) -> Self {
        self.replies.get_mut().push_back(Ok(raw.into()));
        self
    }

    /// Queue a JSON document reply.
    pub fn reply_json(self, value: Value) -> Self {
        self.reply(value.to_string())
    }

    /// Queue a failure.
    pub fn fail(mut self, error: NluError) -> Self {
        self.replies.get_mut().push_back(Err(error));
        self
    }

    /// Delay every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a reply after construction.
    pub async fn push_reply(&self, raw: impl Into<String>) {
        self.replies.lock().await.push_back(Ok(raw.into()));
    }

    /// Requests seen so far.
    pub async fn requests(&self) -> Vec<NluRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl NluProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &NluRequest) -> Result<String, NluError> {
        self.requests.lock().await.push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(NluError::NotConfigured("script exhausted".to_string())))
    }
}
