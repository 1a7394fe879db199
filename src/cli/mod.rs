//! CLI helpers for cal-concierge.
//!
//! The terminal chat loop and small formatting utilities used by the
//! binary's subcommands.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::calendar::UpcomingEvent;
use crate::gateway::{ChatRequest, Gateway};

/// Words that end the chat loop.
const EXIT_WORDS: &[&str] = &["exit", "quit", "bye"];

/// Expand tilde (~) in paths.
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Converse with the gateway line by line until EOF or an exit word.
///
/// Returns the number of turns run.
pub async fn run_chat<R, W>(
    gateway: &Gateway,
    session_id: &str,
    input: R,
    mut output: W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(b"Calendar assistant ready. Type 'exit' to quit.\n")
        .await?;

    let mut lines = input.lines();
    let mut turns = 0;
    loop {
        output.write_all(b"You: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&message.to_lowercase().as_str()) {
            output.write_all(b"Goodbye!\n").await?;
            break;
        }

        let reply = gateway
            .chat(ChatRequest {
                message: message.to_string(),
                session_id: Some(session_id.to_string()),
                calendar_id: None,
            })
            .await;
        turns += 1;
        output
            .write_all(format!("Assistant: {}\n", reply.response).as_bytes())
            .await?;
    }

    output.flush().await?;
    Ok(turns)
}

/// One line per event, or a note that there are none.
pub fn format_upcoming(events: &[UpcomingEvent]) -> String {
    if events.is_empty() {
        return "No upcoming events found.".to_string();
    }
    events
        .iter()
        .map(|e| format!("{}  {}  {}", e.start, e.summary, e.link))
        .collect::<Vec<_>>()
        .join("\n")
}
