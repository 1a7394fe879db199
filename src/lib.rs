//! # cal-concierge
//!
//! Conversational calendar assistant.
//!
//! ## Overview
//!
//! cal-concierge turns chat messages into calendar operations: checking a
//! day's availability, booking a meeting, listing upcoming meetings. Each
//! message runs a short, fixed pipeline over a per-session record of what
//! is known so far, so a booking can be assembled over several turns.
//!
//! ## Core Concepts
//!
//! - **Slot State**: the per-session record carried across turns
//! - **Intent Interpreter**: an NLU provider with a deterministic fallback
//! - **Dialogue pipeline**: Interpret, Availability Check, Booking
//! - **Availability Planner**: pure free-slot search over busy intervals
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cal_concierge::{Gateway, GatewayConfig, GatewayServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::load("config.json")?;
//!     let gateway = Arc::new(Gateway::from_config(config)?);
//!     GatewayServer::new(gateway).start().await?;
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod calendar;
pub mod nlu;
pub mod dialogue;
pub mod gateway;
pub mod cli;

// Re-export commonly used types
pub use types::{ChatTurn, Intent, Role, SlotState};
pub use error::{CalendarError, GatewayError, NluError};
pub use calendar::{CalendarBackend, InMemoryCalendar};
pub use nlu::{IntentInterpreter, NluProvider};
pub use dialogue::{DialogueEngine, DialogueSettings};
pub use gateway::{Gateway, GatewayConfig, GatewayServer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
