/// Message classification and admin command parsing
pub mod commands;
/// Side effects for classified messages
pub mod handlers;
/// Fetch, dedupe and dispatch loop
pub mod poll;
/// Runtime configuration and identities
pub mod state;

pub use commands::{classify, Action, ActionKind, AdminCommand};
pub use handlers::Dispatcher;
pub use poll::{PollError, PollLoop, PollOutcome};
pub use state::{BotConfig, Identities};
