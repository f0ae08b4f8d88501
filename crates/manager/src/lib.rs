//! Parley
//!
//! Session-scoped streaming conversation manager. Each session is owned by
//! an actor that folds decoded stream events into a transcript through a
//! pure transition function and publishes every change to its observers.

pub mod config;
pub mod error;
pub mod logging;
pub mod observer;
pub mod paths;
pub mod session;
pub mod session_actor;
pub mod session_command;
pub mod state;
pub mod transition;

#[cfg(test)]
mod test_support;

pub use config::ManagerConfig;
pub use error::ManagerError;
pub use observer::{SessionView, Subscription};
pub use session_command::StartOutcome;
pub use state::SessionRegistry;
