//! The knock sequence execution engine.
//!
//! [`engine::KnockEngine`] is the entry point: it runs sequences on their own
//! tokio tasks, sends the configured packets through [`transport`], verifies
//! the target afterwards via [`resource`] and publishes live progress through
//! [`state::StatePublisher`].

pub mod engine;
pub mod resolver;
pub mod resource;
pub mod state;
pub mod transport;

pub use engine::{EngineConfig, KnockEngine, RunHandle, RunOutcome};
pub use state::StatePublisher;
