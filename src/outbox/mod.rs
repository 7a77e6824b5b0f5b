//! Outbox delivery — the per-message transition engine and the poller that
//! drives it.

pub mod poller;
pub mod transition;

pub use poller::{CycleSummary, OutboxPoller, spawn_outbox_poller};
pub use transition::TransitionEngine;
