//! Messaging service — conversation threading and outbox delivery for SMS,
//! MMS and email.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod model;
pub mod outbox;
pub mod providers;
pub mod shutdown;
pub mod store;
