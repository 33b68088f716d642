//! Real-time event delivery server library.
//!
//! Pushes notification, message, read-receipt and reel events to every open
//! connection of a user, tracks delivery and acknowledgement per user, and
//! replays missed events after a reconnect.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
