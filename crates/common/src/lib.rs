//! Shared types, error definitions, and utilities used across all parley crates.

pub mod activity;
pub mod error;
pub mod events;
pub mod retry;

pub use {
    activity::{Activity, ActivityKind, ConversationReference},
    error::{Error, FromMessage, Result, TransportPhase},
    events::{Event, EventArgs, EventBus, TopicHandler},
};
