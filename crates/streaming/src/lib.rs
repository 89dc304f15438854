//! Streamed replies.
//!
//! A [`StreamSession`] collects fragments from a producer (typically a model
//! emitting tokens), pushes them to the channel as numbered interim updates
//! of a single message, and finishes with one final message carrying the
//! full content.

pub mod config;
pub mod fragment;
pub mod session;

pub use {
    config::StreamConfig,
    fragment::Fragment,
    session::{StreamErrorSink, StreamSession},
};
