//! Channel transport seam.
//!
//! A channel (Teams, a test double, …) implements [`ChannelTransport`] to
//! deliver outbound activities and [`TokenProvider`] to hand out the bearer
//! credential its HTTP calls need.

pub mod error;
pub mod memory;
pub mod transport;

pub use {
    error::{Error, Result},
    memory::MemoryTransport,
    transport::{ChannelTransport, StaticToken, TokenProvider},
};
