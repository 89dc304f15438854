//! Plugin system: lifecycle, typed dependency slots, and the outbound
//! `Sender` capability a channel plugin exposes to the app.

pub mod bundled;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod sender;

pub use {
    plugin::{DependencySlot, Dependencies, InitContext, Plugin, PluginState},
    registry::PluginRegistry,
    sender::{Sender, TransportSender},
};
