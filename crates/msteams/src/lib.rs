//! Microsoft Teams sender plugin for parley.
//!
//! Delivers activities through the Bot Connector REST API, authenticating
//! with OAuth client credentials.

pub mod auth;
pub mod config;
pub mod outbound;
pub mod plugin;

pub use {
    auth::BotTokenProvider, config::MsTeamsConfig, outbound::BotConnectorTransport,
    plugin::MsTeamsPlugin,
};
