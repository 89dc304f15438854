use std::{error::Error as StdError, fmt};

use thiserror::Error;

/// Which stage of outbound delivery a transport failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    /// A direct `send` issued by a handler.
    Send,
    /// An interim update flushed by a stream session.
    Flush,
    /// The terminal message sent by `close`.
    Close,
}

impl fmt::Display for TransportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Flush => f.write_str("flush"),
            Self::Close => f.write_str("close"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or undecodable inbound activity. Never retried.
    #[error("invalid activity: {message}")]
    Validation { message: String },

    /// A route or topic handler failed.
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Outbound delivery failed.
    #[error("{phase} failed: {source}")]
    Transport {
        phase: TransportPhase,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A required dependency slot had no provider at init time.
    #[error("plugin '{plugin}' requires '{slot}' ({type_name}) but nothing provides it")]
    Dependency {
        plugin: String,
        slot: String,
        type_name: &'static str,
    },

    /// A plugin was driven through its lifecycle out of order.
    #[error("plugin '{plugin}' cannot move from {from} to {to}")]
    Lifecycle {
        plugin: String,
        from: String,
        to: String,
    },

    #[error("a plugin named '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("no sender plugin registered under '{0}'")]
    UnknownSender(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn handler(
        handler: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Handler {
            handler: handler.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn transport(
        phase: TransportPhase,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            phase,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Whether this error should be surfaced to the caller as a client error
    /// rather than a server error.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::UnknownSender(_))
    }

    /// HTTP status code a host should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::UnknownSender(_) => 404,
            Self::Cancelled => 499,
            _ => 500,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// parley_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

crate::impl_context!();

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_distinguish_kinds() {
        assert_eq!(Error::validation("no conversation").status_code(), 400);
        assert_eq!(Error::handler("echo", "boom").status_code(), 500);
        assert_eq!(
            Error::transport(TransportPhase::Close, "503").status_code(),
            500
        );
        assert_eq!(Error::Cancelled.status_code(), 499);
        assert!(Error::validation("x").is_client_error());
        assert!(!Error::Cancelled.is_client_error());
    }

    #[test]
    fn transport_display_names_phase() {
        let err = Error::transport(TransportPhase::Flush, "connection reset");
        assert_eq!(err.to_string(), "flush failed: connection reset");
    }

    #[test]
    fn context_prefixes_message() {
        let missing: Option<u8> = None;
        let err = missing.context("no stream id").unwrap_err();
        assert_eq!(err.to_string(), "no stream id");

        let parsed: std::result::Result<u8, _> = "x".parse::<u8>();
        let err = parsed.with_context(|| "sequence").unwrap_err();
        assert!(err.to_string().starts_with("sequence: "));
    }
}
