use {
    async_trait::async_trait,
    parley_common::{Activity, ConversationReference},
    secrecy::Secret,
    serde_json::{Map, Value},
};

use crate::Result;

/// Delivers outbound activities to a remote channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Channel identifier (e.g. "msteams").
    fn id(&self) -> &str;

    /// Send `activity` into the referenced conversation.
    ///
    /// An activity without an id is created; an activity carrying an id
    /// updates that message in place. The returned activity carries the
    /// channel-assigned id.
    async fn send(&self, activity: Activity, reference: &ConversationReference) -> Result<Activity>;

    /// Merge one fragment's channel metadata into the accumulated bag of a
    /// stream. Last write wins per key unless the channel needs otherwise.
    fn merge_channel_data(&self, accumulated: &mut Map<String, Value>, update: Map<String, Value>) {
        accumulated.extend(update);
    }
}

/// Supplies the bearer credential for outbound calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Secret<String>>;
}

/// A fixed token, for local development and tests.
pub struct StaticToken(Secret<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<Secret<String>> {
        Ok(self.0.clone())
    }
}
