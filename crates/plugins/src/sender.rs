use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_channels::ChannelTransport,
    parley_common::{Activity, ConversationReference, Error, Result, TransportPhase},
    parley_streaming::{StreamConfig, StreamSession},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

/// Outbound capability of a channel plugin.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Deliver `activity`. An id on the activity updates that message.
    async fn send(&self, activity: Activity, reference: &ConversationReference) -> Result<Activity>;

    /// Open a stream session addressed at `reference`.
    fn create_stream(
        &self,
        reference: ConversationReference,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> StreamSession;
}

/// [`Sender`] backed directly by a [`ChannelTransport`].
#[derive(Clone)]
pub struct TransportSender {
    transport: Arc<dyn ChannelTransport>,
}

impl TransportSender {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn ChannelTransport> {
        &self.transport
    }
}

#[async_trait]
impl Sender for TransportSender {
    async fn send(
        &self,
        mut activity: Activity,
        reference: &ConversationReference,
    ) -> Result<Activity> {
        activity.apply_reference(reference);
        debug!(
            channel = self.transport.id(),
            kind = activity.kind.name(),
            update = activity.id.is_some(),
            "sending activity"
        );
        self.transport
            .send(activity, reference)
            .await
            .map_err(|e| Error::transport(TransportPhase::Send, e))
    }

    fn create_stream(
        &self,
        reference: ConversationReference,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> StreamSession {
        StreamSession::new(Arc::clone(&self.transport), reference, config, cancel)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        parley_channels::MemoryTransport,
        parley_common::activity::{ChannelAccount, ConversationAccount},
    };

    fn reference() -> ConversationReference {
        ConversationReference {
            service_url: "https://smba.example/".into(),
            channel_id: "msteams".into(),
            conversation: ConversationAccount {
                id: "a:conv".into(),
                ..Default::default()
            },
            bot: ChannelAccount {
                id: "28:bot".into(),
                ..Default::default()
            },
            user: None,
            activity_id: None,
        }
    }

    #[tokio::test]
    async fn send_addresses_activity_and_wraps_failures() {
        let transport = Arc::new(MemoryTransport::new());
        let sender = TransportSender::new(Arc::clone(&transport) as Arc<dyn ChannelTransport>);

        let sent = sender
            .send(Activity::message("hi"), &reference())
            .await
            .unwrap();
        assert_eq!(sent.conversation_id(), Some("a:conv"));
        assert_eq!(sent.from.unwrap().id, "28:bot");

        transport.fail_next(1);
        let err = sender
            .send(Activity::message("again"), &reference())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                phase: TransportPhase::Send,
                ..
            }
        ));
    }
}
