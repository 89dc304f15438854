//! Per-turn handler context.
//!
//! A [`Context`] owns the turn's handler chain and a cursor into it. Each
//! call to [`Context::next`] runs the handler under the cursor; a handler
//! that never calls it ends the chain.

use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_common::{
        Activity, ConversationReference, Error, Event, EventBus, Result, events::topics,
    },
    parley_plugins::Sender,
    parley_streaming::{StreamConfig, StreamErrorSink, StreamSession},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::Route;

pub struct Context {
    activity: Activity,
    reference: ConversationReference,
    token: Option<String>,
    sender_key: String,
    sender: Arc<dyn Sender>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    stream_config: StreamConfig,
    chain: Vec<Route>,
    cursor: usize,
    status: Option<u16>,
    stream: Option<StreamSession>,
}

impl Context {
    pub fn new(
        activity: Activity,
        reference: ConversationReference,
        sender_key: impl Into<String>,
        sender: Arc<dyn Sender>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            activity,
            reference,
            token: None,
            sender_key: sender_key.into(),
            sender,
            bus,
            cancel,
            stream_config: StreamConfig::default(),
            chain: Vec::new(),
            cursor: 0,
            status: None,
            stream: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    #[must_use]
    pub fn with_chain(mut self, chain: Vec<Route>) -> Self {
        self.chain = chain;
        self.cursor = 0;
        self
    }

    /// The inbound activity.
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn reference(&self) -> &ConversationReference {
        &self.reference
    }

    /// Bearer credential the inbound request carried, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn sender_key(&self) -> &str {
        &self.sender_key
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn routes_matched(&self) -> usize {
        self.chain.len()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Override the HTTP status the turn answers with.
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Run the next handler in the chain. Resolves to `None` past the end.
    pub async fn next(&mut self) -> anyhow::Result<Option<Value>> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled.into());
        }
        let Some(route) = self.chain.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        debug!(route = route.label(), position = self.cursor, "running route");

        route.handler().handle(self).await.map_err(|e| {
            if e.downcast_ref::<Error>().is_some() {
                e
            } else {
                Error::handler(route.label(), e).into()
            }
        })
    }

    /// Send an activity into the conversation and announce it on
    /// `activity.sent`.
    pub async fn send(&mut self, activity: Activity) -> Result<Activity> {
        let sent = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            sent = self.sender.send(activity, &self.reference) => sent?,
        };
        self.bus
            .emit(
                &self.sender_key,
                topics::ACTIVITY_SENT,
                Some(Event::ActivitySent {
                    activity: sent.clone(),
                    reference: self.reference.clone(),
                }),
                &self.cancel,
            )
            .await?;
        Ok(sent)
    }

    /// Send a text message threaded under the inbound activity.
    pub async fn reply(&mut self, text: impl Into<String>) -> Result<Activity> {
        let mut activity = Activity::message(text);
        activity.reply_to_id = self.activity.id.clone();
        self.send(activity).await
    }

    pub async fn typing(&mut self) -> Result<Activity> {
        self.send(Activity::typing()).await
    }

    /// The turn's stream session, created on first use. The app closes it
    /// once the chain has finished.
    pub fn stream(&mut self) -> StreamSession {
        if let Some(stream) = &self.stream {
            return stream.clone();
        }
        let stream = self.sender.create_stream(
            self.reference.clone(),
            self.stream_config,
            self.cancel.clone(),
        );
        stream.set_error_sink(Arc::new(BusErrorSink {
            bus: Arc::clone(&self.bus),
            source: self.sender_key.clone(),
            activity: Some(self.activity.clone()),
            cancel: self.cancel.clone(),
        }));
        self.stream = Some(stream.clone());
        stream
    }

    pub fn take_stream(&mut self) -> Option<StreamSession> {
        self.stream.take()
    }
}

/// Forwards abandoned-stream errors to the bus `error` topic.
pub struct BusErrorSink {
    pub bus: Arc<EventBus>,
    pub source: String,
    pub activity: Option<Activity>,
    pub cancel: CancellationToken,
}

#[async_trait]
impl StreamErrorSink for BusErrorSink {
    async fn report(&self, error: Arc<Error>) {
        let event = Event::Error {
            error,
            plugin: Some(self.source.clone()),
            activity: self.activity.clone(),
        };
        if let Err(e) = self
            .bus
            .emit(&self.source, topics::ERROR, Some(event), &self.cancel)
            .await
        {
            warn!(error = %e, "error topic handler failed");
        }
    }
}
