//! Named, ordered topics and the event bus plugins observe.
//!
//! Every handler registered under a topic runs exactly once per emit, in
//! registration order and never concurrently with another handler of the
//! same emit. The emit resolves to the first non-null result, which lets one
//! primitive serve both "observer" topics (many side-effecting listeners) and
//! "responder" topics (one handler produces the authoritative payload).

use std::{collections::HashMap, future::Future, sync::Arc};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    activity::{Activity, ConversationReference},
};

/// Reserved topic names.
pub mod topics {
    pub const START: &str = "start";
    pub const ERROR: &str = "error";
    pub const ACTIVITY: &str = "activity";
    pub const ACTIVITY_SENT: &str = "activity.sent";
    pub const ACTIVITY_RESPONSE: &str = "activity.response";

    pub const RESERVED: &[&str] = &[START, ERROR, ACTIVITY, ACTIVITY_SENT, ACTIVITY_RESPONSE];

    pub fn is_reserved(name: &str) -> bool {
        RESERVED.contains(&name)
    }
}

// ── Event ───────────────────────────────────────────────────────────────────

/// Typed payload carried with an emit.
#[derive(Debug, Clone)]
pub enum Event {
    Start,
    Error {
        error: Arc<Error>,
        /// Plugin the failing turn was running on.
        plugin: Option<String>,
        activity: Option<Activity>,
    },
    Activity {
        activity: Activity,
        reference: ConversationReference,
        /// Opaque bearer credential the inbound request carried.
        token: Option<String>,
    },
    ActivitySent {
        activity: Activity,
        reference: ConversationReference,
    },
    ActivityResponse {
        activity: Activity,
        status: u16,
        body: Option<Value>,
    },
    /// Plugin-specific extension payload.
    Custom(Value),
}

impl Event {
    /// The reserved topic this payload is normally emitted on.
    pub fn topic(&self) -> Option<&'static str> {
        match self {
            Self::Start => Some(topics::START),
            Self::Error { .. } => Some(topics::ERROR),
            Self::Activity { .. } => Some(topics::ACTIVITY),
            Self::ActivitySent { .. } => Some(topics::ACTIVITY_SENT),
            Self::ActivityResponse { .. } => Some(topics::ACTIVITY_RESPONSE),
            Self::Custom(_) => None,
        }
    }

    pub fn activity(&self) -> Option<&Activity> {
        match self {
            Self::Activity { activity, .. }
            | Self::ActivitySent { activity, .. }
            | Self::ActivityResponse { activity, .. } => Some(activity),
            Self::Error { activity, .. } => activity.as_ref(),
            Self::Start | Self::Custom(_) => None,
        }
    }
}

/// Arguments every topic handler receives.
#[derive(Debug, Clone)]
pub struct EventArgs {
    /// Name of the plugin (or component) that emitted.
    pub source: String,
    pub topic: String,
    pub event: Option<Event>,
    pub cancel: CancellationToken,
}

// ── TopicHandler trait ──────────────────────────────────────────────────────

/// Trait implemented by every topic handler. Closures are adapted onto it by
/// [`EventBus::on_fn`], [`EventBus::on_async`] and [`EventBus::observe`].
#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// A human-readable name used in logs and handler errors.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Handle one emit. `Ok(Some(_))` offers a result to the emitter;
    /// `Ok(Some(Value::Null))` counts as no result.
    async fn handle(&self, args: &EventArgs) -> anyhow::Result<Option<Value>>;
}

struct SyncFnHandler<F> {
    label: String,
    f: F,
}

#[async_trait]
impl<F> TopicHandler for SyncFnHandler<F>
where
    F: Fn(&EventArgs) -> anyhow::Result<Option<Value>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.label
    }

    async fn handle(&self, args: &EventArgs) -> anyhow::Result<Option<Value>> {
        (self.f)(args)
    }
}

struct AsyncFnHandler<F> {
    label: String,
    f: F,
}

#[async_trait]
impl<F, Fut> TopicHandler for AsyncFnHandler<F>
where
    F: Fn(EventArgs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send,
{
    fn name(&self) -> &str {
        &self.label
    }

    async fn handle(&self, args: &EventArgs) -> anyhow::Result<Option<Value>> {
        (self.f)(args.clone()).await
    }
}

struct ObserverHandler<F> {
    label: String,
    f: F,
}

#[async_trait]
impl<F, Fut> TopicHandler for ObserverHandler<F>
where
    F: Fn(EventArgs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.label
    }

    async fn handle(&self, args: &EventArgs) -> anyhow::Result<Option<Value>> {
        (self.f)(args.clone()).await?;
        Ok(None)
    }
}

// ── Topic ───────────────────────────────────────────────────────────────────

/// A named, ordered list of handlers.
pub struct Topic {
    name: String,
    handlers: Vec<Arc<dyn TopicHandler>>,
}

impl Topic {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler once, in order. Returns the first non-null result;
    /// later handlers still run. A handler error aborts the emit.
    pub async fn emit(&self, args: &EventArgs) -> Result<Option<Value>> {
        let mut first: Option<Value> = None;

        for handler in &self.handlers {
            match handler.handle(args).await {
                Ok(Some(value)) if !value.is_null() => {
                    if first.is_none() {
                        debug!(topic = %self.name, handler = handler.name(), "topic handler produced result");
                        first = Some(value);
                    }
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(topic = %self.name, handler = handler.name(), error = %e, "topic handler failed");
                    return Err(Error::handler(handler.name(), e));
                },
            }
        }

        Ok(first)
    }
}

// ── EventBus ────────────────────────────────────────────────────────────────

/// Registry of topics keyed by name. Built up during configuration and
/// read-only while requests are processed.
#[derive(Default)]
pub struct EventBus {
    topics: HashMap<String, Topic>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `topic`, creating the topic on first use.
    pub fn on(&mut self, topic: &str, handler: Arc<dyn TopicHandler>) {
        info!(topic, handler = handler.name(), "topic handler registered");
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .handlers
            .push(handler);
    }

    /// Register a synchronous closure.
    pub fn on_fn<F>(&mut self, topic: &str, label: impl Into<String>, f: F)
    where
        F: Fn(&EventArgs) -> anyhow::Result<Option<Value>> + Send + Sync + 'static,
    {
        self.on(
            topic,
            Arc::new(SyncFnHandler {
                label: label.into(),
                f,
            }),
        );
    }

    /// Register an async closure that may produce a result.
    pub fn on_async<F, Fut>(&mut self, topic: &str, label: impl Into<String>, f: F)
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.on(
            topic,
            Arc::new(AsyncFnHandler {
                label: label.into(),
                f,
            }),
        );
    }

    /// Register an async closure that only observes.
    pub fn observe<F, Fut>(&mut self, topic: &str, label: impl Into<String>, f: F)
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on(
            topic,
            Arc::new(ObserverHandler {
                label: label.into(),
                f,
            }),
        );
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    pub fn has_handlers(&self, name: &str) -> bool {
        self.topics.get(name).is_some_and(|t| !t.is_empty())
    }

    /// List topic names (sorted).
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Emit on `topic` and return the first non-null handler result.
    pub async fn emit(
        &self,
        source: &str,
        topic: &str,
        event: Option<Event>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let Some(entry) = self.topics.get(topic).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        debug!(topic, source, count = entry.len(), "emitting topic");

        let args = EventArgs {
            source: source.to_string(),
            topic: topic.to_string(),
            event,
            cancel: cancel.clone(),
        };
        entry.emit(&args).await
    }
}
