//! Per-turn stream session.
//!
//! Producers call [`StreamSession::emit`] without blocking; a single
//! background task drains the queue into interim updates of one channel
//! message. [`StreamSession::close`] waits for the queue to settle and sends
//! the final message exactly once.
//!
//! The first interim update must come back with a channel-assigned id; every
//! later update and the final message reuse it, so the whole stream stays one
//! message on the channel.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};

use {
    async_trait::async_trait,
    parley_channels::{ChannelTransport, Error as ChannelError},
    parley_common::{
        Activity, ActivityKind, ConversationReference, Error, Result, TransportPhase,
        activity::{Attachment, Entity, STREAM_INFO_ENTITY, StreamType},
        retry::{RetryError, retry},
    },
    serde_json::{Map, Value},
    tokio::sync::Notify,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{Fragment, StreamConfig};

/// Receives flush failures that made the session give up.
#[async_trait]
pub trait StreamErrorSink: Send + Sync {
    async fn report(&self, error: Arc<Error>);
}

/// Cheap-to-clone handle to one stream.
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn ChannelTransport>,
    reference: ConversationReference,
    config: StreamConfig,
    cancel: CancellationToken,
    sink: OnceLock<Arc<dyn StreamErrorSink>>,
    state: Mutex<State>,
    /// Signalled whenever the flush task goes idle or the stream is abandoned.
    settled: Notify,
    close_lock: tokio::sync::Mutex<()>,
}

struct State {
    queue: VecDeque<Fragment>,
    text: String,
    attachments: Vec<Attachment>,
    entities: Vec<Entity>,
    channel_data: Map<String, Value>,
    /// Sequence number the next interim update will carry.
    next_sequence: u64,
    remote_id: Option<String>,
    emitted: bool,
    flush_scheduled: bool,
    closed: bool,
    abandoned: Option<Abandoned>,
    result: Option<Activity>,
}

#[derive(Debug, Clone)]
enum Abandoned {
    Cancelled,
    FlushFailed(String),
    /// The final message was attempted once and failed.
    CloseFailed(String),
}

impl Abandoned {
    fn to_error(&self) -> Error {
        match self {
            Self::Cancelled => Error::Cancelled,
            Self::FlushFailed(message) => Error::transport(TransportPhase::Flush, message.clone()),
            Self::CloseFailed(message) => Error::transport(TransportPhase::Close, message.clone()),
        }
    }
}

impl State {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            text: String::new(),
            attachments: Vec::new(),
            entities: Vec::new(),
            channel_data: Map::new(),
            next_sequence: 1,
            remote_id: None,
            emitted: false,
            flush_scheduled: false,
            closed: false,
            abandoned: None,
            result: None,
        }
    }
}

impl StreamSession {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        reference: ConversationReference,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                reference,
                config,
                cancel,
                sink: OnceLock::new(),
                state: Mutex::new(State::new()),
                settled: Notify::new(),
                close_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Install the sink abandoned flushes are reported to. Only the first
    /// call has an effect.
    pub fn set_error_sink(&self, sink: Arc<dyn StreamErrorSink>) {
        if self.inner.sink.set(sink).is_err() {
            debug!("stream error sink already set, ignoring");
        }
    }

    /// Remote id of the streamed message, once the first update landed.
    pub fn stream_id(&self) -> Option<String> {
        self.lock().remote_id.clone()
    }

    pub fn reference(&self) -> &ConversationReference {
        &self.inner.reference
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether anything was ever emitted into this session.
    pub fn has_content(&self) -> bool {
        self.lock().emitted
    }

    /// Queue a fragment. Ignored once the session is closed or abandoned.
    pub fn emit(&self, fragment: impl Into<Fragment>) {
        let fragment = fragment.into();
        let spawn_flush = {
            let mut state = self.lock();
            if state.closed || state.abandoned.is_some() {
                debug!("stream no longer accepts fragments, dropping");
                return;
            }
            state.queue.push_back(fragment);
            state.emitted = true;
            !std::mem::replace(&mut state.flush_scheduled, true)
        };
        if spawn_flush {
            tokio::spawn(self.clone().flush_loop());
        }
    }

    /// Show a progress note as an informative update.
    pub fn update(&self, status: impl Into<String>) {
        self.emit(Fragment::Status(status.into()));
    }

    /// Finish the stream and return the final message.
    ///
    /// Returns the cached message on repeated calls and `None` when nothing
    /// was ever emitted. Otherwise waits until every queued fragment has been
    /// flushed, then sends the final message once. The final send is not
    /// retried: a failure is returned now and from every later call.
    pub async fn close(&self) -> Result<Option<Activity>> {
        let _serial = self.inner.close_lock.lock().await;

        let final_message = loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(result) = &state.result {
                    return Ok(Some(result.clone()));
                }
                if let Some(reason) = &state.abandoned {
                    return Err(reason.to_error());
                }
                if !state.emitted {
                    return Ok(None);
                }
                if state.queue.is_empty() && !state.flush_scheduled {
                    state.closed = true;
                    break self.final_message(&state);
                }
            }

            tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return Err(Error::Cancelled),
                () = &mut settled => {},
            }
        };

        let sent = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {
                self.abandon(Abandoned::Cancelled);
                return Err(Error::Cancelled);
            },
            sent = self.inner.transport.send(final_message, &self.inner.reference) => sent,
        };
        let sent = match sent {
            Ok(sent) => sent,
            Err(e) => {
                warn!(
                    conversation_id = %self.inner.reference.conversation.id,
                    error = %e,
                    "final stream message failed"
                );
                let reason = Abandoned::CloseFailed(e.to_string());
                self.abandon(reason.clone());
                return Err(reason.to_error());
            },
        };

        info!(
            conversation_id = %self.inner.reference.conversation.id,
            stream_id = sent.id.as_deref().unwrap_or_default(),
            "stream closed"
        );
        self.lock().result = Some(sent.clone());
        Ok(Some(sent))
    }

    async fn flush_loop(self) {
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {
                self.abandon(Abandoned::Cancelled);
                return;
            },
            () = tokio::time::sleep(self.inner.config.flush_interval) => {},
        }

        loop {
            let next = {
                let mut state = self.lock();
                let next = self.next_update(&mut state);
                if next.is_none() {
                    state.flush_scheduled = false;
                }
                next.map(|update| (update, state.remote_id.is_none()))
            };
            let Some(((sequence, update), needs_id)) = next else {
                self.inner.settled.notify_waiters();
                return;
            };

            let inner = &self.inner;
            let outcome = retry(&inner.config.retry, &inner.cancel, "stream flush", |_| {
                let update = update.clone();
                async move {
                    let sent = inner.transport.send(update, &inner.reference).await?;
                    if needs_id && sent.id.is_none() {
                        return Err(ChannelError::invalid_input(
                            "channel assigned no id to the streamed message",
                        ));
                    }
                    Ok::<_, ChannelError>(sent)
                }
            })
            .await;

            match outcome {
                Ok(sent) => {
                    let mut state = self.lock();
                    if state.remote_id.is_none() {
                        state.remote_id = sent.id;
                    }
                    state.next_sequence += 1;
                    debug!(
                        sequence,
                        stream_id = state.remote_id.as_deref().unwrap_or_default(),
                        queued = state.queue.len(),
                        "stream update flushed"
                    );
                },
                Err(RetryError::Cancelled) => {
                    self.abandon(Abandoned::Cancelled);
                    return;
                },
                Err(RetryError::Exhausted { attempts, last }) => {
                    let last_message = last.to_string();
                    let error = Error::transport(TransportPhase::Flush, last);
                    warn!(sequence, attempts, error = %error, "abandoning stream");
                    let reason = Abandoned::FlushFailed(last_message);
                    if let Some(sink) = self.inner.sink.get() {
                        sink.report(Arc::new(error)).await;
                    }
                    self.abandon(reason);
                    return;
                },
            }
        }
    }

    /// Take the next batch off the queue and build its interim update.
    ///
    /// A status fragment at the head of the queue goes out alone; otherwise
    /// up to `batch_size` content fragments are folded into the accumulators.
    fn next_update(&self, state: &mut State) -> Option<(u64, Activity)> {
        let head = state.queue.pop_front()?;
        let sequence = state.next_sequence;

        if let Fragment::Status(note) = head {
            return Some((sequence, self.interim(note, StreamType::Informative, sequence, state)));
        }

        self.absorb(state, head);
        let mut taken = 1;
        while taken < self.inner.config.batch_size
            && state.queue.front().is_some_and(|f| !f.is_status())
        {
            if let Some(fragment) = state.queue.pop_front() {
                self.absorb(state, fragment);
            }
            taken += 1;
        }

        let text = state.text.clone();
        Some((sequence, self.interim(text, StreamType::Streaming, sequence, state)))
    }

    fn absorb(&self, state: &mut State, fragment: Fragment) {
        match fragment {
            Fragment::Text(delta) => state.text.push_str(&delta),
            Fragment::Status(_) => {},
            Fragment::Content {
                text,
                attachments,
                entities,
                channel_data,
            } => {
                if let Some(delta) = text {
                    state.text.push_str(&delta);
                }
                state.attachments.extend(attachments);
                state.entities.extend(
                    entities
                        .into_iter()
                        .filter(|e| e.entity_type != STREAM_INFO_ENTITY),
                );
                if let Some(update) = channel_data {
                    self.inner
                        .transport
                        .merge_channel_data(&mut state.channel_data, update);
                }
            },
        }
    }

    fn interim(
        &self,
        text: String,
        stream_type: StreamType,
        sequence: u64,
        state: &State,
    ) -> Activity {
        let mut activity = Activity::new(ActivityKind::Typing { text: Some(text) }).with_entity(
            Entity::stream_info(state.remote_id.as_deref(), stream_type, Some(sequence)),
        );
        activity.id = state.remote_id.clone();
        activity.apply_reference(&self.inner.reference);
        activity
    }

    fn final_message(&self, state: &State) -> Activity {
        let mut activity = Activity::new(ActivityKind::Message {
            text: state.text.clone(),
            attachments: state.attachments.clone(),
        });
        activity.entities = state.entities.clone();
        activity.entities.push(Entity::stream_info(
            state.remote_id.as_deref(),
            StreamType::Final,
            None,
        ));
        if !state.channel_data.is_empty() {
            activity.channel_data = Some(state.channel_data.clone());
        }
        activity.id = state.remote_id.clone();
        activity.apply_reference(&self.inner.reference);
        activity
    }

    fn abandon(&self, reason: Abandoned) {
        {
            let mut state = self.lock();
            state.queue.clear();
            state.flush_scheduled = false;
            state.abandoned = Some(reason);
        }
        self.inner.settled.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use {
        super::*,
        parley_channels::MemoryTransport,
        parley_common::{
            activity::{ChannelAccount, ConversationAccount},
            retry::RetryPolicy,
        },
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
            user: Some(ChannelAccount {
                id: "29:user".into(),
                ..Default::default()
            }),
            activity_id: Some("inbound-1".into()),
        }
    }

    fn fast() -> StreamConfig {
        StreamConfig::default()
            .with_flush_interval(Duration::from_millis(5))
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    fn session(transport: &Arc<MemoryTransport>, config: StreamConfig) -> StreamSession {
        StreamSession::new(
            Arc::clone(transport) as Arc<dyn ChannelTransport>,
            reference(),
            config,
            CancellationToken::new(),
        )
    }

    fn interim_updates(transport: &MemoryTransport) -> Vec<Activity> {
        transport
            .sent()
            .into_iter()
            .filter(|a| matches!(a.kind, ActivityKind::Typing { .. }))
            .collect()
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl StreamErrorSink for CountingSink {
        async fn report(&self, _error: Arc<Error>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn fragments_accumulate_into_final_message() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast());
        stream.emit("Hello ");
        stream.emit("world");

        let final_message = stream.close().await.unwrap().unwrap();
        assert_eq!(final_message.text(), Some("Hello world"));
        assert_eq!(
            final_message.stream_info().and_then(Entity::stream_type),
            Some(StreamType::Final)
        );

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text(), Some("Hello world"));
        // Final message updates the streamed one in place.
        assert_eq!(final_message.id, sent[0].id);
        assert_eq!(stream.stream_id(), sent[0].id);
        assert_eq!(final_message.recipient.unwrap().id, "29:user");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast());
        stream.emit("once");

        let first = stream.close().await.unwrap();
        let attempts = transport.attempts();
        let second = stream.close().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.attempts(), attempts);
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn close_without_content_makes_no_calls_and_caches_nothing() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast());

        assert!(stream.close().await.unwrap().is_none());
        assert_eq!(transport.attempts(), 0);

        stream.emit("late");
        let final_message = stream.close().await.unwrap().unwrap();
        assert_eq!(final_message.text(), Some("late"));
    }

    #[tokio::test]
    async fn large_burst_is_split_into_batches() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast().with_batch_size(11));
        for _ in 0..15 {
            stream.emit("x");
        }

        let final_message = stream.close().await.unwrap().unwrap();
        assert_eq!(final_message.text(), Some("x".repeat(15).as_str()));
        let updates = interim_updates(&transport);
        assert!(updates.len() >= 2, "got {} flushes", updates.len());
        assert_eq!(updates[0].text(), Some("x".repeat(11).as_str()));
    }

    #[tokio::test]
    async fn retried_flush_sends_identical_content() {
        let clean = Arc::new(MemoryTransport::new());
        let stream = session(&clean, fast());
        stream.emit("Hello ");
        stream.emit("world");
        stream.close().await.unwrap();

        let flaky = Arc::new(MemoryTransport::new());
        flaky.fail_next(1);
        let stream = session(&flaky, fast());
        stream.emit("Hello ");
        stream.emit("world");
        stream.close().await.unwrap();

        // Two attempts for the flush, one for the final message.
        assert_eq!(flaky.attempts(), 3);
        assert_eq!(flaky.sent(), clean.sent());
    }

    #[tokio::test]
    async fn each_flush_carries_next_sequence() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast().with_batch_size(1));
        stream.emit("a");
        stream.emit("b");
        stream.emit("c");
        stream.close().await.unwrap();

        let updates = interim_updates(&transport);
        let sequences: Vec<_> = updates
            .iter()
            .filter_map(|a| a.stream_info().and_then(Entity::stream_sequence))
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(updates[0].stream_info().unwrap().properties.get("streamId").is_none());
        assert_eq!(updates[2].id.as_deref(), Some("activity-1"));
        assert_eq!(updates[2].text(), Some("abc"));
    }

    #[tokio::test]
    async fn status_takes_a_sequence_but_not_the_text() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast());
        stream.update("Searching…");
        stream.emit("answer");

        let final_message = stream.close().await.unwrap().unwrap();
        assert_eq!(final_message.text(), Some("answer"));

        let updates = interim_updates(&transport);
        assert_eq!(updates.len(), 2);
        let status = updates[0].stream_info().unwrap();
        assert_eq!(status.stream_type(), Some(StreamType::Informative));
        assert_eq!(status.stream_sequence(), Some(1));
        assert_eq!(updates[0].text(), Some("Searching…"));
        assert_eq!(updates[1].stream_info().unwrap().stream_sequence(), Some(2));
    }

    #[tokio::test]
    async fn exhausted_flush_abandons_stream() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_next(100);
        let sink = Arc::new(CountingSink::default());
        let stream = session(
            &transport,
            fast().with_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
        );
        stream.set_error_sink(Arc::clone(&sink) as Arc<dyn StreamErrorSink>);
        stream.emit("x");

        let err = stream.close().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                phase: TransportPhase::Flush,
                ..
            }
        ));
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        stream.emit("ignored");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn flush_without_remote_id_is_retried_then_abandoned() {
        let transport = Arc::new(MemoryTransport::new());
        transport.withhold_ids();
        let sink = Arc::new(CountingSink::default());
        let stream = session(
            &transport,
            fast().with_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
        );
        stream.set_error_sink(Arc::clone(&sink) as Arc<dyn StreamErrorSink>);
        stream.emit("hi");

        let err = stream.close().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                phase: TransportPhase::Flush,
                ..
            }
        ));
        assert!(err.to_string().contains("no id"), "{err}");
        assert_eq!(stream.stream_id(), None);
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
        // Both attempts reached the channel; no final message followed.
        assert_eq!(transport.attempts(), 2);
        assert!(!transport.sent().iter().any(Activity::is_message));
    }

    #[tokio::test]
    async fn failed_final_message_is_not_resent() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast());
        stream.emit("hi");
        tokio::time::timeout(Duration::from_secs(5), async {
            while stream.stream_id().is_none() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        transport.fail_next(1);

        let err = stream.close().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                phase: TransportPhase::Close,
                ..
            }
        ));
        assert_eq!(transport.attempts(), 2);

        let again = stream.close().await.unwrap_err();
        assert!(matches!(
            again,
            Error::Transport {
                phase: TransportPhase::Close,
                ..
            }
        ));
        assert_eq!(again.to_string(), err.to_string());
        assert_eq!(transport.attempts(), 2);
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream() {
        let transport = Arc::new(MemoryTransport::new());
        let cancel = CancellationToken::new();
        let stream = StreamSession::new(
            Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            reference(),
            fast(),
            cancel.clone(),
        );
        stream.emit("x");
        cancel.cancel();

        assert!(matches!(stream.close().await, Err(Error::Cancelled)));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn concurrent_closes_send_one_final_message() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast());
        stream.emit("hi");

        let (a, b) = tokio::join!(stream.close(), stream.close());
        assert_eq!(a.unwrap(), b.unwrap());
        let finals = transport
            .sent()
            .into_iter()
            .filter(Activity::is_message)
            .count();
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn content_fragments_merge_channel_data() {
        let transport = Arc::new(MemoryTransport::new());
        let stream = session(&transport, fast());
        stream.emit("body");
        stream.emit(Fragment::channel_data(
            serde_json::json!({ "feedbackLoopEnabled": false, "tag": "a" })
                .as_object()
                .cloned()
                .unwrap(),
        ));
        stream.emit(Fragment::channel_data(
            serde_json::json!({ "feedbackLoopEnabled": true })
                .as_object()
                .cloned()
                .unwrap(),
        ));

        let final_message = stream.close().await.unwrap().unwrap();
        assert_eq!(
            Value::Object(final_message.channel_data.unwrap()),
            serde_json::json!({ "feedbackLoopEnabled": true, "tag": "a" })
        );
    }
}
