use std::sync::Arc;

use {
    parley_common::{Activity, Error, Event, EventBus, Result, events::topics},
    parley_plugins::PluginRegistry,
    parley_routing::{Context, Router},
    parley_streaming::StreamConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{AppBuilder, Response, ResponseMeta};

/// Frozen pipeline. Cheap to share behind an `Arc`; nothing in it is
/// mutated after [`AppBuilder::build`].
pub struct App {
    name: String,
    router: Arc<Router>,
    bus: Arc<EventBus>,
    plugins: Arc<PluginRegistry>,
    stream_config: StreamConfig,
}

impl App {
    pub(crate) fn new(
        name: String,
        router: Router,
        bus: EventBus,
        plugins: PluginRegistry,
        stream_config: StreamConfig,
    ) -> Self {
        Self {
            name,
            router: Arc::new(router),
            bus: Arc::new(bus),
            plugins: Arc::new(plugins),
            stream_config,
        }
    }

    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Start every plugin, then announce `start`.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        self.plugins.start(cancel).await?;
        self.bus
            .emit(&self.name, topics::START, Some(Event::Start), cancel)
            .await?;
        info!(app = %self.name, "app started");
        Ok(())
    }

    /// Run one turn for `activity`, sending through the plugin registered
    /// under `sender_key`.
    ///
    /// Malformed activities, unknown senders and cancellation are returned
    /// as errors. Failures inside handlers or the stream are reported on the
    /// `error` topic and answered with a 500 response.
    pub async fn process(
        &self,
        sender_key: &str,
        token: Option<String>,
        activity: Activity,
        cancel: CancellationToken,
    ) -> Result<Response> {
        let reference = activity.conversation_reference()?;
        let sender = self.plugins.sender(sender_key)?;
        debug!(
            sender = sender_key,
            kind = activity.kind.name(),
            conversation_id = %reference.conversation.id,
            "processing activity"
        );

        let answered = self
            .bus
            .emit(
                &self.name,
                topics::ACTIVITY,
                Some(Event::Activity {
                    activity: activity.clone(),
                    reference: reference.clone(),
                    token: token.clone(),
                }),
                &cancel,
            )
            .await;
        let response = match answered {
            Ok(Some(body)) => {
                debug!("activity answered by a topic handler");
                Response::ok(Some(body))
            },
            Ok(None) => {
                let routes = self.router.select(&activity);
                let ctx = Context::new(
                    activity.clone(),
                    reference,
                    sender_key,
                    sender,
                    Arc::clone(&self.bus),
                    cancel.clone(),
                )
                .with_token(token)
                .with_stream_config(self.stream_config)
                .with_chain(routes);
                self.run_chain(ctx, sender_key, &activity, &cancel).await?
            },
            Err(error) => self.fail(error, sender_key, &activity, &cancel).await?,
        };

        if let Err(error) = self
            .bus
            .emit(
                &self.name,
                topics::ACTIVITY_RESPONSE,
                Some(Event::ActivityResponse {
                    activity: activity.clone(),
                    status: response.status,
                    body: response.body.clone(),
                }),
                &cancel,
            )
            .await
        {
            self.report(error, sender_key, &activity, &cancel).await;
        }

        info!(
            sender = sender_key,
            status = response.status,
            routes_matched = response.meta.routes_matched,
            stream_id = response.meta.stream_id.as_deref().unwrap_or_default(),
            "activity processed"
        );
        Ok(response)
    }

    async fn run_chain(
        &self,
        mut ctx: Context,
        sender_key: &str,
        activity: &Activity,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let outcome = ctx.next().await.map_err(into_error);
        let mut meta = ResponseMeta {
            routes_matched: ctx.routes_matched(),
            stream_id: None,
        };

        let closed = match ctx.take_stream() {
            Some(stream) => {
                let closed = stream.close().await;
                meta.stream_id = stream.stream_id();
                closed
            },
            None => Ok(None),
        };

        let body = match outcome {
            Ok(body) => body,
            Err(error) => {
                if let Err(close_error) = closed {
                    warn!(error = %close_error, "stream close failed after handler error");
                }
                return Ok(self
                    .fail(error, sender_key, activity, cancel)
                    .await?
                    .with_meta(meta));
            },
        };

        match closed {
            Ok(Some(final_message)) => {
                if let Err(error) = ctx
                    .bus()
                    .emit(
                        sender_key,
                        topics::ACTIVITY_SENT,
                        Some(Event::ActivitySent {
                            activity: final_message,
                            reference: ctx.reference().clone(),
                        }),
                        cancel,
                    )
                    .await
                {
                    self.report(error, sender_key, activity, cancel).await;
                }
            },
            Ok(None) => {},
            Err(error) => {
                return Ok(self
                    .fail(error, sender_key, activity, cancel)
                    .await?
                    .with_meta(meta));
            },
        }

        let status = ctx.status().unwrap_or(200);
        Ok(Response::new(status, body).with_meta(meta))
    }

    /// Report `error` and turn it into a 500, unless the turn was cancelled.
    async fn fail(
        &self,
        error: Error,
        sender_key: &str,
        activity: &Activity,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if matches!(error, Error::Cancelled) || cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let message = error.to_string();
        warn!(sender = sender_key, error = %message, "turn failed");
        self.report(error, sender_key, activity, cancel).await;
        Ok(Response::error(500, message))
    }

    async fn report(
        &self,
        error: Error,
        sender_key: &str,
        activity: &Activity,
        cancel: &CancellationToken,
    ) {
        let event = Event::Error {
            error: Arc::new(error),
            plugin: Some(sender_key.to_string()),
            activity: Some(activity.clone()),
        };
        if let Err(e) = self
            .bus
            .emit(&self.name, topics::ERROR, Some(event), cancel)
            .await
        {
            warn!(error = %e, "error topic handler failed");
        }
    }
}

fn into_error(error: anyhow::Error) -> Error {
    match error.downcast::<Error>() {
        Ok(error) => error,
        Err(error) => Error::handler("route", error),
    }
}

