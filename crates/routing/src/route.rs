use std::{fmt, sync::Arc};

use {
    async_trait::async_trait, futures::future::BoxFuture, parley_common::Activity,
    serde_json::Value,
};

use crate::Context;

/// Who registered a route. A user route overrides a system route with the
/// same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    System,
    User,
}

/// Handles one step of a turn's chain.
///
/// Call [`Context::next`] to run the remaining handlers; returning without
/// calling it ends the chain. `Ok(Some(body))` becomes the response body.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, ctx: &mut Context) -> anyhow::Result<Option<Value>>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> RouteHandler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, anyhow::Result<Option<Value>>>
        + Send
        + Sync,
{
    async fn handle(&self, ctx: &mut Context) -> anyhow::Result<Option<Value>> {
        (self.0)(ctx).await
    }
}

/// Adapt a closure returning a boxed future into a [`RouteHandler`].
///
/// ```ignore
/// let echo = handler_fn(|ctx| Box::pin(async move {
///     let text = ctx.activity().text().unwrap_or_default().to_string();
///     ctx.reply(text).await?;
///     Ok(None)
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn RouteHandler>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, anyhow::Result<Option<Value>>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

type Selector = Arc<dyn Fn(&Activity) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Route {
    name: Option<String>,
    class: RouteClass,
    selector: Selector,
    handler: Arc<dyn RouteHandler>,
}

impl Route {
    /// An unnamed user route.
    pub fn new<S>(selector: S, handler: Arc<dyn RouteHandler>) -> Self
    where
        S: Fn(&Activity) -> bool + Send + Sync + 'static,
    {
        Self {
            name: None,
            class: RouteClass::User,
            selector: Arc::new(selector),
            handler,
        }
    }

    /// A named system route.
    pub fn system<S>(name: impl Into<String>, selector: S, handler: Arc<dyn RouteHandler>) -> Self
    where
        S: Fn(&Activity) -> bool + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            class: RouteClass::System,
            ..Self::new(selector, handler)
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn class(&self) -> RouteClass {
        self.class
    }

    /// Name for logs and handler errors.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    pub fn matches(&self, activity: &Activity) -> bool {
        (self.selector)(activity)
    }

    pub fn handler(&self) -> Arc<dyn RouteHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}
