use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use {
    async_trait::async_trait,
    parley_common::{EventArgs, EventBus},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
};

use crate::Sender;

/// Where a plugin is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Unregistered,
    Initialized,
    Started,
    Running,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unregistered => "unregistered",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// A named, typed dependency a plugin declares. Resolved once at init
/// against other plugins and values provided to the app builder.
#[derive(Debug, Clone)]
pub struct DependencySlot {
    pub name: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub required: bool,
}

impl DependencySlot {
    pub fn required<T: Any + Send + Sync>(name: impl Into<String>) -> Self {
        Self::new::<T>(name, true)
    }

    pub fn optional<T: Any + Send + Sync>(name: impl Into<String>) -> Self {
        Self::new::<T>(name, false)
    }

    fn new<T: Any + Send + Sync>(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            required,
        }
    }

    /// Whether `value` has the type this slot asks for.
    pub fn accepts(&self, value: &Arc<dyn Any + Send + Sync>) -> bool {
        (**value).type_id() == self.type_id
    }
}

/// Resolved dependency values, keyed by slot name.
#[derive(Default, Clone)]
pub struct Dependencies {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Dependencies {
    pub(crate) fn insert(&mut self, name: String, value: Arc<dyn Any + Send + Sync>) {
        self.values.insert(name, value);
    }

    /// The value bound to slot `name`, if it was resolved with type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        Arc::clone(self.values.get(name)?).downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Handed to [`Plugin::on_init`].
pub struct InitContext<'a> {
    pub dependencies: Dependencies,
    /// The app's bus, still open for registration. Plugins subscribe to
    /// extension topics here.
    pub bus: &'a mut EventBus,
}

/// A unit of app behaviour with a managed lifecycle.
///
/// Notification hooks are called only while the plugin is running. An error
/// returned from any hook aborts the emit it was called from.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn dependencies(&self) -> Vec<DependencySlot> {
        Vec::new()
    }

    async fn on_init(&self, _ctx: &mut InitContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_start(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    /// Inbound activity, before routing. A non-null result answers the turn
    /// without running any route.
    async fn on_activity(&self, _args: &EventArgs) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    async fn on_activity_sent(&self, _args: &EventArgs) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_activity_response(&self, _args: &EventArgs) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_error(&self, _args: &EventArgs) -> anyhow::Result<()> {
        Ok(())
    }

    /// The outbound capability, for plugins that front a channel.
    fn as_sender(self: Arc<Self>) -> Option<Arc<dyn Sender>> {
        None
    }
}
