use std::{any::Any, sync::Arc};

use {
    parley_common::{EventBus, Result, TopicHandler},
    parley_plugins::{Plugin, PluginRegistry},
    parley_routing::{Route, Router},
    parley_streaming::StreamConfig,
    tracing::info,
};

use crate::{App, system_routes};

/// Collects routes, topic handlers and plugins, then freezes them into an
/// [`App`].
pub struct AppBuilder {
    name: String,
    router: Router,
    bus: EventBus,
    plugins: PluginRegistry,
    stream_config: StreamConfig,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            name: "app".into(),
            router: Router::new(),
            bus: EventBus::new(),
            plugins: PluginRegistry::new(),
            stream_config: StreamConfig::default(),
        }
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source name used when the app emits on the bus.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.router.register(route);
        self
    }

    #[must_use]
    pub fn on(mut self, topic: &str, handler: Arc<dyn TopicHandler>) -> Self {
        self.bus.on(topic, handler);
        self
    }

    /// Direct access to the bus, for the closure registration helpers.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn plugin<P: Plugin + 'static>(mut self, plugin: Arc<P>) -> Result<Self> {
        self.plugins.register(plugin)?;
        Ok(self)
    }

    /// Provide a value to plugin dependency slots named `name`.
    #[must_use]
    pub fn provide<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: Arc<T>) -> Self {
        self.plugins.provide(name, value);
        self
    }

    #[must_use]
    pub fn stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    /// Register the system routes, initialize every plugin and freeze.
    pub async fn build(mut self) -> Result<App> {
        for route in system_routes::all() {
            self.router.register(route);
        }
        self.plugins.init(&mut self.bus).await?;

        info!(
            app = %self.name,
            routes = self.router.len(),
            plugins = self.plugins.len(),
            topics = ?self.bus.topic_names(),
            "app built"
        );
        Ok(App::new(
            self.name,
            self.router,
            self.bus,
            self.plugins,
            self.stream_config,
        ))
    }
}
