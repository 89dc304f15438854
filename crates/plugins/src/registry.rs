//! Plugin registry: registration, dependency resolution and lifecycle.
//!
//! The registry is filled by the app builder, initialized once while the
//! event bus is still mutable, then started. Notifications reach a plugin
//! through bus handlers the registry installs at init; those handlers stay
//! silent until the plugin is running.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    async_trait::async_trait,
    parley_common::{Error, EventArgs, EventBus, Result, TopicHandler, events::topics},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{Dependencies, InitContext, Plugin, PluginState, Sender};

struct Entry {
    name: String,
    plugin: Arc<dyn Plugin>,
    /// Same object as `plugin`, kept for typed dependency lookups.
    any: Arc<dyn Any + Send + Sync>,
    state: Arc<RwLock<PluginState>>,
}

impl Entry {
    fn state(&self) -> PluginState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Move `from` → `to`, rejecting any other current state.
    fn transition(&self, from: PluginState, to: PluginState) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(Error::Lifecycle {
                plugin: self.name.clone(),
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        *state = to;
        debug!(plugin = %self.name, %from, %to, "plugin state changed");
        Ok(())
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<Entry>,
    provided: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin. Names are unique.
    pub fn register<P: Plugin + 'static>(&mut self, plugin: Arc<P>) -> Result<()> {
        let name = plugin.name().to_string();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(Error::DuplicatePlugin(name));
        }
        info!(plugin = %name, version = plugin.version(), "plugin registered");
        let any: Arc<dyn Any + Send + Sync> = Arc::clone(&plugin) as Arc<dyn Any + Send + Sync>;
        self.entries.push(Entry {
            name,
            plugin,
            any,
            state: Arc::new(RwLock::new(PluginState::Unregistered)),
        });
        Ok(())
    }

    /// Make `value` available to dependency slots named `name`.
    pub fn provide<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: Arc<T>) {
        self.provided.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.entry(name).map(|e| Arc::clone(&e.plugin))
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.entry(name).map(Entry::state)
    }

    /// The sender capability of plugin `key`.
    pub fn sender(&self, key: &str) -> Result<Arc<dyn Sender>> {
        self.entry(key)
            .and_then(|e| Arc::clone(&e.plugin).as_sender())
            .ok_or_else(|| Error::UnknownSender(key.to_string()))
    }

    /// Resolve dependencies and run `on_init` for every plugin, in
    /// registration order, then subscribe each one to the reserved topics.
    pub async fn init(&self, bus: &mut EventBus) -> Result<()> {
        for entry in &self.entries {
            if entry.state() != PluginState::Unregistered {
                return Err(Error::Lifecycle {
                    plugin: entry.name.clone(),
                    from: entry.state().to_string(),
                    to: PluginState::Initialized.to_string(),
                });
            }

            let dependencies = self.resolve(entry)?;
            let mut ctx = InitContext {
                dependencies,
                bus: &mut *bus,
            };
            entry
                .plugin
                .on_init(&mut ctx)
                .await
                .map_err(|e| Error::handler(entry.name.clone(), e))?;

            for notification in Notification::ALL {
                bus.on(
                    notification.topic(),
                    Arc::new(Forwarder {
                        plugin: Arc::clone(&entry.plugin),
                        state: Arc::clone(&entry.state),
                        name: entry.name.clone(),
                        notification: *notification,
                    }),
                );
            }

            entry.transition(PluginState::Unregistered, PluginState::Initialized)?;
        }
        Ok(())
    }

    /// Run `on_start` for every plugin and mark it running.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        for entry in &self.entries {
            entry.transition(PluginState::Initialized, PluginState::Started)?;
            entry
                .plugin
                .on_start(cancel)
                .await
                .map_err(|e| Error::handler(entry.name.clone(), e))?;
            entry.transition(PluginState::Started, PluginState::Running)?;
            info!(plugin = %entry.name, "plugin running");
        }
        Ok(())
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn resolve(&self, entry: &Entry) -> Result<Dependencies> {
        let mut dependencies = Dependencies::default();
        for slot in entry.plugin.dependencies() {
            let candidate = self
                .provided
                .get(&slot.name)
                .filter(|value| slot.accepts(value))
                .cloned()
                .or_else(|| {
                    self.entries
                        .iter()
                        .filter(|other| other.name == slot.name && other.name != entry.name)
                        .map(|other| Arc::clone(&other.any))
                        .find(|value| slot.accepts(value))
                });

            match candidate {
                Some(value) => {
                    debug!(plugin = %entry.name, slot = %slot.name, "dependency resolved");
                    dependencies.insert(slot.name, value);
                },
                None if slot.required => {
                    return Err(Error::Dependency {
                        plugin: entry.name.clone(),
                        slot: slot.name,
                        type_name: slot.type_name,
                    });
                },
                None => {
                    debug!(plugin = %entry.name, slot = %slot.name, "optional dependency unset");
                },
            }
        }
        Ok(dependencies)
    }
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Activity,
    ActivitySent,
    ActivityResponse,
    Error,
}

impl Notification {
    const ALL: &'static [Self] = &[
        Self::Activity,
        Self::ActivitySent,
        Self::ActivityResponse,
        Self::Error,
    ];

    fn topic(self) -> &'static str {
        match self {
            Self::Activity => topics::ACTIVITY,
            Self::ActivitySent => topics::ACTIVITY_SENT,
            Self::ActivityResponse => topics::ACTIVITY_RESPONSE,
            Self::Error => topics::ERROR,
        }
    }
}

/// Bus handler relaying one reserved topic to a plugin hook.
struct Forwarder {
    plugin: Arc<dyn Plugin>,
    state: Arc<RwLock<PluginState>>,
    name: String,
    notification: Notification,
}

#[async_trait]
impl TopicHandler for Forwarder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, args: &EventArgs) -> anyhow::Result<Option<Value>> {
        let running =
            *self.state.read().unwrap_or_else(|e| e.into_inner()) == PluginState::Running;
        if !running {
            return Ok(None);
        }
        match self.notification {
            Notification::Activity => self.plugin.on_activity(args).await,
            Notification::ActivitySent => self.plugin.on_activity_sent(args).await.map(|()| None),
            Notification::ActivityResponse => {
                self.plugin.on_activity_response(args).await.map(|()| None)
            },
            Notification::Error => self.plugin.on_error(args).await.map(|()| None),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        OnceLock,
        atomic::{AtomicUsize, Ordering},
    };

    use {
        super::*,
        crate::{DependencySlot, TransportSender},
        parley_channels::{ChannelTransport, MemoryTransport},
    };

    #[derive(Default)]
    struct Probe {
        name: &'static str,
        activities: AtomicUsize,
        answer: Option<Value>,
    }

    impl Probe {
        fn named(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl Plugin for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_activity(&self, _args: &EventArgs) -> anyhow::Result<Option<Value>> {
            self.activities.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    struct Clock(u64);

    /// Depends on a provided clock and on the `probe` plugin.
    #[derive(Default)]
    struct Dependent {
        clock: OnceLock<Arc<Clock>>,
        probe: OnceLock<Arc<Probe>>,
        optional_seen: OnceLock<bool>,
    }

    #[async_trait]
    impl Plugin for Dependent {
        fn name(&self) -> &str {
            "dependent"
        }

        fn dependencies(&self) -> Vec<DependencySlot> {
            vec![
                DependencySlot::required::<Clock>("clock"),
                DependencySlot::required::<Probe>("probe"),
                DependencySlot::optional::<String>("greeting"),
            ]
        }

        async fn on_init(&self, ctx: &mut InitContext<'_>) -> anyhow::Result<()> {
            if let Some(clock) = ctx.dependencies.get::<Clock>("clock") {
                let _ = self.clock.set(clock);
            }
            if let Some(probe) = ctx.dependencies.get::<Probe>("probe") {
                let _ = self.probe.set(probe);
            }
            let _ = self
                .optional_seen
                .set(ctx.dependencies.contains("greeting"));
            Ok(())
        }
    }

    struct Channel(TransportSender);

    #[async_trait]
    impl Plugin for Channel {
        fn name(&self) -> &str {
            "channel"
        }

        fn as_sender(self: Arc<Self>) -> Option<Arc<dyn Sender>> {
            Some(Arc::new(self.0.clone()))
        }
    }

    async fn emit_activity(bus: &EventBus) -> Option<Value> {
        bus.emit("test", topics::ACTIVITY, None, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register(Probe::named("probe")).unwrap();
        let err = registry.register(Probe::named("probe")).unwrap_err();
        assert!(matches!(err, Error::DuplicatePlugin(name) if name == "probe"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn lifecycle_runs_in_order() {
        let mut registry = PluginRegistry::new();
        registry.register(Probe::named("probe")).unwrap();
        assert_eq!(registry.state("probe"), Some(PluginState::Unregistered));

        let err = registry.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle { .. }));

        let mut bus = EventBus::new();
        registry.init(&mut bus).await.unwrap();
        assert_eq!(registry.state("probe"), Some(PluginState::Initialized));
        assert!(matches!(
            registry.init(&mut bus).await,
            Err(Error::Lifecycle { .. })
        ));

        registry.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(registry.state("probe"), Some(PluginState::Running));
    }

    #[tokio::test]
    async fn dependencies_resolve_from_values_and_plugins() {
        let probe = Probe::named("probe");
        let dependent = Arc::new(Dependent::default());

        let mut registry = PluginRegistry::new();
        registry.register(Arc::clone(&probe)).unwrap();
        registry.register(Arc::clone(&dependent)).unwrap();
        registry.provide("clock", Arc::new(Clock(7)));
        registry.init(&mut EventBus::new()).await.unwrap();

        assert_eq!(dependent.clock.get().unwrap().0, 7);
        assert!(Arc::ptr_eq(dependent.probe.get().unwrap(), &probe));
        assert_eq!(dependent.optional_seen.get(), Some(&false));
    }

    #[tokio::test]
    async fn missing_or_mistyped_required_slot_fails_init() {
        let mut registry = PluginRegistry::new();
        registry.register(Probe::named("probe")).unwrap();
        registry.register(Arc::new(Dependent::default())).unwrap();
        // Right name, wrong type.
        registry.provide("clock", Arc::new(String::from("noon")));

        let err = registry.init(&mut EventBus::new()).await.unwrap_err();
        match err {
            Error::Dependency { plugin, slot, .. } => {
                assert_eq!(plugin, "dependent");
                assert_eq!(slot, "clock");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn notifications_only_reach_running_plugins() {
        let probe = Arc::new(Probe {
            name: "probe",
            answer: Some(serde_json::json!({ "handled": true })),
            ..Default::default()
        });
        let mut registry = PluginRegistry::new();
        registry.register(Arc::clone(&probe)).unwrap();
        let mut bus = EventBus::new();
        registry.init(&mut bus).await.unwrap();

        assert_eq!(emit_activity(&bus).await, None);
        assert_eq!(probe.activities.load(Ordering::SeqCst), 0);

        registry.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            emit_activity(&bus).await,
            Some(serde_json::json!({ "handled": true }))
        );
        assert_eq!(probe.activities.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sender_lookup_by_key() {
        let transport: Arc<dyn ChannelTransport> = Arc::new(MemoryTransport::new());
        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(Channel(TransportSender::new(transport))))
            .unwrap();
        registry.register(Probe::named("probe")).unwrap();

        assert!(registry.sender("channel").is_ok());
        assert!(matches!(registry.sender("probe"), Err(Error::UnknownSender(_))));
        assert!(matches!(registry.sender("nope"), Err(Error::UnknownSender(_))));
    }
}
