use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    parley_channels::{ChannelTransport, TokenProvider},
    parley_common::{Event, EventArgs},
    parley_plugins::{Plugin, Sender, TransportSender},
    secrecy::ExposeSecret,
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{auth::BotTokenProvider, config::MsTeamsConfig, outbound::BotConnectorTransport};

/// Microsoft Teams sender plugin, registered under `msteams`.
pub struct MsTeamsPlugin {
    config: MsTeamsConfig,
    transport: Arc<BotConnectorTransport>,
    /// Conversation id → service URL, learned from inbound activities.
    service_urls: RwLock<HashMap<String, String>>,
}

impl MsTeamsPlugin {
    pub fn new(config: MsTeamsConfig) -> Self {
        let http = reqwest::Client::new();
        let tokens = config.has_credentials().then(|| {
            Arc::new(BotTokenProvider::new(http.clone(), config.clone())) as Arc<dyn TokenProvider>
        });
        Self::with_transport(config, BotConnectorTransport::new(http, tokens))
    }

    pub fn with_transport(config: MsTeamsConfig, transport: BotConnectorTransport) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            service_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Build from the raw `[msteams]` config section.
    pub fn from_value(config: Value) -> Result<Self> {
        let cfg: MsTeamsConfig = serde_json::from_value(config)?;
        if !cfg.app_id.is_empty() && cfg.app_password.expose_secret().is_empty() {
            anyhow::bail!("Teams app_password is required when app_id is set");
        }
        Ok(Self::new(cfg))
    }

    pub fn config(&self) -> &MsTeamsConfig {
        &self.config
    }

    pub fn service_url(&self, conversation_id: &str) -> Option<String> {
        let urls = self.service_urls.read().unwrap_or_else(|e| e.into_inner());
        urls.get(conversation_id).cloned()
    }

    pub fn known_conversations(&self) -> usize {
        let urls = self.service_urls.read().unwrap_or_else(|e| e.into_inner());
        urls.len()
    }
}

#[async_trait]
impl Plugin for MsTeamsPlugin {
    fn name(&self) -> &str {
        "msteams"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn on_start(&self, _cancel: &CancellationToken) -> Result<()> {
        if self.config.has_credentials() {
            info!(app_id = %self.config.app_id, tenant = %self.config.oauth_tenant, "microsoft teams sender ready");
        } else {
            warn!("microsoft teams sender has no credentials, outbound requests are unauthenticated");
        }
        Ok(())
    }

    async fn on_activity(&self, args: &EventArgs) -> Result<Option<Value>> {
        if let Some(Event::Activity { reference, .. }) = &args.event {
            let mut urls = self.service_urls.write().unwrap_or_else(|e| e.into_inner());
            urls.insert(
                reference.conversation.id.clone(),
                reference.service_url.clone(),
            );
        }
        Ok(None)
    }

    fn as_sender(self: Arc<Self>) -> Option<Arc<dyn Sender>> {
        Some(Arc::new(TransportSender::new(
            Arc::clone(&self.transport) as Arc<dyn ChannelTransport>
        )))
    }
}
