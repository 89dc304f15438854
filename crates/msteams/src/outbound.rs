use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_channels::{ChannelTransport, Error, Result, TokenProvider},
    parley_common::{Activity, ConversationReference},
    secrecy::ExposeSecret,
    serde::Deserialize,
    serde_json::{Map, Value},
    tracing::debug,
};

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Bot Connector REST transport.
///
/// Activities without an id are created with
/// `POST {serviceUrl}/v3/conversations/{conversationId}/activities`; an id
/// selects `PUT .../activities/{activityId}`, which updates that message in
/// place.
pub struct BotConnectorTransport {
    http: reqwest::Client,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl BotConnectorTransport {
    pub fn new(http: reqwest::Client, tokens: Option<Arc<dyn TokenProvider>>) -> Self {
        Self { http, tokens }
    }

    fn activities_url(reference: &ConversationReference) -> Result<String> {
        if reference.service_url.is_empty() {
            return Err(Error::unknown_conversation(&reference.conversation.id));
        }
        Ok(format!(
            "{}/v3/conversations/{}/activities",
            reference.service_url.trim_end_matches('/'),
            urlencoding::encode(&reference.conversation.id)
        ))
    }
}

#[async_trait]
impl ChannelTransport for BotConnectorTransport {
    fn id(&self) -> &str {
        "msteams"
    }

    async fn send(&self, mut activity: Activity, reference: &ConversationReference) -> Result<Activity> {
        let base = Self::activities_url(reference)?;
        let request = match activity.id.as_deref() {
            Some(id) => self
                .http
                .put(format!("{base}/{}", urlencoding::encode(id))),
            None => self.http.post(base),
        };
        let request = match &self.tokens {
            Some(tokens) => request.bearer_auth(tokens.bearer_token().await?.expose_secret()),
            None => request,
        };

        debug!(
            conversation_id = %reference.conversation.id,
            kind = activity.kind.name(),
            update = activity.id.is_some(),
            "Bot Connector request"
        );
        let resp = request
            .json(&activity)
            .send()
            .await
            .map_err(|e| Error::external("send activity", e))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::status(status, body));
        }

        // Updates may answer with an empty body; keep the id we sent.
        let text = resp
            .text()
            .await
            .map_err(|e| Error::external("read response", e))?;
        if !text.trim().is_empty() {
            let created: ResourceResponse = serde_json::from_str(&text)?;
            if let Some(id) = created.id.filter(|id| !id.is_empty()) {
                activity.id = Some(id);
            }
        }
        Ok(activity)
    }

    /// Nested objects (`notification`, `feedbackLoop`, ...) merge key by key
    /// so later fragments do not wipe earlier settings.
    fn merge_channel_data(&self, accumulated: &mut Map<String, Value>, update: Map<String, Value>) {
        for (key, value) in update {
            match (accumulated.get_mut(&key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    existing.extend(incoming);
                },
                (_, value) => {
                    accumulated.insert(key, value);
                },
            }
        }
    }
}
