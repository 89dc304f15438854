//! Conversational activity model.
//!
//! An [`Activity`] is one inbound or outbound conversational event. The kind
//! discriminant and its payload live in [`ActivityKind`], which serializes as
//! the Bot Framework `type` field; everything shared by all kinds sits on the
//! outer struct.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::{Error, Result};

/// Entity type carrying Teams streaming metadata.
pub const STREAM_INFO_ENTITY: &str = "streaminfo";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(flatten)]
    pub kind: ActivityKind,
    /// Channel-assigned id. Absent until the activity has been sent once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Map<String, Value>>,
}

/// Kind discriminant plus kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityKind {
    Message {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MessageReaction {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reactions_added: Vec<Reaction>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reactions_removed: Vec<Reaction>,
    },
    Invoke {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    ConversationUpdate {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        members_added: Vec<ChannelAccount>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        members_removed: Vec<ChannelAccount>,
    },
    Event {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// Any other type the channel sends (`installationUpdate`,
    /// `endOfConversation`, ...). Decoded without payload so it can still be
    /// routed.
    #[serde(other)]
    Unknown,
}

impl ActivityKind {
    /// Wire name of the discriminant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
            Self::MessageReaction { .. } => "messageReaction",
            Self::Invoke { .. } => "invoke",
            Self::ConversationUpdate { .. } => "conversationUpdate",
            Self::Event { .. } => "event",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_object_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(rename = "type")]
    pub reaction_type: String,
}

/// A typed entity. Only `type` is interpreted; other properties are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// Teams streaming phase carried in a `streaminfo` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Informative,
    Streaming,
    Final,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            properties: Map::new(),
        }
    }

    /// Build a `streaminfo` entity. `sequence` is omitted for the final
    /// message; `stream_id` is omitted until the channel assigned one.
    pub fn stream_info(
        stream_id: Option<&str>,
        stream_type: StreamType,
        sequence: Option<u64>,
    ) -> Self {
        let mut entity = Self::new(STREAM_INFO_ENTITY);
        if let Some(id) = stream_id {
            entity
                .properties
                .insert("streamId".into(), Value::String(id.to_string()));
        }
        entity
            .properties
            .insert("streamType".into(), serde_json::json!(stream_type));
        if let Some(seq) = sequence {
            entity
                .properties
                .insert("streamSequence".into(), Value::from(seq));
        }
        entity
    }

    pub fn stream_sequence(&self) -> Option<u64> {
        self.properties.get("streamSequence")?.as_u64()
    }

    pub fn stream_type(&self) -> Option<StreamType> {
        serde_json::from_value(self.properties.get("streamType")?.clone()).ok()
    }

    /// Id of the account a `mention` entity refers to.
    pub fn mentioned_id(&self) -> Option<&str> {
        if !self.entity_type.eq_ignore_ascii_case("mention") {
            return None;
        }
        self.properties.get("mentioned")?.get("id")?.as_str()
    }
}

/// Everything needed to address a reply into an existing conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    pub service_url: String,
    pub channel_id: String,
    pub conversation: ConversationAccount,
    /// The bot's own account (the inbound recipient).
    pub bot: ChannelAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ChannelAccount>,
    /// Id of the inbound activity this reference was taken from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl Activity {
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            id: None,
            channel_id: None,
            service_url: None,
            from: None,
            recipient: None,
            conversation: None,
            reply_to_id: None,
            entities: Vec::new(),
            channel_data: None,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::new(ActivityKind::Message {
            text: text.into(),
            attachments: Vec::new(),
        })
    }

    pub fn typing() -> Self {
        Self::new(ActivityKind::Typing { text: None })
    }

    /// Decode an inbound activity, mapping decode failures to
    /// [`Error::Validation`].
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::validation(e.to_string()))
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Message or typing text, if this kind carries any.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            ActivityKind::Message { text, .. } => Some(text),
            ActivityKind::Typing { text } => text.as_deref(),
            _ => None,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self.kind, ActivityKind::Message { .. })
    }

    pub fn invoke_name(&self) -> Option<&str> {
        match &self.kind {
            ActivityKind::Invoke { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        match &self.kind {
            ActivityKind::Event { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.from
            .as_ref()
            .map(|from| from.aad_object_id.as_deref().unwrap_or(&from.id))
    }

    pub fn is_group_chat(&self) -> bool {
        if let Some(kind) = self
            .conversation
            .as_ref()
            .and_then(|c| c.conversation_type.as_deref())
            && kind.eq_ignore_ascii_case("personal")
        {
            return false;
        }

        if let Some(data) = self.channel_data.as_ref() {
            return data.contains_key("team") || data.contains_key("channel");
        }

        true
    }

    pub fn bot_is_mentioned(&self) -> bool {
        let Some(recipient_id) = self.recipient.as_ref().map(|r| r.id.as_str()) else {
            return false;
        };
        self.entities
            .iter()
            .any(|entity| entity.mentioned_id() == Some(recipient_id))
    }

    /// Message text with `<at>…</at>` mention markup removed.
    pub fn cleaned_text(&self) -> Option<String> {
        let mut text = self.text()?.to_string();
        while let Some(start) = text.find("<at>") {
            if let Some(end_rel) = text[start + 4..].find("</at>") {
                let end = start + 4 + end_rel + 5;
                text.replace_range(start..end, "");
            } else {
                break;
            }
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// The `streaminfo` entity, if any.
    pub fn stream_info(&self) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.entity_type == STREAM_INFO_ENTITY)
    }

    /// Check the fields every inbound activity needs before it can be routed
    /// and replied to.
    pub fn validate_inbound(&self) -> Result<()> {
        if self.conversation.as_ref().is_none_or(|c| c.id.is_empty()) {
            return Err(Error::validation("missing conversation id"));
        }
        if self.service_url.as_deref().is_none_or(str::is_empty) {
            return Err(Error::validation("missing serviceUrl"));
        }
        if self.recipient.is_none() {
            return Err(Error::validation("missing recipient"));
        }
        Ok(())
    }

    /// Reference for replying into the conversation this activity came from.
    pub fn conversation_reference(&self) -> Result<ConversationReference> {
        self.validate_inbound()?;
        Ok(ConversationReference {
            service_url: self.service_url.clone().unwrap_or_default(),
            channel_id: self.channel_id.clone().unwrap_or_else(|| "msteams".into()),
            conversation: self.conversation.clone().unwrap_or_default(),
            bot: self.recipient.clone().unwrap_or_default(),
            user: self.from.clone(),
            activity_id: self.id.clone(),
        })
    }

    /// Fill addressing fields from `reference` for an outbound activity.
    /// Fields the caller already set are kept.
    pub fn apply_reference(&mut self, reference: &ConversationReference) {
        if self.service_url.is_none() {
            self.service_url = Some(reference.service_url.clone());
        }
        if self.channel_id.is_none() {
            self.channel_id = Some(reference.channel_id.clone());
        }
        if self.conversation.is_none() {
            self.conversation = Some(reference.conversation.clone());
        }
        if self.from.is_none() {
            self.from = Some(reference.bot.clone());
        }
        if self.recipient.is_none() {
            self.recipient = reference.user.clone();
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn inbound_json() -> Value {
        serde_json::json!({
            "type": "message",
            "id": "1700000000000",
            "text": "<at>Parley</at> hello there",
            "channelId": "msteams",
            "serviceUrl": "https://smba.trafficmanager.net/emea/",
            "from": { "id": "29:user", "name": "Ada", "aadObjectId": "aad-ada" },
            "recipient": { "id": "28:bot", "name": "Parley" },
            "conversation": { "id": "a:conv", "conversationType": "personal" },
            "entities": [
                { "type": "mention", "mentioned": { "id": "28:bot", "name": "Parley" }, "text": "<at>Parley</at>" }
            ]
        })
    }

    #[test]
    fn decodes_message_activity() {
        let activity = Activity::from_json(inbound_json()).unwrap();
        assert!(activity.is_message());
        assert_eq!(activity.kind.name(), "message");
        assert_eq!(activity.conversation_id(), Some("a:conv"));
        assert_eq!(activity.sender_id(), Some("aad-ada"));
        assert!(activity.bot_is_mentioned());
        assert!(!activity.is_group_chat());
        assert_eq!(activity.cleaned_text().as_deref(), Some("hello there"));
    }

    #[test]
    fn decodes_invoke_activity() {
        let activity = Activity::from_json(serde_json::json!({
            "type": "invoke",
            "name": "adaptiveCard/action",
            "value": { "verb": "approve" },
            "conversation": { "id": "c" }
        }))
        .unwrap();
        assert_eq!(activity.invoke_name(), Some("adaptiveCard/action"));
        assert_eq!(activity.text(), None);
    }

    #[test]
    fn unrecognised_types_decode_as_unknown() {
        for kind in ["installationUpdate", "endOfConversation", "messageUpdate"] {
            let mut value = inbound_json();
            value["type"] = Value::String(kind.into());
            let activity = Activity::from_json(value).unwrap();
            assert_eq!(activity.kind, ActivityKind::Unknown);
            assert_eq!(activity.conversation_id(), Some("a:conv"));
            assert!(activity.conversation_reference().is_ok());
        }
    }

    #[test]
    fn missing_type_is_a_validation_error() {
        let err = Activity::from_json(serde_json::json!({ "text": "hi" })).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn serializes_type_discriminant_and_skips_empty_fields() {
        let value = serde_json::to_value(Activity::message("hi")).unwrap();
        assert_eq!(value, serde_json::json!({ "type": "message", "text": "hi" }));
    }

    #[test]
    fn stream_info_entity_round_trips_fields() {
        let entity = Entity::stream_info(Some("s-1"), StreamType::Streaming, Some(3));
        assert_eq!(entity.stream_sequence(), Some(3));
        assert_eq!(entity.stream_type(), Some(StreamType::Streaming));
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "streaminfo",
                "streamId": "s-1",
                "streamType": "streaming",
                "streamSequence": 3
            })
        );
    }

    #[test]
    fn reference_requires_conversation_and_service_url() {
        let mut activity = Activity::message("x");
        assert!(matches!(
            activity.conversation_reference(),
            Err(Error::Validation { .. })
        ));
        activity.conversation = Some(ConversationAccount {
            id: "c".into(),
            ..Default::default()
        });
        assert!(activity.conversation_reference().is_err());
    }

    #[test]
    fn apply_reference_addresses_reply_to_user() {
        let inbound = Activity::from_json(inbound_json()).unwrap();
        let reference = inbound.conversation_reference().unwrap();
        let mut reply = Activity::message("pong");
        reply.apply_reference(&reference);
        assert_eq!(reply.from.as_ref().unwrap().id, "28:bot");
        assert_eq!(reply.recipient.as_ref().unwrap().id, "29:user");
        assert_eq!(reply.conversation_id(), Some("a:conv"));
        assert_eq!(reference.activity_id.as_deref(), Some("1700000000000"));
    }
}
