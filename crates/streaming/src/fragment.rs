use {
    parley_common::activity::{Attachment, Entity},
    serde_json::{Map, Value},
};

/// One unit of producer output.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Text delta appended to the message body.
    Text(String),
    /// Progress note ("Searching…"). Shown as an informative update, never
    /// part of the final text.
    Status(String),
    /// Richer update: optional text delta plus attachments, entities and
    /// channel metadata merged into the final message.
    Content {
        text: Option<String>,
        attachments: Vec<Attachment>,
        entities: Vec<Entity>,
        channel_data: Option<Map<String, Value>>,
    },
}

impl Fragment {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::Text(delta.into())
    }

    pub fn status(note: impl Into<String>) -> Self {
        Self::Status(note.into())
    }

    pub fn attachment(attachment: Attachment) -> Self {
        Self::Content {
            text: None,
            attachments: vec![attachment],
            entities: Vec::new(),
            channel_data: None,
        }
    }

    pub fn channel_data(data: Map<String, Value>) -> Self {
        Self::Content {
            text: None,
            attachments: Vec::new(),
            entities: Vec::new(),
            channel_data: Some(data),
        }
    }

    pub(crate) fn is_status(&self) -> bool {
        matches!(self, Self::Status(_))
    }
}

impl From<&str> for Fragment {
    fn from(delta: &str) -> Self {
        Self::Text(delta.to_string())
    }
}

impl From<String> for Fragment {
    fn from(delta: String) -> Self {
        Self::Text(delta)
    }
}
