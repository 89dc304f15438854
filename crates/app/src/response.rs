use {serde::Serialize, serde_json::Value};

/// Outcome of one processed activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    pub routes_matched: usize,
    /// Remote id of the streamed message, when the turn streamed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

impl Response {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self {
            status,
            body,
            meta: ResponseMeta::default(),
        }
    }

    pub fn ok(body: Option<Value>) -> Self {
        Self::new(200, body)
    }

    /// Error answer with an `{"error": message}` body.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::new(
            status,
            Some(serde_json::json!({ "error": message.into() })),
        )
    }

    #[must_use]
    pub fn with_meta(mut self, meta: ResponseMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
