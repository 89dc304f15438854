//! Built-in route selectors.

use {
    parley_common::{Activity, ActivityKind},
    regex::Regex,
};

use crate::{Error, Result};

pub fn any() -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    |_| true
}

pub fn message() -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    Activity::is_message
}

pub fn typing() -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    |a| matches!(a.kind, ActivityKind::Typing { .. })
}

pub fn reaction() -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    |a| matches!(a.kind, ActivityKind::MessageReaction { .. })
}

pub fn conversation_update() -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    |a| matches!(a.kind, ActivityKind::ConversationUpdate { .. })
}

/// Any invoke, regardless of name.
pub fn any_invoke() -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    |a| a.invoke_name().is_some()
}

pub fn invoke(name: impl Into<String>) -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    let name = name.into();
    move |a| a.invoke_name() == Some(name.as_str())
}

pub fn event(name: impl Into<String>) -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    let name = name.into();
    move |a| a.event_name() == Some(name.as_str())
}

/// Messages whose text (mention markup stripped) matches `pattern`.
pub fn message_matching(pattern: &str) -> Result<impl Fn(&Activity) -> bool + Send + Sync + 'static> {
    let re = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok(move |a: &Activity| {
        a.is_message() && a.cleaned_text().is_some_and(|text| re.is_match(&text))
    })
}

/// Messages that @-mention the bot.
pub fn mention() -> impl Fn(&Activity) -> bool + Send + Sync + 'static {
    |a| a.is_message() && a.bot_is_mentioned()
}
