//! Echo bot served by `parley serve`.

use std::time::Duration;

use {
    parley_common::{Activity, ActivityKind},
    parley_routing::{Route, handler_fn, selectors},
    tracing::debug,
};

/// Pause between streamed words, so clients render the stream progressively.
const WORD_DELAY: Duration = Duration::from_millis(40);

pub fn routes() -> Vec<Route> {
    vec![welcome(), echo()]
}

/// Greets members added to the conversation, then lets the membership
/// logger run.
fn welcome() -> Route {
    Route::new(
        selectors::conversation_update(),
        handler_fn(|ctx| {
            Box::pin(async move {
                let bot_id = ctx.reference().bot.id.clone();
                let newcomers: Vec<String> = match &ctx.activity().kind {
                    ActivityKind::ConversationUpdate { members_added, .. } => members_added
                        .iter()
                        .filter(|m| m.id != bot_id)
                        .map(|m| m.name.clone().unwrap_or_else(|| m.id.clone()))
                        .collect(),
                    _ => Vec::new(),
                };
                for name in newcomers {
                    ctx.send(Activity::message(format!(
                        "Welcome, {name}! Send me a message and I will stream it back."
                    )))
                    .await?;
                }
                ctx.next().await
            })
        }),
    )
    .named("welcome")
}

/// Streams the inbound text back one word at a time.
fn echo() -> Route {
    Route::new(
        selectors::message(),
        handler_fn(|ctx| {
            Box::pin(async move {
                let text = ctx.activity().cleaned_text().unwrap_or_default();
                if text.trim().is_empty() {
                    ctx.reply("I only echo text.").await?;
                    return Ok(None);
                }

                let stream = ctx.stream();
                stream.update("Echoing…");
                let cancel = ctx.cancel().clone();
                for word in text.split_inclusive(' ') {
                    stream.emit(word);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(WORD_DELAY) => {},
                    }
                }
                debug!(words = text.split_whitespace().count(), "echo streamed");
                Ok(None)
            })
        }),
    )
    .named("echo")
}
