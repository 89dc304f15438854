//! Routes the app registers itself. A user route with the same name
//! replaces them.

use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_common::ActivityKind,
    parley_routing::{Context, Route, RouteHandler, selectors},
    serde_json::Value,
    tracing::info,
};

pub const INVOKE: &str = "invoke";
pub const CONVERSATION_UPDATE: &str = "conversationUpdate";

pub fn all() -> Vec<Route> {
    vec![
        Route::system(INVOKE, selectors::any_invoke(), Arc::new(UnhandledInvoke)),
        Route::system(
            CONVERSATION_UPDATE,
            selectors::conversation_update(),
            Arc::new(MembershipLogger),
        ),
    ]
}

/// Answers any invoke that reached it with 501.
struct UnhandledInvoke;

#[async_trait]
impl RouteHandler for UnhandledInvoke {
    async fn handle(&self, ctx: &mut Context) -> anyhow::Result<Option<Value>> {
        info!(
            name = ctx.activity().invoke_name().unwrap_or_default(),
            "unhandled invoke"
        );
        ctx.set_status(501);
        Ok(Some(serde_json::json!({ "status": 501 })))
    }
}

/// Logs member changes and continues.
struct MembershipLogger;

#[async_trait]
impl RouteHandler for MembershipLogger {
    async fn handle(&self, ctx: &mut Context) -> anyhow::Result<Option<Value>> {
        if let ActivityKind::ConversationUpdate {
            members_added,
            members_removed,
        } = &ctx.activity().kind
        {
            info!(
                conversation_id = ctx.activity().conversation_id().unwrap_or_default(),
                added = members_added.len(),
                removed = members_removed.len(),
                "conversation membership changed"
            );
        }
        ctx.next().await
    }
}
