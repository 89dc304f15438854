//! In-process transport that records what would have been sent.

use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    parley_common::{Activity, ConversationReference},
    tracing::debug,
};

use crate::{ChannelTransport, Error, Result};

/// Records every delivered activity and hands out sequential ids.
///
/// Failures can be injected with [`MemoryTransport::fail_next`]; a failing
/// call is not recorded.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(Activity, ConversationReference)>>,
    next_id: AtomicU64,
    failures: AtomicU32,
    attempts: AtomicU32,
    withhold_ids: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with a 503.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Stop assigning ids, like a channel that accepts an activity but
    /// answers with an empty body.
    pub fn withhold_ids(&self) {
        self.withhold_ids.store(true, Ordering::SeqCst);
    }

    /// Successfully delivered activities, in order.
    pub fn sent(&self) -> Vec<Activity> {
        self.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn sent_with_references(&self) -> Vec<(Activity, ConversationReference)> {
        self.lock().clone()
    }

    /// Every call to `send`, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Activity, ConversationReference)>> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    fn id(&self) -> &str {
        "memory"
    }

    async fn send(&self, mut activity: Activity, reference: &ConversationReference) -> Result<Activity> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::status(503, "injected failure"));
        }

        if activity.id.is_none() && !self.withhold_ids.load(Ordering::SeqCst) {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            activity.id = Some(format!("activity-{n}"));
        }
        debug!(
            conversation_id = %reference.conversation.id,
            activity_id = activity.id.as_deref().unwrap_or_default(),
            kind = activity.kind.name(),
            "memory transport recorded activity"
        );
        self.lock().push((activity.clone(), reference.clone()));
        Ok(activity)
    }
}
