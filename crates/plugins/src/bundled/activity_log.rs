//! `activity-log` plugin: appends one JSONL line per received, sent and
//! answered activity.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    parley_common::{Event, EventArgs},
    serde_json::Value,
    tracing::warn,
};

use crate::{
    Plugin,
    error::{Context, Error, Result},
};

pub struct ActivityLogPlugin {
    log_path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl ActivityLogPlugin {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            file: Mutex::new(None),
        }
    }

    /// Default log path: `<data dir>/logs/activity.jsonl`.
    pub fn default_path() -> PathBuf {
        parley_config::data_dir().join("logs/activity.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    fn append(&self, entry: &Value) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            if let Some(parent) = self.log_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .map_err(|e| Error::open_log(&self.log_path, e))?;
            *guard = Some(file);
        }
        let file = guard.as_mut().context("activity log not open")?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn record(&self, direction: &str, args: &EventArgs) {
        let Some(entry) = args.event.as_ref().and_then(|e| log_entry(direction, e)) else {
            return;
        };
        if let Err(e) = self.append(&entry) {
            warn!(error = %e, path = %self.log_path.display(), "activity-log: failed to write entry");
        }
    }
}

fn log_entry(direction: &str, event: &Event) -> Option<Value> {
    let activity = event.activity()?;
    let status = match event {
        Event::ActivityResponse { status, .. } => Some(*status),
        _ => None,
    };
    Some(serde_json::json!({
        "ts": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        "direction": direction,
        "type": activity.kind.name(),
        "activity_id": activity.id,
        "conversation_id": activity.conversation_id(),
        "text": activity.text(),
        "status": status,
    }))
}

#[async_trait]
impl Plugin for ActivityLogPlugin {
    fn name(&self) -> &str {
        "activity-log"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn on_activity(&self, args: &EventArgs) -> anyhow::Result<Option<Value>> {
        self.record("received", args);
        Ok(None)
    }

    async fn on_activity_sent(&self, args: &EventArgs) -> anyhow::Result<()> {
        self.record("sent", args);
        Ok(())
    }

    async fn on_activity_response(&self, args: &EventArgs) -> anyhow::Result<()> {
        self.record("response", args);
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        parley_common::{
            Activity, ConversationReference,
            activity::{ChannelAccount, ConversationAccount},
        },
        tokio_util::sync::CancellationToken,
    };

    fn args(event: Event) -> EventArgs {
        EventArgs {
            source: "app".into(),
            topic: event.topic().unwrap_or_default().into(),
            event: Some(event),
            cancel: CancellationToken::new(),
        }
    }

    fn activity() -> Activity {
        let mut activity = Activity::message("hello").with_id("in-1");
        activity.conversation = Some(ConversationAccount {
            id: "a:conv".into(),
            ..Default::default()
        });
        activity
    }

    fn reference() -> ConversationReference {
        ConversationReference {
            service_url: "https://smba.example/".into(),
            channel_id: "msteams".into(),
            conversation: ConversationAccount {
                id: "a:conv".into(),
                ..Default::default()
            },
            bot: ChannelAccount::default(),
            user: None,
            activity_id: None,
        }
    }

    #[tokio::test]
    async fn logs_each_direction() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("logs/activity.jsonl");
        let plugin = ActivityLogPlugin::new(log_path.clone());

        plugin
            .on_activity(&args(Event::Activity {
                activity: activity(),
                reference: reference(),
                token: None,
            }))
            .await
            .unwrap();
        plugin
            .on_activity_sent(&args(Event::ActivitySent {
                activity: Activity::message("hi back").with_id("out-1"),
                reference: reference(),
            }))
            .await
            .unwrap();
        plugin
            .on_activity_response(&args(Event::ActivityResponse {
                activity: activity(),
                status: 200,
                body: None,
            }))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["direction"], "received");
        assert_eq!(lines[0]["conversation_id"], "a:conv");
        assert_eq!(lines[1]["text"], "hi back");
        assert_eq!(lines[2]["status"], 200);
    }

    #[tokio::test]
    async fn events_without_activity_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("activity.jsonl");
        let plugin = ActivityLogPlugin::new(log_path.clone());

        plugin.on_activity(&args(Event::Start)).await.unwrap();
        assert!(!log_path.exists());
    }
}
