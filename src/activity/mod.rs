//! Editor activity feed
//!
//! Server-originated broadcasts of a recent-activity snapshot (what file is
//! open, where the cursor is, a small view chunk). The feed's message type
//! is push-only: clients subscribe to receive snapshots but anything they
//! send inbound is ignored with a warning. A maintenance task reverts the
//! snapshot to a placeholder after the source has gone idle.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::mux::{Channel, Handler, MessageType, Mux};

/// How long without an update before the feed reverts to the placeholder
pub const DEFAULT_IDLE_RESET: Duration = Duration::from_secs(15 * 60);

/// One editor activity snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeActivity {
    /// Repository the file belongs to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Workspace name
    pub workspace: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// Editor language ID
    pub language: String,
    pub row: u32,
    pub col: u32,
    /// A few lines around the cursor
    #[serde(rename = "viewChunk")]
    pub view_chunk: String,
}

impl Default for CodeActivity {
    fn default() -> Self {
        Self {
            repository: None,
            workspace: "Unknown".to_owned(),
            file_name: "inactive.md".to_owned(),
            language: "markdown".to_owned(),
            row: 1,
            col: 1,
            view_chunk: String::new(),
        }
    }
}

/// Push-only broadcaster of [`CodeActivity`] snapshots
pub struct ActivityFeed {
    mux: Arc<Mux>,
    kind: MessageType,
    state: RwLock<(CodeActivity, Instant)>,
}

impl ActivityFeed {
    /// Create a feed broadcasting on `kind`, starting at the placeholder
    pub fn new(mux: Arc<Mux>, kind: impl Into<MessageType>) -> Self {
        Self {
            mux,
            kind: kind.into(),
            state: RwLock::new((CodeActivity::default(), Instant::now())),
        }
    }

    /// The message type this feed owns
    pub fn message_type(&self) -> &str {
        &self.kind
    }

    /// Register the feed as handler for its type
    pub fn attach(self: &Arc<Self>) {
        self.mux
            .register_handler(&self.kind, Arc::clone(self) as Arc<dyn Handler>);
    }

    /// The current snapshot
    pub fn current(&self) -> CodeActivity {
        self.state.read().unwrap().0.clone()
    }

    /// Store a new snapshot and broadcast it to subscribers
    ///
    /// The file name is reduced to its final path segment; subscribers
    /// never see the full path.
    pub fn publish(&self, mut activity: CodeActivity) -> Result<()> {
        activity.file_name = base_name(&activity.file_name);
        {
            let mut state = self.state.write().unwrap();
            *state = (activity.clone(), Instant::now());
        }
        self.broadcast(&activity)
    }

    fn broadcast(&self, activity: &CodeActivity) -> Result<()> {
        let payload = serde_json::to_vec(activity).map_err(MuxError::Encoding)?;
        self.mux.broadcast(&self.kind, &payload, None)
    }

    /// Revert to the placeholder when no update arrived within `idle`
    ///
    /// Returns whether a revert happened.
    pub fn revert_if_idle(&self, idle: Duration) -> Result<bool> {
        let placeholder = CodeActivity::default();
        {
            let mut state = self.state.write().unwrap();
            if state.1.elapsed() < idle || state.0 == placeholder {
                return Ok(false);
            }
            state.0 = placeholder.clone();
        }
        self.broadcast(&placeholder)?;
        Ok(true)
    }

    /// Spawn the periodic idle-reset task
    pub fn spawn_idle_reset(self: &Arc<Self>, idle: Duration) -> tokio::task::JoinHandle<()> {
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5 * 60));
            loop {
                ticker.tick().await;
                if let Err(err) = feed.revert_if_idle(idle) {
                    tracing::error!(error = %err, "activity idle reset failed");
                }
            }
        })
    }
}

// Last non-empty segment of a slash- or backslash-separated path.
fn base_name(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path)
        .to_owned()
}

impl Handler for ActivityFeed {
    // Push-only; inbound payloads are a client error.
    fn handle_message(&self, channel: &Arc<Channel>, _payload: &[u8]) -> Result<()> {
        tracing::warn!(
            message_type = %self.kind,
            channel = %channel.id(),
            "inbound message on push-only activity type"
        );
        Ok(())
    }
}
