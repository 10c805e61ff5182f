//! User-visible notices.
//!
//! Terminal failures and confirmations surface to the user twice: as
//! durable state on the owning controller, and as a transient [`Notice`]
//! describing the event in domain terms. The hub is a broadcast channel;
//! the embedding UI subscribes and renders notices however it likes
//! (toast, status bar, log pane). With no subscriber, notices are dropped.

use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// One transient, human-readable notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Broadcast hub for notices.
#[derive(Debug, Clone)]
pub struct NoticeHub {
    sender: broadcast::Sender<Notice>,
}

impl Default for NoticeHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NoticeHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Success, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Info, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Error, message.into());
    }

    fn push(&self, level: NoticeLevel, message: String) {
        debug!(?level, message = %message, "notice");
        // No subscribers is fine; the notice is simply dropped.
        let _ = self.sender.send(Notice { level, message });
    }
}
