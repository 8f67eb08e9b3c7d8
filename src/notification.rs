//! Single-slot diagnostic channel from the role arbitrator to its host.
//!
//! The arbitrator runs inside a simulation frame and must never block or
//! fail on a diagnostic, so notices are parked here for the host to drain at
//! its leisure. Only the newest notice is kept; an unread one is replaced.
//! Every notice is also mirrored to the `log` facade when it is raised.

use log::{info, warn};

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationLevel {
    /// Nothing to report.
    #[default]
    None,
    /// Informational, e.g. a role transition.
    Info,
    /// Something the host asked for was refused.
    Warn,
}

/// A diagnostic produced by the arbitrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    /// Creates a notification.
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Notification { level, message: message.into() }
    }
}

/// Queue of depth one holding the most recent [`Notification`].
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    pending: Option<Notification>,
}

impl NotificationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a notice, replacing any unread one, and mirrors it to the log.
    pub fn push(&mut self, level: NotificationLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NotificationLevel::Info => info!("{message}"),
            NotificationLevel::Warn => warn!("{message}"),
            NotificationLevel::None => return,
        }
        self.pending = Some(Notification::new(level, message));
    }

    /// Takes the pending notice, leaving the queue empty.
    pub fn pop(&mut self) -> Option<Notification> {
        self.pending.take()
    }

    /// Returns whether a notice is waiting.
    pub fn has_notification(&self) -> bool {
        self.pending.is_some()
    }

    /// Drops any pending notice.
    pub fn clear(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut queue = NotificationQueue::new();
        assert!(!queue.has_notification());

        queue.push(NotificationLevel::Info, "switched to Demand mode.");
        assert!(queue.has_notification());

        let notice = queue.pop().unwrap();
        assert_eq!(notice.level, NotificationLevel::Info);
        assert_eq!(notice.message, "switched to Demand mode.");
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_newer_notice_replaces_unread() {
        let mut queue = NotificationQueue::new();
        queue.push(NotificationLevel::Info, "first");
        queue.push(NotificationLevel::Warn, "second");

        assert_eq!(queue.pop(), Some(Notification::new(NotificationLevel::Warn, "second")));
        assert!(!queue.has_notification());
    }

    #[test]
    fn test_none_level_is_ignored() {
        let mut queue = NotificationQueue::new();
        queue.push(NotificationLevel::Info, "kept");
        queue.push(NotificationLevel::None, "ignored");
        assert_eq!(queue.pop().unwrap().message, "kept");
    }

    #[test]
    fn test_clear_drops_pending() {
        let mut queue = NotificationQueue::new();
        queue.push(NotificationLevel::Warn, "stale");
        queue.clear();
        assert!(!queue.has_notification());
        assert_eq!(queue.pop(), None);
    }
}
