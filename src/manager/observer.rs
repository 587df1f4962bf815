//! Hooks the session uses to reach the views

use std::sync::{Arc, Mutex};

use crate::notification::{Notification, NotificationLog};
use crate::sections::BufferedSection;

/// Implemented by whatever displays the two views
pub trait SessionObserver {
    /// A section's map and views were rebuilt or patched
    fn repaint(&mut self, _section: usize, _buffered: &BufferedSection) {}

    /// The interactive thread is about to block on the reformat worker
    fn set_busy(&mut self, _busy: bool) {}

    fn notify(&mut self, _notification: Notification) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}

#[derive(Debug, Default)]
struct Recorded {
    repaints: Vec<usize>,
    busy: Vec<bool>,
    notifications: NotificationLog,
    last_views: Option<(usize, String, String)>,
}

/// Observer that keeps what it was told, for the CLI and for tests.
/// Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        f(&mut self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Section indices in repaint order
    #[must_use]
    pub fn repaints(&self) -> Vec<usize> {
        self.with(|r| r.repaints.clone())
    }

    #[must_use]
    pub fn busy_transitions(&self) -> Vec<bool> {
        self.with(|r| r.busy.clone())
    }

    /// Notification messages, oldest first
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.with(|r| r.notifications.messages())
    }

    /// Notifications, oldest first
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.with(|r| r.notifications.all().iter().rev().cloned().collect())
    }

    /// Section index, source and braille text of the last repaint
    #[must_use]
    pub fn last_views(&self) -> Option<(usize, String, String)> {
        self.with(|r| r.last_views.clone())
    }

    pub fn clear(&self) {
        self.with(|r| {
            r.repaints.clear();
            r.busy.clear();
            r.notifications.clear();
            r.last_views = None;
        });
    }
}

impl SessionObserver for RecordingObserver {
    fn repaint(&mut self, section: usize, buffered: &BufferedSection) {
        self.with(|r| {
            r.repaints.push(section);
            r.last_views = Some((
                section,
                buffered.views.source.clone(),
                buffered.views.braille.clone(),
            ));
        });
    }

    fn set_busy(&mut self, busy: bool) {
        self.with(|r| r.busy.push(busy));
    }

    fn notify(&mut self, notification: Notification) {
        self.with(|r| r.notifications.push(notification));
    }
}
