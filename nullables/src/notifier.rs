//! Nullable notifier: records every published event.

use baton_types::{Notifier, NotifyError, SessionEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Records `(topic, event)` pairs instead of delivering them.
#[derive(Default)]
pub struct NullNotifier {
    published: Mutex<Vec<(String, SessionEvent)>>,
    failing: AtomicBool,
}

impl NullNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail with [`NotifyError::Closed`].
    pub fn fail_publishes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, SessionEvent)> {
        self.published.lock().unwrap().clone()
    }

    /// Events published on `topic`.
    pub fn events_on(&self, topic: &str) -> Vec<SessionEvent> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl Notifier for NullNotifier {
    fn publish(&self, topic: &str, event: &SessionEvent) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Closed);
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), event.clone()));
        Ok(())
    }
}
