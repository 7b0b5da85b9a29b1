use dashmap::{DashMap, DashSet, mapref::entry::Entry};
use payday_application::{Notification, NotificationKey, NotificationSink, StoreError};

/// Keeps every delivered notification, dropping repeated keys.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: DashMap<NotificationKey, Notification>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered notifications ordered by key.
    pub fn sent(&self) -> Vec<Notification> {
        let mut sent: Vec<Notification> = self
            .sent
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sent.sort_by_key(Notification::key);
        sent
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) -> Result<bool, StoreError> {
        match self.sent.entry(notification.key()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(notification);
                Ok(true)
            }
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LoggingNotifier {
    seen: DashSet<NotificationKey>,
}

impl LoggingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSink for LoggingNotifier {
    fn notify(&self, notification: Notification) -> Result<bool, StoreError> {
        if !self.seen.insert(notification.key()) {
            return Ok(false);
        }
        tracing::info!(
            payday = %notification.payday,
            participant = %notification.participant,
            event = %notification.event,
            subject = ?notification.subject.map(|subject| subject.0),
            amounts = %notification.amounts,
            "Notification"
        );
        Ok(true)
    }
}
