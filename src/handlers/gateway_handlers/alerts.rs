use bson::oid::ObjectId;
use std::sync::Arc;

use crate::measurements::MeasurementStore;
use crate::models::{Notification, Reading};
use crate::websocket_srv::RealtimeChannel;

/// Immediate persistence path for alert readings. Bypasses the buffer
/// entirely; a failed save is logged and NOT retried, but the notification
/// is still pushed in real time so operators are not blind to it.
pub struct AlertPersister {
    store: Arc<dyn MeasurementStore>,
    channel: Arc<dyn RealtimeChannel>,
}

impl AlertPersister {
    pub fn new(store: Arc<dyn MeasurementStore>, channel: Arc<dyn RealtimeChannel>) -> Self {
        AlertPersister { store, channel }
    }

    pub async fn persist(&self, zone_id: &str, alerts: &[Reading]) {
        if alerts.is_empty() {
            return;
        }

        if let Err(e) = self.store.save_batch(alerts).await {
            log::error!(
                "failed to persist {} alert reading(s) for zone {}: {}",
                alerts.len(),
                zone_id,
                e
            );
        }

        let notifications: Vec<Notification> = alerts
            .iter()
            .map(|reading| build_notification(zone_id, reading))
            .collect();

        if let Err(e) = self.store.save_notifications(&notifications).await {
            log::error!("failed to save alert notifications for zone {}: {}", zone_id, e);
        }

        self.channel.emit_notifications(zone_id, &notifications).await;
    }
}

fn build_notification(zone_id: &str, reading: &Reading) -> Notification {
    let message = format!(
        "sensor '{}' reading {}{} is outside its configured limits",
        reading.sensor_key, reading.value, reading.unit
    );

    Notification {
        id: ObjectId::new(),
        type_: "alert".to_string(),
        message,
        read: false,
        severity: "high".to_string(),
        zone_id: zone_id.to_string(),
        sensor_key: reading.sensor_key.clone(),
        value: reading.value,
        timestamp: bson::DateTime::from_chrono(reading.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReadingKind;
    use crate::test_support::{reading, RecordingChannel, RecordingStore};

    #[tokio::test]
    async fn alerts_are_saved_and_notified_immediately() {
        let store = RecordingStore::new();
        let channel = RecordingChannel::new();
        let persister = AlertPersister::new(store.clone(), channel.clone());

        let alert = reading("a1", "temp", 35.0, ReadingKind::Alert);
        persister.persist("zone-1", &[alert.clone()]).await;

        assert_eq!(store.batches(), vec![vec![alert]]);
        let notifications = store.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].sensor_key, "temp");
        assert_eq!(notifications[0].type_, "alert");
        assert!(!notifications[0].read);
        assert_eq!(channel.notifications().len(), 1);
    }

    #[tokio::test]
    async fn empty_alert_batch_is_a_no_op() {
        let store = RecordingStore::new();
        let channel = RecordingChannel::new();
        let persister = AlertPersister::new(store.clone(), channel.clone());

        persister.persist("zone-1", &[]).await;

        assert!(store.batches().is_empty());
        assert!(channel.notifications().is_empty());
    }

    #[tokio::test]
    async fn failed_save_is_not_retried_but_still_broadcast() {
        let store = RecordingStore::new();
        let channel = RecordingChannel::new();
        let persister = AlertPersister::new(store.clone(), channel.clone());

        store.set_failing(true);
        persister
            .persist("zone-1", &[reading("a1", "temp", 35.0, ReadingKind::Alert)])
            .await;

        assert!(store.batches().is_empty());
        assert_eq!(channel.notifications().len(), 1);
        assert_eq!(channel.notifications()[0].0, "zone-1");
    }
}
