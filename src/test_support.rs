use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::AssignmentCatalog;
use crate::errors::IngestError;
use crate::measurements::MeasurementStore;
use crate::models::{
    BrokerProtocol, GatewayAssignment, Measurement, Notification, Reading, ReadingKind,
};
use crate::websocket_srv::RealtimeChannel;

pub fn assignment(id: &str, zone_id: &str, topic: &str) -> GatewayAssignment {
    GatewayAssignment {
        id: id.to_string(),
        zone_id: Some(zone_id.to_string()),
        host: "127.0.0.1".to_string(),
        port: Some(1884),
        protocol: BrokerProtocol::Mqtt,
        topic: topic.to_string(),
        thresholds: Default::default(),
        active: true,
    }
}

pub fn reading(assignment_id: &str, key: &str, value: f64, kind: ReadingKind) -> Reading {
    Reading {
        sensor_key: key.to_string(),
        value,
        unit: String::new(),
        timestamp: Utc::now(),
        assignment_id: assignment_id.to_string(),
        kind,
    }
}

pub struct MemoryCatalog {
    assignments: Mutex<Vec<GatewayAssignment>>,
}

impl MemoryCatalog {
    pub fn new(assignments: Vec<GatewayAssignment>) -> Arc<Self> {
        Arc::new(MemoryCatalog {
            assignments: Mutex::new(assignments),
        })
    }

    pub fn push(&self, assignment: GatewayAssignment) {
        self.assignments.lock().unwrap().push(assignment);
    }
}

#[async_trait]
impl AssignmentCatalog for MemoryCatalog {
    async fn list_active_assignments(&self) -> Result<Vec<GatewayAssignment>, IngestError> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.active)
            .cloned()
            .collect())
    }

    async fn find_active_assignment_by_topic_and_zone(
        &self,
        topic: &str,
        zone_id: &str,
    ) -> Result<Option<GatewayAssignment>, IngestError> {
        Ok(self.assignments.lock().unwrap().iter().find(|a| {
            a.active && a.topic == topic && a.zone_id.as_deref().map_or(false, |z| z != zone_id)
        }).cloned())
    }

    async fn is_assignment_active(&self, assignment_id: &str) -> Result<bool, IngestError> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.id == assignment_id && a.active))
    }

    async fn load_assignment_with_relations(
        &self,
        assignment_id: &str,
    ) -> Result<GatewayAssignment, IngestError> {
        self.assignments
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == assignment_id)
            .cloned()
            .ok_or_else(|| {
                IngestError::InvalidConfig(format!("no assignment with id {}", assignment_id))
            })
    }
}

#[derive(Default)]
pub struct RecordingStore {
    batches: Mutex<Vec<Vec<Reading>>>,
    notifications: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingStore::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<Reading>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeasurementStore for RecordingStore {
    async fn save_batch(&self, readings: &[Reading]) -> Result<Vec<Measurement>, IngestError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Store("store offline".to_string()));
        }

        self.batches.lock().unwrap().push(readings.to_vec());

        Ok(readings
            .iter()
            .map(|r| Measurement {
                id: ObjectId::new(),
                sensor_key: r.sensor_key.clone(),
                value: r.value,
                unit: r.unit.clone(),
                status: match r.kind {
                    ReadingKind::Regular => "regular".to_string(),
                    ReadingKind::Alert => "alert".to_string(),
                },
                assignment_id: ObjectId::new(),
                timestamp: bson::DateTime::from_chrono(r.timestamp),
                created_at: bson::DateTime::now(),
            })
            .collect())
    }

    async fn save_notifications(&self, notifications: &[Notification]) -> Result<(), IngestError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Store("store offline".to_string()));
        }
        self.notifications
            .lock()
            .unwrap()
            .extend_from_slice(notifications);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    readings: Mutex<Vec<(String, Vec<Reading>)>>,
    statuses: Mutex<Vec<(String, bool, String)>>,
    notifications: Mutex<Vec<(String, Notification)>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingChannel::default())
    }

    pub fn readings(&self) -> Vec<(String, Vec<Reading>)> {
        self.readings.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, bool, String)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<(String, Notification)> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimeChannel for RecordingChannel {
    async fn emit_readings(&self, zone_id: &str, readings: &[Reading], _timestamp: DateTime<Utc>) {
        self.readings
            .lock()
            .unwrap()
            .push((zone_id.to_string(), readings.to_vec()));
    }

    async fn emit_connection_status(&self, zone_id: &str, connected: bool, message: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push((zone_id.to_string(), connected, message.to_string()));
    }

    async fn emit_notifications(&self, zone_id: &str, notifications: &[Notification]) {
        let mut stored = self.notifications.lock().unwrap();
        for notification in notifications {
            stored.push((zone_id.to_string(), notification.clone()));
        }
    }
}
