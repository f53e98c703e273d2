use async_trait::async_trait;
use bson::oid::ObjectId;
use mongodb::{Collection, Database};

use crate::errors::IngestError;
use crate::models::{Measurement, Notification, Reading, ReadingKind};

/// Where readings finally land. Used identically by the buffered flush path
/// and the immediate alert path.
///
/// The store is append-only and must tolerate duplicate inserts: a flush
/// retried after a failure re-sends the same batch with no de-duplication.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn save_batch(&self, readings: &[Reading]) -> Result<Vec<Measurement>, IngestError>;

    async fn save_notifications(&self, notifications: &[Notification]) -> Result<(), IngestError>;
}

pub struct MongoMeasurementStore {
    db: Database,
}

impl MongoMeasurementStore {
    pub fn new(db: Database) -> Self {
        MongoMeasurementStore { db }
    }

    fn measurements(&self) -> Collection<Measurement> {
        self.db.collection("Measurement")
    }

    fn notifications(&self) -> Collection<Notification> {
        self.db.collection("Notification")
    }
}

#[async_trait]
impl MeasurementStore for MongoMeasurementStore {
    async fn save_batch(&self, readings: &[Reading]) -> Result<Vec<Measurement>, IngestError> {
        if readings.is_empty() {
            return Ok(Vec::new());
        }

        let mut docs = Vec::with_capacity(readings.len());
        for reading in readings {
            let assignment_id = ObjectId::parse_str(&reading.assignment_id).map_err(|_| {
                IngestError::Store(format!("bad assignment id '{}'", reading.assignment_id))
            })?;

            docs.push(Measurement {
                id: ObjectId::new(),
                sensor_key: reading.sensor_key.clone(),
                value: reading.value,
                unit: reading.unit.clone(),
                status: match reading.kind {
                    ReadingKind::Regular => "regular".to_string(),
                    ReadingKind::Alert => "alert".to_string(),
                },
                assignment_id,
                timestamp: bson::DateTime::from_chrono(reading.timestamp),
                created_at: bson::DateTime::now(),
            });
        }

        self.measurements()
            .insert_many(docs.clone(), None)
            .await
            .map_err(|e| IngestError::Store(e.to_string()))?;

        Ok(docs)
    }

    async fn save_notifications(&self, notifications: &[Notification]) -> Result<(), IngestError> {
        if notifications.is_empty() {
            return Ok(());
        }

        self.notifications()
            .insert_many(notifications.to_vec(), None)
            .await
            .map_err(|e| IngestError::Store(e.to_string()))?;

        Ok(())
    }
}
