use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::IngestError;

/// Value a gateway reports for a sensor it could not read.
pub const NA_SENTINEL: f64 = -999.0;

// ---------------------------------------------------------------------------
// Stored documents
// ---------------------------------------------------------------------------

/// `ZoneGateway` collection: the link between one field zone and one gateway
/// configuration. Soft-deactivated by the platform, never deleted here.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ZoneGatewayDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "zoneId")]
    pub zone_id: Option<ObjectId>,
    #[serde(rename = "configId")]
    pub config_id: ObjectId,
    pub active: bool,
}

/// `GatewayConfig` collection: broker coordinates plus per-sensor bounds.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfigDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub host: String,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    #[serde(rename = "baseTopic")]
    pub base_topic: String,
    #[serde(default)]
    pub sensors: Vec<SensorThresholdDoc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SensorThresholdDoc {
    pub key: String,
    #[serde(rename = "minValue")]
    pub min_value: Option<f64>,
    #[serde(rename = "maxValue")]
    pub max_value: Option<f64>,
}

/// `Measurement` collection, one document per persisted reading.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Measurement {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "sensorKey")]
    pub sensor_key: String,
    pub value: f64,
    pub unit: String,
    pub status: String,
    #[serde(rename = "assignmentId")]
    pub assignment_id: ObjectId,
    pub timestamp: bson::DateTime,
    #[serde(rename = "createdAt")]
    pub created_at: bson::DateTime,
}

/// `Notification` collection, the operator alert inbox.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub type_: String,
    pub message: String,
    pub read: bool,
    pub severity: String,
    #[serde(rename = "zoneId")]
    pub zone_id: String,
    #[serde(rename = "sensorKey")]
    pub sensor_key: String,
    pub value: f64,
    pub timestamp: bson::DateTime,
}

// ---------------------------------------------------------------------------
// Engine types
// ---------------------------------------------------------------------------

/// Closed set of supported broker protocols. Anything unrecognized falls back
/// to plain MQTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerProtocol {
    Mqtt,
    Mqtts,
}

impl BrokerProtocol {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("mqtts") => BrokerProtocol::Mqtts,
            _ => BrokerProtocol::Mqtt,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            BrokerProtocol::Mqtt => 1883,
            BrokerProtocol::Mqtts => 8883,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub min: f64,
    pub max: f64,
}

/// One validated (zone, gateway configuration) pairing. Built once from the
/// raw documents when the catalog loads it; the engine never touches bson
/// after this point.
#[derive(Debug, Clone)]
pub struct GatewayAssignment {
    pub id: String,
    pub zone_id: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub protocol: BrokerProtocol,
    pub topic: String,
    pub thresholds: HashMap<String, Threshold>,
    pub active: bool,
}

impl GatewayAssignment {
    pub fn from_docs(
        assignment: ZoneGatewayDoc,
        config: GatewayConfigDoc,
    ) -> Result<Self, IngestError> {
        if config.host.trim().is_empty() {
            return Err(IngestError::InvalidConfig(format!(
                "gateway config {} has an empty host",
                config.id
            )));
        }
        if config.base_topic.trim().is_empty() {
            return Err(IngestError::InvalidConfig(format!(
                "gateway config {} has an empty base topic",
                config.id
            )));
        }

        let mut thresholds = HashMap::new();
        for sensor in config.sensors {
            match (sensor.min_value, sensor.max_value) {
                (Some(min), Some(max)) if min <= max => {
                    thresholds.insert(sensor.key, Threshold { min, max });
                }
                _ => {
                    log::warn!(
                        "skipping incomplete threshold for sensor '{}' on config {}",
                        sensor.key,
                        config.id
                    );
                }
            }
        }

        Ok(GatewayAssignment {
            id: assignment.id.to_string(),
            zone_id: assignment.zone_id.map(|id| id.to_string()),
            host: config.host,
            port: config.port,
            protocol: BrokerProtocol::parse(config.protocol.as_deref()),
            topic: config.base_topic,
            thresholds,
            active: assignment.active,
        })
    }

    pub fn broker_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    Regular,
    Alert,
}

/// One decoded sensor value, ephemeral until flushed.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Reading {
    #[serde(rename = "sensorKey")]
    pub sensor_key: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "assignmentId")]
    pub assignment_id: String,
    pub kind: ReadingKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_doc(sensors: Vec<SensorThresholdDoc>) -> GatewayConfigDoc {
        GatewayConfigDoc {
            id: ObjectId::new(),
            host: "broker.farm.local".to_string(),
            port: None,
            protocol: None,
            base_topic: "greenhouse/north".to_string(),
            sensors,
        }
    }

    fn assignment_doc() -> ZoneGatewayDoc {
        ZoneGatewayDoc {
            id: ObjectId::new(),
            zone_id: Some(ObjectId::new()),
            config_id: ObjectId::new(),
            active: true,
        }
    }

    #[test]
    fn builds_validated_assignment_with_thresholds() {
        let config = config_doc(vec![SensorThresholdDoc {
            key: "temp".to_string(),
            min_value: Some(18.0),
            max_value: Some(28.0),
        }]);
        let assignment = GatewayAssignment::from_docs(assignment_doc(), config).unwrap();

        assert_eq!(assignment.topic, "greenhouse/north");
        assert_eq!(assignment.protocol, BrokerProtocol::Mqtt);
        assert_eq!(assignment.broker_port(), 1883);
        assert_eq!(
            assignment.thresholds.get("temp"),
            Some(&Threshold { min: 18.0, max: 28.0 })
        );
    }

    #[test]
    fn incomplete_thresholds_are_skipped_not_fatal() {
        let config = config_doc(vec![
            SensorThresholdDoc {
                key: "hum".to_string(),
                min_value: Some(30.0),
                max_value: None,
            },
            SensorThresholdDoc {
                key: "temp".to_string(),
                min_value: Some(40.0),
                max_value: Some(10.0), // inverted bounds
            },
        ]);
        let assignment = GatewayAssignment::from_docs(assignment_doc(), config).unwrap();
        assert!(assignment.thresholds.is_empty());
    }

    #[test]
    fn empty_topic_is_a_config_error() {
        let mut config = config_doc(vec![]);
        config.base_topic = " ".to_string();
        assert!(GatewayAssignment::from_docs(assignment_doc(), config).is_err());
    }

    #[test]
    fn mqtts_default_port() {
        let mut config = config_doc(vec![]);
        config.protocol = Some("mqtts".to_string());
        let assignment = GatewayAssignment::from_docs(assignment_doc(), config).unwrap();
        assert_eq!(assignment.protocol, BrokerProtocol::Mqtts);
        assert_eq!(assignment.broker_port(), 8883);
    }
}
