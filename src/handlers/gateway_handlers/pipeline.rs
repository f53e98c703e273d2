use chrono::Utc;

use crate::measurements::MeasurementStore;
use crate::models::{GatewayAssignment, Reading, ReadingKind};
use crate::websocket_srv::RealtimeChannel;

use super::alerts::AlertPersister;
use super::buffer::ReadingBuffer;
use super::classify::classify;
use super::decode::decode;

/// One inbound broker message, end to end: decode, classify, broadcast,
/// persist. Regular readings go through the buffer, alert readings through
/// the immediate path; every decoded reading is broadcast either way.
///
/// Nothing here fails the connection. A malformed payload is dropped with a
/// log note, a failed flush keeps its batch for the next retry.
pub async fn handle_payload(
    assignment: &GatewayAssignment,
    zone_id: &str,
    payload: &str,
    buffer: &mut ReadingBuffer,
    alert_persister: &AlertPersister,
    store: &dyn MeasurementStore,
    channel: &dyn RealtimeChannel,
) {
    let decoded = match decode(payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            log::warn!(
                "dropping payload on topic '{}' for assignment {}: {}",
                assignment.topic,
                assignment.id,
                e
            );
            return;
        }
    };

    let now = Utc::now();
    let mut readings = Vec::with_capacity(decoded.len());
    for field in decoded {
        let kind = classify(&field.key, field.value, &assignment.thresholds);
        readings.push(Reading {
            sensor_key: field.key,
            value: field.value,
            unit: field.unit,
            timestamp: now,
            assignment_id: assignment.id.clone(),
            kind,
        });
    }

    if readings.is_empty() {
        return;
    }

    channel.emit_readings(zone_id, &readings, now).await;

    let alerts: Vec<Reading> = readings
        .iter()
        .filter(|r| r.kind == ReadingKind::Alert)
        .cloned()
        .collect();
    alert_persister.persist(zone_id, &alerts).await;

    for reading in readings.into_iter().filter(|r| r.kind == ReadingKind::Regular) {
        buffer.append(reading);
        if let Err(e) = buffer.maybe_flush(store).await {
            log::error!("buffered flush failed for assignment {}: {}", assignment.id, e);
        }
    }
}
