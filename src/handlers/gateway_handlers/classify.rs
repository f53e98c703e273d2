use std::collections::HashMap;

use crate::models::{ReadingKind, Threshold, NA_SENTINEL};

/// Tags one reading against the assignment's per-sensor bounds.
///
/// Alert iff a threshold exists for the key and the value lies outside
/// [min, max]. The N/A sentinel is never an alert, whatever the bounds say;
/// a sensor without a threshold is always regular.
pub fn classify(
    sensor_key: &str,
    value: f64,
    thresholds: &HashMap<String, Threshold>,
) -> ReadingKind {
    if value == NA_SENTINEL {
        return ReadingKind::Regular;
    }

    match thresholds.get(sensor_key) {
        Some(threshold) if value < threshold.min || value > threshold.max => {
            log::debug!(
                "sensor '{}' value {} outside [{}, {}]",
                sensor_key,
                value,
                threshold.min,
                threshold.max
            );
            ReadingKind::Alert
        }
        _ => ReadingKind::Regular,
    }
}
