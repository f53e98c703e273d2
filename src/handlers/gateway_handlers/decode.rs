use crate::errors::IngestError;
use crate::models::NA_SENTINEL;

/// A single decoded payload field, before threshold classification.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    pub key: String,
    pub value: f64,
    pub unit: String,
}

/// Parses a gateway payload: a flat JSON object where every top-level field
/// is one sensor reading. Values are a bare number, a string of the form
/// `<number><unit>`, or something containing the token "N/A".
///
/// Readings come out in payload field order. Fields that are neither number
/// nor string are dropped with a log note; they never become readings.
pub fn decode(payload: &str) -> Result<Vec<DecodedReading>, IngestError> {
    let parsed: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| IngestError::Decode(e.to_string()))?;
    let fields = parsed
        .as_object()
        .ok_or_else(|| IngestError::Decode("payload is not a flat JSON object".to_string()))?;

    let mut readings = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(value) => readings.push(DecodedReading {
                    key: key.clone(),
                    value,
                    unit: String::new(),
                }),
                None => log::warn!("dropping unrepresentable numeric field '{}'", key),
            },
            serde_json::Value::String(s) => {
                let (value, unit) = split_value(s);
                readings.push(DecodedReading {
                    key: key.clone(),
                    value,
                    unit,
                });
            }
            other => {
                log::warn!("dropping non-numeric, non-string field '{}': {}", key, other);
            }
        }
    }

    Ok(readings)
}

fn split_value(s: &str) -> (f64, String) {
    if s.contains("N/A") {
        return (NA_SENTINEL, "N/A".to_string());
    }

    match split_numeric_prefix(s) {
        // "12.5 km/h" style payloads separate the unit with a space.
        Some((value, unit)) => (value, unit.trim_start().to_string()),
        // Unreadable but still emitted, so the field is not silently lost.
        None => (f64::NAN, String::new()),
    }
}

/// Splits `-?<digits>[.<digits>]<rest>` into the number and the trailing
/// unit text. None when the string has no leading numeric token.
fn split_numeric_prefix(s: &str) -> Option<(f64, &str)> {
    let bytes = s.as_bytes();
    let mut end = 0;

    if bytes.first() == Some(&b'-') {
        end = 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == int_start {
        return None;
    }

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > frac_start {
            end = frac_end;
        }
    }

    let value: f64 = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}
