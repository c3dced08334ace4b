use crate::error::BridgeError;
use serde::Deserialize;

/// One decoded sensor reading. The producer timestamp is carried through as
/// the raw string; the Graphite encoder validates its pattern so a payload
/// with the right fields but a bad timestamp is a Timestamp error, not a
/// Payload error.
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub machine_id: String,
    pub sensor_id: String,
    pub timestamp: String,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
struct BorrowedReading<'a> {
    #[serde(borrow)]
    timestamp: &'a str,
    value: f64,
}

/// Extract (machine_id, sensor_id) from `/{prefix}/{machine_id}/{sensor_id}`.
pub fn parse_topic<'a>(prefix: &str, topic: &'a str) -> Result<(&'a str, &'a str), BridgeError> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 4 || !parts[0].is_empty() || parts[1] != prefix {
        return Err(BridgeError::MalformedTopic(topic.to_string()));
    }
    let (machine_id, sensor_id) = (parts[2], parts[3]);
    if machine_id.is_empty() || sensor_id.is_empty() {
        return Err(BridgeError::MalformedTopic(topic.to_string()));
    }
    Ok((machine_id, sensor_id))
}

pub fn parse_reading(
    prefix: &str,
    topic: &str,
    payload: &mut [u8],
) -> Result<SensorReading, BridgeError> {
    let (machine_id, sensor_id) = parse_topic(prefix, topic)?;

    let reading: BorrowedReading =
        simd_json::from_slice(payload).map_err(|err| BridgeError::Payload(err.to_string()))?;
    let timestamp = reading.timestamp.trim();
    if timestamp.is_empty() {
        return Err(BridgeError::Payload("empty timestamp".to_string()));
    }

    Ok(SensorReading {
        machine_id: machine_id.to_string(),
        sensor_id: sensor_id.to_string(),
        timestamp: timestamp.to_string(),
        value: reading.value,
    })
}
