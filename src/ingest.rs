use crate::emitter::{BridgeStats, EmitterHandle, MetricSample};
use crate::error::BridgeError;
use crate::graphite::{series_path, TIMESTAMP_FORMAT};
use crate::registry::{RegistryState, SensorKey};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handler for inbound readings and the inactivity sweep. Cloneable;
/// the MQTT listener and the sweep task each hold one, with the registry
/// behind a single lock.
#[derive(Clone)]
pub struct ReadingIngestor {
    emitter: EmitterHandle,
    state: Arc<Mutex<RegistryState>>,
    topic_prefix: String,
    inactivity_threshold: ChronoDuration,
    repeat_alarms: bool,
}

impl ReadingIngestor {
    pub fn new(
        emitter: EmitterHandle,
        topic_prefix: impl Into<String>,
        inactivity_threshold: std::time::Duration,
        repeat_alarms: bool,
    ) -> Self {
        let inactivity_threshold = ChronoDuration::from_std(inactivity_threshold)
            .unwrap_or_else(|_| ChronoDuration::seconds(10));
        Self {
            emitter,
            state: Arc::new(Mutex::new(RegistryState::new())),
            topic_prefix: topic_prefix.into(),
            inactivity_threshold,
            repeat_alarms,
        }
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.emitter.stats()
    }

    pub async fn flush(&self) -> Result<()> {
        self.emitter.flush().await
    }

    /// Process one inbound message: decode, queue the non-alarm metric, then
    /// refresh the registry entry with the process clock. A decode failure
    /// drops the message before any side effect; a queue failure must not
    /// stop the registry refresh.
    pub async fn handle_reading(&self, topic: &str, payload: &mut [u8]) -> Result<(), BridgeError> {
        let reading = crate::telemetry::parse_reading(&self.topic_prefix, topic, payload)?;
        let key = SensorKey::new(reading.machine_id.clone(), reading.sensor_id.clone());

        let sample = MetricSample {
            series_path: series_path(&key.machine_id, &key.sensor_id, false),
            value: reading.value,
            event_time: reading.timestamp,
            is_alarm: false,
        };
        if let Err(err) = self.emitter.enqueue(sample).await {
            tracing::warn!(
                error = %err,
                machine = %key.machine_id,
                sensor = %key.sensor_id,
                "failed to queue metric"
            );
        }

        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.upsert(key, now);
        Ok(())
    }

    /// One sweep tick: snapshot the registry, release the lock, and queue an
    /// alarm metric for every entry older than the threshold. Level-triggered
    /// by default; with repeat alarms disabled an entry alarms once per
    /// inactivity episode.
    pub async fn check_inactive(&self) -> Result<()> {
        let now = Utc::now();
        let snapshot = {
            let state = self.state.lock().await;
            tracing::trace!(subscriptions = state.len(), "inactivity sweep");
            state.snapshot()
        };

        let mut newly_alarmed = Vec::new();
        for entry in snapshot {
            if now - entry.last_seen <= self.inactivity_threshold {
                continue;
            }
            if !self.repeat_alarms && entry.alarmed {
                continue;
            }

            tracing::info!(
                machine = %entry.machine_id,
                sensor = %entry.sensor_id,
                idle_seconds = (now - entry.last_seen).num_seconds(),
                "sensor inactive; emitting alarm"
            );
            let sample = MetricSample {
                series_path: series_path(&entry.machine_id, &entry.sensor_id, true),
                value: 1.0,
                event_time: now.format(TIMESTAMP_FORMAT).to_string(),
                is_alarm: true,
            };
            if let Err(err) = self.emitter.enqueue(sample).await {
                tracing::warn!(
                    error = %err,
                    machine = %entry.machine_id,
                    sensor = %entry.sensor_id,
                    "failed to queue alarm metric"
                );
                continue;
            }
            if !self.repeat_alarms {
                newly_alarmed.push(entry.key());
            }
        }

        if !newly_alarmed.is_empty() {
            let mut state = self.state.lock().await;
            for key in &newly_alarmed {
                state.mark_alarmed(key);
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Arc<Mutex<RegistryState>> {
        self.state.clone()
    }
}
