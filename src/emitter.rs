use crate::graphite::{encode_line, LineSink};
use anyhow::Result;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Transient outbound metric; never stored, only queued for the emitter.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub series_path: String,
    pub value: f64,
    pub event_time: String,
    pub is_alarm: bool,
}

#[derive(Debug)]
pub enum EmitCommand {
    Sample(MetricSample),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct EmitterHandle {
    tx: mpsc::Sender<EmitCommand>,
    stats: Arc<BridgeStats>,
}

impl EmitterHandle {
    pub fn new(tx: mpsc::Sender<EmitCommand>, stats: Arc<BridgeStats>) -> Self {
        Self { tx, stats }
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    pub async fn enqueue(&self, sample: MetricSample) -> Result<()> {
        let queue_depth = self.stats.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(
            queue_depth,
            series = %sample.series_path,
            alarm = sample.is_alarm,
            "queued metric"
        );
        if let Err(err) = self.tx.send(EmitCommand::Sample(sample)).await {
            self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(err.into());
        }
        Ok(())
    }

    /// Resolves once every previously queued sample has been attempted.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(EmitCommand::Flush(tx)).await;
        let _ = rx.await;
        Ok(())
    }
}

#[derive(Debug)]
pub struct BridgeStats {
    pub queue_depth: AtomicU64,
    pub sent_total: AtomicU64,
    pub dropped_total: AtomicU64,
    pub alarms_total: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            queue_depth: AtomicU64::new(0),
            sent_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            alarms_total: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }
}

/// Drains the sample queue into the sink, one line per sample. Encode or
/// transport failures drop the single sample and continue; nothing is
/// retried. Runs outside the registry lock so a slow backend never blocks
/// ingest or the sweeper.
pub fn spawn_emitter<S: LineSink>(
    sink: S,
    mut rx: mpsc::Receiver<EmitCommand>,
    stats: Arc<BridgeStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                EmitCommand::Sample(sample) => {
                    stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                    let line = match encode_line(&sample.series_path, sample.value, &sample.event_time)
                    {
                        Ok(line) => line,
                        Err(err) => {
                            stats.dropped_total.fetch_add(1, Ordering::Relaxed);
                            stats.record_error(err.to_string());
                            tracing::warn!(
                                error = %err,
                                series = %sample.series_path,
                                "rejected metric sample"
                            );
                            continue;
                        }
                    };
                    match sink.send(&line).await {
                        Ok(()) => {
                            stats.sent_total.fetch_add(1, Ordering::Relaxed);
                            if sample.is_alarm {
                                stats.alarms_total.fetch_add(1, Ordering::Relaxed);
                            }
                            stats.clear_error();
                            tracing::debug!(series = %sample.series_path, "metric sent");
                        }
                        Err(err) => {
                            stats.dropped_total.fetch_add(1, Ordering::Relaxed);
                            stats.record_error(err.to_string());
                            tracing::warn!(
                                error = %err,
                                series = %sample.series_path,
                                "failed to send metric; dropping sample"
                            );
                        }
                    }
                }
                EmitCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    })
}
