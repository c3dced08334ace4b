use std::time::Duration;
use thiserror::Error;

/// Message- and sample-level failures. Every variant is log-and-drop for the
/// single message or metric that triggered it; nothing here is fatal.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed topic {0:?}: expected /{{prefix}}/{{machine_id}}/{{sensor_id}}")]
    MalformedTopic(String),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("invalid timestamp {0:?}: expected %Y-%m-%dT%H:%M:%SZ")]
    Timestamp(String),

    #[error("connect to metrics backend {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("write to metrics backend: {0}")]
    Write(std::io::Error),

    #[error("metrics backend send timed out after {0:?}")]
    Timeout(Duration),
}
