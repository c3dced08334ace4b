use crate::error::BridgeError;
use chrono::NaiveDateTime;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Producer timestamp convention, shared with the sweeper's alarm clock.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Dotted series name for the backend. Alarm samples land in a distinct
/// `alarms.` sub-namespace under the machine.
pub fn series_path(machine_id: &str, sensor_id: &str, is_alarm: bool) -> String {
    if is_alarm {
        format!("{machine_id}.alarms.{sensor_id}")
    } else {
        format!("{machine_id}.{sensor_id}")
    }
}

/// Render one plaintext protocol line: `"<path> <value> <epoch-seconds>\n"`.
/// A timestamp that does not match [`TIMESTAMP_FORMAT`] is rejected here so a
/// corrupt time value is never put on the wire.
pub fn encode_line(series_path: &str, value: f64, event_time: &str) -> Result<String, BridgeError> {
    let parsed = NaiveDateTime::parse_from_str(event_time, TIMESTAMP_FORMAT)
        .map_err(|_| BridgeError::Timestamp(event_time.to_string()))?;
    let epoch_seconds = parsed.and_utc().timestamp();
    Ok(format!(
        "{series_path} {} {epoch_seconds}\n",
        format_value(value)
    ))
}

fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Transport seam for encoded lines. Keeping it a trait lets batching or
/// pooling replace the one-connection-per-sample sink without touching the
/// ingest or sweep logic.
pub trait LineSink: Send + Sync + 'static {
    fn send(&self, line: &str) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// Fire-and-forget Graphite plaintext sink: one short-lived TCP connection
/// per line, no pooling, no retry. Connect and write each run under the
/// configured timeout so a stalled backend cannot wedge the emitter.
#[derive(Debug, Clone)]
pub struct GraphiteSink {
    addr: String,
    send_timeout: Duration,
}

impl GraphiteSink {
    pub fn new(host: &str, port: u16, send_timeout: Duration) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            send_timeout,
        }
    }
}

impl LineSink for GraphiteSink {
    async fn send(&self, line: &str) -> Result<(), BridgeError> {
        let mut stream = timeout(self.send_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| BridgeError::Timeout(self.send_timeout))?
            .map_err(|err| BridgeError::Connect {
                addr: self.addr.clone(),
                source: err,
            })?;

        timeout(self.send_timeout, async {
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| BridgeError::Timeout(self.send_timeout))?
        .map_err(BridgeError::Write)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_line, series_path, GraphiteSink, LineSink};
    use crate::error::BridgeError;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn encode_line_round_trip() {
        let line = encode_line("host1.cpu", 42.0, "1970-01-01T00:00:10Z").expect("encoded");
        assert_eq!(line, "host1.cpu 42 10\n");
    }

    #[test]
    fn encode_line_keeps_fractional_values() {
        let line = encode_line("host1.temp", 21.5, "1970-01-01T00:01:00Z").expect("encoded");
        assert_eq!(line, "host1.temp 21.5 60\n");
    }

    #[test]
    fn encode_line_rejects_bad_timestamp() {
        for raw in [
            "2026-08-25 12:00:00",
            "2026-08-25T12:00:00",
            "not-a-timestamp",
            "",
        ] {
            assert!(matches!(
                encode_line("host1.cpu", 1.0, raw),
                Err(BridgeError::Timestamp(_))
            ));
        }
    }

    #[test]
    fn series_path_inserts_alarm_segment() {
        assert_eq!(series_path("host1", "cpu", false), "host1.cpu");
        assert_eq!(series_path("host1", "cpu", true), "host1.alarms.cpu");
    }

    #[tokio::test]
    async fn graphite_sink_writes_line_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut received = String::new();
            stream.read_to_string(&mut received).await.expect("read");
            received
        });

        let sink = GraphiteSink::new(&addr.ip().to_string(), addr.port(), Duration::from_secs(3));
        sink.send("host1.cpu 42 10\n").await.expect("sent");

        let received = accept.await.expect("join");
        assert_eq!(received, "host1.cpu 42 10\n");
    }

    #[tokio::test]
    async fn graphite_sink_reports_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let sink = GraphiteSink::new(&addr.ip().to_string(), addr.port(), Duration::from_secs(1));
        let err = sink.send("host1.cpu 42 10\n").await.expect_err("refused");
        assert!(matches!(
            err,
            BridgeError::Connect { .. } | BridgeError::Timeout(_)
        ));
    }
}
