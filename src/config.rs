use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn setup_config_path() -> Option<PathBuf> {
    let path = env::var("BRIDGE_SETUP_CONFIG_PATH").ok()?;
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

/// Optional JSON overrides shipped by a provisioning step. Environment
/// variables always win over the file.
#[derive(Debug, Clone, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    mqtt_host: Option<String>,
    #[serde(default)]
    mqtt_port: Option<u16>,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    graphite_host: Option<String>,
    #[serde(default)]
    graphite_port: Option<u16>,
    #[serde(default)]
    inactivity_threshold_seconds: Option<u64>,
    #[serde(default)]
    sweep_interval_ms: Option<u64>,
    #[serde(default)]
    repeat_alarms: Option<bool>,
}

fn load_setup_config_overrides() -> Option<SetupConfigOverrides> {
    let path = setup_config_path()?;
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn env_allows(key: &str) -> bool {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .is_none()
}

fn apply_setup_overrides(config: &mut Config, overrides: &SetupConfigOverrides) {
    if env_allows("BRIDGE_MQTT_HOST") {
        if let Some(host) = overrides
            .mqtt_host
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            config.mqtt_host = host.to_string();
        }
    }
    if env_allows("BRIDGE_MQTT_PORT") {
        if let Some(port) = overrides.mqtt_port.filter(|v| *v != 0) {
            config.mqtt_port = port;
        }
    }
    if env_allows("BRIDGE_MQTT_USERNAME") {
        if let Some(username) = overrides.mqtt_username.as_deref() {
            let trimmed = username.trim();
            config.mqtt_username = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
    }
    if env_allows("BRIDGE_MQTT_PASSWORD") {
        if let Some(password) = overrides.mqtt_password.as_deref() {
            let trimmed = password.trim();
            config.mqtt_password = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
    }
    if env_allows("BRIDGE_GRAPHITE_HOST") {
        if let Some(host) = overrides
            .graphite_host
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            config.graphite_host = host.to_string();
        }
    }
    if env_allows("BRIDGE_GRAPHITE_PORT") {
        if let Some(port) = overrides.graphite_port.filter(|v| *v != 0) {
            config.graphite_port = port;
        }
    }
    if env_allows("BRIDGE_INACTIVITY_THRESHOLD_SECONDS") {
        if let Some(value) = overrides.inactivity_threshold_seconds.filter(|v| *v != 0) {
            config.inactivity_threshold_seconds = value;
        }
    }
    if env_allows("BRIDGE_SWEEP_INTERVAL_MS") {
        if let Some(value) = overrides.sweep_interval_ms.filter(|v| *v != 0) {
            config.sweep_interval_ms = value;
        }
    }
    if env_allows("BRIDGE_REPEAT_ALARMS") {
        if let Some(value) = overrides.repeat_alarms {
            config.repeat_alarms = value;
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_qos: u8,
    pub mqtt_topic_prefix: String,
    pub graphite_host: String,
    pub graphite_port: u16,
    pub inactivity_threshold_seconds: u64,
    pub sweep_interval_ms: u64,
    pub send_timeout_ms: u64,
    pub max_queue: usize,
    pub repeat_alarms: bool,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let setup_overrides = load_setup_config_overrides();

        let mqtt_host = env::var("BRIDGE_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = env::var("BRIDGE_MQTT_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(1883);
        let mqtt_username = env::var("BRIDGE_MQTT_USERNAME").ok();
        let mqtt_password = env::var("BRIDGE_MQTT_PASSWORD").ok();
        let mqtt_client_id = env::var("BRIDGE_MQTT_CLIENT_ID")
            .unwrap_or_else(|_| format!("sensor-bridge-{}", std::process::id()));
        let mqtt_keepalive_secs = env::var("BRIDGE_MQTT_KEEPALIVE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(20);
        let mqtt_qos = env::var("BRIDGE_MQTT_QOS")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(1);
        let mqtt_topic_prefix =
            env::var("BRIDGE_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "sensors".to_string());

        let graphite_host =
            env::var("BRIDGE_GRAPHITE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let graphite_port = env::var("BRIDGE_GRAPHITE_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(2003);

        let inactivity_threshold_seconds = env::var("BRIDGE_INACTIVITY_THRESHOLD_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        let sweep_interval_ms = env::var("BRIDGE_SWEEP_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1000);
        let send_timeout_ms = env::var("BRIDGE_SEND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3000);
        let max_queue = env::var("BRIDGE_MAX_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1024);
        let repeat_alarms = env::var("BRIDGE_REPEAT_ALARMS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        let mut config = Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_keepalive_secs,
            mqtt_qos,
            mqtt_topic_prefix,
            graphite_host,
            graphite_port,
            inactivity_threshold_seconds,
            sweep_interval_ms,
            send_timeout_ms,
            max_queue,
            repeat_alarms,
            otlp_endpoint,
        };

        if let Some(overrides) = setup_overrides.as_ref() {
            apply_setup_overrides(&mut config, overrides);
        }

        Ok(config)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}
