use crate::config::Config;
use crate::ingest::ReadingIngestor;
use anyhow::{bail, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::time::{sleep, Duration};

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Subscribe to the sensor topic tree and feed every publish to the
/// ingestor. Runs for the process lifetime: connection drops after a
/// successful session reconnect forever, but a broker that is unreachable on
/// startup is fatal.
pub async fn run_listener(config: Config, ingestor: ReadingIngestor) -> Result<()> {
    let filter = format!("/{}/#", config.mqtt_topic_prefix);
    let qos = qos_from_level(config.mqtt_qos);
    let mut ever_connected = false;

    loop {
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);
        let stats = ingestor.stats();

        match client.subscribe(filter.clone(), qos).await {
            Ok(_) => {
                tracing::info!(topic = %filter, "subscribed to sensor feed");
            }
            Err(err) => {
                if !ever_connected {
                    bail!("failed to subscribe to MQTT broker: {err}");
                }
                tracing::warn!(error = %err, "failed to subscribe to MQTT; retrying");
                sleep(Duration::from_secs(2)).await;
                continue;
            }
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    ever_connected = true;
                    stats.set_mqtt_connected(true);
                    tracing::info!(
                        host = %config.mqtt_host,
                        port = config.mqtt_port,
                        "connected to MQTT broker"
                    );
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let mut payload = publish.payload.to_vec();
                    if let Err(err) = ingestor.handle_reading(&publish.topic, &mut payload).await {
                        tracing::warn!(
                            error = %err,
                            topic = %publish.topic,
                            "dropped sensor message"
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    stats.set_mqtt_connected(false);
                    if !ever_connected {
                        bail!(
                            "failed to connect to MQTT broker at {}:{}: {err}",
                            config.mqtt_host,
                            config.mqtt_port
                        );
                    }
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::qos_from_level;
    use rumqttc::QoS;

    #[test]
    fn qos_levels_map_to_rumqttc() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        // out-of-range levels fall back to at-least-once
        assert_eq!(qos_from_level(7), QoS::AtLeastOnce);
    }
}
