use anyhow::{Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::EventSink;
use crate::config::BroadcastSettings;
use crate::event::ClassificationEvent;
use crate::transport::resolve_broker;

const RESULT_TOPIC_SUFFIX: &str = "detection_result";
const AVAILABILITY_TOPIC_SUFFIX: &str = "availability";
const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Dashboard broadcast over MQTT.
///
/// Results go out at QoS 0 through `try_publish`, so a full client queue
/// drops the message instead of blocking. Dashboards track liveness through
/// a retained availability topic backed by a last will.
pub struct MqttBroadcast {
    client: Client,
    result_topic: String,
    availability_topic: String,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
    label: String,
}

impl MqttBroadcast {
    /// Configure the client and start the connection thread. The broker is
    /// contacted in the background; an unreachable broker shows up as
    /// warnings from that thread, not as an error here.
    pub fn connect(settings: &BroadcastSettings) -> Result<Self> {
        let (endpoint, transport) = resolve_broker(settings)?;
        let prefix = settings.topic_prefix.trim_end_matches('/');
        let result_topic = format!("{}/{}", prefix, RESULT_TOPIC_SUFFIX);
        let availability_topic = format!("{}/{}", prefix, AVAILABILITY_TOPIC_SUFFIX);

        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            availability_topic.clone(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        options.set_transport(transport);

        let (client, connection) = Client::new(options, 10);
        let stopping = Arc::new(AtomicBool::new(false));
        let label = format!("mqtt://{}:{}", endpoint.host, endpoint.port);
        let connection_handle = spawn_connection(connection, stopping.clone(), label.clone())?;

        client
            .try_publish(
                &availability_topic,
                QoS::AtLeastOnce,
                true,
                PAYLOAD_ONLINE.as_bytes().to_vec(),
            )
            .context("failed to queue MQTT availability message")?;
        log::info!(
            "broadcasting results to {} on {} (TLS: {}, auth: {})",
            result_topic,
            label,
            endpoint.use_tls,
            settings.username.is_some()
        );

        Ok(Self {
            client,
            result_topic,
            availability_topic,
            stopping,
            connection_handle: Some(connection_handle),
            label,
        })
    }
}

fn spawn_connection(
    mut connection: Connection,
    stopping: Arc<AtomicBool>,
    label: String,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mqtt-connection".to_string())
        .spawn(move || {
            let mut connected = false;
            for notification in connection.iter() {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                match notification {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {
                        if !connected {
                            log::info!("MQTT connection to {} established", label);
                            connected = true;
                        }
                    }
                    Err(err) => {
                        if connected {
                            log::warn!("MQTT connection to {} lost: {}", label, err);
                        } else {
                            log::debug!("MQTT connection to {} not available: {}", label, err);
                        }
                        connected = false;
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        })
        .context("failed to start MQTT connection thread")
}

impl EventSink for MqttBroadcast {
    fn name(&self) -> &str {
        &self.label
    }

    fn deliver(&mut self, event: &ClassificationEvent) -> Result<()> {
        let payload = serde_json::to_vec(&event.broadcast_payload())
            .context("failed to serialize broadcast payload")?;
        self.client
            .try_publish(&self.result_topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("failed to queue broadcast on {}", self.result_topic))?;
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.client.try_publish(
            &self.availability_topic,
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect from {} failed: {}", self.label, err);
        }
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        log::info!("broadcast channel {} closed", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(addr: &str) -> BroadcastSettings {
        let mut cfg = crate::config::SorterConfig::default();
        cfg.set_broker(addr);
        cfg.broadcast.unwrap()
    }

    #[test]
    fn refuses_remote_broker_by_default() {
        let err = MqttBroadcast::connect(&settings("10.0.0.5:1883"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("not on loopback"));
    }
}
