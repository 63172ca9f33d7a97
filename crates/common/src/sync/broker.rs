//! MQTT broker connection and the outbound publishing seam
//!
//! The filesystem side only ever sees a [`Publisher`]; the engine side owns
//! the [`rumqttc::EventLoop`]. Both halves come from one [`BrokerConnection`],
//! so the broker client is an explicit, injected dependency.

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::{Deserialize, Serialize};

use super::echo::EchoFilter;

const DEFAULT_CLIENT_ID_PREFIX: &str = "mqttfs";
/// Largest packet the MQTT protocol can frame
const MAX_PACKET_SIZE: usize = 268_435_455;

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Client id prefix, completed with a random suffix per mount
    pub client_id_prefix: String,
    /// MQTT keep-alive interval in seconds (minimum 5)
    pub keep_alive_secs: u64,
    /// Capacity of the client → event loop request channel
    pub request_capacity: usize,
    /// Ask the broker to drop session state on connect
    pub clean_session: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.flespi.io".to_string(),
            port: 1883,
            client_id_prefix: DEFAULT_CLIENT_ID_PREFIX.to_string(),
            keep_alive_secs: 30,
            request_capacity: 64,
            clean_session: false,
        }
    }
}

impl BrokerConfig {
    /// Fresh client id: the trimmed prefix plus a random suffix
    ///
    /// A blank prefix falls back to the default one.
    pub fn client_id(&self) -> String {
        let prefix = match self.client_id_prefix.trim() {
            "" => DEFAULT_CLIENT_ID_PREFIX,
            prefix => prefix,
        };
        format!("{}-{}", prefix, uuid::Uuid::new_v4())
    }

    /// Build client options; the token authenticates as the MQTT username
    pub fn mqtt_options(&self, token: &str) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id(), self.host.clone(), self.port);
        options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)))
            .set_clean_session(self.clean_session)
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE)
            .set_credentials(token, "");
        options
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker request rejected: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Outbound side of the broker as seen by the filesystem
///
/// Implementations must not block: callers run on the kernel callback
/// thread.
pub trait Publisher: Send + Sync + std::fmt::Debug {
    /// Publish `payload` on `topic` as the topic's retained state
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
}

/// [`Publisher`] backed by a live rumqttc client
///
/// Every payload is recorded in the [`EchoFilter`] before it is queued, so the
/// engine sharing that filter can drop the copy the broker sends back.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    echoes: EchoFilter,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, echoes: EchoFilter) -> Self {
        Self { client, echoes }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let fingerprint = self.echoes.record(topic, &payload);
        self.client
            .try_publish(topic, QoS::AtMostOnce, true, payload)
            .map_err(|e| {
                self.echoes.forget(topic, fingerprint);
                BrokerError::from(e)
            })
    }
}

/// A not-yet-started broker connection
///
/// Nothing touches the network until the event loop is polled by the sync
/// engine.
pub struct BrokerConnection {
    pub(crate) client: AsyncClient,
    pub(crate) eventloop: EventLoop,
    pub(crate) echoes: EchoFilter,
}

impl BrokerConnection {
    pub fn new(config: &BrokerConfig, token: &str) -> Self {
        let (client, eventloop) =
            AsyncClient::new(config.mqtt_options(token), config.request_capacity.max(1));
        Self {
            client,
            eventloop,
            echoes: EchoFilter::new(),
        }
    }

    /// Publishing handle sharing this connection
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher::new(self.client.clone(), self.echoes.clone())
    }

    /// Outstanding publishes of this connection's publishers
    pub fn echoes(&self) -> &EchoFilter {
        &self.echoes
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = BrokerConfig {
            host: "broker.local".to_string(),
            port: 1884,
            keep_alive_secs: 1,
            ..Default::default()
        };
        let options = config.mqtt_options("secret");

        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert!(options.client_id().starts_with("mqttfs-"));
        assert_eq!(options.keep_alive(), Duration::from_secs(5));
        assert!(!options.clean_session());
        assert_eq!(
            options.credentials(),
            Some(("secret".to_string(), String::new()))
        );
    }

    #[test]
    fn test_client_id_prefix_is_trimmed() {
        let config = BrokerConfig {
            client_id_prefix: "  laptop ".to_string(),
            ..Default::default()
        };
        assert!(config.client_id().starts_with("laptop-"));
        assert!(config.mqtt_options("t").client_id().starts_with("laptop-"));

        let blank = BrokerConfig {
            client_id_prefix: " ".to_string(),
            ..Default::default()
        };
        assert!(blank.client_id().starts_with("mqttfs-"));
    }

    #[test]
    fn test_publisher_records_outstanding_publishes() {
        let connection = BrokerConnection::new(&BrokerConfig::default(), "t");
        let publisher = connection.publisher();

        publisher.publish("fs/a", b"one".to_vec()).unwrap();
        publisher.publish("fs/a", b"two".to_vec()).unwrap();

        assert_eq!(connection.echoes().pending("fs/a"), 2);
        assert!(connection.echoes().take_echo("fs/a", b"one"));
    }

    #[test]
    fn test_client_ids_are_unique() {
        let config = BrokerConfig::default();
        assert_ne!(
            config.mqtt_options("t").client_id(),
            config.mqtt_options("t").client_id()
        );
    }
}
