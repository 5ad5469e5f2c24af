//! Hub device transport over MQTT
//!
//! Topic layout used by the hub's device endpoint:
//! - `devices/{id}/messages/events/`: telemetry
//! - `$iothub/twin/PATCH/properties/reported/?$rid={n}`: reported patch
//! - `$iothub/twin/PATCH/properties/desired/#`: desired pushes
//! - `$iothub/methods/POST/{name}/?$rid={rid}`: direct methods, answered on
//!   `$iothub/methods/res/{status}/?$rid={rid}`
//!
//! The command session mints its token at connect time and swaps in a fresh
//! client before the token lapses, or after any connection error.

use super::{
    CommandSink, DeviceCredential, MethodRequest, PropertyReporter, TelemetryConnector, TelemetryLink,
};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::state::{new_state, Shared};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS, Transport};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const METHODS_SUBSCRIPTION: &str = "$iothub/methods/POST/#";
pub const DESIRED_SUBSCRIPTION: &str = "$iothub/twin/PATCH/properties/desired/#";
pub const TWIN_RESPONSE_SUBSCRIPTION: &str = "$iothub/twin/res/#";

const METHODS_PREFIX: &str = "$iothub/methods/POST/";
const DESIRED_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn telemetry_topic(device_id: &str) -> String {
    format!("devices/{}/messages/events/", device_id)
}

pub fn reported_topic(request_id: u64) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={}", request_id)
}

pub fn method_response_topic(status: u16, request_id: &str) -> String {
    format!("$iothub/methods/res/{}/?$rid={}", status, request_id)
}

/// `$iothub/methods/POST/{name}/?$rid={rid}` -> `(name, rid)`
pub fn parse_method_topic(topic: &str) -> Option<(String, String)> {
    let rest = topic.strip_prefix(METHODS_PREFIX)?;
    let (name, query) = rest.split_once("/?")?;
    let rid = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("$rid="))?;
    if name.is_empty() || rid.is_empty() {
        return None;
    }
    Some((name.to_string(), rid.to_string()))
}

/// `$iothub/twin/res/{status}/?$rid=..` -> status
pub fn parse_twin_response(topic: &str) -> Option<u16> {
    let rest = topic.strip_prefix(TWIN_RESPONSE_PREFIX)?;
    rest.split('/').next()?.parse().ok()
}

/// Renew once nine tenths of the token lifetime have passed
pub fn token_expiring(minted_at: i64, now: i64, ttl_secs: u64) -> bool {
    now - minted_at >= (ttl_secs as i64).saturating_mul(9) / 10
}

fn mqtt_options(credential: &DeviceCredential, config: &HubConfig) -> Result<MqttOptions, HubError> {
    mqtt_options_at(credential, config, Utc::now().timestamp())
}

/// Connection options carrying a token minted at unix time `now`
fn mqtt_options_at(credential: &DeviceCredential, config: &HubConfig, now: i64) -> Result<MqttOptions, HubError> {
    let mut options = MqttOptions::new(&credential.device_id, &credential.host_name, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);
    options.set_credentials(
        credential.mqtt_username(),
        credential.password_at(Duration::from_secs(config.sas_ttl_secs), now)?,
    );
    if config.tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    Ok(options)
}

/// Empty or invalid bodies become `null`
fn to_json(payload: &[u8]) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(payload).unwrap_or(Value::Null)
}

fn subscribe_commands(client: &AsyncClient, device_id: &str) {
    for topic in [METHODS_SUBSCRIPTION, DESIRED_SUBSCRIPTION, TWIN_RESPONSE_SUBSCRIPTION] {
        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
            error!("Failed to subscribe {} to {}: {}", device_id, topic, e);
        }
    }
}

/// Long-lived session on the agent's own hub identity
pub struct DeviceSession {
    /// Swapped by the event side whenever the token is renewed
    client: Shared<AsyncClient>,
    device_id: String,
    request_id: AtomicU64,
}

/// Inbound side of a [`DeviceSession`]; drives the MQTT event loop
pub struct SessionEvents {
    client: Shared<AsyncClient>,
    eventloop: EventLoop,
    credential: DeviceCredential,
    config: HubConfig,
    minted_at: i64,
}

impl DeviceSession {
    /// Connect and subscribe to commands before anything else is sent.
    ///
    /// A hub that does not answer within `connect_timeout_secs` is not fatal:
    /// the event side keeps reconnecting and subscribes on its first ConnAck.
    /// Nothing is delivered until [`SessionEvents::spawn`] runs.
    pub async fn connect(
        credential: &DeviceCredential,
        config: &HubConfig,
    ) -> Result<(Self, SessionEvents), HubError> {
        let minted_at = Utc::now().timestamp();
        let options = mqtt_options_at(credential, config, minted_at)?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {
                info!("Hub session connected for {}", credential.device_id);
                subscribe_commands(&client, &credential.device_id);
            }
            Ok(Err(e)) => warn!("Hub session for {} not connected yet: {}", credential.device_id, e),
            Err(_) => warn!(
                "Hub session for {} not connected after {:?}, retrying in background",
                credential.device_id, timeout
            ),
        }

        let client = new_state(client);
        let session = DeviceSession {
            client: client.clone(),
            device_id: credential.device_id.clone(),
            request_id: AtomicU64::new(1),
        };
        let events = SessionEvents {
            client,
            eventloop,
            credential: credential.clone(),
            config: config.clone(),
            minted_at,
        };
        Ok((session, events))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

#[async_trait]
impl PropertyReporter for DeviceSession {
    async fn update_reported(&self, patch: Map<String, Value>) -> Result<(), HubError> {
        let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_vec(&Value::Object(patch))?;
        let client = self.client.lock().clone();
        client
            .publish(reported_topic(request_id), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }
}

impl SessionEvents {
    /// Start delivering methods and desired pushes to `sink`
    pub fn spawn(self, sink: Arc<dyn CommandSink>) -> JoinHandle<()> {
        tokio::spawn(self.run(sink))
    }

    async fn run(mut self, sink: Arc<dyn CommandSink>) {
        loop {
            if token_expiring(self.minted_at, Utc::now().timestamp(), self.config.sas_ttl_secs) {
                info!("Hub token for {} is about to expire, reconnecting", self.credential.device_id);
                self.renew();
            }

            // keep-alive pings make poll return at least once per keep_alive_secs
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Hub session connected for {}", self.credential.device_id);
                    let client = self.client.lock().clone();
                    subscribe_commands(&client, &self.credential.device_id);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let client = self.client.lock().clone();
                    let sink = Arc::clone(&sink);
                    tokio::spawn(async move {
                        handle_publish(&client, sink.as_ref(), &publish.topic, &publish.payload).await;
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Hub connection error for {}: {}", self.credential.device_id, e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    // the rejection may be an expired token
                    self.renew();
                }
            }
        }
    }

    /// Mint a fresh token and swap in a client and event loop built from it
    fn renew(&mut self) {
        let now = Utc::now().timestamp();
        self.minted_at = now;
        match mqtt_options_at(&self.credential, &self.config, now) {
            Ok(options) => {
                let (client, eventloop) = AsyncClient::new(options, 10);
                *self.client.lock() = client;
                self.eventloop = eventloop;
                debug!("Hub token renewed for {}", self.credential.device_id);
            }
            Err(e) => error!("Cannot renew hub token for {}: {}", self.credential.device_id, e),
        }
    }
}

async fn handle_publish(client: &AsyncClient, sink: &dyn CommandSink, topic: &str, payload: &[u8]) {
    if let Some((name, request_id)) = parse_method_topic(topic) {
        debug!("Direct method {} received (rid {})", name, request_id);
        let response = sink
            .on_method(MethodRequest {
                name,
                payload: to_json(payload),
            })
            .await;

        let body = match serde_json::to_vec(&response.payload) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize method response: {}", e);
                return;
            }
        };
        if let Err(e) = client
            .publish(method_response_topic(response.status, &request_id), QoS::AtLeastOnce, false, body)
            .await
        {
            error!("Failed to publish method response: {}", e);
        }
    } else if topic.starts_with(DESIRED_PREFIX) {
        match serde_json::from_slice::<Value>(payload) {
            Ok(desired) => sink.on_desired(desired).await,
            Err(e) => warn!("Ignoring desired properties with invalid JSON: {}", e),
        }
    } else if let Some(status) = parse_twin_response(topic) {
        if (200..300).contains(&status) {
            debug!("Reported properties accepted ({})", status);
        } else {
            warn!("Reported properties rejected with status {}", status);
        }
    } else {
        debug!("Ignoring message on {}", topic);
    }
}

/// Opens one MQTT connection per telemetry send
#[derive(Debug, Clone)]
pub struct MqttTelemetryConnector {
    config: HubConfig,
}

impl MqttTelemetryConnector {
    pub fn new(config: HubConfig) -> Self {
        Self { config }
    }
}

struct MqttTelemetryLink {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    timeout: Duration,
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), HubError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(HubError::Connection(format!("connection refused: {:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(HubError::Connection(e.to_string())),
        }
    }
}

#[async_trait]
impl TelemetryConnector for MqttTelemetryConnector {
    async fn open(&self, credential: &DeviceCredential) -> Result<Box<dyn TelemetryLink>, HubError> {
        let options = mqtt_options(credential, &self.config)?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);

        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| HubError::Connection(format!("timed out connecting {}", credential.device_id)))??;

        Ok(Box::new(MqttTelemetryLink {
            client,
            eventloop,
            topic: telemetry_topic(&credential.device_id),
            timeout,
        }))
    }
}

#[async_trait]
impl TelemetryLink for MqttTelemetryLink {
    async fn send_event(&mut self, payload: Vec<u8>) -> Result<(), HubError> {
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| HubError::Transport(e.to_string()))?;

        let eventloop = &mut self.eventloop;
        let acked = async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::PubAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(HubError::Transport(e.to_string())),
                }
            }
        };
        tokio::time::timeout(self.timeout, acked)
            .await
            .map_err(|_| HubError::Transport("timed out waiting for PUBACK".into()))?
    }

    async fn close(self: Box<Self>) {
        let mut link = *self;
        if link.client.disconnect().await.is_ok() {
            // drive the event loop until DISCONNECT is flushed
            let flush = async {
                while link.eventloop.poll().await.is_ok() {}
            };
            let _ = tokio::time::timeout(Duration::from_secs(1), flush).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        assert_eq!(telemetry_topic("line-1"), "devices/line-1/messages/events/");
        assert_eq!(reported_topic(4), "$iothub/twin/PATCH/properties/reported/?$rid=4");
        assert_eq!(method_response_topic(200, "7"), "$iothub/methods/res/200/?$rid=7");
    }

    #[test]
    fn test_parse_method_topic() {
        assert_eq!(
            parse_method_topic("$iothub/methods/POST/EmergencyStop/?$rid=1"),
            Some(("EmergencyStop".to_string(), "1".to_string()))
        );
        assert_eq!(
            parse_method_topic("$iothub/methods/POST/ResetErrorStatus/?foo=bar&$rid=af3"),
            Some(("ResetErrorStatus".to_string(), "af3".to_string()))
        );
        assert_eq!(parse_method_topic("$iothub/methods/POST/EmergencyStop/"), None);
        assert_eq!(parse_method_topic("devices/x/messages/events/"), None);
    }

    #[test]
    fn test_parse_twin_response() {
        assert_eq!(parse_twin_response("$iothub/twin/res/204/?$rid=3&$version=2"), Some(204));
        assert_eq!(parse_twin_response("$iothub/twin/res/abc/?$rid=3"), None);
        assert_eq!(parse_twin_response("$iothub/methods/POST/x/?$rid=1"), None);
    }

    fn expiry_of(options: &MqttOptions) -> i64 {
        let (_, password) = options.credentials().unwrap();
        password.rsplit("se=").next().unwrap().parse().unwrap()
    }

    #[test]
    fn test_renewed_options_carry_later_expiry() {
        let credential: DeviceCredential = "HostName=h;DeviceId=d;SharedAccessKey=c2VjcmV0LWtleQ==".parse().unwrap();
        let config = HubConfig {
            sas_ttl_secs: 3600,
            ..HubConfig::default()
        };

        let first = mqtt_options_at(&credential, &config, 1_700_000_000).unwrap();
        let renewed = mqtt_options_at(&credential, &config, 1_700_003_300).unwrap();

        assert_eq!(expiry_of(&first), 1_700_003_600);
        assert_eq!(expiry_of(&renewed), 1_700_006_900);
        assert_eq!(first.credentials().unwrap().0, renewed.credentials().unwrap().0);
    }

    #[test]
    fn test_token_expiring() {
        assert!(!token_expiring(1000, 1000, 3600));
        assert!(!token_expiring(1000, 4239, 3600));
        assert!(token_expiring(1000, 4240, 3600));
        assert!(token_expiring(1000, 9000, 3600));
    }

    #[test]
    fn test_payload_to_json() {
        assert_eq!(to_json(b""), Value::Null);
        assert_eq!(to_json(b"not json"), Value::Null);
        assert_eq!(to_json(br#"{"a":1}"#), serde_json::json!({"a": 1}));
    }
}
