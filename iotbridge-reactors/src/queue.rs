//! Alert queue listener
//!
//! Subscribes to the quality and error topics and hands every message to its
//! reactor in a task of its own; handlers never wait on each other.

use crate::alerts::{ErrorAlert, QualityAlert};
use crate::config::QueueConfig;
use crate::reactors::{emergency_stop_on_errors, throttle_on_low_quality, StopOutcome, ThrottleOutcome};
use crate::service::ServiceHub;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Result of dispatching one queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    Quality(ThrottleOutcome),
    Errors(StopOutcome),
}

/// Route a message by topic; `None` for topics we do not serve
pub async fn handle_message(
    hub: &dyn ServiceHub,
    queue: &QueueConfig,
    topic: &str,
    payload: &[u8],
) -> Option<AlertOutcome> {
    debug!("Received message on {}: {}", topic, String::from_utf8_lossy(payload));

    if topic == queue.quality_topic {
        let alert = QualityAlert::parse(payload);
        Some(AlertOutcome::Quality(throttle_on_low_quality(hub, &alert).await))
    } else if topic == queue.error_topic {
        let alert = ErrorAlert::parse(payload);
        Some(AlertOutcome::Errors(emergency_stop_on_errors(hub, &alert).await))
    } else {
        warn!("Unknown topic: {}", topic);
        None
    }
}

/// Listen forever, reconnecting after broker errors
pub async fn run_listener(hub: Arc<dyn ServiceHub>, queue: QueueConfig) {
    let mut options = MqttOptions::new(&queue.client_id, &queue.host, queue.port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let queue = Arc::new(queue);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("Connected to alert queue at {}:{}", queue.host, queue.port);
                for topic in [&queue.quality_topic, &queue.error_topic] {
                    match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => info!("Listening on {}", topic),
                        Err(e) => error!("Subscribe to {} failed: {}", topic, e),
                    }
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let hub = Arc::clone(&hub);
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    if let Some(outcome) = handle_message(hub.as_ref(), &queue, &publish.topic, &publish.payload).await {
                        debug!("Message on {} handled: {:?}", publish.topic, outcome);
                    }
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Alert queue connection error: {}. Reconnecting...", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
