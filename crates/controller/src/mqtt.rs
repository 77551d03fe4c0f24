use greenhouse_frontend::POSITION_COUNT;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::signal::Signal;
use crate::state::SharedState;

/// Manual shot requests: `greenhouse/shot/<position>/request`.
pub const SHOT_REQUEST_FILTER: &str = "greenhouse/shot/+/request";

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// "greenhouse/status/<signal>", consumed by the status indicator.
pub(crate) fn status_topic(signal: Signal) -> String {
    format!("greenhouse/status/{}", signal.as_str())
}

pub(crate) fn signal_payload(raised: bool) -> &'static str {
    if raised {
        "ON"
    } else {
        "OFF"
    }
}

/// Extract the position from "greenhouse/shot/<position>/request".
pub(crate) fn extract_shot_position(topic: &str) -> Option<usize> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 4 && parts[0] == "greenhouse" && parts[1] == "shot" && parts[3] == "request" {
        parts[2]
            .parse::<usize>()
            .ok()
            .filter(|p| *p < POSITION_COUNT)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Drive the MQTT connection: (re)subscribe on every ConnAck, forward manual
/// shot requests to the control loop, retry on connection errors.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shots: mpsc::UnboundedSender<usize>,
    shared: SharedState,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                if let Err(e) = client.subscribe(SHOT_REQUEST_FILTER, QoS::AtLeastOnce).await {
                    error!(error = %e, "mqtt subscribe failed");
                }
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Publish(p))) => match extract_shot_position(&p.topic) {
                Some(position) => {
                    info!(position, "manual shot requested");
                    if shots.send(position).is_err() {
                        warn!(position, "control loop gone; manual shot ignored");
                    }
                }
                None => {
                    debug!(topic = %p.topic, "unhandled topic");
                }
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt error, reconnecting");
                {
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_error(format!("mqtt error: {e}"));
                }
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

/// Publish every status signal change as a retained ON/OFF message.
pub async fn run_status_publisher(
    client: AsyncClient,
    mut rx: mpsc::UnboundedReceiver<(Signal, bool)>,
    shared: SharedState,
) {
    while let Some((signal, raised)) = rx.recv().await {
        let topic = status_topic(signal);
        let payload = signal_payload(raised);
        if let Err(e) = client
            .publish(topic.as_str(), QoS::AtLeastOnce, true, payload)
            .await
        {
            error!(%topic, error = %e, "status publish failed");
        } else {
            debug!(%topic, payload, "status published");
        }
        shared.write().await.record_signal(signal, raised);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
