use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tracing::{info, warn};

use aircon_common::{room_command_topic, room_state_topic, RoomId};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let room = RoomId::new(std::env::var("PANEL_ROOM").unwrap_or_else(|_| "309c".to_string()));
    let current_temp = std::env::var("PANEL_TEMP")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|temp| temp.is_finite())
        .unwrap_or(28.0);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new(format!("aircon-panel-{room}"), mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.subscribe(room_state_topic(&room), QoS::AtMostOnce)
        .await
        .context("failed to subscribe to room state")?;
    mqtt.publish(
        room_command_topic(&room, "power"),
        QoS::AtLeastOnce,
        false,
        format!("on:{current_temp:.1}"),
    )
    .await
    .context("failed to publish power on")?;

    info!("panel for room {room} powering on at {current_temp:.1}");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                match serde_json::from_slice::<serde_json::Value>(&message.payload) {
                    Ok(state) => info!(
                        "room {room}: {} at {} -> {} ({}), fee {}",
                        state["status"],
                        state["currentTemp"],
                        state["targetTemp"],
                        state["speed"],
                        state["fee"]
                    ),
                    Err(err) => warn!("unreadable state for room {room}: {err}"),
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("panel mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
