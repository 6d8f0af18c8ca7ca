use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};

use crate::config::Config;
use crate::pipeline::{Dispatcher, Stats};
use crate::publisher::ForecastPublisher;
use crate::store::ReferenceStore;

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 64;

/// Pause after a connection error before polling again.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn connect(config: &Config) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(config.keep_alive);

    AsyncClient::new(options, REQUEST_CAPACITY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Subscribed,
    SubscribeFailed,
    Dispatched,
    Ignored,
    Other,
}

/// Reacts to one event from the broker. Never waits on the request channel,
/// since only the caller's `poll` drains it.
pub fn handle_event<S, P>(
    event: Event,
    client: &AsyncClient,
    topic: &str,
    dispatcher: &mut Dispatcher<S, P>,
) -> Handled
where
    S: ReferenceStore + 'static,
    P: ForecastPublisher + 'static,
{
    match event {
        Event::Incoming(Packet::ConnAck(_)) => {
            log::info!("Connected, subscribing to {topic}");
            match client.try_subscribe(topic, QoS::AtLeastOnce) {
                Ok(()) => Handled::Subscribed,
                Err(e) => {
                    log::error!("Failed to subscribe to {topic}: {e}");
                    Handled::SubscribeFailed
                }
            }
        }
        Event::Incoming(Packet::Publish(publish)) if publish.topic == topic => {
            dispatcher.dispatch(publish.payload.to_vec());
            Handled::Dispatched
        }
        Event::Incoming(Packet::Publish(publish)) => {
            log::debug!("Ignoring message on {}", publish.topic);
            Handled::Ignored
        }
        _ => {
            dispatcher.reap();
            Handled::Other
        }
    }
}

/// Feeds inbound readings to the dispatcher until `shutdown` resolves, then
/// disconnects and waits for in-flight messages.
pub async fn run<S, P>(
    client: AsyncClient,
    mut eventloop: EventLoop,
    mut dispatcher: Dispatcher<S, P>,
    topic: String,
    shutdown: impl Future<Output = ()>,
) -> Stats
where
    S: ReferenceStore + 'static,
    P: ForecastPublisher + 'static,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = eventloop.poll() => match event {
                Ok(event) => {
                    handle_event(event, &client, &topic, &mut dispatcher);
                }
                Err(e) => {
                    log::error!("MQTT connection error: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
        }
    }

    log::info!(
        "Shutting down, {} message(s) in flight",
        dispatcher.in_flight()
    );

    // Keep polling so that publishes from in-flight messages reach the broker.
    let stats = loop {
        tokio::select! {
            stats = dispatcher.drain() => break stats,
            event = eventloop.poll() => {
                if let Err(e) = event {
                    log::error!("MQTT connection error: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    };

    if let Err(e) = client.disconnect().await {
        log::error!("Failed to disconnect: {e}");
        return stats;
    }
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
        log::warn!("Timed out waiting for disconnect");
    }

    stats
}
