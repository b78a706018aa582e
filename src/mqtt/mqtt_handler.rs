//! Broker connection lifecycle
//!
//! ```text
//! connect() ──► Connecting ──CONNACK──► Connected ◄──────────┐
//!                   │                       │                 │
//!              timeout/error           poll error        CONNACK
//!                   ▼                       ▼                 │
//!             PublishError            Reconnecting ─(backoff)─┘
//!
//! run(cancel) / close() ──► DISCONNECT ──(grace)──► Disconnected
//! ```
//!
//! rumqttc only makes progress while its `EventLoop` is polled. After the
//! initial CONNACK the event loop moves into a background driver task that
//! publishes the connection state through a watch channel and applies the
//! reconnect backoff.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::config::{BrokerEndpoint, MqttConfig};
use super::message_manager::Message;
use super::{PublishError, Publisher};

pub const CLIENT_ID: &str = "buttonoff";

const INITIAL_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 64;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

pub struct MqttPublisher {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    driver: Mutex<Option<JoinHandle<()>>>,
    driver_stop: CancellationToken,
    publish_timeout: Duration,
    disconnect_grace: Duration,
    span: Span,
}

impl MqttPublisher {
    /// Connects to the broker and waits for its CONNACK
    ///
    /// # Errors
    ///
    /// * [`PublishError::InvalidBrokerAddr`] - `broker_addr` does not parse
    /// * [`PublishError::ConnectTimeout`] - no CONNACK within `connect_timeout`
    /// * [`PublishError::Connect`] - the broker refused or the transport failed
    pub async fn connect(config: &MqttConfig, parent: &Span) -> Result<Self, PublishError> {
        let span = info_span!(parent: parent, "mqtt", comp = "mqtt-publisher");
        let endpoint = BrokerEndpoint::parse(&config.broker_addr)?;

        let mut options = MqttOptions::new(CLIENT_ID, endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(config.keep_alive);
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(
                username,
                config.password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        debug!(parent: &span, "Connecting to MQTT broker {}", endpoint);
        match timeout(config.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Err(_) => return Err(PublishError::ConnectTimeout(config.connect_timeout)),
            Ok(Err(e)) => return Err(PublishError::Connect(e)),
            Ok(Ok(())) => {}
        }
        state_tx.send_replace(ConnectionState::Connected);
        info!(parent: &span, "Connected to MQTT broker {}", endpoint);

        let driver_stop = CancellationToken::new();
        let driver = tokio::spawn(
            drive_event_loop(
                eventloop,
                state_tx,
                driver_stop.clone(),
                config.max_reconnect_interval,
            )
            .instrument(span.clone()),
        );

        Ok(Self {
            client,
            state: state_rx,
            driver: Mutex::new(Some(driver)),
            driver_stop,
            publish_timeout: config.publish_timeout,
            disconnect_grace: config.disconnect_grace,
            span,
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Waits for cancellation, then disconnects
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PublishError> {
        cancel.cancelled().await;
        info!(parent: &self.span, "Shutting down");
        self.shutdown().await
    }

    async fn shutdown(&self) -> Result<(), PublishError> {
        if !self.is_connected() {
            warn!(parent: &self.span, "Cannot disconnect, already disconnected");
            self.stop_driver().await;
            return Ok(());
        }

        debug!(parent: &self.span, "Disconnecting broker connection");
        let client = &self.client;
        let mut state = self.state.clone();
        // Request and drain share one grace window.
        let disconnect = async move {
            client.disconnect().await?;
            // The driver flips the state once DISCONNECT has been written.
            let drained = state
                .wait_for(|s| *s == ConnectionState::Disconnected)
                .await
                .is_ok();
            Ok::<bool, rumqttc::ClientError>(drained)
        };
        match timeout(self.disconnect_grace, disconnect).await {
            Ok(Ok(true)) => debug!(parent: &self.span, "DISCONNECT written"),
            Ok(Ok(false)) => debug!(parent: &self.span, "Event loop gone before DISCONNECT"),
            Ok(Err(e)) => warn!(parent: &self.span, "Could not request disconnect: {}", e),
            Err(_) => debug!(parent: &self.span, "Disconnect grace period elapsed"),
        }

        self.stop_driver().await;
        debug!(parent: &self.span, "Disconnect request completed");
        Ok(())
    }

    async fn stop_driver(&self) {
        self.driver_stop.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(parent: &self.span, "MQTT event loop task panicked: {}", e);
            }
        }
    }

    #[cfg(test)]
    fn from_parts(
        client: AsyncClient,
        state: watch::Receiver<ConnectionState>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            client,
            state,
            driver: Mutex::new(None),
            driver_stop: CancellationToken::new(),
            publish_timeout,
            disconnect_grace: super::config::DEFAULT_DISCONNECT_GRACE,
            span: Span::none(),
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, msg: Message) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }

        let topic = msg.topic.clone();
        let submit = self
            .client
            .publish(msg.topic, QoS::AtMostOnce, false, msg.payload);
        match timeout(self.publish_timeout, submit).await {
            Err(_) => Err(PublishError::PublishTimeout(self.publish_timeout)),
            Ok(Err(e)) => {
                error!(parent: &self.span, "Could not publish message to {}: {}", topic, e);
                Err(PublishError::Client(e))
            }
            Ok(Ok(())) => {
                debug!(parent: &self.span, "Published message to {}", topic);
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), PublishError> {
        self.shutdown().await
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), rumqttc::ConnectionError> {
    loop {
        // A refused CONNACK surfaces as ConnectionError::ConnectionRefused.
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    state: watch::Sender<ConnectionState>,
    stop: CancellationToken,
    max_reconnect_interval: Duration,
) {
    let mut backoff = INITIAL_RECONNECT_INTERVAL.min(max_reconnect_interval);

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Reconnected to MQTT broker");
                state.send_replace(ConnectionState::Connected);
                backoff = INITIAL_RECONNECT_INTERVAL.min(max_reconnect_interval);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                state.send_replace(ConnectionState::Disconnected);
            }
            Ok(_) => {}
            Err(e) => {
                if *state.borrow() == ConnectionState::Disconnected {
                    debug!("Event loop closed after disconnect: {}", e);
                    break;
                }
                warn!("MQTT connection error: {} (reconnecting in {:?})", e, backoff);
                state.send_replace(ConnectionState::Reconnecting);

                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(max_reconnect_interval);
            }
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    debug!("MQTT event loop driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::DEFAULT_DISCONNECT_GRACE;

    fn offline_client(capacity: usize) -> (AsyncClient, EventLoop) {
        AsyncClient::new(MqttOptions::new("buttonoff-test", "127.0.0.1", 1883), capacity)
    }

    #[tokio::test]
    async fn publish_while_disconnected_fails_fast() {
        let (client, _eventloop) = offline_client(10);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Reconnecting);
        let publisher = MqttPublisher::from_parts(client, state_rx, Duration::from_secs(5));

        let err = publisher
            .publish(Message::new("/buttonoff/foo/pressed", "foo"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_times_out_when_requests_back_up() {
        let (client, _eventloop) = offline_client(1);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let publisher = MqttPublisher::from_parts(client, state_rx, Duration::from_secs(5));

        publisher
            .publish(Message::new("/buttonoff/a/pressed", "a"))
            .await
            .unwrap();
        let err = publisher
            .publish(Message::new("/buttonoff/b/pressed", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::PublishTimeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn close_while_disconnected_is_a_no_op() {
        let (client, _eventloop) = offline_client(10);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let publisher = MqttPublisher::from_parts(client, state_rx, Duration::from_secs(5));

        publisher.close().await.unwrap();
        publisher.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connected_shutdown_is_bounded_by_grace_period() {
        let (client, _eventloop) = offline_client(10);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let publisher = MqttPublisher::from_parts(client, state_rx, Duration::from_secs(5));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = tokio::time::Instant::now();
        publisher.run(cancel).await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_DISCONNECT_GRACE, "returned after {elapsed:?}");
        assert!(
            elapsed < DEFAULT_DISCONNECT_GRACE + Duration::from_millis(10),
            "returned after {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connected_shutdown_returns_once_disconnect_is_written() {
        let (client, _eventloop) = offline_client(10);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let publisher = MqttPublisher::from_parts(client, state_rx, Duration::from_secs(5));

        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            state_tx.send_replace(ConnectionState::Disconnected);
        });

        let started = tokio::time::Instant::now();
        publisher.close().await.unwrap();
        assert!(started.elapsed() < DEFAULT_DISCONNECT_GRACE);
        assert_eq!(publisher.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn run_returns_after_cancellation() {
        let (client, _eventloop) = offline_client(10);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let publisher = MqttPublisher::from_parts(client, state_rx, Duration::from_secs(5));

        let cancel = CancellationToken::new();
        cancel.cancel();
        publisher.run(cancel).await.unwrap();
    }

    #[tokio::test]
    async fn connect_rejects_bad_broker_address() {
        let config = MqttConfig {
            broker_addr: "http://127.0.0.1:1883".to_string(),
            ..MqttConfig::default()
        };
        let err = MqttPublisher::connect(&config, &Span::none())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PublishError::InvalidBrokerAddr { .. }));
    }
}
