//! Capture-to-publish integration tests.
//!
//! The pcap handle and the broker are replaced by a scripted packet stream
//! and a recording publisher; everything in between runs as in the daemon.

use async_trait::async_trait;
use buttonoff::capture::bootp::{BootpMessage, BootpOp, DhcpMessageType};
use buttonoff::capture::event_collector::capture_loop;
use buttonoff::capture::{DecodeError, Event};
use buttonoff::config::Config;
use buttonoff::handler::{DashButtonEventHandler, EventHandler, MessagePayload};
use buttonoff::mqtt::{Message, PublishError, Publisher};
use chrono::Utc;
use futures::stream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<Message>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, msg: Message) -> Result<(), PublishError> {
        self.sent.lock().push(msg);
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

const DUP_CONFIG: &str = r#"
[general]
debounce_period = "1m"

[listener]
interface = "eth0"

[mqtt]
broker_addr = "tcp://127.0.0.1:1883"

[[buttons]]
button_id = "DUP"
hw_addr = "aa:aa:aa:aa:aa:aa"

[[buttons]]
button_id = "DUP"
hw_addr = "BB:BB:BB:BB:BB:BB"

[[buttons]]
button_id = "DUP"
hw_addr = "cc:cc:cc:cc:cc:cc"
"#;

fn handler_for(toml: &str, publisher: Arc<RecordingPublisher>) -> DashButtonEventHandler {
    let config = Config::from_toml_str(toml).unwrap();
    config.validate().unwrap();
    DashButtonEventHandler::new(&config.general, &config.buttons, publisher, &Span::none()).unwrap()
}

fn discover(hw_addr: &str) -> Result<Result<BootpMessage, DecodeError>, pcap::Error> {
    Ok(Ok(BootpMessage {
        op: BootpOp::Request,
        transaction_id: 7,
        client_hw_addr: hw_addr.to_string(),
        message_type: Some(DhcpMessageType::Discover),
    }))
}

#[tokio::test]
async fn devices_sharing_an_id_all_publish_under_it() {
    let publisher = Arc::new(RecordingPublisher::default());
    let handler = handler_for(DUP_CONFIG, publisher.clone());

    for addr in ["aa:aa:aa:aa:aa:aa", "bb:bb:bb:bb:bb:bb", "cc:cc:cc:cc:cc:cc"] {
        handler.handle_event(Event::new(addr, Utc::now())).await.unwrap();
    }

    let sent = publisher.sent.lock();
    assert_eq!(sent.len(), 3);
    for msg in sent.iter() {
        assert_eq!(msg.topic, "/buttonoff/DUP/pressed");
        let payload: MessagePayload = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(payload.button_id, "DUP");
    }
}

#[tokio::test]
async fn scripted_capture_publishes_once_per_press() {
    let publisher = Arc::new(RecordingPublisher::default());
    let handler = handler_for(DUP_CONFIG, publisher.clone());

    let packets = stream::iter(vec![
        discover("aa:aa:aa:aa:aa:aa"),
        // DHCP retransmits within the debounce period
        discover("aa:aa:aa:aa:aa:aa"),
        Ok(Err(DecodeError::MissingMagicCookie)),
        discover("dd:dd:dd:dd:dd:dd"),
    ]);

    capture_loop(packets, &handler, CancellationToken::new(), &Span::none())
        .await
        .unwrap();

    let topics: Vec<_> = publisher
        .sent
        .lock()
        .iter()
        .map(|m| m.topic.clone())
        .collect();
    assert_eq!(
        topics,
        vec![
            "/buttonoff/DUP/pressed".to_string(),
            "/buttonoff/dd:dd:dd:dd:dd:dd/pressed".to_string(),
        ]
    );
    assert!(!handler.registry().is_configured("dd:dd:dd:dd:dd:dd"));
    assert_eq!(handler.registry().len(), 4);
}

#[tokio::test]
async fn unconfigured_devices_are_ignored_when_configured_to() {
    let publisher = Arc::new(RecordingPublisher::default());
    let toml = DUP_CONFIG.replace("[general]", "[general]\ndrop_unconfigured = true");
    let handler = handler_for(&toml, publisher.clone());

    let packets = stream::iter(vec![
        discover("dd:dd:dd:dd:dd:dd"),
        discover("cc:cc:cc:cc:cc:cc"),
    ]);
    capture_loop(packets, &handler, CancellationToken::new(), &Span::none())
        .await
        .unwrap();

    let sent = publisher.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "/buttonoff/DUP/pressed");
    assert_eq!(handler.registry().len(), 3);
}
