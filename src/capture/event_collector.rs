//! Live capture on a network interface via libpcap
//!
//! The handle is opened promiscuous in immediate mode with a kernel filter
//! for BOOTP ports, then read as an async stream. Each frame is decoded in
//! the stream codec; the handler is awaited inline before the next read.

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use pcap::{Active, Capture, Device, Linktype, Packet, PacketCodec};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Span};

use super::bootp::{decode_frame, BootpMessage, BootpOp, DecodeError, LinkLayer};
use super::{Event, Listener, ListenerError};
use crate::config::ListenerConfig;
use crate::handler::EventHandler;

pub const BOOTP_FILTER: &str = "(port 67 or port 68)";

/// Decodes captured frames of one link type
pub struct BootpCodec {
    link: LinkLayer,
}

impl BootpCodec {
    pub fn new(link: LinkLayer) -> Self {
        Self { link }
    }
}

impl PacketCodec for BootpCodec {
    type Item = Result<BootpMessage, DecodeError>;

    fn decode(&mut self, packet: Packet<'_>) -> Self::Item {
        decode_frame(self.link, packet.data)
    }
}

/// Maps a live handle's datalink type to the decoder framing
///
/// Live handles report DLT values, so raw IP shows up as `DLT_RAW` (12, or 14
/// on OpenBSD) rather than the savefile code 101.
pub fn link_layer(linktype: Linktype) -> Result<LinkLayer, ListenerError> {
    match linktype.0 {
        1 => Ok(LinkLayer::Ethernet),
        113 => Ok(LinkLayer::LinuxSll),
        12 | 14 | 101 | 228 => Ok(LinkLayer::RawIpv4),
        other => Err(ListenerError::UnsupportedLinkType(other)),
    }
}

pub struct PcapListener {
    interface: String,
    capture: Capture<Active>,
    link: LinkLayer,
    handler: Arc<dyn EventHandler>,
    span: Span,
}

impl PcapListener {
    /// Opens and filters the capture handle
    ///
    /// A device missing from the enumeration is only logged; some platforms
    /// can open interfaces they do not list.
    ///
    /// # Errors
    ///
    /// Any failure to enumerate, open, activate or filter the device.
    pub fn new(
        config: &ListenerConfig,
        handler: Arc<dyn EventHandler>,
        parent: &Span,
    ) -> Result<Self, ListenerError> {
        let span = info_span!(parent: parent, "capture", comp = "pcap-listener");
        let interface = config.interface.clone();

        check_interface(&interface, &span)?;
        let capture = open_filtered(&interface)?;
        let link = link_layer(capture.get_datalink())?;
        debug!(parent: &span, "Capturing on {} ({:?} framing)", interface, link);

        Ok(Self {
            interface,
            capture,
            link,
            handler,
            span,
        })
    }
}

#[async_trait]
impl Listener for PcapListener {
    async fn run(self, cancel: CancellationToken) -> Result<(), ListenerError> {
        let Self {
            interface,
            capture,
            link,
            handler,
            span,
        } = self;

        let stream = capture
            .setnonblock()
            .and_then(|capture| capture.stream(BootpCodec::new(link)))
            .map_err(ListenerError::Stream)?;

        info!(parent: &span, "Listening for button presses on {}", interface);
        let result = capture_loop(stream, handler.as_ref(), cancel, &span).await;
        debug!(parent: &span, "Closing capture handle");
        result
    }
}

/// Drives decoded packets into `handler` until cancelled or the stream fails
pub async fn capture_loop<S>(
    stream: S,
    handler: &dyn EventHandler,
    cancel: CancellationToken,
    span: &Span,
) -> Result<(), ListenerError>
where
    S: Stream<Item = Result<Result<BootpMessage, DecodeError>, pcap::Error>> + Send,
{
    tokio::pin!(stream);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!(parent: span, "Stopping capture");
                return Ok(());
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Ok(message))) => dispatch(message, handler, span).await,
            Some(Ok(Err(e))) => warn!(parent: span, "Skipping undecodable packet: {}", e),
            Some(Err(e)) => {
                error!(parent: span, "Capture failed: {}", e);
                return Err(ListenerError::Capture(e));
            }
            None => {
                warn!(parent: span, "Capture stream ended");
                return Ok(());
            }
        }
    }
}

async fn dispatch(message: BootpMessage, handler: &dyn EventHandler, span: &Span) {
    debug!(parent: span, "BOOTP {}", message);
    // Replies carry the client address too but are not sent by the button.
    if message.op != BootpOp::Request {
        return;
    }

    let event = Event::new(message.client_hw_addr, Utc::now());
    if let Err(e) = handler.handle_event(event).await {
        warn!(parent: span, "Could not handle event: {}", e);
    }
}

fn check_interface(interface: &str, span: &Span) -> Result<(), ListenerError> {
    let devices = Device::list().map_err(ListenerError::Enumerate)?;
    if devices.iter().any(|d| d.name == interface) {
        debug!(parent: span, "Found device {}", interface);
    } else {
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        warn!(
            parent: span,
            "Device {} not found among [{}], trying to open it anyway",
            interface,
            names.join(", ")
        );
    }
    Ok(())
}

fn open_filtered(interface: &str) -> Result<Capture<Active>, ListenerError> {
    let open_err = |source| ListenerError::Open {
        device: interface.to_string(),
        source,
    };

    let mut capture = Capture::from_device(interface)
        .map_err(open_err)?
        .promisc(true)
        .immediate_mode(true)
        .open()
        .map_err(open_err)?;

    capture
        .filter(BOOTP_FILTER, true)
        .map_err(|source| ListenerError::Filter {
            filter: BOOTP_FILTER,
            source,
        })?;
    Ok(capture)
}
