//! Event reporting
//!
//! Devices report status lines and frame traffic through an [`EventSink`].
//! [`LogSink`] writes through the `log` facade, [`ChannelSink`] forwards
//! [`DeviceEvent`]s to a consumer task.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Receiver of device reports
pub trait EventSink: Send + Sync + 'static {
    /// Status line of a device
    fn status(&self, name: &str, message: &str, is_error: bool);

    /// Application payload received on `fport`
    fn downlink_received(&self, name: &str, timestamp_ms: u64, fport: u8, payload: &[u8]);

    /// Frame transmitted by the device
    fn uplink_sent(&self, name: &str, timestamp_ms: u64, frame: &[u8]);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn status(&self, name: &str, message: &str, is_error: bool) {
        (**self).status(name, message, is_error)
    }

    fn downlink_received(&self, name: &str, timestamp_ms: u64, fport: u8, payload: &[u8]) {
        (**self).downlink_received(name, timestamp_ms, fport, payload)
    }

    fn uplink_sent(&self, name: &str, timestamp_ms: u64, frame: &[u8]) {
        (**self).uplink_sent(name, timestamp_ms, frame)
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Sink writing every report to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn status(&self, name: &str, message: &str, is_error: bool) {
        if is_error {
            log::error!("DEV[{}] {}", name, message);
        } else {
            log::info!("DEV[{}] {}", name, message);
        }
    }

    fn downlink_received(&self, name: &str, _timestamp_ms: u64, fport: u8, payload: &[u8]) {
        log::info!("DEV[{}] downlink on port {}: {}", name, fport, hex(payload));
    }

    fn uplink_sent(&self, name: &str, _timestamp_ms: u64, frame: &[u8]) {
        log::debug!("DEV[{}] uplink sent: {}", name, hex(frame));
    }
}

/// Report emitted by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Status line
    Status {
        name: String,
        message: String,
        is_error: bool,
    },
    /// Application payload received
    DownlinkReceived {
        name: String,
        timestamp_ms: u64,
        fport: u8,
        payload: Vec<u8>,
    },
    /// Frame transmitted
    UplinkSent {
        name: String,
        timestamp_ms: u64,
        frame: Vec<u8>,
    },
}

/// Sink forwarding reports over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    events: UnboundedSender<DeviceEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver of its events
    pub fn new() -> (Self, UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { events: tx }, rx)
    }

    fn emit(&self, event: DeviceEvent) {
        // A dropped receiver only means nobody listens anymore
        let _ = self.events.send(event);
    }
}

impl EventSink for ChannelSink {
    fn status(&self, name: &str, message: &str, is_error: bool) {
        self.emit(DeviceEvent::Status {
            name: name.to_string(),
            message: message.to_string(),
            is_error,
        });
    }

    fn downlink_received(&self, name: &str, timestamp_ms: u64, fport: u8, payload: &[u8]) {
        self.emit(DeviceEvent::DownlinkReceived {
            name: name.to_string(),
            timestamp_ms,
            fport,
            payload: payload.to_vec(),
        });
    }

    fn uplink_sent(&self, name: &str, timestamp_ms: u64, frame: &[u8]) {
        self.emit(DeviceEvent::UplinkSent {
            name: name.to_string(),
            timestamp_ms,
            frame: frame.to_vec(),
        });
    }
}
