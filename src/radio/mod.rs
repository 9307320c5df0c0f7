//! Frame transport between a device and the network side
//!
//! [`ChannelTransport`] moves frames over tokio channels; the other end,
//! [`GatewayLink`], is held by whatever plays the gateway.

pub mod traits;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::TransportError;

pub use traits::Transport;

/// Device side of a channel pair
#[derive(Debug)]
pub struct ChannelTransport {
    uplinks: UnboundedSender<Vec<u8>>,
    downlinks: UnboundedReceiver<Vec<u8>>,
}

/// Network side of a channel pair
#[derive(Debug)]
pub struct GatewayLink {
    /// Frames sent by the device
    pub uplinks: UnboundedReceiver<Vec<u8>>,
    /// Frames to deliver to the device
    pub downlinks: UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    /// Create a connected transport and gateway link
    pub fn pair() -> (Self, GatewayLink) {
        let (up_tx, up_rx) = mpsc::unbounded_channel();
        let (down_tx, down_rx) = mpsc::unbounded_channel();
        (
            Self {
                uplinks: up_tx,
                downlinks: down_rx,
            },
            GatewayLink {
                uplinks: up_rx,
                downlinks: down_tx,
            },
        )
    }
}

impl Transport for ChannelTransport {
    type Error = TransportError;

    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.uplinks
            .send(frame.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        self.downlinks.try_recv().ok()
    }
}
