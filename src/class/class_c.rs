//! LoRaWAN Class C implementation
//!
//! Class C devices keep the receive window open between uplinks, so every
//! frame queued by the network is drained on each cycle. Confirmed downlinks
//! are acknowledged right away with an empty uplink instead of waiting for
//! the next scheduled one.

/// Class C state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCState {
    /// An ACK for a confirmed downlink is owed
    pub ack: bool,
}

impl ClassCState {
    /// Create new Class C state
    pub fn new() -> Self {
        Self::default()
    }
}
