//! LoRaWAN Class B implementation
//!
//! Class B devices open extra receive windows (ping slots) at times derived
//! from the beacon period, so the network can reach them without waiting
//! for an uplink.

pub mod ping_slot;

use tokio::time::Instant;

use crate::config::device::DevAddr;
use crate::lorawan::commands::MacCommand;

pub use ping_slot::{PingSlotConfig, PingSlotScheduler};

/// Class B state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassBState {
    /// Ping slot configuration
    pub config: PingSlotConfig,
    scheduler: PingSlotScheduler,
    /// Beacon frequency set through BeaconFreqReq
    pub beacon_frequency: Option<u32>,
    /// The network answered our PingSlotInfoReq
    pub ping_slot_info_acked: bool,
}

impl ClassBState {
    /// Create new Class B state, beacon periods counted from `now`
    pub fn new(periodicity: u8, dev_addr: DevAddr, now: Instant) -> Self {
        let config = PingSlotConfig::new(periodicity);
        let scheduler = PingSlotScheduler::new(&config, dev_addr, now);
        Self {
            config,
            scheduler,
            beacon_frequency: None,
            ping_slot_info_acked: false,
        }
    }

    /// Request announcing our ping slot periodicity to the network
    pub fn ping_slot_info_req(&self) -> MacCommand {
        MacCommand::PingSlotInfoReq {
            periodicity: self.config.periodicity(),
        }
    }

    /// Number of ping slots that opened since the last call
    pub fn open_due_slots(&mut self, now: Instant) -> u32 {
        self.scheduler.open_due_slots(&self.config, now)
    }

    /// Start of the next ping slot
    pub fn next_ping_slot(&self) -> Instant {
        self.scheduler.next_slot(&self.config)
    }
}
