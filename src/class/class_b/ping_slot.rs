//! LoRaWAN Class B Ping Slot Management
//!
//! This module handles ping slot timing including:
//! - Ping slot periodicity and channel configuration
//! - Per beacon period randomization of the first slot
//! - Counting the slots that opened since the last poll

use std::cmp::min;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::device::DevAddr;
use crate::crypto;

/// Beacon period
pub const BEACON_PERIOD: Duration = Duration::from_secs(128);

/// Reserved time at the start of every beacon period
pub const BEACON_RESERVED: Duration = Duration::from_millis(2_120);

/// Duration of one ping slot
pub const SLOT_LEN: Duration = Duration::from_millis(30);

/// Slots in the ping window of a beacon period (2^12)
const PING_WINDOW_SLOTS: u32 = 4096;

/// Ping slot configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingSlotConfig {
    /// Ping slot periodicity (0-7)
    periodicity: u8,
    /// Data rate for ping slots
    data_rate: u8,
    /// Frequency for ping slots, `None` for the regional default
    frequency: Option<u32>,
}

impl PingSlotConfig {
    /// Create new ping slot configuration
    pub fn new(periodicity: u8) -> Self {
        Self {
            periodicity: min(periodicity, 7),
            data_rate: 0,
            frequency: None,
        }
    }

    /// Get ping slot periodicity
    pub fn periodicity(&self) -> u8 {
        self.periodicity
    }

    /// Get ping slot data rate
    pub fn data_rate(&self) -> u8 {
        self.data_rate
    }

    /// Get ping slot frequency
    pub fn frequency(&self) -> Option<u32> {
        self.frequency
    }

    /// Apply a PingSlotChannelReq (frequency 0 restores the default)
    pub fn set_channel(&mut self, frequency: u32, data_rate: u8) {
        self.frequency = (frequency != 0).then_some(frequency);
        self.data_rate = data_rate;
    }

    /// Get number of ping slots per beacon period
    pub fn slots_per_beacon(&self) -> u32 {
        128 >> self.periodicity
    }

    /// Distance between two ping slots, in slots
    pub fn ping_period(&self) -> u32 {
        PING_WINDOW_SLOTS / self.slots_per_beacon()
    }
}

/// Ping slot scheduler
///
/// Beacon periods are counted from the moment the device switched to
/// Class B; no beacon is actually tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingSlotScheduler {
    dev_addr: DevAddr,
    /// Start of the current beacon period
    beacon_start: Instant,
    /// BeaconTime field of the current period, in seconds
    beacon_time: u32,
    /// Randomized offset of the first slot, in slots
    offset: u32,
    /// Next slot of the current period
    next_index: u32,
}

impl PingSlotScheduler {
    /// Create a scheduler whose first beacon period starts at `now`
    pub fn new(config: &PingSlotConfig, dev_addr: DevAddr, now: Instant) -> Self {
        Self {
            dev_addr,
            beacon_start: now,
            beacon_time: 0,
            offset: crypto::ping_offset(0, dev_addr, config.ping_period()),
            next_index: 0,
        }
    }

    fn slot_time(&self, config: &PingSlotConfig, index: u32) -> Instant {
        let slot = self.offset + index * config.ping_period();
        self.beacon_start + BEACON_RESERVED + SLOT_LEN * slot
    }

    fn next_beacon(&mut self, config: &PingSlotConfig) {
        self.beacon_start += BEACON_PERIOD;
        self.beacon_time = self
            .beacon_time
            .wrapping_add(BEACON_PERIOD.as_secs() as u32);
        self.offset = crypto::ping_offset(self.beacon_time, self.dev_addr, config.ping_period());
        self.next_index = 0;
    }

    /// Get next ping slot time
    pub fn next_slot(&self, config: &PingSlotConfig) -> Instant {
        if self.next_index < config.slots_per_beacon() {
            self.slot_time(config, self.next_index)
        } else {
            let mut next = self.clone();
            next.next_beacon(config);
            next.slot_time(config, 0)
        }
    }

    /// Count the ping slots that opened up to `now` and move past them
    pub fn open_due_slots(&mut self, config: &PingSlotConfig, now: Instant) -> u32 {
        let mut opened = 0;
        loop {
            if self.next_index >= config.slots_per_beacon() {
                self.next_beacon(config);
                continue;
            }
            if self.slot_time(config, self.next_index) > now {
                return opened;
            }
            opened += 1;
            self.next_index += 1;
        }
    }
}
