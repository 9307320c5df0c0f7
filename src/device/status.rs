//! Mutable device status and MAC bookkeeping

use core::fmt;
use std::collections::BTreeMap;

use crate::config::device::{AESKey, DevAddr};
use crate::lorawan::commands::{CommandIdentifier, MacCommand};
use crate::lorawan::downlink::DwellTime;
use crate::lorawan::mac::MAX_FOPTS_LEN;

/// Frame counters wrap at this gap
pub const MAXFCNTGAP: u32 = 16384;

/// Uplinks without any downlink before ADRACKReq is set
pub const ADR_ACK_LIMIT: u32 = 64;

/// Further uplinks without downlink before each data rate step down
pub const ADR_ACK_DELAY: u32 = 32;

/// Highest data rate index accepted from the network
pub const MAX_DATA_RATE: u8 = 7;

/// Highest TX power index accepted from the network
pub const MAX_TX_POWER: u8 = 7;

/// Next value of a frame counter
pub fn next_fcnt(fcnt: u32) -> u32 {
    (fcnt + 1) % MAXFCNTGAP
}

/// Device operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Regular uplink scheduling
    Normal,
    /// Resending an unacknowledged confirmed uplink
    Retransmission,
    /// Network signalled pending data, poll with an empty uplink
    FPending,
    /// Not joined, OTAA in progress
    Activation,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Mode::Normal => "Normal",
            Mode::Retransmission => "Retransmission",
            Mode::FPending => "FPending",
            Mode::Activation => "Activation",
        };
        f.write_str(text)
    }
}

/// Keys and address of the current join session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub dev_addr: DevAddr,
    pub nwk_skey: AESKey,
    pub app_skey: AESKey,
}

/// Receive window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxSettings {
    /// RX1 delay in seconds
    pub rx1_delay: u8,
    /// RX1 data rate offset
    pub rx1_dr_offset: u8,
    /// RX2 data rate
    pub rx2_data_rate: u8,
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
}

impl Default for RxSettings {
    fn default() -> Self {
        Self {
            rx1_delay: 1,
            rx1_dr_offset: 0,
            rx2_data_rate: 0,
            rx2_frequency: 869_525_000,
        }
    }
}

/// Channel added through NewChannelReq
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub frequency: u32,
    pub min_dr: u8,
    pub max_dr: u8,
    /// Downlink frequency set through DlChannelReq
    pub downlink_frequency: Option<u32>,
}

/// MAC commands waiting to be piggy-backed on the next uplink
///
/// RXParamSetupAns, RXTimingSetupAns and DlChannelAns are sticky: they are
/// repeated on every uplink until a downlink is received. Everything else is
/// sent once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UplinkMacCommands {
    sticky: Vec<MacCommand>,
    pending: Vec<MacCommand>,
}

fn is_sticky(command: &MacCommand) -> bool {
    matches!(
        command,
        MacCommand::RXParamSetupAns { .. }
            | MacCommand::RXTimingSetupAns
            | MacCommand::DlChannelAns { .. }
    )
}

impl UplinkMacCommands {
    /// Queue a command for the next uplink
    pub fn push(&mut self, command: MacCommand) {
        if is_sticky(&command) {
            let cid = command.cid();
            self.sticky.retain(|c| c.cid() != cid);
            self.sticky.push(command);
        } else {
            self.pending.push(command);
        }
    }

    /// Whether a command with this identifier is queued
    pub fn contains(&self, cid: CommandIdentifier) -> bool {
        self.sticky.iter().chain(self.pending.iter()).any(|c| c.cid() == cid)
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.sticky.is_empty() && self.pending.is_empty()
    }

    /// Encode queued commands into an FOpts field without consuming them
    ///
    /// Returns the field and how many one-shot commands it carries; sticky
    /// commands go first. Pass the count to [`UplinkMacCommands::consume`]
    /// once the frame is out.
    pub fn encode_fopts(&self) -> (heapless::Vec<u8, MAX_FOPTS_LEN>, usize) {
        let mut fopts = heapless::Vec::new();
        for command in &self.sticky {
            if command.encode(&mut fopts).is_err() {
                return (fopts, 0);
            }
        }

        let mut carried = 0;
        for command in &self.pending {
            if command.encode(&mut fopts).is_err() {
                break;
            }
            carried += 1;
        }
        (fopts, carried)
    }

    /// Drop the first `carried` one-shot commands
    pub fn consume(&mut self, carried: usize) {
        self.pending.drain(..carried.min(self.pending.len()));
    }

    /// Encode queued commands into an FOpts field
    ///
    /// One-shot commands that fit are consumed; those that do not fit stay
    /// queued for the following uplink. Sticky commands are kept.
    pub fn take_fopts(&mut self) -> heapless::Vec<u8, MAX_FOPTS_LEN> {
        let (fopts, carried) = self.encode_fopts();
        self.consume(carried);
        fopts
    }

    pub fn clean_rx_param_setup_ans(&mut self) {
        self.sticky.retain(|c| c.cid() != CommandIdentifier::RXParamSetup);
    }

    pub fn clean_rx_timing_setup_ans(&mut self) {
        self.sticky.retain(|c| c.cid() != CommandIdentifier::RXTimingSetup);
    }

    pub fn clean_dl_channel_ans(&mut self) {
        self.sticky.retain(|c| c.cid() != CommandIdentifier::DlChannel);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.sticky.clear();
        self.pending.clear();
    }
}

/// Adaptive data rate state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdrState {
    pub enabled: bool,
    pub data_rate: u8,
    pub tx_power: u8,
    pub nb_trans: u8,
    /// Uplinks sent since the last downlink
    pub ack_cnt: u32,
    /// ADRACKReq bit for the next uplink
    pub ack_req: bool,
    /// A LinkADRReq was applied and not yet reported
    changed: bool,
}

impl AdrState {
    pub fn new(enabled: bool, data_rate: u8, tx_power: u8) -> Self {
        Self {
            enabled,
            data_rate: data_rate.min(MAX_DATA_RATE),
            tx_power: tx_power.min(MAX_TX_POWER),
            nb_trans: 1,
            ack_cnt: 0,
            ack_req: false,
            changed: false,
        }
    }

    /// Account for one uplink without downlink so far
    ///
    /// Returns a report when the backoff lowered TX power or data rate.
    pub fn on_uplink(&mut self) -> Option<String> {
        if !self.enabled {
            return None;
        }

        self.ack_cnt += 1;
        if self.ack_cnt >= ADR_ACK_LIMIT {
            self.ack_req = true;
        }
        if self.ack_cnt < ADR_ACK_LIMIT + ADR_ACK_DELAY {
            return None;
        }

        self.ack_cnt = ADR_ACK_LIMIT;
        if self.tx_power != 0 {
            self.tx_power = 0;
            Some("ADR backoff: TX power set to maximum".to_string())
        } else if self.data_rate > 0 {
            self.data_rate -= 1;
            Some(format!("ADR backoff: data rate lowered to DR{}", self.data_rate))
        } else {
            None
        }
    }

    /// Apply a LinkADRReq and build the answer
    ///
    /// Index 15 keeps the current value (LoRaWAN 1.0.3). The request is only
    /// applied when every field is acceptable.
    pub fn apply_link_adr(
        &mut self,
        data_rate: u8,
        tx_power: u8,
        ch_mask: u16,
        ch_mask_cntl: u8,
        nb_trans: u8,
    ) -> MacCommand {
        let data_rate_ack = data_rate == 0x0F || data_rate <= MAX_DATA_RATE;
        let power_ack = tx_power == 0x0F || tx_power <= MAX_TX_POWER;
        let channel_mask_ack = ch_mask != 0 || ch_mask_cntl == 6;

        if data_rate_ack && power_ack && channel_mask_ack {
            if data_rate != 0x0F {
                self.data_rate = data_rate;
            }
            if tx_power != 0x0F {
                self.tx_power = tx_power;
            }
            self.nb_trans = if nb_trans == 0 { 1 } else { nb_trans };
            self.changed = true;
        }

        MacCommand::LinkADRAns {
            power_ack,
            data_rate_ack,
            channel_mask_ack,
        }
    }

    /// Called on every received downlink
    ///
    /// Clears ADR_ACK_CNT and ADRACKReq and reports a completed parameter
    /// change, or an answered ADRACKReq.
    pub fn reset(&mut self) -> Option<String> {
        let answered = self.ack_req;
        self.ack_cnt = 0;
        self.ack_req = false;

        if self.changed {
            self.changed = false;
            Some(format!(
                "ADR: data rate DR{}, TX power {}, NbTrans {}",
                self.data_rate, self.tx_power, self.nb_trans
            ))
        } else if answered {
            Some("ADR: ADRACKReq answered by the network".to_string())
        } else {
            None
        }
    }
}

/// Mutable part of a device, owned by its runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub joined: bool,
    pub mode: Mode,
    pub fcnt_up: u32,
    pub fcnt_down: u32,
    /// DevNonce of the last join request
    pub dev_nonce: u16,
    /// Present iff joined
    pub session: Option<Session>,
    pub uplink_commands: UplinkMacCommands,
    pub adr: AdrState,
    pub rx: RxSettings,
    pub channels: BTreeMap<u8, Channel>,
    pub dwell_time: DwellTime,
    pub max_duty_cycle: u8,
    /// ACK bit owed on the next uplink
    pub ack_pending: bool,
    /// Transmissions of the current confirmed uplink
    pub transmissions: u8,
    /// Last uplink as sent, for retransmission
    pub last_uplink: Option<Vec<u8>>,
}

impl DeviceStatus {
    /// Status of a device that has not joined yet
    pub fn new(adr: AdrState) -> Self {
        Self {
            joined: false,
            mode: Mode::Activation,
            fcnt_up: 0,
            fcnt_down: 0,
            dev_nonce: 0,
            session: None,
            uplink_commands: UplinkMacCommands::default(),
            adr,
            rx: RxSettings::default(),
            channels: BTreeMap::new(),
            dwell_time: DwellTime::NoLimit,
            max_duty_cycle: 0,
            ack_pending: false,
            transmissions: 0,
            last_uplink: None,
        }
    }
}
