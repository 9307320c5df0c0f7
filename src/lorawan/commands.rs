use crate::crypto::Direction;
use crate::error::ProtocolError;

/// MAC command identifiers (LoRaWAN 1.0.3)
///
/// Request and answer of one exchange share the same CID; the direction of
/// the frame tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandIdentifier {
    LinkCheck = 0x02,
    LinkADR = 0x03,
    DutyCycle = 0x04,
    RXParamSetup = 0x05,
    DevStatus = 0x06,
    NewChannel = 0x07,
    RXTimingSetup = 0x08,
    TxParamSetup = 0x09,
    DlChannel = 0x0A,
    DeviceTime = 0x0D,
    PingSlotInfo = 0x10,
    PingSlotChannel = 0x11,
    BeaconTiming = 0x12,
    BeaconFreq = 0x13,
}

/// MAC command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacCommand {
    /// Link check request
    LinkCheckReq,
    /// Link check answer
    LinkCheckAns {
        /// Link margin in dB
        margin: u8,
        /// Number of gateways that received the request
        gateway_count: u8,
    },
    /// Link ADR request
    LinkADRReq {
        /// Data rate
        data_rate: u8,
        /// TX power
        tx_power: u8,
        /// Channel mask
        ch_mask: u16,
        /// Channel mask control
        ch_mask_cntl: u8,
        /// Number of transmissions
        nb_trans: u8,
    },
    /// Link ADR answer
    LinkADRAns {
        /// Power ACK
        power_ack: bool,
        /// Data rate ACK
        data_rate_ack: bool,
        /// Channel mask ACK
        channel_mask_ack: bool,
    },
    /// Duty cycle request
    DutyCycleReq {
        /// Maximum duty cycle
        max_duty_cycle: u8,
    },
    /// Duty cycle answer
    DutyCycleAns,
    /// RX parameter setup request
    RXParamSetupReq {
        /// RX1 data rate offset
        rx1_dr_offset: u8,
        /// RX2 data rate
        rx2_data_rate: u8,
        /// RX2 frequency in Hz
        freq: u32,
    },
    /// RX parameter setup answer
    RXParamSetupAns {
        /// RX1 data rate offset ACK
        rx1_dr_offset_ack: bool,
        /// RX2 data rate ACK
        rx2_data_rate_ack: bool,
        /// Channel ACK
        channel_ack: bool,
    },
    /// Device status request
    DevStatusReq,
    /// Device status answer
    DevStatusAns {
        /// Battery level (0 = external power, 1-254 = level, 255 = unknown)
        battery: u8,
        /// Radio status (margin in dB, -32..31)
        margin: i8,
    },
    /// New channel request
    NewChannelReq {
        /// Channel index
        ch_index: u8,
        /// Frequency in Hz
        freq: u32,
        /// Maximum data rate
        max_dr: u8,
        /// Minimum data rate
        min_dr: u8,
    },
    /// New channel answer
    NewChannelAns {
        /// Channel frequency OK
        channel_freq_ok: bool,
        /// Data rate OK
        data_rate_ok: bool,
    },
    /// RX timing setup request
    RXTimingSetupReq {
        /// Delay (0-15)
        delay: u8,
    },
    /// RX timing setup answer
    RXTimingSetupAns,
    /// TX parameter setup request
    TxParamSetupReq {
        /// Downlink dwell time
        downlink_dwell_time: bool,
        /// Uplink dwell time
        uplink_dwell_time: bool,
        /// Maximum EIRP
        max_eirp: u8,
    },
    /// TX parameter setup answer
    TxParamSetupAns,
    /// Downlink channel request
    DlChannelReq {
        /// Channel index
        ch_index: u8,
        /// Frequency in Hz
        freq: u32,
    },
    /// Downlink channel answer
    DlChannelAns {
        /// Channel frequency OK
        channel_freq_ok: bool,
        /// Uplink frequency exists
        uplink_freq_exists: bool,
    },
    /// Device time request
    DeviceTimeReq,
    /// Device time answer
    DeviceTimeAns {
        /// Seconds since GPS epoch
        seconds: u32,
        /// Fractional second in 1/256 s steps
        fractional: u8,
    },
    /// Ping slot info request
    PingSlotInfoReq {
        /// Ping slot periodicity (0-7)
        periodicity: u8,
    },
    /// Ping slot info answer
    PingSlotInfoAns,
    /// Ping slot channel request
    PingSlotChannelReq {
        /// Frequency in Hz
        freq: u32,
        /// Data rate
        data_rate: u8,
    },
    /// Ping slot channel answer
    PingSlotChannelAns {
        /// Data rate OK
        data_rate_ok: bool,
        /// Channel frequency OK
        channel_freq_ok: bool,
    },
    /// Beacon timing request (deprecated in 1.0.3)
    BeaconTimingReq,
    /// Beacon timing answer (deprecated in 1.0.3)
    BeaconTimingAns {
        /// Delay to the next beacon in 30 ms steps
        delay: u16,
        /// Beacon channel index
        channel: u8,
    },
    /// Beacon frequency request
    BeaconFreqReq {
        /// Frequency in Hz
        freq: u32,
    },
    /// Beacon frequency answer
    BeaconFreqAns {
        /// Beacon frequency OK
        beacon_freq_ok: bool,
    },
}

fn freq_from_bytes(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], 0]) * 100
}

fn freq_to_bytes(freq: u32) -> [u8; 3] {
    let raw = (freq / 100).to_le_bytes();
    [raw[0], raw[1], raw[2]]
}

fn bit(value: bool, position: u8) -> u8 {
    (value as u8) << position
}

/// Payload length of a command sent in `dir`, excluding the CID
fn payload_len(cid: u8, dir: Direction) -> Option<usize> {
    let len = match (dir, cid) {
        (Direction::Down, 0x02) => 2,
        (Direction::Down, 0x03) => 4,
        (Direction::Down, 0x04) => 1,
        (Direction::Down, 0x05) => 4,
        (Direction::Down, 0x06) => 0,
        (Direction::Down, 0x07) => 5,
        (Direction::Down, 0x08) => 1,
        (Direction::Down, 0x09) => 1,
        (Direction::Down, 0x0A) => 4,
        (Direction::Down, 0x0D) => 5,
        (Direction::Down, 0x10) => 0,
        (Direction::Down, 0x11) => 4,
        (Direction::Down, 0x12) => 3,
        (Direction::Down, 0x13) => 3,
        (Direction::Up, 0x02) => 0,
        (Direction::Up, 0x03) => 1,
        (Direction::Up, 0x04) => 0,
        (Direction::Up, 0x05) => 1,
        (Direction::Up, 0x06) => 2,
        (Direction::Up, 0x07) => 1,
        (Direction::Up, 0x08) => 0,
        (Direction::Up, 0x09) => 0,
        (Direction::Up, 0x0A) => 1,
        (Direction::Up, 0x0D) => 0,
        (Direction::Up, 0x10) => 1,
        (Direction::Up, 0x11) => 1,
        (Direction::Up, 0x12) => 0,
        (Direction::Up, 0x13) => 1,
        _ => return None,
    };
    Some(len)
}

impl MacCommand {
    /// Parse a single MAC command travelling in `dir`
    pub fn from_bytes(cid: u8, payload: &[u8], dir: Direction) -> Option<Self> {
        if payload.len() < payload_len(cid, dir)? {
            return None;
        }
        let p = payload;
        let command = match (dir, cid) {
            (Direction::Down, 0x02) => MacCommand::LinkCheckAns {
                margin: p[0],
                gateway_count: p[1],
            },
            (Direction::Down, 0x03) => MacCommand::LinkADRReq {
                data_rate: p[0] >> 4,
                tx_power: p[0] & 0x0F,
                ch_mask: u16::from_le_bytes([p[1], p[2]]),
                ch_mask_cntl: (p[3] >> 4) & 0x07,
                nb_trans: p[3] & 0x0F,
            },
            (Direction::Down, 0x04) => MacCommand::DutyCycleReq {
                max_duty_cycle: p[0] & 0x0F,
            },
            (Direction::Down, 0x05) => MacCommand::RXParamSetupReq {
                rx1_dr_offset: (p[0] >> 4) & 0x07,
                rx2_data_rate: p[0] & 0x0F,
                freq: freq_from_bytes(&p[1..4]),
            },
            (Direction::Down, 0x06) => MacCommand::DevStatusReq,
            (Direction::Down, 0x07) => MacCommand::NewChannelReq {
                ch_index: p[0],
                freq: freq_from_bytes(&p[1..4]),
                max_dr: p[4] >> 4,
                min_dr: p[4] & 0x0F,
            },
            (Direction::Down, 0x08) => MacCommand::RXTimingSetupReq { delay: p[0] & 0x0F },
            (Direction::Down, 0x09) => MacCommand::TxParamSetupReq {
                downlink_dwell_time: (p[0] & 0x20) != 0,
                uplink_dwell_time: (p[0] & 0x10) != 0,
                max_eirp: p[0] & 0x0F,
            },
            (Direction::Down, 0x0A) => MacCommand::DlChannelReq {
                ch_index: p[0],
                freq: freq_from_bytes(&p[1..4]),
            },
            (Direction::Down, 0x0D) => MacCommand::DeviceTimeAns {
                seconds: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                fractional: p[4],
            },
            (Direction::Down, 0x10) => MacCommand::PingSlotInfoAns,
            (Direction::Down, 0x11) => MacCommand::PingSlotChannelReq {
                freq: freq_from_bytes(&p[0..3]),
                data_rate: p[3] & 0x0F,
            },
            (Direction::Down, 0x12) => MacCommand::BeaconTimingAns {
                delay: u16::from_le_bytes([p[0], p[1]]),
                channel: p[2],
            },
            (Direction::Down, 0x13) => MacCommand::BeaconFreqReq {
                freq: freq_from_bytes(&p[0..3]),
            },
            (Direction::Up, 0x02) => MacCommand::LinkCheckReq,
            (Direction::Up, 0x03) => MacCommand::LinkADRAns {
                power_ack: (p[0] & 0x04) != 0,
                data_rate_ack: (p[0] & 0x02) != 0,
                channel_mask_ack: (p[0] & 0x01) != 0,
            },
            (Direction::Up, 0x04) => MacCommand::DutyCycleAns,
            (Direction::Up, 0x05) => MacCommand::RXParamSetupAns {
                rx1_dr_offset_ack: (p[0] & 0x04) != 0,
                rx2_data_rate_ack: (p[0] & 0x02) != 0,
                channel_ack: (p[0] & 0x01) != 0,
            },
            (Direction::Up, 0x06) => MacCommand::DevStatusAns {
                battery: p[0],
                // sign-extend the 6 bit margin
                margin: ((p[1] << 2) as i8) >> 2,
            },
            (Direction::Up, 0x07) => MacCommand::NewChannelAns {
                channel_freq_ok: (p[0] & 0x01) != 0,
                data_rate_ok: (p[0] & 0x02) != 0,
            },
            (Direction::Up, 0x08) => MacCommand::RXTimingSetupAns,
            (Direction::Up, 0x09) => MacCommand::TxParamSetupAns,
            (Direction::Up, 0x0A) => MacCommand::DlChannelAns {
                channel_freq_ok: (p[0] & 0x01) != 0,
                uplink_freq_exists: (p[0] & 0x02) != 0,
            },
            (Direction::Up, 0x0D) => MacCommand::DeviceTimeReq,
            (Direction::Up, 0x10) => MacCommand::PingSlotInfoReq {
                periodicity: p[0] & 0x07,
            },
            (Direction::Up, 0x11) => MacCommand::PingSlotChannelAns {
                data_rate_ok: (p[0] & 0x02) != 0,
                channel_freq_ok: (p[0] & 0x01) != 0,
            },
            (Direction::Up, 0x12) => MacCommand::BeaconTimingReq,
            (Direction::Up, 0x13) => MacCommand::BeaconFreqAns {
                beacon_freq_ok: (p[0] & 0x01) != 0,
            },
            _ => return None,
        };
        Some(command)
    }

    /// Command identifier
    pub fn cid(&self) -> CommandIdentifier {
        match self {
            MacCommand::LinkCheckReq | MacCommand::LinkCheckAns { .. } => {
                CommandIdentifier::LinkCheck
            }
            MacCommand::LinkADRReq { .. } | MacCommand::LinkADRAns { .. } => {
                CommandIdentifier::LinkADR
            }
            MacCommand::DutyCycleReq { .. } | MacCommand::DutyCycleAns => {
                CommandIdentifier::DutyCycle
            }
            MacCommand::RXParamSetupReq { .. } | MacCommand::RXParamSetupAns { .. } => {
                CommandIdentifier::RXParamSetup
            }
            MacCommand::DevStatusReq | MacCommand::DevStatusAns { .. } => {
                CommandIdentifier::DevStatus
            }
            MacCommand::NewChannelReq { .. } | MacCommand::NewChannelAns { .. } => {
                CommandIdentifier::NewChannel
            }
            MacCommand::RXTimingSetupReq { .. } | MacCommand::RXTimingSetupAns => {
                CommandIdentifier::RXTimingSetup
            }
            MacCommand::TxParamSetupReq { .. } | MacCommand::TxParamSetupAns => {
                CommandIdentifier::TxParamSetup
            }
            MacCommand::DlChannelReq { .. } | MacCommand::DlChannelAns { .. } => {
                CommandIdentifier::DlChannel
            }
            MacCommand::DeviceTimeReq | MacCommand::DeviceTimeAns { .. } => {
                CommandIdentifier::DeviceTime
            }
            MacCommand::PingSlotInfoReq { .. } | MacCommand::PingSlotInfoAns => {
                CommandIdentifier::PingSlotInfo
            }
            MacCommand::PingSlotChannelReq { .. } | MacCommand::PingSlotChannelAns { .. } => {
                CommandIdentifier::PingSlotChannel
            }
            MacCommand::BeaconTimingReq | MacCommand::BeaconTimingAns { .. } => {
                CommandIdentifier::BeaconTiming
            }
            MacCommand::BeaconFreqReq { .. } | MacCommand::BeaconFreqAns { .. } => {
                CommandIdentifier::BeaconFreq
            }
        }
    }

    /// Direction the command travels in
    pub fn direction(&self) -> Direction {
        match self {
            MacCommand::LinkCheckAns { .. }
            | MacCommand::LinkADRReq { .. }
            | MacCommand::DutyCycleReq { .. }
            | MacCommand::RXParamSetupReq { .. }
            | MacCommand::DevStatusReq
            | MacCommand::NewChannelReq { .. }
            | MacCommand::RXTimingSetupReq { .. }
            | MacCommand::TxParamSetupReq { .. }
            | MacCommand::DlChannelReq { .. }
            | MacCommand::DeviceTimeAns { .. }
            | MacCommand::PingSlotInfoAns
            | MacCommand::PingSlotChannelReq { .. }
            | MacCommand::BeaconTimingAns { .. }
            | MacCommand::BeaconFreqReq { .. } => Direction::Down,
            _ => Direction::Up,
        }
    }

    /// Encoded length including the CID byte
    pub fn len(&self) -> usize {
        1 + payload_len(self.cid() as u8, self.direction()).unwrap_or(0)
    }

    /// Append the encoded command (CID and payload) to `out`
    pub fn encode<const N: usize>(
        &self,
        out: &mut heapless::Vec<u8, N>,
    ) -> Result<(), ProtocolError> {
        let mut buf = [0u8; 6];
        buf[0] = self.cid() as u8;
        let p = &mut buf[1..];
        match self {
            MacCommand::LinkCheckReq
            | MacCommand::DutyCycleAns
            | MacCommand::DevStatusReq
            | MacCommand::RXTimingSetupAns
            | MacCommand::TxParamSetupAns
            | MacCommand::DeviceTimeReq
            | MacCommand::PingSlotInfoAns
            | MacCommand::BeaconTimingReq => {}
            MacCommand::LinkCheckAns {
                margin,
                gateway_count,
            } => {
                p[0] = *margin;
                p[1] = *gateway_count;
            }
            MacCommand::LinkADRReq {
                data_rate,
                tx_power,
                ch_mask,
                ch_mask_cntl,
                nb_trans,
            } => {
                p[0] = (data_rate << 4) | (tx_power & 0x0F);
                p[1..3].copy_from_slice(&ch_mask.to_le_bytes());
                p[3] = ((ch_mask_cntl & 0x07) << 4) | (nb_trans & 0x0F);
            }
            MacCommand::LinkADRAns {
                power_ack,
                data_rate_ack,
                channel_mask_ack,
            } => p[0] = bit(*power_ack, 2) | bit(*data_rate_ack, 1) | bit(*channel_mask_ack, 0),
            MacCommand::DutyCycleReq { max_duty_cycle } => p[0] = max_duty_cycle & 0x0F,
            MacCommand::RXParamSetupReq {
                rx1_dr_offset,
                rx2_data_rate,
                freq,
            } => {
                p[0] = ((rx1_dr_offset & 0x07) << 4) | (rx2_data_rate & 0x0F);
                p[1..4].copy_from_slice(&freq_to_bytes(*freq));
            }
            MacCommand::RXParamSetupAns {
                rx1_dr_offset_ack,
                rx2_data_rate_ack,
                channel_ack,
            } => {
                p[0] = bit(*rx1_dr_offset_ack, 2)
                    | bit(*rx2_data_rate_ack, 1)
                    | bit(*channel_ack, 0)
            }
            MacCommand::DevStatusAns { battery, margin } => {
                p[0] = *battery;
                p[1] = (*margin as u8) & 0x3F;
            }
            MacCommand::NewChannelReq {
                ch_index,
                freq,
                max_dr,
                min_dr,
            } => {
                p[0] = *ch_index;
                p[1..4].copy_from_slice(&freq_to_bytes(*freq));
                p[4] = (max_dr << 4) | (min_dr & 0x0F);
            }
            MacCommand::NewChannelAns {
                channel_freq_ok,
                data_rate_ok,
            } => p[0] = bit(*data_rate_ok, 1) | bit(*channel_freq_ok, 0),
            MacCommand::RXTimingSetupReq { delay } => p[0] = delay & 0x0F,
            MacCommand::TxParamSetupReq {
                downlink_dwell_time,
                uplink_dwell_time,
                max_eirp,
            } => {
                p[0] = bit(*downlink_dwell_time, 5) | bit(*uplink_dwell_time, 4) | (max_eirp & 0x0F)
            }
            MacCommand::DlChannelReq { ch_index, freq } => {
                p[0] = *ch_index;
                p[1..4].copy_from_slice(&freq_to_bytes(*freq));
            }
            MacCommand::DlChannelAns {
                channel_freq_ok,
                uplink_freq_exists,
            } => p[0] = bit(*uplink_freq_exists, 1) | bit(*channel_freq_ok, 0),
            MacCommand::DeviceTimeAns {
                seconds,
                fractional,
            } => {
                p[0..4].copy_from_slice(&seconds.to_le_bytes());
                p[4] = *fractional;
            }
            MacCommand::PingSlotInfoReq { periodicity } => p[0] = periodicity & 0x07,
            MacCommand::PingSlotChannelReq { freq, data_rate } => {
                p[0..3].copy_from_slice(&freq_to_bytes(*freq));
                p[3] = data_rate & 0x0F;
            }
            MacCommand::PingSlotChannelAns {
                data_rate_ok,
                channel_freq_ok,
            } => p[0] = bit(*data_rate_ok, 1) | bit(*channel_freq_ok, 0),
            MacCommand::BeaconTimingAns { delay, channel } => {
                p[0..2].copy_from_slice(&delay.to_le_bytes());
                p[2] = *channel;
            }
            MacCommand::BeaconFreqReq { freq } => p[0..3].copy_from_slice(&freq_to_bytes(*freq)),
            MacCommand::BeaconFreqAns { beacon_freq_ok } => p[0] = bit(*beacon_freq_ok, 0),
        }

        out.extend_from_slice(&buf[..self.len()])
            .map_err(|_| ProtocolError::FOptsTooLong)
    }
}

/// Decode a sequence of MAC commands travelling in `dir`
///
/// Fails on an unknown CID or a command cut short by the end of the buffer.
pub fn decode_commands(bytes: &[u8], dir: Direction) -> Result<Vec<MacCommand>, ProtocolError> {
    let mut commands = Vec::new();
    let mut rest = bytes;

    while let Some((&cid, tail)) = rest.split_first() {
        let len = payload_len(cid, dir).ok_or(ProtocolError::InvalidMacCommand(cid))?;
        if tail.len() < len {
            return Err(ProtocolError::InvalidMacCommand(cid));
        }
        let command = MacCommand::from_bytes(cid, &tail[..len], dir)
            .ok_or(ProtocolError::InvalidMacCommand(cid))?;
        commands.push(command);
        rest = &tail[len..];
    }

    Ok(commands)
}
