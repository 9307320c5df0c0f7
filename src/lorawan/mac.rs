use core::fmt;

use heapless::Vec;

use crate::config::device::{AESKey, DevAddr};
use crate::crypto::{self, Direction, MAX_FRAME_SIZE, MIC_SIZE};
use crate::error::ProtocolError;

/// Maximum FOpts length
pub const MAX_FOPTS_LEN: usize = 15;

/// MHDR + FHDR without FOpts
const MIN_FHDR_LEN: usize = 1 + 4 + 1 + 2;

fn overflow<T>(_: T) -> ProtocolError {
    ProtocolError::FrameTooLong(MAX_FRAME_SIZE)
}

/// MAC header message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MType {
    JoinRequest = 0x00,
    JoinAccept = 0x20,
    UnconfirmedDataUp = 0x40,
    UnconfirmedDataDown = 0x60,
    ConfirmedDataUp = 0x80,
    ConfirmedDataDown = 0xA0,
    RejoinRequest = 0xC0,
    Proprietary = 0xE0,
}

impl MType {
    /// Decode the message type from an MHDR byte
    pub fn from_mhdr(byte: u8) -> Self {
        match byte & 0xE0 {
            0x00 => MType::JoinRequest,
            0x20 => MType::JoinAccept,
            0x40 => MType::UnconfirmedDataUp,
            0x60 => MType::UnconfirmedDataDown,
            0x80 => MType::ConfirmedDataUp,
            0xA0 => MType::ConfirmedDataDown,
            0xC0 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    /// MHDR byte for LoRaWAN R1 major version
    pub fn to_mhdr(self) -> u8 {
        self as u8
    }

    /// Whether the frame carries a MACPayload
    pub fn is_data(self) -> bool {
        matches!(
            self,
            MType::UnconfirmedDataUp
                | MType::UnconfirmedDataDown
                | MType::ConfirmedDataUp
                | MType::ConfirmedDataDown
        )
    }

    /// Direction used by MIC and payload encryption
    pub fn direction(self) -> Direction {
        match self {
            MType::UnconfirmedDataDown | MType::ConfirmedDataDown | MType::JoinAccept => {
                Direction::Down
            }
            _ => Direction::Up,
        }
    }

    /// Whether the frame requests an acknowledgement
    pub fn is_confirmed(self) -> bool {
        matches!(self, MType::ConfirmedDataUp | MType::ConfirmedDataDown)
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MType::JoinRequest => "JoinRequest",
            MType::JoinAccept => "JoinAccept",
            MType::UnconfirmedDataUp => "UnconfirmedDataUp",
            MType::UnconfirmedDataDown => "UnconfirmedDataDown",
            MType::ConfirmedDataUp => "ConfirmedDataUp",
            MType::ConfirmedDataDown => "ConfirmedDataDown",
            MType::RejoinRequest => "RejoinRequest",
            MType::Proprietary => "Proprietary",
        };
        f.write_str(name)
    }
}

/// Frame header flags
///
/// Bit 6 is ADRACKReq on uplinks and RFU on downlinks; bit 4 is FPending on
/// downlinks and the Class B flag on uplinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub f_pending: bool,
    pub f_opts_len: u8,
}

impl FCtrl {
    pub fn to_byte(&self) -> u8 {
        let mut byte = self.f_opts_len & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            adr_ack_req: (byte & 0x40) != 0,
            ack: (byte & 0x20) != 0,
            f_pending: (byte & 0x10) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FHDR {
    pub dev_addr: DevAddr,
    pub f_ctrl: FCtrl,
    pub f_cnt: u16,
    pub f_opts: Vec<u8, MAX_FOPTS_LEN>,
}

/// Data frame (MHDR | FHDR | FPort | FRMPayload | MIC)
///
/// `frm_payload` holds the payload exactly as it travels on air, i.e.
/// encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub mtype: MType,
    pub fhdr: FHDR,
    pub f_port: Option<u8>,
    pub frm_payload: Vec<u8, MAX_FRAME_SIZE>,
    pub mic: [u8; MIC_SIZE],
}

impl DataFrame {
    /// Parse a raw data frame. MIC is extracted but not checked.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLong(MAX_FRAME_SIZE));
        }
        if bytes.len() < MIN_FHDR_LEN + MIC_SIZE {
            return Err(ProtocolError::Truncated("data frame"));
        }

        let mtype = MType::from_mhdr(bytes[0]);
        if !mtype.is_data() {
            return Err(ProtocolError::UnexpectedPayloadKind);
        }

        let (body, mic_bytes) = bytes.split_at(bytes.len() - MIC_SIZE);
        let mut mic = [0u8; MIC_SIZE];
        mic.copy_from_slice(mic_bytes);

        let dev_addr = DevAddr::from_wire([body[1], body[2], body[3], body[4]]);
        let f_ctrl = FCtrl::from_byte(body[5]);
        let f_cnt = u16::from_le_bytes([body[6], body[7]]);

        let opts_end = MIN_FHDR_LEN + f_ctrl.f_opts_len as usize;
        if body.len() < opts_end {
            return Err(ProtocolError::Truncated("FOpts"));
        }
        let f_opts = Vec::from_slice(&body[MIN_FHDR_LEN..opts_end])
            .map_err(|_| ProtocolError::FOptsTooLong)?;

        let (f_port, frm_payload) = match body.get(opts_end) {
            Some(&port) => (
                Some(port),
                Vec::from_slice(&body[opts_end + 1..]).map_err(overflow)?,
            ),
            None => (None, Vec::new()),
        };

        Ok(Self {
            mtype,
            fhdr: FHDR {
                dev_addr,
                f_ctrl,
                f_cnt,
                f_opts,
            },
            f_port,
            frm_payload,
            mic,
        })
    }

    /// Serialize everything covered by the MIC
    pub fn mic_payload(&self) -> Result<Vec<u8, MAX_FRAME_SIZE>, ProtocolError> {
        let mut f_ctrl = self.fhdr.f_ctrl;
        f_ctrl.f_opts_len = self.fhdr.f_opts.len() as u8;

        let mut buffer = Vec::new();
        buffer.push(self.mtype.to_mhdr()).map_err(overflow)?;
        buffer
            .extend_from_slice(&self.fhdr.dev_addr.to_wire())
            .map_err(overflow)?;
        buffer.push(f_ctrl.to_byte()).map_err(overflow)?;
        buffer
            .extend_from_slice(&self.fhdr.f_cnt.to_le_bytes())
            .map_err(overflow)?;
        buffer
            .extend_from_slice(&self.fhdr.f_opts)
            .map_err(overflow)?;
        if let Some(port) = self.f_port {
            buffer.push(port).map_err(overflow)?;
            buffer
                .extend_from_slice(&self.frm_payload)
                .map_err(overflow)?;
        }
        Ok(buffer)
    }

    /// Compute the MIC under `nwk_skey` and serialize the complete frame
    pub fn to_bytes(
        &mut self,
        nwk_skey: &AESKey,
    ) -> Result<Vec<u8, MAX_FRAME_SIZE>, ProtocolError> {
        let mut buffer = self.mic_payload()?;
        self.mic = crypto::compute_data_mic(
            nwk_skey,
            &buffer,
            self.fhdr.dev_addr,
            self.fhdr.f_cnt as u32,
            self.mtype.direction(),
        );
        buffer
            .extend_from_slice(&self.mic)
            .map_err(overflow)?;
        Ok(buffer)
    }
}
