//! Over-the-air activation
//!
//! Builds join requests and turns an encrypted join accept into a
//! [`JoinAccept`] carrying the derived session keys.

use crate::config::device::{AESKey, DevAddr, EUI64};
use crate::crypto::{self, MIC_SIZE};
use crate::error::{ActivationError, ProtocolError, SecurityError};
use crate::lorawan::mac::MType;

/// Join request length (MHDR | JoinEUI | DevEUI | DevNonce | MIC)
pub const JOIN_REQUEST_LEN: usize = 1 + 8 + 8 + 2 + MIC_SIZE;

/// Join request content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequest {
    pub join_eui: EUI64,
    pub dev_eui: EUI64,
    pub dev_nonce: u16,
}

impl JoinRequest {
    /// Serialize and sign with the application key
    pub fn to_bytes(&self, app_key: &AESKey) -> [u8; JOIN_REQUEST_LEN] {
        let mut buffer = [0u8; JOIN_REQUEST_LEN];
        buffer[0] = MType::JoinRequest.to_mhdr();
        buffer[1..9].copy_from_slice(&self.join_eui.to_wire());
        buffer[9..17].copy_from_slice(&self.dev_eui.to_wire());
        buffer[17..19].copy_from_slice(&self.dev_nonce.to_le_bytes());

        let mic = crypto::compute_join_request_mic(app_key, &buffer[..19]);
        buffer[19..].copy_from_slice(&mic);
        buffer
    }

    /// Parse a join request without checking its MIC
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != JOIN_REQUEST_LEN {
            return Err(ProtocolError::Truncated("join request"));
        }
        if MType::from_mhdr(bytes[0]) != MType::JoinRequest {
            return Err(ProtocolError::UnexpectedPayloadKind);
        }

        let eui = |wire: &[u8]| {
            let mut be = [0u8; 8];
            be.copy_from_slice(wire);
            be.reverse();
            EUI64::new(be)
        };

        Ok(Self {
            join_eui: eui(&bytes[1..9]),
            dev_eui: eui(&bytes[9..17]),
            dev_nonce: u16::from_le_bytes([bytes[17], bytes[18]]),
        })
    }
}

/// Decoded and authenticated join accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccept {
    /// AppNonce as received
    pub app_nonce: [u8; 3],
    /// NetID as received
    pub net_id: [u8; 3],
    /// Address assigned by the network
    pub dev_addr: DevAddr,
    /// RX1 data rate offset from DLSettings
    pub rx1_dr_offset: u8,
    /// RX2 data rate from DLSettings
    pub rx2_data_rate: u8,
    /// RX1 delay in seconds (0 is read as 1)
    pub rx_delay: u8,
    /// Optional channel frequency list
    pub cf_list: Option<[u8; 16]>,
    /// Derived network session key
    pub nwk_skey: AESKey,
    /// Derived application session key
    pub app_skey: AESKey,
}

/// Decrypt and validate a join accept frame
///
/// # Arguments
/// * `frame` - Raw PHY payload as received (MHDR in clear, rest encrypted)
/// * `dev_nonce` - DevNonce of the join request being answered
/// * `app_key` - Application key
pub fn decrypt_join_accept(
    frame: &[u8],
    dev_nonce: u16,
    app_key: &AESKey,
) -> Result<JoinAccept, ActivationError> {
    let (&mhdr, encrypted) = frame
        .split_first()
        .ok_or(ProtocolError::Truncated("join accept"))?;
    if MType::from_mhdr(mhdr) != MType::JoinAccept {
        return Err(ActivationError::NotJoinAccept);
    }

    let plain = crypto::decrypt_join_accept(app_key, encrypted)?;
    let (fields, mic) = plain.split_at(plain.len() - MIC_SIZE);

    let mut signed = heapless::Vec::<u8, 33>::new();
    signed
        .push(mhdr)
        .map_err(|_| ProtocolError::FrameTooLong(33))?;
    signed
        .extend_from_slice(fields)
        .map_err(|_| ProtocolError::FrameTooLong(33))?;
    if crypto::compute_join_accept_mic(app_key, &signed) != mic {
        return Err(SecurityError::InvalidJoinAcceptMic.into());
    }

    let mut app_nonce = [0u8; 3];
    app_nonce.copy_from_slice(&fields[0..3]);
    let mut net_id = [0u8; 3];
    net_id.copy_from_slice(&fields[3..6]);
    let dev_addr = DevAddr::from_wire([fields[6], fields[7], fields[8], fields[9]]);
    let dl_settings = fields[10];
    let rx_delay = match fields[11] & 0x0F {
        0 => 1,
        delay => delay,
    };
    let cf_list = (fields.len() == 28).then(|| {
        let mut list = [0u8; 16];
        list.copy_from_slice(&fields[12..28]);
        list
    });

    let (nwk_skey, app_skey) = crypto::derive_session_keys(app_key, &app_nonce, &net_id, dev_nonce);

    Ok(JoinAccept {
        app_nonce,
        net_id,
        dev_addr,
        rx1_dr_offset: (dl_settings >> 4) & 0x07,
        rx2_data_rate: dl_settings & 0x0F,
        rx_delay,
        cf_list,
        nwk_skey,
        app_skey,
    })
}
