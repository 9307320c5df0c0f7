//! Downlink frame decoder
//!
//! Turns a raw downlink into an [`InformationDownlink`]: MIC validated under
//! the network session key, MAC commands extracted from FOpts or from a
//! port 0 payload, application payload decrypted under the application
//! session key.

use crate::config::device::AESKey;
use crate::crypto::{self, Direction, MIC_SIZE};
use crate::error::{CounterMismatch, FrameError, ProtocolError, SecurityError};

use super::commands::{decode_commands, MacCommand};
use super::mac::{DataFrame, MType};

/// Dwell time restriction set through TxParamSetupReq
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DwellTime {
    /// No dwell time limit
    #[default]
    NoLimit,
    /// 400 ms dwell time
    Limit400ms,
}

/// Logical content of one downlink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationDownlink {
    /// Message type, used to tell confirmed downlinks apart
    pub mtype: MType,
    /// MAC commands from FOpts or from a port 0 payload
    pub fopts_received: Vec<MacCommand>,
    /// Server acknowledged the last confirmed uplink
    pub ack: bool,
    /// Application port, `None` when the frame has no FPort
    pub fport: Option<u8>,
    /// Decrypted application payload
    pub data_payload: Option<Vec<u8>>,
    /// Server has more data pending
    pub fpending: bool,
    /// Dwell time context of the device when the frame was received
    pub dwell_time: DwellTime,
}

/// Successful decoding result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDownlink {
    /// Decoded content
    pub info: InformationDownlink,
    /// Counter carried by the frame
    pub fcnt: u32,
    /// Set when the counter differs from the expected one
    pub counter_error: Option<CounterMismatch>,
}

/// Decode and validate a raw downlink frame
///
/// # Arguments
/// * `frame` - Raw PHY payload
/// * `disable_counter` - Skip counter enforcement
/// * `counter` - Expected downlink counter
/// * `nwk_skey` - Network session key (MIC, port 0 payload)
/// * `app_skey` - Application session key (application payload)
///
/// A counter mismatch is not fatal: it is returned in
/// [`DecodedDownlink::counter_error`] next to a fully decoded frame.
pub fn get_downlink(
    frame: &[u8],
    disable_counter: bool,
    counter: u32,
    nwk_skey: &AESKey,
    app_skey: &AESKey,
) -> Result<DecodedDownlink, FrameError> {
    let data = DataFrame::parse(frame)?;
    let fcnt = data.fhdr.f_cnt as u32;

    let covered = &frame[..frame.len() - MIC_SIZE];
    if !crypto::validate_data_mic(
        nwk_skey,
        covered,
        &data.mic,
        data.fhdr.dev_addr,
        fcnt,
        Direction::Down,
    ) {
        return Err(SecurityError::InvalidMic.into());
    }

    if !matches!(data.mtype, MType::UnconfirmedDataDown | MType::ConfirmedDataDown) {
        return Err(ProtocolError::UnexpectedPayloadKind.into());
    }

    let counter_error = (!disable_counter && fcnt != counter).then_some(CounterMismatch {
        expected: counter,
        received: fcnt,
    });

    let fopts = decode_commands(&data.fhdr.f_opts, Direction::Down)?;

    let mut info = InformationDownlink {
        mtype: data.mtype,
        fopts_received: Vec::new(),
        ack: data.fhdr.f_ctrl.ack,
        fport: data.f_port,
        data_payload: None,
        fpending: data.fhdr.f_ctrl.f_pending,
        dwell_time: DwellTime::default(),
    };

    if !fopts.is_empty() && data.f_port != Some(0) {
        info.fopts_received.extend(fopts);
    }

    match data.f_port {
        Some(0) => {
            let plain = crypto::encrypt_frm_payload(
                nwk_skey,
                data.fhdr.dev_addr,
                fcnt,
                Direction::Down,
                &data.frm_payload,
            )?;
            info.fopts_received.extend(decode_commands(&plain, Direction::Down)?);
        }
        Some(_) => {
            let plain = crypto::encrypt_frm_payload(
                app_skey,
                data.fhdr.dev_addr,
                fcnt,
                Direction::Down,
                &data.frm_payload,
            )?;
            info.data_payload = Some(plain.to_vec());
        }
        None => {}
    }

    Ok(DecodedDownlink {
        info,
        fcnt,
        counter_error,
    })
}
