//! Uplink frame construction

use crate::class::Class;
use crate::crypto::{self, Direction};
use crate::error::ProtocolError;
use crate::lorawan::mac::{DataFrame, FCtrl, MType, FHDR};
use crate::radio::Transport;
use crate::sink::EventSink;

use super::status::next_fcnt;
use super::Device;

impl<T: Transport, S: EventSink> Device<T, S> {
    /// Build the next uplink and advance FCntUp
    ///
    /// Queued MAC commands ride in FOpts. Without `payload` the frame has no
    /// FPort. A confirmed frame is kept for retransmission. When the frame
    /// cannot be built the MAC queue, ADR state and FCntUp are left as they
    /// were.
    pub fn create_uplink(
        &mut self,
        payload: Option<&[u8]>,
        confirmed: bool,
    ) -> Result<Vec<u8>, ProtocolError> {
        let session = self
            .status
            .session
            .clone()
            .ok_or(ProtocolError::NoSession)?;

        // Nothing is committed until the frame is built
        let mut adr = self.status.adr.clone();
        let adr_report = adr.on_uplink();

        let fcnt = self.status.fcnt_up;
        let (f_opts, carried) = self.status.uplink_commands.encode_fopts();
        let class_c_ack = matches!(&self.class, Class::C(state) if state.ack);

        let f_ctrl = FCtrl {
            adr: adr.enabled,
            adr_ack_req: adr.ack_req,
            ack: self.status.ack_pending || class_c_ack,
            // Class B flag on uplinks
            f_pending: matches!(self.class, Class::B(_)),
            f_opts_len: f_opts.len() as u8,
        };

        let (f_port, frm_payload) = match payload {
            Some(data) => {
                let key = match self.config.fport {
                    0 => &session.nwk_skey,
                    _ => &session.app_skey,
                };
                let encrypted = crypto::encrypt_frm_payload(
                    key,
                    session.dev_addr,
                    fcnt,
                    Direction::Up,
                    data,
                )?;
                (Some(self.config.fport), encrypted)
            }
            None => (None, heapless::Vec::new()),
        };

        let mut frame = DataFrame {
            mtype: if confirmed {
                MType::ConfirmedDataUp
            } else {
                MType::UnconfirmedDataUp
            },
            fhdr: FHDR {
                dev_addr: session.dev_addr,
                f_ctrl,
                f_cnt: fcnt as u16,
                f_opts,
            },
            f_port,
            frm_payload,
            mic: [0; crypto::MIC_SIZE],
        };
        let bytes = frame.to_bytes(&session.nwk_skey)?.to_vec();

        self.status.adr = adr;
        if let Some(report) = adr_report {
            self.print(&report);
        }
        self.status.uplink_commands.consume(carried);
        self.status.ack_pending = false;
        self.status.fcnt_up = next_fcnt(fcnt);
        if confirmed {
            self.status.transmissions = 1;
            self.status.last_uplink = Some(bytes.clone());
        }

        Ok(bytes)
    }
}
