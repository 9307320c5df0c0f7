//! Downlink processing and MAC command handling

use crate::activation;
use crate::class::Class;
use crate::error::{FrameError, ProtocolError};
use crate::lorawan::commands::MacCommand;
use crate::lorawan::downlink::{get_downlink, DwellTime, InformationDownlink};
use crate::lorawan::mac::MType;
use crate::radio::Transport;
use crate::sink::EventSink;

use super::status::{next_fcnt, Channel, MAXFCNTGAP, MAX_DATA_RATE};
use super::Device;

/// Highest RX1 data rate offset accepted
const MAX_RX1_DR_OFFSET: u8 = 5;

/// Frequencies the simulated radio can tune to
fn valid_frequency(freq: u32) -> bool {
    (137_000_000..=1_020_000_000).contains(&freq)
}

impl<T: Transport, S: EventSink> Device<T, S> {
    /// Apply one received frame
    ///
    /// A join accept answering a pending join request installs a new session
    /// and yields `Ok(None)`; once joined it is rejected. A data
    /// frame is decoded, counters advanced and the class cleanup run; its MAC
    /// commands are left to [`Device::handle_mac_commands`], so answers queued
    /// there survive until the next downlink. Fatal errors leave the status
    /// untouched and are returned to the caller for reporting.
    pub fn process_downlink(
        &mut self,
        frame: &[u8],
    ) -> Result<Option<InformationDownlink>, FrameError> {
        let mhdr = *frame.first().ok_or(ProtocolError::Truncated("downlink"))?;

        match MType::from_mhdr(mhdr) {
            // Only an outstanding join request can be answered
            MType::JoinAccept if self.status.joined => {
                Err(ProtocolError::UnexpectedPayloadKind.into())
            }
            MType::JoinAccept => {
                match activation::decrypt_join_accept(
                    frame,
                    self.status.dev_nonce,
                    &self.config.app_key,
                ) {
                    Ok(accept) => self.apply_join_accept(accept),
                    Err(err) => self.print_error(&err),
                }
                Ok(None)
            }
            MType::UnconfirmedDataDown | MType::ConfirmedDataDown => {
                self.process_data_downlink(frame).map(Some)
            }
            _ => Err(ProtocolError::UnexpectedPayloadKind.into()),
        }
    }

    fn process_data_downlink(&mut self, frame: &[u8]) -> Result<InformationDownlink, FrameError> {
        let session = self
            .status
            .session
            .clone()
            .ok_or(ProtocolError::NoSession)?;

        let decoded = get_downlink(
            frame,
            self.config.disable_fcnt_down,
            self.status.fcnt_down,
            &session.nwk_skey,
            &session.app_skey,
        )?;

        if let Some(mismatch) = decoded.counter_error {
            self.print_error(&mismatch);
            self.status.fcnt_down = decoded.fcnt % MAXFCNTGAP;
        }
        self.status.fcnt_down = next_fcnt(self.status.fcnt_down);

        let mut info = decoded.info;
        info.dwell_time = self.status.dwell_time;

        if info.mtype == MType::ConfirmedDataDown {
            self.send_ack();
        }

        if let Some(payload) = &info.data_payload {
            self.print_downlink(info.fport.unwrap_or_default(), payload);
        }

        if let Some(report) = self
            .class
            .after_downlink(&mut self.status.uplink_commands, &mut self.status.adr)
        {
            self.print(&report);
        }

        Ok(info)
    }

    /// Acknowledge a confirmed downlink
    ///
    /// Class C answers at once with an empty uplink, other classes set the
    /// ACK bit of the next scheduled uplink.
    fn send_ack(&mut self) {
        match &mut self.class {
            Class::C(state) => {
                state.ack = true;
                match self.create_uplink(None, false) {
                    Ok(frame) => {
                        self.send_frame(&frame);
                        self.print("ACK sent");
                    }
                    Err(err) => self.print_error(&err),
                }
            }
            Class::A | Class::B(_) => self.status.ack_pending = true,
        }
    }

    /// Apply network requests and queue their answers
    pub fn handle_mac_commands(&mut self, commands: &[MacCommand]) {
        for command in commands {
            match *command {
                MacCommand::LinkCheckAns {
                    margin,
                    gateway_count,
                } => self.print(&format!(
                    "LinkCheckAns: margin {} dB, {} gateway(s)",
                    margin, gateway_count
                )),
                MacCommand::LinkADRReq {
                    data_rate,
                    tx_power,
                    ch_mask,
                    ch_mask_cntl,
                    nb_trans,
                } => {
                    let answer = self.status.adr.apply_link_adr(
                        data_rate,
                        tx_power,
                        ch_mask,
                        ch_mask_cntl,
                        nb_trans,
                    );
                    self.status.uplink_commands.push(answer);
                }
                MacCommand::DutyCycleReq { max_duty_cycle } => {
                    self.status.max_duty_cycle = max_duty_cycle & 0x0F;
                    self.status.uplink_commands.push(MacCommand::DutyCycleAns);
                }
                MacCommand::RXParamSetupReq {
                    rx1_dr_offset,
                    rx2_data_rate,
                    freq,
                } => {
                    let rx1_dr_offset_ack = rx1_dr_offset <= MAX_RX1_DR_OFFSET;
                    let rx2_data_rate_ack = rx2_data_rate <= MAX_DATA_RATE;
                    let channel_ack = valid_frequency(freq);
                    if rx1_dr_offset_ack && rx2_data_rate_ack && channel_ack {
                        self.status.rx.rx1_dr_offset = rx1_dr_offset;
                        self.status.rx.rx2_data_rate = rx2_data_rate;
                        self.status.rx.rx2_frequency = freq;
                    }
                    self.status.uplink_commands.push(MacCommand::RXParamSetupAns {
                        rx1_dr_offset_ack,
                        rx2_data_rate_ack,
                        channel_ack,
                    });
                }
                MacCommand::DevStatusReq => {
                    self.status.uplink_commands.push(MacCommand::DevStatusAns {
                        battery: self.config.battery_level,
                        margin: 0,
                    });
                }
                MacCommand::NewChannelReq {
                    ch_index,
                    freq,
                    max_dr,
                    min_dr,
                } => {
                    // Frequency 0 disables the channel
                    let channel_freq_ok = freq == 0 || valid_frequency(freq);
                    let data_rate_ok = min_dr <= max_dr && max_dr <= MAX_DATA_RATE;
                    if channel_freq_ok && data_rate_ok {
                        if freq == 0 {
                            self.status.channels.remove(&ch_index);
                        } else {
                            self.status.channels.insert(
                                ch_index,
                                Channel {
                                    frequency: freq,
                                    min_dr,
                                    max_dr,
                                    downlink_frequency: None,
                                },
                            );
                        }
                    }
                    self.status.uplink_commands.push(MacCommand::NewChannelAns {
                        channel_freq_ok,
                        data_rate_ok,
                    });
                }
                MacCommand::RXTimingSetupReq { delay } => {
                    self.status.rx.rx1_delay = match delay & 0x0F {
                        0 => 1,
                        delay => delay,
                    };
                    self.status.uplink_commands.push(MacCommand::RXTimingSetupAns);
                }
                MacCommand::TxParamSetupReq {
                    downlink_dwell_time,
                    ..
                } => {
                    self.status.dwell_time = if downlink_dwell_time {
                        DwellTime::Limit400ms
                    } else {
                        DwellTime::NoLimit
                    };
                    self.status.uplink_commands.push(MacCommand::TxParamSetupAns);
                }
                MacCommand::DlChannelReq { ch_index, freq } => {
                    let channel_freq_ok = valid_frequency(freq);
                    let channel = self.status.channels.get_mut(&ch_index);
                    let uplink_freq_exists = channel.is_some();
                    if let (true, Some(channel)) = (channel_freq_ok, channel) {
                        channel.downlink_frequency = Some(freq);
                    }
                    self.status.uplink_commands.push(MacCommand::DlChannelAns {
                        channel_freq_ok,
                        uplink_freq_exists,
                    });
                }
                MacCommand::DeviceTimeAns {
                    seconds,
                    fractional,
                } => self.print(&format!(
                    "DeviceTimeAns: {}.{:03} s since GPS epoch",
                    seconds,
                    fractional as u32 * 1000 / 256
                )),
                MacCommand::PingSlotInfoAns => {
                    if let Class::B(state) = &mut self.class {
                        state.ping_slot_info_acked = true;
                    }
                    self.print("PingSlotInfoAns received");
                }
                MacCommand::PingSlotChannelReq { freq, data_rate } => {
                    let channel_freq_ok = freq == 0 || valid_frequency(freq);
                    let data_rate_ok = data_rate <= MAX_DATA_RATE;
                    if let (true, true, Class::B(state)) =
                        (channel_freq_ok, data_rate_ok, &mut self.class)
                    {
                        state.config.set_channel(freq, data_rate);
                    }
                    self.status
                        .uplink_commands
                        .push(MacCommand::PingSlotChannelAns {
                            data_rate_ok,
                            channel_freq_ok,
                        });
                }
                MacCommand::BeaconTimingAns { delay, channel } => self.print(&format!(
                    "BeaconTimingAns: next beacon in {} ms on channel {}",
                    delay as u32 * 30,
                    channel
                )),
                MacCommand::BeaconFreqReq { freq } => {
                    let beacon_freq_ok = freq == 0 || valid_frequency(freq);
                    if let (true, Class::B(state)) = (beacon_freq_ok, &mut self.class) {
                        state.beacon_frequency = (freq != 0).then_some(freq);
                    }
                    self.status
                        .uplink_commands
                        .push(MacCommand::BeaconFreqAns { beacon_freq_ok });
                }
                // Uplink-only commands never come out of the downlink decoder
                _ => {}
            }
        }
    }
}
