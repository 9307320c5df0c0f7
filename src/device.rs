//! Simulated LoRaWAN end device
//!
//! A [`Device`] owns its configuration, status and class, and exchanges
//! frames through a [`Transport`]. Everything it has to say goes to an
//! [`EventSink`] as `|mode| {class}: content` status lines.

pub mod downlinks;
pub mod runtime;
pub mod status;
pub mod uplink;

use tokio::time::Instant;

use crate::activation::{self, JoinAccept, JoinRequest};
use crate::class::{Class, ClassBState, ClassCState, ClassKind};
use crate::config::device::DeviceConfig;
use crate::error::ActivationError;
use crate::radio::Transport;
use crate::sink::{self, EventSink};

use status::{AdrState, Channel, DeviceStatus, Mode, Session};

/// Copy of a device's state published to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub id: u32,
    pub name: String,
    pub class: Class,
    pub status: DeviceStatus,
}

/// Simulated end device
pub struct Device<T: Transport, S: EventSink> {
    config: DeviceConfig,
    class: Class,
    status: DeviceStatus,
    transport: T,
    sink: S,
}

impl<T: Transport, S: EventSink> Device<T, S> {
    /// Create an unjoined Class A device
    pub fn new(config: DeviceConfig, transport: T, sink: S) -> Self {
        let adr = AdrState::new(config.adr_enabled, config.data_rate, config.tx_power);
        Self {
            config,
            class: Class::A,
            status: DeviceStatus::new(adr),
            transport,
            sink,
        }
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    /// Mutable status, for callers driving the device by hand
    pub fn status_mut(&mut self) -> &mut DeviceStatus {
        &mut self.status
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.config.id,
            name: self.config.name.clone(),
            class: self.class.clone(),
            status: self.status.clone(),
        }
    }

    /// Report a status line
    pub fn print(&self, content: &str) {
        let message = format!("|{}| {{{}}}: {}", self.status.mode, self.class, content);
        self.sink.status(&self.config.name, &message, false);
    }

    /// Report an error
    pub fn print_error(&self, err: &dyn std::error::Error) {
        let message = format!("|{}| {{{}}} [ERROR]: {}", self.status.mode, self.class, err);
        self.sink.status(&self.config.name, &message, true);
    }

    fn print_downlink(&self, fport: u8, payload: &[u8]) {
        self.print(&format!("Downlink received on port {}", fport));
        self.sink
            .downlink_received(&self.config.name, sink::now_millis(), fport, payload);
    }

    /// Hand a frame to the transport and report it
    fn send_frame(&mut self, frame: &[u8]) {
        match self.transport.send(frame) {
            Ok(()) => self
                .sink
                .uplink_sent(&self.config.name, sink::now_millis(), frame),
            Err(err) => self.print_error(&err),
        }
    }

    /// One OTAA attempt with a fresh random DevNonce
    ///
    /// On failure the device keeps its previous session, mode and counters.
    pub fn otaa_activation(&mut self) -> Result<(), ActivationError> {
        if !self.status.joined {
            self.status.mode = Mode::Activation;
        }
        self.status.dev_nonce = rand::random();

        let request = JoinRequest {
            join_eui: self.config.join_eui,
            dev_eui: self.config.dev_eui,
            dev_nonce: self.status.dev_nonce,
        };
        let frame = request.to_bytes(&self.config.app_key);
        self.send_frame(&frame);
        self.print("Join request sent");

        let answer = self.transport.receive().ok_or(ActivationError::NoAnswer)?;
        let accept =
            activation::decrypt_join_accept(&answer, self.status.dev_nonce, &self.config.app_key)?;
        self.apply_join_accept(accept);
        Ok(())
    }

    /// Run one activation attempt and report the outcome
    pub fn join(&mut self) {
        if let Err(err) = self.otaa_activation() {
            self.print_error(&err);
        }
    }

    /// Install a new session
    pub fn apply_join_accept(&mut self, accept: JoinAccept) {
        let status = &mut self.status;
        status.session = Some(Session {
            dev_addr: accept.dev_addr,
            nwk_skey: accept.nwk_skey,
            app_skey: accept.app_skey,
        });
        status.joined = true;
        status.mode = Mode::Normal;
        status.fcnt_up = 0;
        status.fcnt_down = 0;
        status.rx.rx1_delay = accept.rx_delay;
        status.rx.rx1_dr_offset = accept.rx1_dr_offset;
        status.rx.rx2_data_rate = accept.rx2_data_rate;
        status.uplink_commands.clear();
        status.adr = AdrState::new(
            self.config.adr_enabled,
            self.config.data_rate,
            self.config.tx_power,
        );
        status.ack_pending = false;
        status.transmissions = 0;
        status.last_uplink = None;
        status.channels.clear();

        // CFList type 0: frequencies of channels 3 to 7
        if let Some(list) = accept.cf_list.filter(|list| list[15] == 0) {
            for (index, raw) in list[..15].chunks(3).enumerate() {
                let frequency = u32::from_le_bytes([raw[0], raw[1], raw[2], 0]) * 100;
                if frequency != 0 {
                    status.channels.insert(
                        3 + index as u8,
                        Channel {
                            frequency,
                            min_dr: 0,
                            max_dr: 5,
                            downlink_frequency: None,
                        },
                    );
                }
            }
        }

        self.class = Class::A;
        self.print(&format!("Joined, DevAddr {}", accept.dev_addr));
    }

    /// Promote the device to the highest class it supports
    pub fn select_class(&mut self) {
        let target = self.config.supported_class();
        if self.class.kind() != target {
            self.switch_class(target);
        }
    }

    /// Switch class, starting from a fresh class state
    pub fn switch_class(&mut self, kind: ClassKind) {
        self.class = match kind {
            ClassKind::A => Class::A,
            ClassKind::B => {
                let dev_addr = self
                    .status
                    .session
                    .as_ref()
                    .map(|s| s.dev_addr)
                    .unwrap_or_default();
                let state =
                    ClassBState::new(self.config.ping_periodicity, dev_addr, Instant::now());
                self.status.uplink_commands.push(state.ping_slot_info_req());
                Class::B(state)
            }
            ClassKind::C => Class::C(ClassCState::new()),
        };
        self.print(&format!("Switch to class {}", kind));
    }

    /// One uplink followed by the receive windows of the current class
    pub fn execute(&mut self) {
        let resend = match self.status.mode {
            Mode::Retransmission => self.status.last_uplink.clone(),
            _ => None,
        };

        let (frame, confirmed) = match resend {
            Some(frame) => {
                self.status.transmissions = self.status.transmissions.saturating_add(1);
                (frame, true)
            }
            None => {
                let fpending = self.status.mode == Mode::FPending;
                let confirmed = self.config.confirmed && !fpending;
                let payload = (!fpending).then(|| self.config.payload.clone());
                match self.create_uplink(payload.as_deref(), confirmed) {
                    Ok(frame) => (frame, confirmed),
                    Err(err) => {
                        self.print_error(&err);
                        return;
                    }
                }
            }
        };

        self.send_frame(&frame);
        self.print(if confirmed {
            "Confirmed uplink sent"
        } else {
            "Unconfirmed uplink sent"
        });

        let mut acked = false;
        let mut fpending = false;
        for downlink in self.receive_windows() {
            match self.process_downlink(&downlink) {
                Ok(Some(info)) => {
                    self.handle_mac_commands(&info.fopts_received);
                    acked |= info.ack;
                    fpending |= info.fpending;
                }
                Ok(None) => {}
                Err(err) => self.print_error(&err),
            }
        }

        self.after_exchange(confirmed, acked, fpending);
    }

    /// Frames received in the windows opened by the current class
    fn receive_windows(&mut self) -> Vec<Vec<u8>> {
        let mut frames: Vec<Vec<u8>> = Vec::new();
        match &mut self.class {
            Class::A => frames.extend(self.transport.receive()),
            Class::B(state) => {
                frames.extend(self.transport.receive());
                for _ in 0..state.open_due_slots(Instant::now()) {
                    match self.transport.receive() {
                        Some(frame) => frames.push(frame),
                        None => break,
                    }
                }
            }
            Class::C(_) => {
                while let Some(frame) = self.transport.receive() {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    /// Pick the next mode from the outcome of an exchange
    fn after_exchange(&mut self, confirmed: bool, acked: bool, fpending: bool) {
        let unacked = confirmed && !acked;
        let exhausted = self.status.transmissions >= self.config.nb_retransmission.max(1);

        if unacked && exhausted {
            self.print_error(&UplinkNotAcknowledged);
        }

        self.status.mode = if fpending {
            Mode::FPending
        } else if unacked && !exhausted {
            Mode::Retransmission
        } else {
            Mode::Normal
        };

        if self.status.mode != Mode::Retransmission {
            self.status.transmissions = 0;
            self.status.last_uplink = None;
        }
    }
}

/// Confirmed uplink ran out of transmissions
#[derive(Debug, thiserror::Error)]
#[error("last uplink not acknowledged")]
struct UplinkNotAcknowledged;
