//! LoRaWAN device class implementations
//!
//! This module contains the state of the three LoRaWAN device classes:
//! - Class A: two receive windows after each uplink
//! - Class B: additional ping slots scheduled from the beacon period
//! - Class C: continuous receive except when transmitting
//!
//! A device starts in Class A and is promoted once joined when its
//! configuration allows it.

use core::fmt;

/// Class B device implementation
pub mod class_b;
pub use class_b::ClassBState;

/// Class C device implementation
pub mod class_c;
pub use class_c::ClassCState;

use crate::device::status::{AdrState, UplinkMacCommands};

/// Device class without its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Class A only
    A,
    /// Class B ping slots
    B,
    /// Class C continuous reception
    C,
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassKind::A => "A",
            ClassKind::B => "B",
            ClassKind::C => "C",
        };
        f.write_str(name)
    }
}

/// Current class of a device and its class specific state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Class {
    /// Class A
    #[default]
    A,
    /// Class B
    B(ClassBState),
    /// Class C
    C(ClassCState),
}

impl Class {
    /// Class without its state
    pub fn kind(&self) -> ClassKind {
        match self {
            Class::A => ClassKind::A,
            Class::B(_) => ClassKind::B,
            Class::C(_) => ClassKind::C,
        }
    }

    /// Cleanup after every successfully decoded downlink
    ///
    /// Class A drops its sticky RXParamSetupAns and RXTimingSetupAns, Class C
    /// clears its owed ACK. Every class then resets the ADR acknowledgement
    /// state and drops DlChannelAns. Returns the ADR report, if any.
    pub fn after_downlink(
        &mut self,
        commands: &mut UplinkMacCommands,
        adr: &mut AdrState,
    ) -> Option<String> {
        match self {
            Class::A => {
                commands.clean_rx_param_setup_ans();
                commands.clean_rx_timing_setup_ans();
            }
            Class::B(_) => {}
            Class::C(state) => state.ack = false,
        }

        let report = adr.reset();
        commands.clean_dl_channel_ans();
        report
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}
