//! LoRaWAN protocol implementation
//!
//! This module contains the frame level parts of LoRaWAN 1.0.3:
//! - MAC header and frame header layout
//! - MAC command encoding and decoding
//! - Downlink decoding and validation

/// MAC command handling
pub mod commands;

/// Downlink frame decoder
pub mod downlink;

/// MAC frame layout
pub mod mac;

pub use commands::{CommandIdentifier, MacCommand};
pub use downlink::{get_downlink, DecodedDownlink, DwellTime, InformationDownlink};
pub use mac::{DataFrame, FCtrl, MType, FHDR};
