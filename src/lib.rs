//! LoRaWAN end-device simulator core
//!
//! This crate emulates LoRaWAN 1.0.3 end devices. Each device joins over the
//! air, sends uplinks on a fixed schedule, validates and decrypts downlinks,
//! answers MAC commands and moves between Class A, B and C.
//!
//! # Features
//! - Security codec (MIC, payload encryption, join accept, key derivation)
//! - Downlink decoding with counter tracking
//! - OTAA activation with a random DevNonce per attempt
//! - Class A, B and C receive behaviour
//! - One tokio task per device with cancellation and pause
//!
//! # Example
//! ```no_run
//! use lwnsim_device::{
//!     config::{AESKey, DeviceConfig, EUI64},
//!     device::{runtime::Simulator, Device},
//!     radio::ChannelTransport,
//!     sink::LogSink,
//! };
//!
//! # async fn demo() {
//! let config = DeviceConfig::new_otaa(
//!     "sensor-1",
//!     EUI64::new([0x00, 0x04, 0xA3, 0x0B, 0x00, 0x1C, 0x05, 0x30]),
//!     EUI64::new([0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x00]),
//!     AESKey::new([0x01; 16]),
//! );
//!
//! // The gateway side of the link forwards frames to a network server
//! let (transport, _gateway) = ChannelTransport::pair();
//!
//! let mut simulator = Simulator::new();
//! simulator.spawn(Device::new(config, transport, LogSink));
//!
//! // ...
//! simulator.shutdown().await;
//! # }
//! ```

/// Over-the-air activation
pub mod activation;

/// Device class state (A, B, C)
pub mod class;

/// Device and simulator configuration
pub mod config;

/// Cryptographic functions
pub mod crypto;

/// Simulated device and its runtime
pub mod device;

/// Error types
pub mod error;

/// LoRaWAN protocol implementation
pub mod lorawan;

/// Frame transport
pub mod radio;

/// Event reporting
pub mod sink;

pub use device::runtime::{DeviceHandle, Simulator};
pub use device::{Device, DeviceSnapshot};
pub use error::{ActivationError, FrameError, ProtocolError, SecurityError};
