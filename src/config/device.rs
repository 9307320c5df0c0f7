use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::class::ClassKind;
use crate::error::ConfigError;

fn parse_hex<const N: usize>(value: &str) -> Result<[u8; N], ConfigError> {
    let invalid = || ConfigError::InvalidHex {
        value: value.to_string(),
        expected: N,
    };
    let digits = value.trim().trim_start_matches("0x");
    if digits.len() != N * 2 || !digits.is_ascii() {
        return Err(invalid());
    }

    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(out)
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{:02X}", b)?;
    }
    Ok(())
}

/// EUI-64 in big-endian (display) order
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub struct EUI64([u8; 8]);

impl EUI64 {
    /// Create a new EUI from big-endian bytes
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Big-endian bytes
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Bytes in over-the-air (little-endian) order
    pub fn to_wire(&self) -> [u8; 8] {
        let mut wire = self.0;
        wire.reverse();
        wire
    }
}

/// AES-128 key
#[derive(Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub struct AESKey([u8; 16]);

impl AESKey {
    /// Create a new key
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Device address in big-endian (display) order
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevAddr([u8; 4]);

impl DevAddr {
    /// Create a new address from big-endian bytes
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Big-endian bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Decode from over-the-air (little-endian) order
    pub fn from_wire(wire: [u8; 4]) -> Self {
        Self([wire[3], wire[2], wire[1], wire[0]])
    }

    /// Bytes in over-the-air (little-endian) order
    pub fn to_wire(&self) -> [u8; 4] {
        [self.0[3], self.0[2], self.0[1], self.0[0]]
    }
}

macro_rules! hex_type {
    ($ty:ident, $len:expr) => {
        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex::<$len>(s).map(Self)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ConfigError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex(f, &self.0)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($ty))?;
                write_hex(f, &self.0)?;
                write!(f, ")")
            }
        }
    };
}

hex_type!(EUI64, 8);
hex_type!(AESKey, 16);
hex_type!(DevAddr, 4);

/// Per-device provisioning and behaviour, read-only once the device runs
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Simulator-wide device identifier
    #[serde(default)]
    pub id: u32,
    /// Human readable name used in every report
    pub name: String,
    /// Device EUI
    pub dev_eui: EUI64,
    /// Join (application) EUI
    pub join_eui: EUI64,
    /// Root key for OTAA
    pub app_key: AESKey,
    /// Scheduling tick in milliseconds
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    /// Switch to Class B once joined
    #[serde(default)]
    pub supported_class_b: bool,
    /// Switch to Class C once joined (takes precedence over Class B)
    #[serde(default)]
    pub supported_class_c: bool,
    /// Skip downlink counter enforcement
    #[serde(default)]
    pub disable_fcnt_down: bool,
    /// Application port for uplinks
    #[serde(default = "default_fport")]
    pub fport: u8,
    /// Application payload sent on every uplink
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Send confirmed uplinks
    #[serde(default)]
    pub confirmed: bool,
    /// Transmissions of a confirmed uplink before giving up
    #[serde(default = "default_nb_retransmission")]
    pub nb_retransmission: u8,
    /// Adaptive data rate
    #[serde(default = "default_true")]
    pub adr_enabled: bool,
    /// Initial data rate index
    #[serde(default)]
    pub data_rate: u8,
    /// Initial TX power index
    #[serde(default)]
    pub tx_power: u8,
    /// Class B ping slot periodicity (0-7)
    #[serde(default)]
    pub ping_periodicity: u8,
    /// Battery level reported in DevStatusAns (255 = unknown)
    #[serde(default = "default_battery_level")]
    pub battery_level: u8,
}

fn default_send_interval_ms() -> u64 {
    10_000
}

fn default_fport() -> u8 {
    1
}

fn default_nb_retransmission() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

fn default_battery_level() -> u8 {
    255
}

impl DeviceConfig {
    /// Create an OTAA device configuration with default behaviour
    pub fn new_otaa(name: &str, dev_eui: EUI64, join_eui: EUI64, app_key: AESKey) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            dev_eui,
            join_eui,
            app_key,
            send_interval_ms: default_send_interval_ms(),
            supported_class_b: false,
            supported_class_c: false,
            disable_fcnt_down: false,
            fport: default_fport(),
            payload: Vec::new(),
            confirmed: false,
            nb_retransmission: default_nb_retransmission(),
            adr_enabled: true,
            data_rate: 0,
            tx_power: 0,
            ping_periodicity: 0,
            battery_level: default_battery_level(),
        }
    }

    /// Scheduling tick
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.max(1))
    }

    /// Highest class this device may be promoted to
    pub fn supported_class(&self) -> ClassKind {
        if self.supported_class_c {
            ClassKind::C
        } else if self.supported_class_b {
            ClassKind::B
        } else {
            ClassKind::A
        }
    }
}
