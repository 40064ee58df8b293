//! Device profile: USB ids, endpoints and protocol timeouts of the bootloader
use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_CHUNK_TIMEOUT_MS, DEFAULT_COMMAND_TIMEOUT_MS},
    error::Result,
};

/// Describes how to reach one kind of bootloader over USB
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(deserialize_with = "parse_number")]
    pub vendor_id: u16,
    #[serde(deserialize_with = "parse_number")]
    pub product_id: u16,
    #[serde(default)]
    pub interface: u8,
    #[serde(deserialize_with = "parse_number")]
    pub endpoint_out: u8,
    #[serde(deserialize_with = "parse_number")]
    pub endpoint_in: u8,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_ms: u64,
}

impl ::std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(
            f,
            "{}({:04x}:{:04x})",
            self.name, self.vendor_id, self.product_id
        )
    }
}

impl DeviceProfile {
    pub fn builtin() -> Result<Self> {
        Ok(serde_yaml::from_str(include_str!(
            "../devices/nrf24lu1p.yaml"
        ))?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let profile: DeviceProfile = serde_yaml::from_str(&raw)?;
        log::debug!("Loaded device profile {} from {}", profile, path.as_ref().display());
        Ok(profile)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            command: Duration::from_millis(self.command_timeout_ms),
            chunk: Duration::from_millis(self.chunk_timeout_ms),
        }
    }
}

/// Response deadlines of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Generic command turnaround.
    pub command: Duration,
    /// Acknowledgement of one page-write chunk, covers erase and program time.
    pub chunk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            command: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            chunk: Duration::from_millis(DEFAULT_CHUNK_TIMEOUT_MS),
        }
    }
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_chunk_timeout() -> u64 {
    DEFAULT_CHUNK_TIMEOUT_MS
}

/// Accepts `0x`-prefixed hex strings, decimal strings or plain integers.
fn parse_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: TryFrom<u64>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Int(n) => n,
        Raw::Str(s) => {
            let s = s.trim();
            let parsed = if s.starts_with("0x") || s.starts_with("0X") {
                u64::from_str_radix(&s[2..], 16)
            } else {
                s.parse::<u64>()
            };
            parsed.map_err(|_| D::Error::custom(format!("error while parsing {:?}", s)))?
        }
    };
    T::try_from(value).map_err(|_| D::Error::custom(format!("{:#x} out of range", value)))
}
