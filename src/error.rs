//! Error types for nrfisp.

use std::{fmt, io, time::Duration};

use thiserror::Error;

use crate::{protocol::Opcode, transport::TransportError};

/// Result type for nrfisp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Where in a command exchange a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Sending the command frame.
    Send,
    /// Waiting for the 64-byte response.
    Response,
    /// Sending or acknowledging one 64-byte chunk of a page write.
    Chunk(usize),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Send => write!(f, "send"),
            Stage::Response => write!(f, "response"),
            Stage::Chunk(n) => write!(f, "page chunk #{}", n),
        }
    }
}

/// Error type for nrfisp operations.
#[derive(Debug, Error)]
pub enum Error {
    /// USB I/O failure. Usually the bootloader driver is missing or wrong.
    #[error("USB transport error on {opcode} ({stage}): {source}; is the bootloader USB driver installed?")]
    Transport {
        opcode: Opcode,
        stage: Stage,
        #[source]
        source: TransportError,
    },

    /// The device did not answer in time.
    #[error("Timeout waiting for {opcode} ({stage}) after {}ms", .timeout.as_millis())]
    Timeout {
        opcode: Opcode,
        stage: Stage,
        timeout: Duration,
    },

    /// The device answered with less than a full packet.
    #[error("Short response to {opcode}: got {len} bytes, expected 64")]
    ShortResponse { opcode: Opcode, len: usize },

    /// No bootloader with the configured ids is attached.
    #[error("Device {vendor_id:04x}:{product_id:04x} not found, is the dongle in bootloader mode?")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// The device was found but could not be opened or claimed.
    #[error("Cannot open USB device: {0}; is the bootloader USB driver installed?")]
    Open(#[source] TransportError),

    #[error("Image too large: ends at {end:#06x}, flash size is {flash_size:#06x}")]
    ImageTooLarge { end: u64, flash_size: u32 },

    #[error("Unsupported read size {0}KiB, only 16 or 32")]
    UnsupportedReadSize(u32),

    #[error("Invalid page index {0}, must be below 64")]
    InvalidPage(u32),

    #[error("Invalid flash half {0}, must be 0 or 1")]
    InvalidHalf(u8),

    #[error("Page data of {0} bytes exceeds the 512-byte page size")]
    PageTooLarge(usize),

    /// `transfer` was given a command the device never answers.
    #[error("{0} has no response")]
    NoResponse(Opcode),

    #[error("STP protection is still ON after clearing")]
    ProtectionStillActive,

    #[error("STP protection is ON and removal was declined")]
    ProtectionDeclined,

    #[error("Verify failed at {address:#06x}: expected {expected:#04x}, read {actual:#04x}")]
    VerifyMismatch {
        address: u32,
        expected: u8,
        actual: u8,
    },

    /// Firmware file could not be parsed or written.
    #[error("Firmware format error: {0}")]
    Format(String),

    /// Device profile could not be parsed.
    #[error("Device profile error: {0}")]
    Profile(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
