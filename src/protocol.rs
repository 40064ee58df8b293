//! The underlying binary protocol of the dongle bootloader

use std::fmt;

use crate::{
    constants::{commands, MAX_PACKET_SIZE, PAGE_SIZE, READ_CHUNK_SIZE, SENTINEL, WRITE_CHUNK_SIZE},
    error::{Error, Result},
};

/// Bootloader opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Opcode {
    /// Query the bootloader version string.
    Version,
    /// Permanently disable flash readback.
    ReadDisable,
    /// Read one 64-byte block of the selected half.
    ReadFlash,
    /// Erase one 512-byte page.
    ErasePage,
    /// Select the 16KiB half that `ReadFlash` targets.
    SelectFlash,
    /// Reset the MCU. The device never answers.
    Reset,
    /// Start a page write, followed by four 64-byte chunks.
    WriteInit,
    /// Enable the FSR.STP protection bit.
    StpOn,
}

impl Opcode {
    pub const fn code(self) -> u8 {
        match self {
            Opcode::Version => commands::VERSION,
            Opcode::ReadDisable => commands::READ_DISABLE,
            Opcode::ReadFlash => commands::READ_FLASH,
            Opcode::ErasePage => commands::ERASE_PAGE,
            Opcode::SelectFlash => commands::SELECT_FLASH,
            Opcode::Reset => commands::RESET,
            Opcode::WriteInit => commands::WRITE_INIT,
            Opcode::StpOn => commands::STP_ON,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        [
            Opcode::Version,
            Opcode::ReadDisable,
            Opcode::ReadFlash,
            Opcode::ErasePage,
            Opcode::SelectFlash,
            Opcode::Reset,
            Opcode::WriteInit,
            Opcode::StpOn,
        ]
        .into_iter()
        .find(|op| op.code() == code)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Version => "VERSION",
            Opcode::ReadDisable => "READ_DISABLE",
            Opcode::ReadFlash => "READ_FLASH",
            Opcode::ErasePage => "ERASE_PAGE",
            Opcode::SelectFlash => "SELECT_FLASH",
            Opcode::Reset => "RESET",
            Opcode::WriteInit => "WRITE_INIT",
            Opcode::StpOn => "STP_ON",
        };
        f.write_str(name)
    }
}

/// A bootloader command: an opcode with at most one argument byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub opcode: Opcode,
    pub arg: Option<u8>,
}

impl Command {
    const fn new(opcode: Opcode, arg: Option<u8>) -> Self {
        Command { opcode, arg }
    }

    pub const fn version() -> Self {
        Self::new(Opcode::Version, None)
    }

    pub const fn read_disable() -> Self {
        Self::new(Opcode::ReadDisable, None)
    }

    pub const fn read_flash(block: u8) -> Self {
        Self::new(Opcode::ReadFlash, Some(block))
    }

    pub const fn erase_page(page: u8) -> Self {
        Self::new(Opcode::ErasePage, Some(page))
    }

    pub const fn select_flash(half: u8) -> Self {
        Self::new(Opcode::SelectFlash, Some(half))
    }

    pub const fn reset() -> Self {
        Self::new(Opcode::Reset, None)
    }

    pub const fn write_init(page: u8) -> Self {
        Self::new(Opcode::WriteInit, Some(page))
    }

    pub const fn stp_on() -> Self {
        Self::new(Opcode::StpOn, None)
    }

    /// RESET is the only command the device does not answer.
    pub const fn expects_response(&self) -> bool {
        !matches!(self.opcode, Opcode::Reset)
    }

    pub fn into_raw(self) -> Vec<u8> {
        match self.arg {
            Some(arg) => vec![self.opcode.code(), arg],
            None => vec![self.opcode.code()],
        }
    }
}

/// Response to a Command, always one full 64-byte packet.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Response([u8; MAX_PACKET_SIZE]);

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response[{}]", hex::encode(self.0))
    }
}

impl Response {
    pub fn payload(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn from_raw(opcode: Opcode, raw: &[u8]) -> Result<Self> {
        let packet: [u8; MAX_PACKET_SIZE] = raw
            .try_into()
            .map_err(|_| Error::ShortResponse {
                opcode,
                len: raw.len(),
            })?;
        Ok(Response(packet))
    }
}

/// Split page data into the four 64-byte transfers of a page write,
/// padding everything past the data with the erased sentinel.
pub fn page_chunks(data: &[u8]) -> Result<[[u8; WRITE_CHUNK_SIZE]; PAGE_SIZE / WRITE_CHUNK_SIZE]> {
    if data.len() > PAGE_SIZE {
        return Err(Error::PageTooLarge(data.len()));
    }
    let mut chunks = [[SENTINEL; WRITE_CHUNK_SIZE]; PAGE_SIZE / WRITE_CHUNK_SIZE];
    for (chunk, src) in chunks.iter_mut().zip(data.chunks(WRITE_CHUNK_SIZE)) {
        chunk[..src.len()].copy_from_slice(src);
    }
    Ok(chunks)
}

/// The 16-byte content-check chunks of a read block.
pub fn block_chunks(block: &[u8]) -> std::slice::Chunks<'_, u8> {
    block.chunks(READ_CHUNK_SIZE)
}

/// True if every byte is erased flash.
pub fn is_erased(data: &[u8]) -> bool {
    data.iter().all(|&b| b == SENTINEL)
}
