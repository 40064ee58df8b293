/// Every bootloader response is one full bulk-in packet.
pub const MAX_PACKET_SIZE: usize = 64;

/// Erased flash reads back as this byte.
pub const SENTINEL: u8 = 0xff;

pub const FLASH_SIZE: u32 = 0x8000;
pub const PAGE_SIZE: usize = 0x200;
pub const NUM_PAGES: u32 = FLASH_SIZE / PAGE_SIZE as u32;

pub const HALF_SIZE: u32 = 0x4000;
pub const NUM_HALVES: u8 = 2;
pub const BLOCK_SIZE: usize = 0x40;
pub const BLOCKS_PER_HALF: u32 = 0x100;

/// A page is written as four bulk-out transfers.
pub const WRITE_CHUNK_SIZE: usize = 0x40;
/// Read blocks are checked for content at this granularity.
pub const READ_CHUNK_SIZE: usize = 0x10;

/// The top page holds the FSR.STP protection bytes.
pub const PROTECTION_PAGE: u8 = 63;
pub const PROTECTION_PAGE_ADDR: u32 = 0x7e00;
pub const PROTECTION_PAGE_FIRST_BLOCK: u8 = 0xf8;
/// Protection byte range, relative to the start of the protection page.
pub const PROTECTION_RANGE: std::ops::Range<usize> = 0x1f0..0x1ff;

pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_CHUNK_TIMEOUT_MS: u64 = 10000;

/// Opcodes understood by the dongle's USB bootloader.
pub mod commands {
    pub const VERSION: u8 = 0x01;
    pub const WRITE_INIT: u8 = 0x02;
    pub const ERASE_PAGE: u8 = 0x04;
    pub const READ_FLASH: u8 = 0x06;
    pub const READ_DISABLE: u8 = 0x07;
    pub const SELECT_FLASH: u8 = 0x08;
    pub const STP_ON: u8 = 0x09;
    pub const RESET: u8 = 0x0a;
}
