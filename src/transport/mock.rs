//! Simulated dongle bootloader for tests.
use std::{collections::VecDeque, time::Duration};

use super::{Transport, TransportError};
use crate::constants::{
    commands, BLOCK_SIZE, FLASH_SIZE, HALF_SIZE, MAX_PACKET_SIZE, PAGE_SIZE, PROTECTION_PAGE_ADDR,
    PROTECTION_RANGE, SENTINEL, WRITE_CHUNK_SIZE,
};

/// In-memory bootloader: 32KiB of flash, the selected half and a pending
/// page write. Every frame sent is recorded.
pub(crate) struct MockDevice {
    pub flash: Vec<u8>,
    pub sent: Vec<Vec<u8>>,
    /// Receive deadlines the host asked for, in order.
    pub timeouts: Vec<Duration>,
    half: u8,
    pending_write: Option<(u8, Vec<u8>)>,
    responses: VecDeque<Vec<u8>>,
    /// Page 63 writes leave the protection bytes untouched.
    pub sticky_protection: bool,
    /// Stop answering after this many responses.
    pub answer_limit: Option<usize>,
    pub fail_send: bool,
    pub fail_recv: bool,
    pub short_responses: bool,
    answered: usize,
}

impl MockDevice {
    pub fn new() -> Self {
        MockDevice {
            flash: vec![SENTINEL; FLASH_SIZE as usize],
            sent: vec![],
            timeouts: vec![],
            half: 0,
            pending_write: None,
            responses: VecDeque::new(),
            sticky_protection: false,
            answer_limit: None,
            fail_send: false,
            fail_recv: false,
            short_responses: false,
            answered: 0,
        }
    }

    pub fn with_flash(address: usize, bytes: &[u8]) -> Self {
        let mut dev = Self::new();
        dev.flash[address..address + bytes.len()].copy_from_slice(bytes);
        dev
    }

    /// Command frames only, without page-write chunks.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.sent.iter().filter(|f| f.len() <= 2).cloned().collect()
    }

    pub fn count(&self, opcode: u8) -> usize {
        self.commands().iter().filter(|f| f[0] == opcode).count()
    }

    /// Pages written through WRITE_INIT, in order.
    pub fn written_pages(&self) -> Vec<u8> {
        self.commands()
            .iter()
            .filter(|f| f[0] == commands::WRITE_INIT)
            .map(|f| f[1])
            .collect()
    }

    fn answer(&mut self, payload: &[u8]) {
        let mut packet = vec![0u8; MAX_PACKET_SIZE];
        packet[..payload.len()].copy_from_slice(payload);
        if self.short_responses {
            packet.truncate(8);
        }
        self.responses.push_back(packet);
    }

    fn program_page(&mut self, page: u8, data: &[u8]) {
        let start = page as usize * PAGE_SIZE;
        let mut data = data.to_vec();
        if self.sticky_protection && start == PROTECTION_PAGE_ADDR as usize {
            for i in PROTECTION_RANGE {
                data[i] = self.flash[start + i];
            }
        }
        self.flash[start..start + PAGE_SIZE].copy_from_slice(&data);
    }

    fn handle_command(&mut self, raw: &[u8]) {
        match raw[0] {
            commands::VERSION => self.answer(b"nRF24LU1P-BL 1.0"),
            commands::READ_FLASH => {
                let start = self.half as usize * HALF_SIZE as usize + raw[1] as usize * BLOCK_SIZE;
                let block = self.flash[start..start + BLOCK_SIZE].to_vec();
                self.answer(&block);
            }
            commands::SELECT_FLASH => {
                self.half = raw[1];
                self.answer(&[]);
            }
            commands::ERASE_PAGE => {
                let start = raw[1] as usize * PAGE_SIZE;
                self.flash[start..start + PAGE_SIZE].fill(SENTINEL);
                self.answer(&[]);
            }
            commands::WRITE_INIT => self.pending_write = Some((raw[1], vec![])),
            commands::STP_ON => {
                self.flash[PROTECTION_PAGE_ADDR as usize + PROTECTION_RANGE.start] = 0x00;
                self.answer(&[]);
            }
            commands::RESET => {}
            _ => self.answer(&[]),
        }
    }
}

impl Transport for MockDevice {
    fn send_raw(&mut self, raw: &[u8]) -> Result<(), TransportError> {
        if self.fail_send {
            return Err(TransportError::Usb(rusb::Error::NoDevice));
        }
        self.sent.push(raw.to_vec());
        if raw.len() == WRITE_CHUNK_SIZE {
            if let Some((page, mut data)) = self.pending_write.take() {
                data.extend_from_slice(raw);
                self.answer(&[]);
                if data.len() == PAGE_SIZE {
                    self.program_page(page, &data);
                } else {
                    self.pending_write = Some((page, data));
                }
                return Ok(());
            }
        }
        self.handle_command(raw);
        Ok(())
    }

    fn recv_raw(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.timeouts.push(timeout);
        if self.fail_recv {
            return Err(TransportError::Usb(rusb::Error::Pipe));
        }
        if self.answer_limit.is_some_and(|limit| self.answered >= limit) {
            return Err(TransportError::Timeout);
        }
        let mut packet = self.responses.pop_front().ok_or(TransportError::Timeout)?;
        packet.truncate(max_len);
        self.answered += 1;
        Ok(packet)
    }
}
