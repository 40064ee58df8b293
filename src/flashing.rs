//! Chip flashing logic.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    constants::{
        BLOCKS_PER_HALF, FLASH_SIZE, NUM_HALVES, NUM_PAGES, PAGE_SIZE, PROTECTION_PAGE,
        PROTECTION_PAGE_ADDR, PROTECTION_PAGE_FIRST_BLOCK, PROTECTION_RANGE, READ_CHUNK_SIZE,
        SENTINEL, MAX_PACKET_SIZE,
    },
    device::{DeviceProfile, Timeouts},
    error::{Error, Result, Stage},
    image::SparseImage,
    protocol::{block_chunks, is_erased, page_chunks, Command, Opcode, Response},
    transport::{TransportError, UsbTransport},
    Transport,
};

/// How much flash `read_region` scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSize {
    /// The lower 16KiB half.
    Half,
    /// Both halves, the whole 32KiB.
    Full,
    /// Only the top 512-byte page holding the protection bytes.
    ProtectionPage,
}

impl ReadSize {
    fn halves(self) -> &'static [u8] {
        match self {
            ReadSize::Half => &[0],
            ReadSize::Full => &[0, 1],
            ReadSize::ProtectionPage => &[1],
        }
    }

    fn first_block(self) -> u32 {
        match self {
            ReadSize::ProtectionPage => PROTECTION_PAGE_FIRST_BLOCK as u32,
            _ => 0,
        }
    }

    fn start_address(self) -> u32 {
        match self {
            ReadSize::ProtectionPage => PROTECTION_PAGE_ADDR,
            _ => 0,
        }
    }

    /// Number of READ_FLASH commands the scan issues.
    pub fn blocks(self) -> u64 {
        self.halves().len() as u64 * (BLOCKS_PER_HALF - self.first_block()) as u64
    }
}

impl TryFrom<u32> for ReadSize {
    type Error = Error;

    /// Size in KiB, as given on the command line.
    fn try_from(kib: u32) -> Result<Self> {
        match kib {
            16 => Ok(ReadSize::Half),
            32 => Ok(ReadSize::Full),
            _ => Err(Error::UnsupportedReadSize(kib)),
        }
    }
}

/// Outcome of the protection removal workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unprotect {
    AlreadyOff,
    Cleared,
    Declined,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Pages sent to the device, in write order.
    pub written_pages: Vec<u8>,
    /// Fully erased pages that were skipped.
    pub skipped_pages: usize,
}

/// One bootloader session. Owns the transport for its whole lifetime.
pub struct Flashing<T: Transport> {
    transport: T,
    timeouts: Timeouts,
    /// Diagnostics only.
    last_opcode: Option<Opcode>,
    progress: bool,
}

impl Flashing<UsbTransport> {
    pub fn new_from_usb(profile: &DeviceProfile) -> Result<Self> {
        let transport = UsbTransport::open(profile)?;
        Ok(Flashing::new(transport, profile.timeouts()))
    }
}

impl<T: Transport> Flashing<T> {
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        Flashing {
            transport,
            timeouts,
            last_opcode: None,
            progress: false,
        }
    }

    /// Draw progress bars on stderr for long reads and writes.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn last_opcode(&self) -> Option<Opcode> {
        self.last_opcode
    }

    fn progress_bar(&self, len: u64, unit: &str) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let template = format!("{{spinner}} [{{bar:40}}] {{pos}}/{{len}} {} {{msg}}", unit);
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        ProgressBar::new(len).with_style(style)
    }

    fn send(&mut self, opcode: Opcode, raw: &[u8], stage: Stage) -> Result<()> {
        log::debug!("=> {}", hex::encode(raw));
        self.transport
            .send_raw(raw)
            .map_err(|source| Error::Transport {
                opcode,
                stage,
                source,
            })
    }

    fn receive(&mut self, opcode: Opcode, timeout: Duration, stage: Stage) -> Result<Response> {
        let raw = self
            .transport
            .recv_raw(MAX_PACKET_SIZE, timeout)
            .map_err(|err| match err {
                TransportError::Timeout => Error::Timeout {
                    opcode,
                    stage,
                    timeout,
                },
                source => Error::Transport {
                    opcode,
                    stage,
                    source,
                },
            })?;
        log::debug!("<= {}", hex::encode(&raw));
        Response::from_raw(opcode, &raw)
    }

    /// Send one command and, unless it is RESET, drain its 64-byte response.
    pub fn execute(&mut self, cmd: Command) -> Result<Option<Response>> {
        self.last_opcode = Some(cmd.opcode);
        self.send(cmd.opcode, &cmd.into_raw(), Stage::Send)?;
        if !cmd.expects_response() {
            return Ok(None);
        }
        let resp = self.receive(cmd.opcode, self.timeouts.command, Stage::Response)?;
        Ok(Some(resp))
    }

    /// `execute` for commands that always answer.
    pub fn transfer(&mut self, cmd: Command) -> Result<Response> {
        if !cmd.expects_response() {
            return Err(Error::NoResponse(cmd.opcode));
        }
        self.execute(cmd)?.ok_or(Error::NoResponse(cmd.opcode))
    }

    /// Bootloader version string.
    pub fn version(&mut self) -> Result<String> {
        let resp = self.transfer(Command::version())?;
        let payload = resp.payload();
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        Ok(String::from_utf8_lossy(&payload[..end]).trim().to_string())
    }

    /// Permanently disable flash readback. Cannot be undone over USB.
    pub fn read_disable(&mut self) -> Result<()> {
        let resp = self.transfer(Command::read_disable())?;
        log::info!("Flash readback disabled: {}", hex::encode(resp.payload()));
        Ok(())
    }

    pub fn erase_page(&mut self, page: u32) -> Result<()> {
        let page = check_page(page)?;
        let resp = self.transfer(Command::erase_page(page))?;
        log::info!("Page {} erased: {}", page, hex::encode(resp.payload()));
        Ok(())
    }

    pub fn select_half(&mut self, half: u8) -> Result<()> {
        if half >= NUM_HALVES {
            return Err(Error::InvalidHalf(half));
        }
        self.transfer(Command::select_flash(half))?;
        Ok(())
    }

    /// Read one 64-byte block of the selected half.
    pub fn read_block(&mut self, block: u8) -> Result<Response> {
        self.transfer(Command::read_flash(block))
    }

    /// Enable the FSR.STP protection bit.
    pub fn stp_on(&mut self) -> Result<()> {
        self.transfer(Command::stp_on())?;
        log::info!("STP protection ON");
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.execute(Command::reset())?;
        log::info!("Device reset");
        Ok(())
    }

    /// Program one 512-byte page.
    ///
    /// WRITE_INIT itself is not answered; each of the four chunks is. A
    /// failure leaves the page in an undefined state, the caller has to
    /// rewrite the whole page.
    pub fn write_page(&mut self, page: u32, data: &[u8]) -> Result<()> {
        let page = check_page(page)?;
        let chunks = page_chunks(data)?;

        let init = Command::write_init(page);
        self.last_opcode = Some(init.opcode);
        self.send(init.opcode, &init.into_raw(), Stage::Send)?;

        for (i, chunk) in chunks.iter().enumerate() {
            self.send(Opcode::WriteInit, chunk, Stage::Chunk(i))?;
            self.receive(Opcode::WriteInit, self.timeouts.chunk, Stage::Chunk(i))?;
        }
        log::debug!("Page {} written", page);
        Ok(())
    }

    /// Read flash into a sparse image, keeping only 16-byte chunks that
    /// are not fully erased.
    pub fn read_region(&mut self, size: ReadSize) -> Result<SparseImage> {
        let mut image = SparseImage::new();
        let mut address = size.start_address();
        let pb = self.progress_bar(size.blocks(), "blocks");

        for &half in size.halves() {
            self.select_half(half)?;
            for block in size.first_block()..BLOCKS_PER_HALF {
                let resp = self.read_block(block as u8)?;
                for chunk in block_chunks(resp.payload()) {
                    if !is_erased(chunk) {
                        image.put(address, chunk);
                    }
                    address += READ_CHUNK_SIZE as u32;
                }
                pb.inc(1);
            }
        }
        pb.finish_and_clear();
        log::debug!(
            "Read {:?}: {} non-empty bytes in {} segments",
            size,
            image.len(),
            image.segments().len()
        );
        Ok(image)
    }

    /// True if the top page still carries protection bytes.
    pub fn protection_active(&mut self) -> Result<bool> {
        let page = self.read_region(ReadSize::ProtectionPage)?;
        Ok(protection_set(&page))
    }

    /// Clear the FSR.STP protection bytes, asking `confirm` first.
    ///
    /// Issues no write when protection is already off.
    pub fn unprotect(&mut self, confirm: impl FnOnce() -> bool) -> Result<Unprotect> {
        let page = self.read_region(ReadSize::ProtectionPage)?;
        if !protection_set(&page) {
            log::info!("STP protection is OFF");
            return Ok(Unprotect::AlreadyOff);
        }
        log::warn!("STP protection is ON");
        if !confirm() {
            return Ok(Unprotect::Declined);
        }

        let mut data = page.to_dense(
            PROTECTION_PAGE_ADDR,
            PROTECTION_PAGE_ADDR + PAGE_SIZE as u32,
            SENTINEL,
        );
        data[PROTECTION_RANGE].fill(SENTINEL);
        self.write_page(PROTECTION_PAGE as u32, &data)?;

        if self.protection_active()? {
            return Err(Error::ProtectionStillActive);
        }
        log::info!("STP protection OFF");
        Ok(Unprotect::Cleared)
    }

    /// Write a whole image: clear protection, program every page that is
    /// not fully erased, optionally read back, then reset the device.
    pub fn write_image(
        &mut self,
        image: &SparseImage,
        verify: bool,
        confirm: impl FnOnce() -> bool,
    ) -> Result<WriteReport> {
        if image.max_address().is_some_and(|max| max >= FLASH_SIZE) {
            return Err(Error::ImageTooLarge {
                end: image.end_address(),
                flash_size: FLASH_SIZE,
            });
        }

        if self.unprotect(confirm)? == Unprotect::Declined {
            return Err(Error::ProtectionDeclined);
        }

        log::info!("Starting to write {} bytes", image.len());
        let data = image.to_dense(0, FLASH_SIZE, SENTINEL);
        let mut report = WriteReport::default();
        let pb = self.progress_bar(NUM_PAGES as u64, "pages");
        for (page, page_data) in data.chunks(PAGE_SIZE).enumerate() {
            pb.inc(1);
            if is_erased(page_data) {
                report.skipped_pages += 1;
                continue;
            }
            self.write_page(page as u32, page_data)?;
            report.written_pages.push(page as u8);
        }
        pb.finish_and_clear();
        log::info!(
            "Wrote {} pages, skipped {} empty pages",
            report.written_pages.len(),
            report.skipped_pages
        );

        if verify {
            self.verify_image(image)?;
            log::info!("Verified!");
        }
        self.reset()?;
        Ok(report)
    }

    /// Read back the whole flash and compare it with `image`, gaps taken as
    /// erased. The protection bytes are not compared.
    pub fn verify_image(&mut self, image: &SparseImage) -> Result<()> {
        let expected = image.to_dense(0, FLASH_SIZE, SENTINEL);
        let actual = self
            .read_region(ReadSize::Full)?
            .to_dense(0, FLASH_SIZE, SENTINEL);

        let protection = (PROTECTION_PAGE_ADDR as usize + PROTECTION_RANGE.start)
            ..(PROTECTION_PAGE_ADDR as usize + PROTECTION_RANGE.end);
        let mismatch = expected
            .iter()
            .zip(&actual)
            .enumerate()
            .find(|(addr, (e, a))| e != a && !protection.contains(addr));
        match mismatch {
            Some((address, (&expected, &actual))) => Err(Error::VerifyMismatch {
                address: address as u32,
                expected,
                actual,
            }),
            None => Ok(()),
        }
    }
}

fn check_page(page: u32) -> Result<u8> {
    if page >= NUM_PAGES {
        return Err(Error::InvalidPage(page));
    }
    Ok(page as u8)
}

/// Read-back stores whole 16-byte chunks, so erased bytes next to a set
/// one are present too; only the values count.
fn protection_set(page: &SparseImage) -> bool {
    !is_erased(&page.to_dense(
        PROTECTION_PAGE_ADDR + PROTECTION_RANGE.start as u32,
        PROTECTION_PAGE_ADDR + PROTECTION_RANGE.end as u32,
        SENTINEL,
    ))
}
