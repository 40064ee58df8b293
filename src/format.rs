//! Firmware file formats
use std::path::Path;
use std::str;

use object::{
    elf::FileHeader32, elf::PT_LOAD, read::elf::FileHeader, read::elf::ProgramHeader, Endianness,
};

use crate::{
    constants::SENTINEL,
    error::{Error, Result},
    image::SparseImage,
};

/// Bytes per Intel HEX data record when writing.
const IHEX_RECORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    ELF,
    Binary,
}

pub fn read_image_from_file<P: AsRef<Path>>(path: P) -> Result<SparseImage> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::PlainHex => read_hex(str::from_utf8(&raw).map_err(format_err)?),
        FirmwareFormat::IntelHex => read_ihex(str::from_utf8(&raw).map_err(format_err)?),
        FirmwareFormat::ELF => read_elf(&raw),
        FirmwareFormat::Binary => Ok(SparseImage::from_dense(0, &raw)),
    }
}

/// Write `.hex` files as Intel HEX, anything else as a raw binary from
/// address 0 with gaps filled by the erased sentinel.
pub fn write_image_to_file<P: AsRef<Path>>(path: P, image: &SparseImage) -> Result<()> {
    let p = path.as_ref();
    let is_hex = extension(p) == "hex";
    let out = if is_hex {
        write_ihex(image)?.into_bytes()
    } else {
        let end = u32::try_from(image.end_address())
            .map_err(|_| Error::Format("image does not fit in a binary file".into()))?;
        image.to_dense(0, end, SENTINEL)
    };
    std::fs::write(p, out)?;
    log::info!(
        "Wrote {} as {}",
        p.display(),
        if is_hex { "Intel HEX" } else { "binary" }
    );
    Ok(())
}

fn format_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Format(e.to_string())
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase()
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = extension(path);
    if ["ihex", "ihe", "h86", "hex", "a43", "a90"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }
    if ext == "bin" || raw.is_empty() {
        return FirmwareFormat::Binary;
    }

    if raw.starts_with(&[0x7f, b'E', b'L', b'F']) {
        FirmwareFormat::ELF
    } else if raw[0] == b':'
        && raw
            .iter()
            .all(|&c| (c as char).is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::IntelHex
    } else if raw
        .iter()
        .all(|&c| (c as char).is_ascii_hexdigit() || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

/// Plain hex text, loaded at address 0.
pub fn read_hex(data: &str) -> Result<SparseImage> {
    let digits: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = hex::decode(digits).map_err(format_err)?;
    Ok(SparseImage::from_dense(0, &bytes))
}

pub fn read_ihex(data: &str) -> Result<SparseImage> {
    use ihex::Record;

    let mut base_address = 0;
    let mut image = SparseImage::new();
    for record in ihex::Reader::new(data) {
        let record = record.map_err(format_err)?;
        use Record::*;
        match record {
            Data { offset, value } => {
                image.put(base_address + offset as u32, &value);
            }
            EndOfFile => (),
            ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            StartSegmentAddress { .. } => (),
            ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            StartLinearAddress(_) => (),
        };
    }
    Ok(image)
}

pub fn write_ihex(image: &SparseImage) -> Result<String> {
    use ihex::Record;

    let mut records = vec![];
    let mut upper = 0u16;
    for (start, bytes) in image.segments() {
        for (i, chunk) in bytes.chunks(IHEX_RECORD_LEN).enumerate() {
            let address = start + (i * IHEX_RECORD_LEN) as u32;
            // A record may not cross a 64KiB boundary.
            let split = (0x1_0000 - (address & 0xffff) as usize).min(chunk.len());
            let (head, tail) = chunk.split_at(split);
            // `tail` is empty whenever the wrapped address would be used.
            for (addr, part) in [(address, head), (address.wrapping_add(split as u32), tail)] {
                if part.is_empty() {
                    continue;
                }
                if (addr >> 16) as u16 != upper {
                    upper = (addr >> 16) as u16;
                    records.push(Record::ExtendedLinearAddress(upper));
                }
                records.push(Record::Data {
                    offset: addr as u16,
                    value: part.to_vec(),
                });
            }
        }
    }
    records.push(Record::EndOfFile);
    ihex::create_object_file_representation(&records).map_err(format_err)
}

/// Loadable ELF32 segments, placed at their physical addresses.
pub fn read_elf(elf_data: &[u8]) -> Result<SparseImage> {
    let file_kind = object::FileKind::parse(elf_data).map_err(format_err)?;

    match file_kind {
        object::FileKind::Elf32 => (),
        _ => return Err(Error::Format("cannot read file as ELF32 format".into())),
    }
    let elf_header = FileHeader32::<Endianness>::parse(elf_data).map_err(format_err)?;
    let endian = elf_header.endian().map_err(format_err)?;

    let mut image = SparseImage::new();
    for segment in elf_header
        .program_headers(endian, elf_data)
        .map_err(format_err)?
    {
        let p_paddr: u64 = segment.p_paddr(endian).into();
        let segment_data = segment
            .data(endian, elf_data)
            .map_err(|_| Error::Format("Failed to access data for an ELF segment.".into()))?;
        if !segment_data.is_empty() && segment.p_type(endian) == PT_LOAD {
            log::info!(
                "Found loadable segment, physical address: {:#010x}, size: {:#x}",
                p_paddr,
                segment_data.len()
            );
            image.put(p_paddr as u32, segment_data);
        }
    }

    if image.is_empty() {
        return Err(Error::Format("empty ELF file".into()));
    }
    Ok(image)
}

/// Hex dump of every contiguous segment, for printing read results.
pub fn dump(image: &SparseImage) -> Result<String> {
    let mut out = Vec::new();
    for (start, bytes) in image.segments() {
        out.extend_from_slice(format!("{:04x}..{:04x}:\n", start, start as usize + bytes.len()).as_bytes());
        hxdmp::hexdump(&bytes, &mut out)?;
        out.push(b'\n');
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}
