//! Sparse memory image, the in-memory form of a flash dump or firmware file
use std::collections::BTreeMap;

/// Address to byte mapping. Absent addresses are gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseImage {
    data: BTreeMap<u32, u8>,
}

impl SparseImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image holding `bytes` contiguously from `start`.
    pub fn from_dense(start: u32, bytes: &[u8]) -> Self {
        let mut image = Self::new();
        image.put(start, bytes);
        image
    }

    /// Store a contiguous run of bytes starting at `address`. Bytes past
    /// the end of the 32-bit address space are dropped.
    pub fn put(&mut self, address: u32, bytes: &[u8]) {
        let room = (u32::MAX - address) as u64 + 1;
        if bytes.len() as u64 > room {
            log::warn!(
                "{} bytes at {:#010x} run past the 32-bit address space",
                bytes.len() as u64 - room,
                address
            );
        }
        for (i, &b) in bytes.iter().take(room.min(bytes.len() as u64) as usize).enumerate() {
            self.data.insert(address + i as u32, b);
        }
    }

    pub fn get(&self, address: u32) -> Option<u8> {
        self.data.get(&address).copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn min_address(&self) -> Option<u32> {
        self.data.keys().next().copied()
    }

    /// Address of the last present byte.
    pub fn max_address(&self) -> Option<u32> {
        self.data.keys().next_back().copied()
    }

    /// One past the last present byte, 0 for an empty image.
    pub fn end_address(&self) -> u64 {
        self.max_address().map_or(0, |a| a as u64 + 1)
    }

    /// Render `[start, end)` as contiguous bytes, gaps filled with `pad`.
    pub fn to_dense(&self, start: u32, end: u32, pad: u8) -> Vec<u8> {
        if end <= start {
            return vec![];
        }
        let mut out = vec![pad; (end - start) as usize];
        for (&addr, &b) in self.data.range(start..end) {
            out[(addr - start) as usize] = b;
        }
        out
    }

    /// Contiguous runs of present bytes, in address order.
    pub fn segments(&self) -> Vec<(u32, Vec<u8>)> {
        let mut segments: Vec<(u32, Vec<u8>)> = vec![];
        for (&addr, &b) in &self.data {
            match segments.last_mut() {
                Some((start, bytes)) if *start as u64 + bytes.len() as u64 == addr as u64 => {
                    bytes.push(b)
                }
                _ => segments.push((addr, vec![b])),
            }
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_image() {
        let image = SparseImage::new();
        assert!(image.is_empty());
        assert_eq!(image.max_address(), None);
        assert_eq!(image.end_address(), 0);
        assert_eq!(image.to_dense(0, 4, 0xff), vec![0xff; 4]);
        assert!(image.segments().is_empty());
    }

    #[test]
    fn test_put_and_gap_fill() {
        let mut image = SparseImage::new();
        image.put(0x10, &[1, 2, 3]);
        image.put(0x20, &[4]);
        assert_eq!(image.len(), 4);
        assert_eq!(image.min_address(), Some(0x10));
        assert_eq!(image.max_address(), Some(0x20));
        assert_eq!(image.end_address(), 0x21);
        assert_eq!(image.get(0x11), Some(2));
        assert_eq!(image.get(0x13), None);

        let dense = image.to_dense(0x0e, 0x22, 0xff);
        assert_eq!(dense.len(), 0x14);
        assert_eq!(&dense[..5], &[0xff, 0xff, 1, 2, 3]);
        assert_eq!(dense[0x12], 4);
        assert_eq!(dense[0x13], 0xff);
    }

    #[test]
    fn test_to_dense_window() {
        let image = SparseImage::from_dense(0, &[0xaa; 0x40]);
        assert_eq!(image.to_dense(0x30, 0x50, 0x00)[..0x10], [0xaa; 0x10]);
        assert_eq!(image.to_dense(0x30, 0x50, 0x00)[0x10..], [0x00; 0x10]);
        assert!(image.to_dense(0x50, 0x30, 0xff).is_empty());
    }

    #[test]
    fn test_segments_merge_adjacent_runs() {
        let mut image = SparseImage::new();
        image.put(0x00, &[1; 16]);
        image.put(0x10, &[2; 16]);
        image.put(0x40, &[3; 16]);
        let segments = image.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].0, 0x00);
        assert_eq!(segments[0].1.len(), 32);
        assert_eq!(segments[1], (0x40, vec![3; 16]));
    }

    #[test]
    fn test_top_of_address_space() {
        let mut image = SparseImage::new();
        image.put(0xffff_fffe, &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(image.len(), 2);
        assert_eq!(image.max_address(), Some(0xffff_ffff));
        assert_eq!(image.end_address(), 0x1_0000_0000);
        assert_eq!(image.segments(), vec![(0xffff_fffe, vec![0x01, 0x02])]);
    }
}
