use std::io;

/// Byte-range access to an executable image. Pages that have never been
/// resident are demand-loaded through this.
pub trait PageLoader {
    /// Total size of the image in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `target.len()` bytes starting at `file_offset`, returning
    /// how many were read. Short reads only happen at the end of the image.
    fn read_at(&mut self, target: &mut [u8], file_offset: usize) -> io::Result<usize>;
}

/// An image held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    bytes: Vec<u8>,
}

impl MemoryImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        MemoryImage { bytes }
    }
}

impl From<Vec<u8>> for MemoryImage {
    fn from(bytes: Vec<u8>) -> Self {
        MemoryImage::new(bytes)
    }
}

impl PageLoader for MemoryImage {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_at(&mut self, target: &mut [u8], file_offset: usize) -> io::Result<usize> {
        let available = self.bytes.get(file_offset..).unwrap_or(&[]);
        let count = available.len().min(target.len());

        target[..count].copy_from_slice(&available[..count]);

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_read_at_end() {
        let mut image = MemoryImage::new((0..10).collect());
        let mut buf = [0xFF; 4];

        assert_eq!(image.read_at(&mut buf, 8).unwrap(), 2);
        assert_eq!(buf, [8, 9, 0xFF, 0xFF]);
    }

    #[test]
    fn read_past_end_is_empty() {
        let mut image = MemoryImage::new(vec![1, 2, 3]);
        let mut buf = [0; 4];

        assert_eq!(image.read_at(&mut buf, 3).unwrap(), 0);
        assert_eq!(image.read_at(&mut buf, 100).unwrap(), 0);
    }
}
