//! Executable image header and placement rules for the loader.

use thiserror::Error;

/// Magic value opening every valid executable image.
pub const IMAGE_MAGIC: u32 = 0xC0DE_F00D;

/// Size of the image header in bytes: four little-endian `u32` fields.
pub const HEADER_BYTES: usize = 16;

/// Size of the RAM-filesystem window at the top of physical memory. The
/// initial stack pointer sits just below it.
pub const FS_BYTES: u32 = 4 * 1024 * 1024;

/// Parsed executable image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ImageHeader {
    pub magic: u32,
    /// Uninitialized-data size. Informational; the loader zero-fills by
    /// construction.
    pub bss: u32,
    /// Entry point, a guest virtual address.
    pub entry: u32,
    pub flags: u32,
}

impl ImageHeader {
    /// Parses and validates a header from the front of an image.
    ///
    /// # Errors
    ///
    /// [`ImageError::ShortHeader`] when fewer than [`HEADER_BYTES`] bytes
    /// are available, [`ImageError::BadMagic`] on a magic mismatch.
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < HEADER_BYTES {
            return Err(ImageError::ShortHeader { len: bytes.len() });
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let header = Self {
            magic: word(0),
            bss: word(4),
            entry: word(8),
            flags: word(12),
        };
        if header.magic != IMAGE_MAGIC {
            return Err(ImageError::BadMagic {
                found: header.magic,
            });
        }
        Ok(header)
    }
}

/// Loader failures, surfaced by the driver before emulation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image header truncated: {len} bytes, need {HEADER_BYTES}")]
    ShortHeader { len: usize },
    #[error("bad image magic {found:#010x}, expected {IMAGE_MAGIC:#010x}")]
    BadMagic { found: u32 },
    #[error("image payload of {payload} bytes does not fit in {mem} bytes of memory")]
    TooLarge { payload: usize, mem: u32 },
    #[error("filesystem blob of {blob} bytes exceeds the {FS_BYTES} byte window")]
    FsTooLarge { blob: usize },
}
