//! Section compression for column containers.
//!
//! LZ4 block compression with a length-prepended frame, applied per
//! section so a reader can skip or stream sections independently.

use serde::{Deserialize, Serialize};

use crate::error::{ArmorError, Result};

/// Compression codec applied to each container section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lz4,
}

impl Compression {
    /// Wire code stored in the container header.
    pub fn code(&self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Compression::None),
            1 => Some(Compression::Lz4),
            _ => None,
        }
    }

    /// Compress a section payload. Identity for `None`.
    pub fn compress(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Compression::None => data.to_vec(),
            Compression::Lz4 => lz4_flex::compress_prepend_size(data),
        }
    }

    /// Decompress a section payload previously produced by `compress`.
    /// `uncompressed_len` is the framed length recorded next to the
    /// section; the decompressed output must match it exactly.
    pub fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        let out = match self {
            Compression::None => data.to_vec(),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| ArmorError::InvalidFormat(format!("lz4 decompress: {e}")))?,
        };
        if out.len() != uncompressed_len {
            return Err(ArmorError::InvalidFormat(format!(
                "section decompressed to {} bytes, expected {uncompressed_len}",
                out.len()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_roundtrip() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|v| (v % 251).to_le_bytes()).collect();
        let compressed = Compression::Lz4.compress(&data);
        assert!(compressed.len() < data.len());
        let restored = Compression::Lz4.decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"abc".to_vec();
        assert_eq!(Compression::None.compress(&data), data);
        assert_eq!(Compression::None.decompress(&data, 3).unwrap(), data);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let data = b"abcdef".to_vec();
        let compressed = Compression::Lz4.compress(&data);
        assert!(Compression::Lz4.decompress(&compressed, 5).is_err());
    }

    #[test]
    fn test_codes_roundtrip() {
        assert_eq!(Compression::from_code(Compression::None.code()), Some(Compression::None));
        assert_eq!(Compression::from_code(Compression::Lz4.code()), Some(Compression::Lz4));
        assert_eq!(Compression::from_code(9), None);
    }

    #[test]
    fn test_empty_section_roundtrip() {
        let compressed = Compression::Lz4.compress(&[]);
        let restored = Compression::Lz4.decompress(&compressed, 0).unwrap();
        assert!(restored.is_empty());
    }
}
