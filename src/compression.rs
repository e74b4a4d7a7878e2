use crate::error::StorageError;
use std::io::{Read, Write};

/// Compression applied to each chunk independently
pub trait Compression: Send + Sync + 'static {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// No-op compression (passthrough)
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl Compression for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(data.to_vec())
    }
}

/// zlib-wrapped deflate using flate2
#[derive(Debug, Clone)]
pub struct DeflateCompression {
    level: u32,
}

impl DeflateCompression {
    pub fn new() -> Self {
        Self { level: 6 } // Default compression level
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    /// Level 1, used for chunk data
    pub fn fastest() -> Self {
        Self::with_level(1)
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for DeflateCompression {
    fn default() -> Self {
        Self::new()
    }
}

impl Compression for DeflateCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut encoder = flate2::write::ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2),
            flate2::Compression::new(self.level),
        );
        encoder
            .write_all(data)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| StorageError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut decoder = flate2::read::ZlibDecoder::new(data);
        let mut result = Vec::new();
        decoder
            .read_to_end(&mut result)
            .map_err(|e| StorageError::Decompression(e.to_string()))?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_round_trip() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 17) as u8).collect();
        let compression = DeflateCompression::fastest();
        let compressed = compression.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(compression.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn deflate_is_deterministic() {
        let data = vec![7u8; 1000];
        let compression = DeflateCompression::fastest();
        assert_eq!(
            compression.compress(&data).unwrap(),
            compression.compress(&data).unwrap()
        );
    }

    #[test]
    fn corrupt_stream_is_an_error() {
        let compression = DeflateCompression::fastest();
        assert!(compression.decompress(b"definitely not zlib").is_err());
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(DeflateCompression::with_level(42).level(), 9);
    }
}
