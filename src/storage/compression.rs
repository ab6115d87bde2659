// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Compression transform.
//!
//! Every output carries a one-byte frame tag so reads never depend on the
//! current configuration:
//!
//! - `0x00` stored as-is
//! - `0x01` LZ4 block, uncompressed size prepended
//!
//! Level 0 always stores. Levels 1-9 use LZ4 and keep the compressed frame
//! only when it saves at least `10 - level` percent of the input, so higher
//! levels accept smaller gains in exchange for decompression on every read.

use super::{StorageError, StorageResult};

const FRAME_STORED: u8 = 0x00;
const FRAME_LZ4: u8 = 0x01;

/// Highest accepted compression level.
pub const MAX_LEVEL: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionProvider {
    level: u32,
}

impl CompressionProvider {
    /// `level` is clamped to `0..=9`; `enabled == false` behaves as level 0.
    pub fn new(enabled: bool, level: u32) -> Self {
        Self {
            level: if enabled { level.min(MAX_LEVEL) } else { 0 },
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Whether an LZ4 output of `packed` bytes is worth keeping for `original` bytes.
    fn worth_keeping(&self, packed: usize, original: usize) -> bool {
        let kept_percent = 90 + self.level as usize;
        packed < original && packed * 100 <= original * kept_percent
    }

    pub fn compress(&self, data: &[u8]) -> Vec<u8> {
        if self.level > 0 {
            let packed = lz4_flex::compress_prepend_size(data);
            if self.worth_keeping(packed.len(), data.len()) {
                let mut out = Vec::with_capacity(packed.len() + 1);
                out.push(FRAME_LZ4);
                out.extend_from_slice(&packed);
                return out;
            }
        }
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(FRAME_STORED);
        out.extend_from_slice(data);
        out
    }

    pub fn decompress(&self, framed: &[u8]) -> StorageResult<Vec<u8>> {
        match framed.split_first() {
            Some((&FRAME_STORED, body)) => Ok(body.to_vec()),
            Some((&FRAME_LZ4, body)) => lz4_flex::decompress_size_prepended(body)
                .map_err(|e| StorageError::Compression(e.to_string())),
            Some((tag, _)) => Err(StorageError::Compression(format!(
                "unknown frame tag {tag:#04x}"
            ))),
            None => Err(StorageError::Compression("empty frame".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::RngCore;

    #[test]
    fn repetitive_data_shrinks() {
        let provider = CompressionProvider::new(true, 6);
        let data = b"oracle-price-feed ".repeat(1000);
        let framed = provider.compress(&data);
        assert_eq!(framed[0], FRAME_LZ4);
        assert!(framed.len() < data.len() / 4);
        assert_eq!(provider.decompress(&framed).unwrap(), data);
    }

    #[test]
    fn incompressible_and_empty_inputs_are_stored() {
        let provider = CompressionProvider::new(true, 9);
        for data in [Vec::new(), vec![0x5a]] {
            let framed = provider.compress(&data);
            assert_eq!(framed[0], FRAME_STORED);
            assert_eq!(provider.decompress(&framed).unwrap(), data);
        }
    }

    #[test]
    fn disabled_provider_still_reads_compressed_frames() {
        let on = CompressionProvider::new(true, 3);
        let off = CompressionProvider::new(false, 3);
        assert_eq!(off.level(), 0);

        let data = vec![b'a'; 4096];
        let framed = on.compress(&data);
        assert_eq!(off.decompress(&framed).unwrap(), data);
        assert_eq!(off.compress(&data)[0], FRAME_STORED);
    }

    #[test]
    fn random_megabyte_round_trips_at_every_level() {
        let mut data = vec![0u8; 1024 * 1024];
        OsRng.fill_bytes(&mut data);
        for level in 0..=MAX_LEVEL {
            let provider = CompressionProvider::new(true, level);
            let framed = provider.compress(&data);
            assert_eq!(framed[0], FRAME_STORED);
            assert_eq!(framed.len(), data.len() + 1);
            assert_eq!(provider.decompress(&framed).unwrap(), data);
        }
    }

    #[test]
    fn higher_levels_accept_smaller_savings() {
        // Mostly random payload with a short zero run: LZ4 saves a few percent.
        let mut data = vec![0u8; 4000];
        OsRng.fill_bytes(&mut data);
        data.extend_from_slice(&[0u8; 200]);

        let low = CompressionProvider::new(true, 1).compress(&data);
        let high = CompressionProvider::new(true, 9).compress(&data);
        assert_eq!(low[0], FRAME_STORED);
        assert_eq!(high[0], FRAME_LZ4);
        assert!(high.len() < low.len());
        assert_eq!(CompressionProvider::new(true, 1).decompress(&high).unwrap(), data);
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(CompressionProvider::new(true, 42).level(), MAX_LEVEL);
    }

    #[test]
    fn corrupt_frames_are_rejected() {
        let provider = CompressionProvider::new(true, 6);
        assert!(provider.decompress(&[]).is_err());
        assert!(provider.decompress(&[0x07, 1, 2]).is_err());
        assert!(provider.decompress(&[FRAME_LZ4, 0x10, 0, 0, 0, 0xff]).is_err());
    }
}
