// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Result reported back to the driver when a map task finishes: where the
//! output lives and, per reduce partition, an estimate of its size so that
//! reducers can plan their fetches.
//!
//! Sizes are stored log-scale in a single byte per partition, which bounds
//! the driver-side footprint for wide shuffles. Estimates are biased high so
//! reducers over-provision rather than under-provision. Shuffles with at
//! least [`MIN_PARTITIONS_FOR_HIGHLY_COMPRESSED`] partitions switch to a
//! representation that only keeps exact sizes for huge blocks and one
//! average for the rest.

use std::collections::HashMap;

use bincode::{Decode, Encode};

use super::{BlockManagerId, IndexBitmap};

/// Partition counts at or above this use [`HighlyCompressedMapStatus`].
pub const MIN_PARTITIONS_FOR_HIGHLY_COMPRESSED: usize = 2000;

const LOG_BASE: f64 = 1.1;

/// Compresses a block size to a log-scale byte. Zero stays zero so empty
/// blocks are always reported exactly.
pub fn compress_size(size: u64) -> u8 {
    if size == 0 {
        0
    } else if size <= 1 {
        1
    } else {
        let compressed = (size as f64).ln() / LOG_BASE.ln();
        compressed.ceil().min(255.0) as u8
    }
}

/// Inverse of [`compress_size`]; the result is an upper-bound estimate of
/// the original size.
pub fn decompress_size(compressed: u8) -> u64 {
    if compressed == 0 {
        0
    } else {
        LOG_BASE.powi(compressed as i32) as u64
    }
}

/// Output status of one finished map task.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum MapStatus {
    Compressed(CompressedMapStatus),
    HighlyCompressed(HighlyCompressedMapStatus),
}

impl MapStatus {
    /// Builds the status for a finished map task, choosing the physical
    /// encoding from the partition count.
    ///
    /// `accurate_block_threshold` only matters for the highly compressed
    /// encoding: blocks at or above it keep an exact (log-scale) size.
    pub fn new(
        location: BlockManagerId,
        uncompressed_sizes: &[u64],
        map_id: i64,
        accurate_block_threshold: u64,
    ) -> Self {
        if uncompressed_sizes.len() >= MIN_PARTITIONS_FOR_HIGHLY_COMPRESSED {
            MapStatus::HighlyCompressed(HighlyCompressedMapStatus::new(
                location,
                uncompressed_sizes,
                map_id,
                accurate_block_threshold,
            ))
        } else {
            MapStatus::Compressed(CompressedMapStatus::new(
                location,
                uncompressed_sizes,
                map_id,
            ))
        }
    }

    pub fn location(&self) -> &BlockManagerId {
        match self {
            MapStatus::Compressed(s) => &s.location,
            MapStatus::HighlyCompressed(s) => &s.location,
        }
    }

    /// Map id of the producing task, stable across task attempts.
    pub fn map_id(&self) -> i64 {
        match self {
            MapStatus::Compressed(s) => s.map_id,
            MapStatus::HighlyCompressed(s) => s.map_id,
        }
    }

    /// Estimated size of the block for the given reduce partition. Empty
    /// blocks report exactly 0.
    pub fn size_for_block(&self, reduce_id: u32) -> u64 {
        match self {
            MapStatus::Compressed(s) => s.size_for_block(reduce_id),
            MapStatus::HighlyCompressed(s) => s.size_for_block(reduce_id),
        }
    }

    /// Points the status at a new block manager after migration.
    pub fn update_location(&mut self, location: BlockManagerId) {
        match self {
            MapStatus::Compressed(s) => s.location = location,
            MapStatus::HighlyCompressed(s) => s.location = location,
        }
    }
}

/// One log-scale byte per reduce partition.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CompressedMapStatus {
    pub location: BlockManagerId,
    pub map_id: i64,
    compressed_sizes: Vec<u8>,
}

impl CompressedMapStatus {
    pub fn new(location: BlockManagerId, uncompressed_sizes: &[u64], map_id: i64) -> Self {
        Self {
            location,
            map_id,
            compressed_sizes: uncompressed_sizes
                .iter()
                .map(|size| compress_size(*size))
                .collect(),
        }
    }

    pub fn size_for_block(&self, reduce_id: u32) -> u64 {
        decompress_size(self.compressed_sizes[reduce_id as usize])
    }
}

/// Tracks empty blocks exactly, huge blocks by log-scale byte, and everything
/// else by one shared average.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct HighlyCompressedMapStatus {
    pub location: BlockManagerId,
    pub map_id: i64,
    num_partitions: u32,
    empty_blocks: IndexBitmap,
    avg_size: u64,
    huge_block_sizes: HashMap<u32, u8>,
}

impl HighlyCompressedMapStatus {
    pub fn new(
        location: BlockManagerId,
        uncompressed_sizes: &[u64],
        map_id: i64,
        accurate_block_threshold: u64,
    ) -> Self {
        let mut empty_blocks = IndexBitmap::new();
        let mut huge_block_sizes = HashMap::new();
        let mut small_block_total: u64 = 0;
        let mut small_block_count: u64 = 0;
        for (reduce_id, size) in uncompressed_sizes.iter().enumerate() {
            if *size == 0 {
                empty_blocks.insert(reduce_id as u32);
            } else if *size >= accurate_block_threshold {
                huge_block_sizes.insert(reduce_id as u32, compress_size(*size));
            } else {
                small_block_total += size;
                small_block_count += 1;
            }
        }
        let avg_size = if small_block_count > 0 {
            small_block_total / small_block_count
        } else {
            0
        };
        Self {
            location,
            map_id,
            num_partitions: uncompressed_sizes.len() as u32,
            empty_blocks,
            avg_size,
            huge_block_sizes,
        }
    }

    pub fn size_for_block(&self, reduce_id: u32) -> u64 {
        assert!(reduce_id < self.num_partitions);
        if self.empty_blocks.contains(reduce_id) {
            0
        } else {
            match self.huge_block_sizes.get(&reduce_id) {
                Some(compressed) => decompress_size(*compressed),
                None => self.avg_size,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> BlockManagerId {
        BlockManagerId::new("exec-1", "host-a", 7337)
    }

    #[test]
    fn size_codec_bounds() {
        assert_eq!(compress_size(0), 0);
        assert_eq!(decompress_size(0), 0);
        assert_eq!(compress_size(1), 1);
        for size in [2u64, 100, 1_000, 700_000, 10_000_000] {
            let estimate = decompress_size(compress_size(size));
            assert!(estimate >= size, "estimate {estimate} below actual {size}");
            // log-scale with base 1.1: at most ~10% over plus rounding
            assert!(estimate as f64 <= size as f64 * LOG_BASE + 1.0);
        }
        assert_eq!(compress_size(u64::MAX), 255);
    }

    #[test]
    fn compressed_status_reports_empty_blocks_as_zero() {
        let status = MapStatus::new(location(), &[1000, 0, 10_000], 5, u64::MAX);
        assert!(matches!(status, MapStatus::Compressed(_)));
        assert!(status.size_for_block(0) >= 1000);
        assert_eq!(status.size_for_block(1), 0);
        assert!(status.size_for_block(2) >= 10_000);
    }

    #[test]
    fn wide_shuffles_use_highly_compressed_encoding() {
        let sizes = vec![100u64; MIN_PARTITIONS_FOR_HIGHLY_COMPRESSED];
        let status = MapStatus::new(location(), &sizes, 5, u64::MAX);
        assert!(matches!(status, MapStatus::HighlyCompressed(_)));
    }

    #[test]
    fn highly_compressed_tracks_empty_average_and_huge() {
        let mut sizes = vec![1000u64; 3000];
        sizes[7] = 0;
        sizes[11] = 5_000_000;
        let status = HighlyCompressedMapStatus::new(location(), &sizes, 9, 1_000_000);
        assert_eq!(status.size_for_block(7), 0);
        // huge block keeps a (biased-high) exact estimate
        assert!(status.size_for_block(11) >= 5_000_000);
        // everything else reports the average of small non-empty blocks
        assert_eq!(status.size_for_block(0), 1000);
    }

    #[test]
    fn update_location_moves_the_status() {
        let mut status = MapStatus::new(location(), &[10], 5, u64::MAX);
        let moved = BlockManagerId::new("exec-2", "host-b", 7337);
        status.update_location(moved.clone());
        assert_eq!(status.location(), &moved);
    }

    #[test]
    fn statuses_survive_encoding() {
        let mut sizes = vec![128u64; 2500];
        sizes[3] = 0;
        let statuses = vec![
            Some(MapStatus::new(location(), &[1000, 0, 42], 5, u64::MAX)),
            None,
            Some(MapStatus::new(location(), &sizes, 6, 1024)),
        ];
        let bytes =
            bincode::encode_to_vec(&statuses, bincode::config::standard()).unwrap();
        let (decoded, _): (Vec<Option<MapStatus>>, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded, statuses);
    }
}
