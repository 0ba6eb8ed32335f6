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

//! Result of merging pushed blocks for one reduce partition.

use bincode::{Decode, Encode};

use super::{BlockManagerId, IndexBitmap};

/// Reported by a merger once it has finalized one reduce partition: which
/// map outputs made it into the merged file, and how large the file is.
/// Maps absent from the tracker must be fetched unmerged.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct MergeStatus {
    location: BlockManagerId,
    tracker: IndexBitmap,
    total_size: u64,
}

impl MergeStatus {
    pub fn new(location: BlockManagerId, tracker: IndexBitmap, total_size: u64) -> Self {
        Self {
            location,
            tracker,
            total_size,
        }
    }

    /// The merger holding the merged partition file.
    pub fn location(&self) -> &BlockManagerId {
        &self.location
    }

    /// Size of the merged partition file in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of map outputs merged into this partition.
    pub fn num_merged_maps(&self) -> u64 {
        self.tracker.len()
    }

    /// Whether the given map index was merged into this partition.
    pub fn contains(&self, map_index: u32) -> bool {
        self.tracker.contains(map_index)
    }

    pub fn tracker(&self) -> &IndexBitmap {
        &self.tracker
    }

    /// Map indices below `num_maps` that were *not* merged and must be
    /// fetched as original blocks.
    pub fn get_missing_maps(&self, num_maps: u32) -> Vec<u32> {
        (0..num_maps).filter(|i| !self.tracker.contains(*i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_maps_complement_the_tracker() {
        let status = MergeStatus::new(
            BlockManagerId::new("merger-1", "host-m", 7337),
            IndexBitmap::from_indices([0, 1, 3]),
            3000,
        );
        assert_eq!(status.num_merged_maps(), 3);
        assert_eq!(status.get_missing_maps(4), vec![2]);
        assert_eq!(status.get_missing_maps(6), vec![2, 4, 5]);
        assert!(status.contains(3));
        assert!(!status.contains(2));
    }

    #[test]
    fn empty_tracker_misses_everything() {
        let status = MergeStatus::new(
            BlockManagerId::new("merger-1", "host-m", 7337),
            IndexBitmap::new(),
            0,
        );
        assert_eq!(status.get_missing_maps(3), vec![0, 1, 2]);
        assert_eq!(status.num_merged_maps(), 0);
    }
}
