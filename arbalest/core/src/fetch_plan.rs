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

//! Conversion from tracked statuses to a per-destination fetch plan.
//!
//! Reducers do not fetch from statuses directly; they fetch from the block
//! lists this module derives. Merged blocks are preferred whenever merge
//! statuses are available and the reducer consumes the complete map range;
//! a merged partition cannot serve a sub-range of maps because merge order
//! is non-deterministic.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::block_id::{BlockId, MERGED_SHUFFLE_MAP_ID};
use crate::error::{Result, ShuffleError};
use crate::status::{BlockManagerId, MapStatus, MergeStatus};
use crate::ShuffleId;

/// Map-index value attached to merged block entries, which aggregate many
/// maps.
pub const MERGED_BLOCK_MAP_INDEX: i32 = -1;

/// Blocks to fetch from one block manager: `(block id, size, map index)`.
pub type BlocksByAddress = Vec<(BlockManagerId, Vec<(BlockId, u64, i32)>)>;

fn missing_status_error(shuffle_id: ShuffleId, reduce_id: u32) -> ShuffleError {
    ShuffleError::MetadataFetchFailed {
        shuffle_id,
        reduce_id,
        message: "missing an output location for shuffle".to_string(),
    }
}

/// Converts statuses into per-destination block lists for the reduce
/// partitions `[start_partition, end_partition)` restricted to maps
/// `[start_map_index, end_map_index)`. Zero-sized blocks are excluded.
///
/// The merged branch is only taken when merge statuses are present and the
/// requested map range covers every map.
pub fn convert_map_statuses(
    shuffle_id: ShuffleId,
    start_partition: u32,
    end_partition: u32,
    map_statuses: &[Option<MapStatus>],
    start_map_index: u32,
    end_map_index: u32,
    merge_statuses: Option<&[Option<MergeStatus>]>,
) -> Result<BlocksByAddress> {
    let num_maps = map_statuses.len() as u32;
    let mut by_address: HashMap<BlockManagerId, Vec<(BlockId, u64, i32)>> = HashMap::new();

    let use_merged = merge_statuses.is_some() && start_map_index == 0 && end_map_index == num_maps;
    if use_merged {
        let merge_statuses = merge_statuses.unwrap();
        for partition in start_partition..end_partition {
            match merge_statuses.get(partition as usize).and_then(|s| s.as_ref()) {
                Some(merge_status) => {
                    if merge_status.total_size() > 0 {
                        by_address
                            .entry(merge_status.location().clone())
                            .or_default()
                            .push((
                                BlockId::Shuffle {
                                    shuffle_id,
                                    map_id: MERGED_SHUFFLE_MAP_ID,
                                    reduce_id: partition,
                                },
                                merge_status.total_size(),
                                MERGED_BLOCK_MAP_INDEX,
                            ));
                    }
                    for map_index in merge_status.get_missing_maps(num_maps) {
                        let status = map_statuses[map_index as usize]
                            .as_ref()
                            .ok_or_else(|| missing_status_error(shuffle_id, partition))?;
                        add_block(&mut by_address, shuffle_id, partition, map_index, status);
                    }
                }
                None => {
                    for map_index in 0..num_maps {
                        let status = map_statuses[map_index as usize]
                            .as_ref()
                            .ok_or_else(|| missing_status_error(shuffle_id, partition))?;
                        add_block(&mut by_address, shuffle_id, partition, map_index, status);
                    }
                }
            }
        }
    } else {
        for map_index in start_map_index..end_map_index {
            let status = map_statuses[map_index as usize]
                .as_ref()
                .ok_or_else(|| missing_status_error(shuffle_id, start_partition))?;
            for partition in start_partition..end_partition {
                add_block(&mut by_address, shuffle_id, partition, map_index, status);
            }
        }
    }

    Ok(by_address.into_iter().collect())
}

fn add_block(
    by_address: &mut HashMap<BlockManagerId, Vec<(BlockId, u64, i32)>>,
    shuffle_id: ShuffleId,
    partition: u32,
    map_index: u32,
    status: &MapStatus,
) {
    let size = status.size_for_block(partition);
    if size != 0 {
        by_address.entry(status.location().clone()).or_default().push((
            BlockId::Shuffle {
                shuffle_id,
                map_id: status.map_id(),
                reduce_id: partition,
            },
            size,
            map_index as i32,
        ));
    }
}

/// Fallback plan when a merged fetch fails: the original blocks of every map
/// that went into the merged partition (or only those in `chunk_tracker`
/// when a single chunk failed).
pub fn get_map_sizes_for_merge_result(
    shuffle_id: ShuffleId,
    partition_id: u32,
    map_statuses: &[Option<MapStatus>],
    merge_status: Option<&MergeStatus>,
    chunk_tracker: Option<&RoaringBitmap>,
) -> Result<BlocksByAddress> {
    let merge_status = merge_status.ok_or_else(|| ShuffleError::MetadataFetchFailed {
        shuffle_id,
        reduce_id: partition_id,
        message: "missing a merge status for shuffle".to_string(),
    })?;
    let tracker = chunk_tracker.unwrap_or(&merge_status.tracker().0);

    let mut by_address: HashMap<BlockManagerId, Vec<(BlockId, u64, i32)>> = HashMap::new();
    for map_index in tracker.iter() {
        let status = map_statuses
            .get(map_index as usize)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| missing_status_error(shuffle_id, partition_id))?;
        add_block(&mut by_address, shuffle_id, partition_id, map_index, status);
    }
    Ok(by_address.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::IndexBitmap;

    fn map_status(executor: &str, host: &str, sizes: &[u64], map_id: i64) -> MapStatus {
        MapStatus::new(
            BlockManagerId::new(executor, host, 7337),
            sizes,
            map_id,
            u64::MAX,
        )
    }

    fn blocks_for<'a>(
        plan: &'a BlocksByAddress,
        address: &BlockManagerId,
    ) -> &'a [(BlockId, u64, i32)] {
        &plan.iter().find(|(a, _)| a == address).unwrap().1
    }

    #[test]
    fn unmerged_plan_covers_all_nonzero_blocks() {
        let statuses = vec![
            Some(map_status("a", "host-a", &[1000, 10_000], 5)),
            Some(map_status("b", "host-b", &[10_000, 0], 6)),
        ];
        let plan = convert_map_statuses(10, 0, 2, &statuses, 0, 2, None).unwrap();

        let total: usize = plan.iter().map(|(_, blocks)| blocks.len()).sum();
        assert_eq!(total, 3);

        let a = BlockManagerId::new("a", "host-a", 7337);
        let blocks = blocks_for(&plan, &a);
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|(id, size, map_index)| {
            *map_index == 0
                && *size > 0
                && matches!(id, BlockId::Shuffle { shuffle_id: 10, map_id: 5, .. })
        }));

        let b = BlockManagerId::new("b", "host-b", 7337);
        let blocks = blocks_for(&plan, &b);
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].0,
            BlockId::Shuffle {
                shuffle_id: 10,
                map_id: 6,
                reduce_id: 0
            }
        );
    }

    #[test]
    fn null_status_raises_metadata_fetch_failure() {
        let statuses = vec![Some(map_status("a", "host-a", &[100], 5)), None];
        let err = convert_map_statuses(10, 0, 1, &statuses, 0, 2, None).unwrap_err();
        assert!(matches!(
            err,
            ShuffleError::MetadataFetchFailed {
                shuffle_id: 10,
                reduce_id: 0,
                ..
            }
        ));
    }

    #[test]
    fn merged_partition_supplements_only_missing_maps() {
        let statuses: Vec<Option<MapStatus>> = (0..4)
            .map(|i| Some(map_status(&format!("exec-{i}"), "host-a", &[1000], i)))
            .collect();
        let merger = BlockManagerId::new("merger", "host-m", 7337);
        let merges = vec![Some(MergeStatus::new(
            merger.clone(),
            IndexBitmap::from_indices([0, 1, 3]),
            3000,
        ))];

        let plan = convert_map_statuses(10, 0, 1, &statuses, 0, 4, Some(&merges)).unwrap();

        let merged = blocks_for(&plan, &merger);
        assert_eq!(
            merged,
            &[(
                BlockId::Shuffle {
                    shuffle_id: 10,
                    map_id: MERGED_SHUFFLE_MAP_ID,
                    reduce_id: 0
                },
                3000,
                MERGED_BLOCK_MAP_INDEX
            )]
        );

        let exec2 = BlockManagerId::new("exec-2", "host-a", 7337);
        let supplemented = blocks_for(&plan, &exec2);
        assert_eq!(supplemented.len(), 1);
        assert_eq!(supplemented[0].2, 2);
        assert!(supplemented[0].1 >= 1000);
    }

    #[test]
    fn merged_branch_requires_full_map_range() {
        let statuses: Vec<Option<MapStatus>> = (0..4)
            .map(|i| Some(map_status(&format!("exec-{i}"), "host-a", &[1000], i)))
            .collect();
        let merges = vec![Some(MergeStatus::new(
            BlockManagerId::new("merger", "host-m", 7337),
            IndexBitmap::from_indices([0, 1, 2, 3]),
            4000,
        ))];

        // a sub-range of maps must ignore merge statuses entirely
        let plan = convert_map_statuses(10, 0, 1, &statuses, 1, 3, Some(&merges)).unwrap();
        let total: usize = plan.iter().map(|(_, blocks)| blocks.len()).sum();
        assert_eq!(total, 2);
        assert!(plan
            .iter()
            .all(|(_, blocks)| blocks.iter().all(|(_, _, idx)| *idx >= 0)));
    }

    #[test]
    fn empty_tracker_with_zero_total_size_yields_only_fallback_blocks() {
        let statuses: Vec<Option<MapStatus>> = (0..2)
            .map(|i| Some(map_status(&format!("exec-{i}"), "host-a", &[500], i)))
            .collect();
        let merges = vec![Some(MergeStatus::new(
            BlockManagerId::new("merger", "host-m", 7337),
            IndexBitmap::new(),
            0,
        ))];

        let plan = convert_map_statuses(10, 0, 1, &statuses, 0, 2, Some(&merges)).unwrap();
        let total: usize = plan.iter().map(|(_, blocks)| blocks.len()).sum();
        assert_eq!(total, 2);
        assert!(plan
            .iter()
            .all(|(addr, _)| addr != &BlockManagerId::new("merger", "host-m", 7337)));
    }

    #[test]
    fn merge_fallback_covers_tracked_maps() {
        let statuses: Vec<Option<MapStatus>> = (0..4)
            .map(|i| Some(map_status(&format!("exec-{i}"), "host-a", &[1000], i)))
            .collect();
        let merge = MergeStatus::new(
            BlockManagerId::new("merger", "host-m", 7337),
            IndexBitmap::from_indices([0, 2]),
            2000,
        );

        let plan =
            get_map_sizes_for_merge_result(10, 0, &statuses, Some(&merge), None).unwrap();
        let mut map_indices: Vec<i32> = plan
            .iter()
            .flat_map(|(_, blocks)| blocks.iter().map(|(_, _, idx)| *idx))
            .collect();
        map_indices.sort_unstable();
        assert_eq!(map_indices, vec![0, 2]);

        let chunk_tracker: RoaringBitmap = [2u32].into_iter().collect();
        let plan = get_map_sizes_for_merge_result(
            10,
            0,
            &statuses,
            Some(&merge),
            Some(&chunk_tracker),
        )
        .unwrap();
        let total: usize = plan.iter().map(|(_, blocks)| blocks.len()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn missing_merge_status_raises_metadata_fetch_failure() {
        let statuses = vec![Some(map_status("a", "host-a", &[100], 0))];
        let err = get_map_sizes_for_merge_result(10, 3, &statuses, None, None).unwrap_err();
        assert!(matches!(
            err,
            ShuffleError::MetadataFetchFailed {
                shuffle_id: 10,
                reduce_id: 3,
                ..
            }
        ));
    }
}
