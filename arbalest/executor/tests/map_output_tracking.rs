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

//! End-to-end map-output tracking: a driver-side tracker master serving an
//! executor-side worker through the in-process endpoint.

use std::sync::Arc;

use arbalest_core::block_id::{BlockId, MERGED_SHUFFLE_MAP_ID};
use arbalest_core::broadcast::{BroadcastManager, LocalBroadcastManager};
use arbalest_core::config::TrackerConfig;
use arbalest_core::error::ShuffleError;
use arbalest_core::status::{BlockManagerId, IndexBitmap, MapStatus, MergeStatus};
use arbalest_executor::MapOutputTrackerWorker;
use arbalest_scheduler::MapOutputTrackerMaster;

fn new_tracker_pair(
    config: TrackerConfig,
) -> (
    Arc<MapOutputTrackerMaster>,
    MapOutputTrackerWorker,
    Arc<LocalBroadcastManager>,
) {
    let broadcast = Arc::new(LocalBroadcastManager::new());
    let master =
        MapOutputTrackerMaster::try_new(config.clone(), broadcast.clone() as Arc<dyn BroadcastManager>)
            .unwrap();
    let worker = MapOutputTrackerWorker::new(
        config,
        master.local_client(),
        broadcast.clone() as Arc<dyn BroadcastManager>,
    );
    (master, worker, broadcast)
}

fn map_status(executor: &str, host: &str, sizes: &[u64], map_id: i64) -> MapStatus {
    MapStatus::new(
        BlockManagerId::new(executor, host, 1000),
        sizes,
        map_id,
        u64::MAX,
    )
}

#[tokio::test]
async fn register_and_fetch() {
    let (master, worker, _) = new_tracker_pair(TrackerConfig::default());
    master.register_shuffle(10, 2, 2).unwrap();
    master
        .register_map_output(10, 0, map_status("a", "hostA", &[1000, 10000], 5))
        .unwrap();
    master
        .register_map_output(10, 1, map_status("b", "hostB", &[10000, 1000], 6))
        .unwrap();

    let plan = worker
        .get_map_sizes_by_executor_id(10, 0, 2, 0, 1)
        .await
        .unwrap();
    assert_eq!(plan.len(), 2);

    for (address, blocks) in &plan {
        assert_eq!(blocks.len(), 1);
        let (block_id, size, map_index) = &blocks[0];
        match address.executor_id.as_str() {
            "a" => {
                assert_eq!(
                    block_id,
                    &BlockId::Shuffle {
                        shuffle_id: 10,
                        map_id: 5,
                        reduce_id: 0
                    }
                );
                assert!(*size >= 1000);
                assert_eq!(*map_index, 0);
            }
            "b" => {
                assert_eq!(
                    block_id,
                    &BlockId::Shuffle {
                        shuffle_id: 10,
                        map_id: 6,
                        reduce_id: 0
                    }
                );
                assert!(*size >= 10000);
                assert_eq!(*map_index, 1);
            }
            other => panic!("unexpected executor {other}"),
        }
    }
    master.stop();
}

#[tokio::test]
async fn unregistered_output_fails_the_refetch() {
    let (master, worker, _) = new_tracker_pair(TrackerConfig::default());
    master.register_shuffle(10, 2, 2).unwrap();
    master
        .register_map_output(10, 0, map_status("a", "hostA", &[1000, 10000], 5))
        .unwrap();
    master
        .register_map_output(10, 1, map_status("b", "hostB", &[10000, 1000], 6))
        .unwrap();

    worker.get_map_sizes_by_executor_id(10, 0, 2, 0, 1).await.unwrap();

    master
        .unregister_map_output(10, 0, &BlockManagerId::new("a", "hostA", 1000))
        .unwrap();
    worker.update_epoch(master.get_epoch());

    let err = worker
        .get_map_sizes_by_executor_id(10, 0, 2, 0, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShuffleError::MetadataFetchFailed { shuffle_id: 10, reduce_id: 0, .. }
    ));

    // the purge must not leave a stale cache behind: the next attempt fails
    // the same way instead of serving the old view
    let err = worker
        .get_map_sizes_by_executor_id(10, 0, 2, 0, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ShuffleError::MetadataFetchFailed { .. }));
    master.stop();
}

#[tokio::test]
async fn oversized_statuses_travel_by_broadcast() {
    let config = TrackerConfig::default()
        .with_min_broadcast_size(512)
        .with_max_rpc_message_size(1 << 20);
    let (master, worker, broadcast) = new_tracker_pair(config);

    master.register_shuffle(10, 100, 1000).unwrap();
    for i in 0..100u32 {
        let sizes: Vec<u64> =
            (0..1000u64).map(|r| (i as u64 * 31 + r * 17) % 997 * 100 + 1).collect();
        master
            .register_map_output(10, i, map_status(&format!("exec-{i}"), "hostA", &sizes, i as i64))
            .unwrap();
    }

    let plan = worker
        .get_map_sizes_by_executor_id(10, 0, 100, 0, 1)
        .await
        .unwrap();
    assert!(!plan.is_empty());
    assert_eq!(master.num_cached_serialized_broadcast(), 1);
    assert_eq!(broadcast.num_values(), 1);

    master.unregister_shuffle(10);
    assert_eq!(master.num_cached_serialized_broadcast(), 0);
    assert_eq!(broadcast.num_values(), 0);
    master.stop();
}

#[tokio::test]
async fn merged_fetch_supplements_missing_maps() {
    let config = TrackerConfig::default().with_push_based_shuffle_enabled(true);
    let (master, worker, _) = new_tracker_pair(config);

    master.register_shuffle(10, 4, 1).unwrap();
    for i in 0..4 {
        master
            .register_map_output(10, i, map_status(&format!("exec-{i}"), "hostA", &[1000], i as i64))
            .unwrap();
    }
    let merger = BlockManagerId::new("merger", "hostM", 2000);
    master
        .register_merge_result(
            10,
            0,
            MergeStatus::new(merger.clone(), IndexBitmap::from_indices([0, 1, 3]), 3000),
        )
        .unwrap();

    let plan = worker
        .get_map_sizes_by_executor_id(10, 0, 4, 0, 1)
        .await
        .unwrap();

    let merged_group = plan.iter().find(|(a, _)| a == &merger).unwrap();
    assert_eq!(
        merged_group.1,
        vec![(
            BlockId::Shuffle {
                shuffle_id: 10,
                map_id: MERGED_SHUFFLE_MAP_ID,
                reduce_id: 0
            },
            3000,
            -1
        )]
    );

    // only map 2 is fetched unmerged
    let unmerged: Vec<&(BlockId, u64, i32)> = plan
        .iter()
        .filter(|(a, _)| a != &merger)
        .flat_map(|(_, blocks)| blocks)
        .collect();
    assert_eq!(unmerged.len(), 1);
    assert_eq!(unmerged[0].2, 2);
    assert!(unmerged[0].1 >= 1000);

    // a failed merged fetch falls back to the merged maps only
    let fallback = worker
        .get_map_sizes_for_merge_result(10, 0, None)
        .await
        .unwrap();
    let mut fallback_indices: Vec<i32> = fallback
        .iter()
        .flat_map(|(_, blocks)| blocks.iter().map(|(_, _, i)| *i))
        .collect();
    fallback_indices.sort_unstable();
    assert_eq!(fallback_indices, vec![0, 1, 3]);
    master.stop();
}
