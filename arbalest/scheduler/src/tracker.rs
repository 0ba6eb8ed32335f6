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

//! Driver-side registry over all shuffles.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use arbalest_core::broadcast::BroadcastManager;
use arbalest_core::config::{
    TrackerConfig, REDUCER_PREF_LOCS_FRACTION, SHUFFLE_PREF_MAP_THRESHOLD,
    SHUFFLE_PREF_REDUCE_THRESHOLD,
};
use arbalest_core::error::{Result, ShuffleError};
use arbalest_core::serde::{codec_by_name, StatusCodec};
use arbalest_core::status::{BlockManagerId, MapStatus, MergeStatus};
use arbalest_core::transport::{TrackerClient, TrackerRequest, TrackerResponse};
use arbalest_core::ShuffleId;

use crate::dispatcher::{StatusRequestDispatcher, TrackerMessage};
use crate::shuffle_status::ShuffleStatus;

/// Aggregated output sizes of one shuffle, summed per reduce partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleStatistics {
    pub bytes_by_partition_id: Vec<u64>,
}

/// Driver-side bookkeeping of every shuffle's map outputs and merge results.
///
/// Holds the epoch counter that invalidates executor-side caches: any
/// removal bumps it, registrations do not. Additions can only cause a
/// stale miss, which reducers recover from by refetching.
pub struct MapOutputTrackerMaster {
    config: TrackerConfig,
    codec: Arc<dyn StatusCodec>,
    broadcast_manager: Arc<dyn BroadcastManager>,
    shuffle_statuses: Arc<DashMap<ShuffleId, Arc<ShuffleStatus>>>,
    dispatcher: StatusRequestDispatcher,
    epoch: Mutex<u64>,
}

impl MapOutputTrackerMaster {
    pub fn try_new(
        config: TrackerConfig,
        broadcast_manager: Arc<dyn BroadcastManager>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let codec = codec_by_name(&config.map_status_compression_codec);
        let shuffle_statuses = Arc::new(DashMap::new());
        let dispatcher =
            StatusRequestDispatcher::new(config.dispatcher_num_threads, shuffle_statuses.clone())?;
        Ok(Arc::new(Self {
            config,
            codec,
            broadcast_manager,
            shuffle_statuses,
            dispatcher,
            epoch: Mutex::new(0),
        }))
    }

    /// Enqueues a status request for the dispatcher pool.
    pub fn post(&self, message: TrackerMessage) {
        self.dispatcher.post(message);
    }

    /// An in-process [`TrackerClient`] speaking directly to this tracker's
    /// endpoint queue, for local mode and tests. Remote deployments wrap the
    /// same queue behind their transport.
    pub fn local_client(self: &Arc<Self>) -> Arc<dyn TrackerClient> {
        Arc::new(LocalTrackerClient {
            master: self.clone(),
        })
    }

    /// Stops the dispatcher; pending requests are answered first.
    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    fn shuffle_status(&self, shuffle_id: ShuffleId, operation: &str) -> Result<Arc<ShuffleStatus>> {
        self.shuffle_statuses
            .get(&shuffle_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| {
                ShuffleError::IllegalState(format!(
                    "{operation} called for nonexistent shuffle ID {shuffle_id}"
                ))
            })
    }

    pub fn register_shuffle(
        &self,
        shuffle_id: ShuffleId,
        num_maps: usize,
        num_reducers: usize,
    ) -> Result<()> {
        let status = Arc::new(ShuffleStatus::new(
            num_maps,
            num_reducers,
            self.broadcast_manager.clone(),
            self.codec.clone(),
            self.config.min_broadcast_size,
        ));
        match self.shuffle_statuses.entry(shuffle_id) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(status);
                debug!("Registered shuffle {shuffle_id} with {num_maps} maps and {num_reducers} reducers");
                Ok(())
            }
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ShuffleError::IllegalState(
                format!("shuffle ID {shuffle_id} registered twice"),
            )),
        }
    }

    pub fn register_map_output(
        &self,
        shuffle_id: ShuffleId,
        map_index: u32,
        status: MapStatus,
    ) -> Result<()> {
        self.shuffle_status(shuffle_id, "registerMapOutput")?
            .add_map_output(map_index, status);
        Ok(())
    }

    /// Re-points a migrated map output. Unknown shuffles are ignored: tasks
    /// may race with a stage abort.
    pub fn update_map_output(
        &self,
        shuffle_id: ShuffleId,
        map_id: i64,
        location: BlockManagerId,
    ) {
        match self.shuffle_statuses.get(&shuffle_id) {
            Some(status) => {
                status.update_map_output(map_id, location);
                self.increment_epoch();
            }
            None => {
                warn!("Asked to update map output for unknown shuffle {shuffle_id}");
            }
        }
    }

    pub fn unregister_map_output(
        &self,
        shuffle_id: ShuffleId,
        map_index: u32,
        block_manager: &BlockManagerId,
    ) -> Result<()> {
        self.shuffle_status(shuffle_id, "unregisterMapOutput")?
            .remove_map_output(map_index, block_manager);
        self.increment_epoch();
        Ok(())
    }

    pub fn unregister_all_map_output(&self, shuffle_id: ShuffleId) -> Result<()> {
        let status = self.shuffle_status(shuffle_id, "unregisterAllMapOutput")?;
        status.remove_all_map_outputs();
        status.remove_all_merge_results();
        self.increment_epoch();
        Ok(())
    }

    pub fn register_merge_result(
        &self,
        shuffle_id: ShuffleId,
        reduce_id: u32,
        status: MergeStatus,
    ) -> Result<()> {
        self.shuffle_status(shuffle_id, "registerMergeResult")?
            .add_merge_result(reduce_id, status);
        Ok(())
    }

    /// Unregisters the merge result of one reduce partition, optionally only
    /// when the given map made it into the merged file (used when a single
    /// map output is found corrupt after merging).
    pub fn unregister_merge_result(
        &self,
        shuffle_id: ShuffleId,
        reduce_id: u32,
        block_manager: &BlockManagerId,
        map_index: Option<u32>,
    ) -> Result<()> {
        let status = self.shuffle_status(shuffle_id, "unregisterMergeResult")?;
        if status.remove_merge_result(reduce_id, block_manager, map_index) {
            self.increment_epoch();
        }
        Ok(())
    }

    pub fn unregister_all_merge_result(&self, shuffle_id: ShuffleId) -> Result<()> {
        self.shuffle_status(shuffle_id, "unregisterAllMergeResult")?
            .remove_all_merge_results();
        self.increment_epoch();
        Ok(())
    }

    /// Drops a shuffle entirely, destroying any cached status broadcasts.
    pub fn unregister_shuffle(&self, shuffle_id: ShuffleId) {
        if let Some((_, status)) = self.shuffle_statuses.remove(&shuffle_id) {
            status.invalidate_serialized_map_output_status_cache();
            status.invalidate_serialized_merge_output_status_cache();
            info!("Unregistered shuffle {shuffle_id}");
        }
    }

    /// Sweeps every shuffle for outputs on the given host (a lost host takes
    /// all of its executors and any hosted merger with it).
    pub fn remove_outputs_on_host(&self, host: &str) {
        let mut maps_removed = 0;
        let mut merges_removed = 0;
        for entry in self.shuffle_statuses.iter() {
            let (maps, merges) = entry.value().remove_outputs_by_filter(|bm| bm.host == host);
            maps_removed += maps;
            merges_removed += merges;
        }
        self.increment_epoch();
        info!(
            "Removed {maps_removed} map outputs and {merges_removed} merge results on host {host}"
        );
    }

    /// Sweeps every shuffle for outputs on the given executor.
    pub fn remove_outputs_on_executor(&self, executor_id: &str) {
        let mut maps_removed = 0;
        for entry in self.shuffle_statuses.iter() {
            let (maps, _) = entry
                .value()
                .remove_outputs_by_filter(|bm| bm.executor_id == executor_id);
            maps_removed += maps;
        }
        self.increment_epoch();
        info!("Removed {maps_removed} map outputs on executor {executor_id}");
    }

    pub fn contains_shuffle(&self, shuffle_id: ShuffleId) -> bool {
        self.shuffle_statuses.contains_key(&shuffle_id)
    }

    pub fn get_num_available_outputs(&self, shuffle_id: ShuffleId) -> usize {
        self.shuffle_statuses
            .get(&shuffle_id)
            .map(|s| s.num_available_map_outputs())
            .unwrap_or(0)
    }

    pub fn get_num_available_merge_results(&self, shuffle_id: ShuffleId) -> usize {
        self.shuffle_statuses
            .get(&shuffle_id)
            .map(|s| s.num_available_merge_results())
            .unwrap_or(0)
    }

    /// Map indices still missing an output, or `None` when the shuffle is
    /// unknown.
    pub fn find_missing_partitions(&self, shuffle_id: ShuffleId) -> Option<Vec<u32>> {
        self.shuffle_statuses
            .get(&shuffle_id)
            .map(|s| s.find_missing_maps())
    }

    pub fn get_epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    pub fn increment_epoch(&self) {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        debug!("Increasing epoch to {}", *epoch);
    }

    /// Number of shuffles currently holding a cached status broadcast.
    pub fn num_cached_serialized_broadcast(&self) -> usize {
        self.shuffle_statuses
            .iter()
            .filter(|e| e.value().has_cached_serialized_broadcast())
            .count()
    }

    /// Preferred hosts for scheduling one reduce task:
    ///
    /// 1. the merger of its merged partition, when the merge covers enough
    ///    of the maps that the bulk of the data is in one place;
    /// 2. otherwise the locations holding an outsized share of its input,
    ///    for shuffles small enough that the scan is worthwhile;
    /// 3. otherwise nothing.
    pub fn get_preferred_locations_for_shuffle(
        &self,
        shuffle_id: ShuffleId,
        reducer_id: u32,
    ) -> Vec<String> {
        let Some(status) = self.shuffle_statuses.get(&shuffle_id).map(|s| s.value().clone())
        else {
            return vec![];
        };
        if self.config.push_based_shuffle_enabled {
            if let Some(merge_status) = status.merge_status(reducer_id) {
                let num_maps = status.num_maps();
                if num_maps > 0 {
                    let merged_fraction =
                        merge_status.num_merged_maps() as f64 / num_maps as f64;
                    if merged_fraction >= 1.0 - REDUCER_PREF_LOCS_FRACTION {
                        return vec![merge_status.location().host.clone()];
                    }
                }
            }
        }
        if self.config.reduce_locality_enabled
            && status.num_maps() < SHUFFLE_PREF_MAP_THRESHOLD
            && status.num_reducers() < SHUFFLE_PREF_REDUCE_THRESHOLD
        {
            if let Some(locations) = self.get_locations_with_largest_outputs(
                shuffle_id,
                reducer_id,
                REDUCER_PREF_LOCS_FRACTION,
            ) {
                return locations.into_iter().map(|bm| bm.host).collect();
            }
        }
        vec![]
    }

    /// Block managers holding at least `fraction_threshold` of the total
    /// bytes destined for the given reduce partition.
    pub fn get_locations_with_largest_outputs(
        &self,
        shuffle_id: ShuffleId,
        reducer_id: u32,
        fraction_threshold: f64,
    ) -> Option<Vec<BlockManagerId>> {
        let status = self.shuffle_statuses.get(&shuffle_id)?.value().clone();
        status.with_map_statuses(|statuses| {
            let mut by_location: HashMap<&BlockManagerId, u64> = HashMap::new();
            let mut total: u64 = 0;
            for status in statuses.iter().flatten() {
                let size = status.size_for_block(reducer_id);
                if size > 0 {
                    total += size;
                    *by_location.entry(status.location()).or_default() += size;
                }
            }
            if total == 0 {
                return None;
            }
            let locations: Vec<BlockManagerId> = by_location
                .into_iter()
                .filter(|(_, size)| *size as f64 / total as f64 >= fraction_threshold)
                .map(|(location, _)| location.clone())
                .collect();
            if locations.is_empty() {
                None
            } else {
                Some(locations)
            }
        })
    }

    /// Sums output sizes per reduce partition. Large `maps x reducers`
    /// products are aggregated in parallel over disjoint partition ranges.
    pub fn get_statistics(&self, shuffle_id: ShuffleId) -> Result<ShuffleStatistics> {
        let status = self.shuffle_status(shuffle_id, "getStatistics")?;
        let num_reducers = status.num_reducers();
        let statistics = status.with_map_statuses(|statuses| {
            let mut sizes = vec![0u64; num_reducers];
            let product = statuses.len() as u64 * num_reducers as u64;
            if product < self.config.parallel_aggregation_threshold {
                for status in statuses.iter().flatten() {
                    for (reduce_id, slot) in sizes.iter_mut().enumerate() {
                        *slot += status.size_for_block(reduce_id as u32);
                    }
                }
            } else {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                let ratio = (product / self.config.parallel_aggregation_threshold) as usize;
                let num_buckets = cores.min(ratio + 1).max(1);
                debug!(
                    "Aggregating statistics for shuffle {shuffle_id} over {num_buckets} buckets"
                );
                let buckets = equally_divide(num_reducers, num_buckets);
                std::thread::scope(|scope| {
                    let mut remaining: &mut [u64] = &mut sizes;
                    for bucket in &buckets {
                        let (chunk, rest) = remaining.split_at_mut(bucket.len());
                        remaining = rest;
                        let start = bucket.start;
                        scope.spawn(move || {
                            for status in statuses.iter().flatten() {
                                for (offset, slot) in chunk.iter_mut().enumerate() {
                                    *slot += status.size_for_block((start + offset) as u32);
                                }
                            }
                        });
                    }
                });
            }
            ShuffleStatistics {
                bytes_by_partition_id: sizes,
            }
        });
        Ok(statistics)
    }
}

/// Splits `0..num_elements` into `num_buckets` contiguous ranges whose sizes
/// differ by at most one, wider buckets first.
pub fn equally_divide(num_elements: usize, num_buckets: usize) -> Vec<Range<usize>> {
    let quotient = num_elements / num_buckets;
    let remainder = num_elements % num_buckets;
    let mut ranges = Vec::with_capacity(num_buckets);
    let mut start = 0;
    for bucket in 0..num_buckets {
        let len = if bucket < remainder {
            quotient + 1
        } else {
            quotient
        };
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

struct LocalTrackerClient {
    master: Arc<MapOutputTrackerMaster>,
}

#[async_trait]
impl TrackerClient for LocalTrackerClient {
    async fn ask(&self, request: TrackerRequest) -> Result<TrackerResponse> {
        match request {
            TrackerRequest::GetMapOutputStatuses { shuffle_id } => {
                let (reply, receiver) = oneshot::channel();
                self.master
                    .post(TrackerMessage::GetMapOutputStatuses { shuffle_id, reply });
                let payload = receiver.await.map_err(|_| {
                    ShuffleError::RpcFailure(
                        "tracker endpoint dropped the status request".to_string(),
                    )
                })??;
                Ok(TrackerResponse::SerializedStatuses(payload))
            }
            TrackerRequest::GetMergeResultStatuses { shuffle_id } => {
                let (reply, receiver) = oneshot::channel();
                self.master
                    .post(TrackerMessage::GetMergeResultStatuses { shuffle_id, reply });
                let payload = receiver.await.map_err(|_| {
                    ShuffleError::RpcFailure(
                        "tracker endpoint dropped the status request".to_string(),
                    )
                })??;
                Ok(TrackerResponse::SerializedStatuses(payload))
            }
            TrackerRequest::StopMapOutputTracker => {
                self.master.stop();
                Ok(TrackerResponse::Stopped(true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use arbalest_core::broadcast::LocalBroadcastManager;
    use arbalest_core::status::IndexBitmap;

    use super::*;

    fn new_master(config: TrackerConfig) -> Arc<MapOutputTrackerMaster> {
        MapOutputTrackerMaster::try_new(config, Arc::new(LocalBroadcastManager::new()))
            .unwrap()
    }

    fn map_status(executor: &str, host: &str, sizes: &[u64], map_id: i64) -> MapStatus {
        MapStatus::new(BlockManagerId::new(executor, host, 7337), sizes, map_id, u64::MAX)
    }

    #[test]
    fn equally_divide_contract() {
        for (elements, buckets) in [(10, 3), (7, 7), (5, 8), (1000, 7), (0, 3)] {
            let ranges = equally_divide(elements, buckets);
            assert_eq!(ranges.len(), buckets);
            let total: usize = ranges.iter().map(|r| r.len()).sum();
            assert_eq!(total, elements);
            let max = ranges.iter().map(|r| r.len()).max().unwrap();
            let min = ranges.iter().map(|r| r.len()).min().unwrap();
            assert!(max - min <= 1);
            // wider buckets first, and contiguous coverage
            let mut previous_len = usize::MAX;
            let mut next_start = 0;
            for range in &ranges {
                assert!(range.len() <= previous_len);
                assert_eq!(range.start, next_start);
                previous_len = range.len();
                next_start = range.end;
            }
        }
    }

    #[test]
    fn double_registration_is_a_programming_error() {
        let master = new_master(TrackerConfig::default());
        master.register_shuffle(10, 2, 2).unwrap();
        let err = master.register_shuffle(10, 2, 2).unwrap_err();
        assert!(matches!(err, ShuffleError::IllegalState(_)));
        master.stop();
    }

    #[test]
    fn unregistering_unknown_shuffles_fails_loudly() {
        let master = new_master(TrackerConfig::default());
        let bm = BlockManagerId::new("a", "host-a", 7337);
        assert!(master.unregister_map_output(99, 0, &bm).is_err());
        assert!(master.unregister_all_map_output(99).is_err());
        assert!(master.unregister_merge_result(99, 0, &bm, None).is_err());
        // unregister_shuffle itself is idempotent
        master.unregister_shuffle(99);
        master.stop();
    }

    #[test]
    fn epoch_bumps_on_removal_not_registration() {
        let master = new_master(TrackerConfig::default());
        master.register_shuffle(10, 2, 2).unwrap();
        let epoch0 = master.get_epoch();

        master
            .register_map_output(10, 0, map_status("a", "host-a", &[100, 200], 5))
            .unwrap();
        assert_eq!(master.get_epoch(), epoch0);

        master
            .unregister_map_output(10, 0, &BlockManagerId::new("a", "host-a", 7337))
            .unwrap();
        assert!(master.get_epoch() > epoch0);

        let epoch1 = master.get_epoch();
        master.remove_outputs_on_host("host-a");
        assert!(master.get_epoch() > epoch1);
        master.stop();
    }

    #[test]
    fn tracks_missing_partitions() {
        let master = new_master(TrackerConfig::default());
        master.register_shuffle(10, 3, 2).unwrap();
        master
            .register_map_output(10, 1, map_status("a", "host-a", &[100, 200], 5))
            .unwrap();
        assert_eq!(master.find_missing_partitions(10), Some(vec![0, 2]));
        assert_eq!(master.get_num_available_outputs(10), 1);
        assert_eq!(master.find_missing_partitions(99), None);
        master.stop();
    }

    #[test]
    fn preferred_locations_favor_covering_mergers() {
        let config = TrackerConfig::default().with_push_based_shuffle_enabled(true);
        let master = new_master(config);
        master.register_shuffle(10, 4, 1).unwrap();
        for i in 0..4 {
            master
                .register_map_output(
                    10,
                    i,
                    map_status(&format!("exec-{i}"), "host-a", &[1000], i as i64),
                )
                .unwrap();
        }
        // 3 of 4 maps merged: 0.75 coverage is below the 0.8 cutoff
        master
            .register_merge_result(
                10,
                0,
                MergeStatus::new(
                    BlockManagerId::new("merger", "host-m", 7337),
                    IndexBitmap::from_indices([0, 1, 2]),
                    3000,
                ),
            )
            .unwrap();
        let hosts = master.get_preferred_locations_for_shuffle(10, 0);
        assert_eq!(hosts, vec!["host-a".to_string()]);

        // full coverage flips the preference to the merger
        master
            .register_merge_result(
                10,
                0,
                MergeStatus::new(
                    BlockManagerId::new("merger", "host-m", 7337),
                    IndexBitmap::from_indices([0, 1, 2, 3]),
                    4000,
                ),
            )
            .unwrap();
        let hosts = master.get_preferred_locations_for_shuffle(10, 0);
        assert_eq!(hosts, vec!["host-m".to_string()]);
        master.stop();
    }

    #[test]
    fn largest_outputs_respect_the_fraction_threshold() {
        let master = new_master(TrackerConfig::default());
        master.register_shuffle(10, 3, 1).unwrap();
        master
            .register_map_output(10, 0, map_status("a", "host-a", &[10_000], 0))
            .unwrap();
        master
            .register_map_output(10, 1, map_status("b", "host-b", &[10_000], 1))
            .unwrap();
        master
            .register_map_output(10, 2, map_status("c", "host-c", &[100], 2))
            .unwrap();

        let locations = master
            .get_locations_with_largest_outputs(10, 0, 0.2)
            .unwrap();
        let hosts: Vec<&str> = locations.iter().map(|bm| bm.host.as_str()).collect();
        assert_eq!(locations.len(), 2);
        assert!(hosts.contains(&"host-a") && hosts.contains(&"host-b"));
        master.stop();
    }

    #[test]
    fn statistics_sum_per_partition() {
        let master = new_master(TrackerConfig::default());
        master.register_shuffle(10, 2, 3).unwrap();
        master
            .register_map_output(10, 0, map_status("a", "host-a", &[100, 0, 300], 0))
            .unwrap();
        master
            .register_map_output(10, 1, map_status("b", "host-b", &[100, 200, 0], 1))
            .unwrap();

        let stats = master.get_statistics(10).unwrap();
        assert_eq!(stats.bytes_by_partition_id.len(), 3);
        // sizes are log-scale estimates, biased high and zero-exact
        assert!(stats.bytes_by_partition_id[0] >= 200);
        assert!(stats.bytes_by_partition_id[1] >= 200);
        assert!(stats.bytes_by_partition_id[2] >= 300);
    }

    #[test]
    fn parallel_statistics_match_serial() {
        let serial_master = new_master(
            TrackerConfig::default().with_parallel_aggregation_threshold(u64::MAX),
        );
        let parallel_master =
            new_master(TrackerConfig::default().with_parallel_aggregation_threshold(1));
        for master in [&serial_master, &parallel_master] {
            master.register_shuffle(10, 5, 17).unwrap();
            for i in 0..5 {
                let sizes: Vec<u64> =
                    (0..17).map(|r| (i as u64 + 1) * (r as u64 % 4) * 100).collect();
                master
                    .register_map_output(
                        10,
                        i,
                        map_status(&format!("exec-{i}"), "host-a", &sizes, i as i64),
                    )
                    .unwrap();
            }
        }
        assert_eq!(
            serial_master.get_statistics(10).unwrap(),
            parallel_master.get_statistics(10).unwrap()
        );
        serial_master.stop();
        parallel_master.stop();
    }

    #[tokio::test]
    async fn local_client_round_trips_through_the_dispatcher() {
        let master = new_master(TrackerConfig::default());
        master.register_shuffle(10, 1, 1).unwrap();
        master
            .register_map_output(10, 0, map_status("a", "host-a", &[100], 5))
            .unwrap();

        let client = master.local_client();
        let response = client
            .ask(TrackerRequest::GetMapOutputStatuses { shuffle_id: 10 })
            .await
            .unwrap();
        match response {
            TrackerResponse::SerializedStatuses(payload) => {
                assert_eq!(payload[0], arbalest_core::serde::DIRECT);
            }
            other => panic!("unexpected response {other:?}"),
        }

        let response = client.ask(TrackerRequest::StopMapOutputTracker).await.unwrap();
        assert_eq!(response, TrackerResponse::Stopped(true));
    }
}
