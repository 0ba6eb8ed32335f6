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

//! Per-shuffle record of map-output and merge-result statuses.

use std::sync::Arc;

use bytes::Bytes;
use log::{info, warn};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use arbalest_core::broadcast::{BroadcastHandle, BroadcastManager};
use arbalest_core::error::Result;
use arbalest_core::serde::{serialize_output_statuses, StatusCodec};
use arbalest_core::status::{BlockManagerId, MapStatus, MergeStatus};

struct ShuffleState {
    map_statuses: Vec<Option<MapStatus>>,
    merge_statuses: Vec<Option<MergeStatus>>,
    num_available_map_outputs: usize,
    num_available_merge_results: usize,
    cached_serialized_map: Option<Bytes>,
    cached_serialized_merge: Option<Bytes>,
    cached_broadcast_map: Option<BroadcastHandle>,
    cached_broadcast_merge: Option<BroadcastHandle>,
}

impl ShuffleState {
    fn invalidate_map_cache(&mut self) {
        destroy_broadcast(&mut self.cached_broadcast_map);
        self.cached_serialized_map = None;
    }

    fn invalidate_merge_cache(&mut self) {
        destroy_broadcast(&mut self.cached_broadcast_merge);
        self.cached_serialized_merge = None;
    }
}

fn destroy_broadcast(handle: &mut Option<BroadcastHandle>) {
    if let Some(handle) = handle.take() {
        let id = handle.id();
        if let Err(e) = handle.destroy() {
            // cleanup must never take the driver down
            warn!("Failed to destroy cached status broadcast {id}: {e}");
        }
    }
}

/// All the driver knows about one shuffle.
///
/// Guarded by a single readers-writer lock: array mutations are O(1) and the
/// hottest paths are reads. The counters always equal the number of non-null
/// entries in the corresponding array, and every mutation of an array entry
/// invalidates the corresponding serialization cache.
pub struct ShuffleStatus {
    state: RwLock<ShuffleState>,
    broadcast_manager: Arc<dyn BroadcastManager>,
    codec: Arc<dyn StatusCodec>,
    min_broadcast_size: usize,
}

impl ShuffleStatus {
    pub fn new(
        num_maps: usize,
        num_reducers: usize,
        broadcast_manager: Arc<dyn BroadcastManager>,
        codec: Arc<dyn StatusCodec>,
        min_broadcast_size: usize,
    ) -> Self {
        Self {
            state: RwLock::new(ShuffleState {
                map_statuses: vec![None; num_maps],
                merge_statuses: vec![None; num_reducers],
                num_available_map_outputs: 0,
                num_available_merge_results: 0,
                cached_serialized_map: None,
                cached_serialized_merge: None,
                cached_broadcast_map: None,
                cached_broadcast_merge: None,
            }),
            broadcast_manager,
            codec,
            min_broadcast_size,
        }
    }

    pub fn num_maps(&self) -> usize {
        self.state.read().map_statuses.len()
    }

    pub fn num_reducers(&self) -> usize {
        self.state.read().merge_statuses.len()
    }

    /// Registers the output of one finished map task.
    pub fn add_map_output(&self, map_index: u32, status: MapStatus) {
        let mut state = self.state.write();
        if state.map_statuses[map_index as usize].is_none() {
            state.num_available_map_outputs += 1;
            state.invalidate_map_cache();
        }
        state.map_statuses[map_index as usize] = Some(status);
    }

    /// Moves the output of the map task with the given map id to a new block
    /// manager. Unknown map ids are logged and ignored: tasks may race with
    /// a stage abort.
    pub fn update_map_output(&self, map_id: i64, location: BlockManagerId) {
        let mut state = self.state.write();
        let found = state
            .map_statuses
            .iter_mut()
            .flatten()
            .find(|s| s.map_id() == map_id);
        match found {
            Some(status) => {
                info!("Updating map output for {map_id} to {location}");
                status.update_location(location);
                state.invalidate_map_cache();
            }
            None => {
                warn!("Asked to update map output {map_id} for untracked map status");
            }
        }
    }

    /// Removes the map output at `map_index`, but only if it still lives on
    /// `block_manager`. A stale address is a no-op, which protects against
    /// races with migration.
    pub fn remove_map_output(&self, map_index: u32, block_manager: &BlockManagerId) {
        let mut state = self.state.write();
        let matches = state.map_statuses[map_index as usize]
            .as_ref()
            .is_some_and(|s| s.location() == block_manager);
        if matches {
            state.map_statuses[map_index as usize] = None;
            state.num_available_map_outputs -= 1;
            state.invalidate_map_cache();
        }
    }

    /// Registers the merge result for one reduce partition.
    pub fn add_merge_result(&self, reduce_id: u32, status: MergeStatus) {
        let mut state = self.state.write();
        if state.merge_statuses[reduce_id as usize].is_none() {
            state.num_available_merge_results += 1;
            state.invalidate_merge_cache();
        }
        state.merge_statuses[reduce_id as usize] = Some(status);
    }

    /// Removes the merge result for `reduce_id` if it lives on
    /// `block_manager` and, when `map_index` is given, only if that map was
    /// merged into it. Returns whether a result was removed.
    pub fn remove_merge_result(
        &self,
        reduce_id: u32,
        block_manager: &BlockManagerId,
        map_index: Option<u32>,
    ) -> bool {
        let mut state = self.state.write();
        let matches = state.merge_statuses[reduce_id as usize]
            .as_ref()
            .is_some_and(|s| {
                s.location() == block_manager
                    && map_index.map_or(true, |i| s.contains(i))
            });
        if matches {
            state.merge_statuses[reduce_id as usize] = None;
            state.num_available_merge_results -= 1;
            state.invalidate_merge_cache();
        }
        matches
    }

    /// Removes every map output and merge result whose location satisfies
    /// the filter. Returns `(maps_removed, merges_removed)`.
    pub fn remove_outputs_by_filter(
        &self,
        filter: impl Fn(&BlockManagerId) -> bool,
    ) -> (usize, usize) {
        let mut state = self.state.write();
        let mut maps_removed = 0;
        for entry in state.map_statuses.iter_mut() {
            if entry.as_ref().is_some_and(|s| filter(s.location())) {
                *entry = None;
                maps_removed += 1;
            }
        }
        if maps_removed > 0 {
            state.num_available_map_outputs -= maps_removed;
            state.invalidate_map_cache();
        }
        let mut merges_removed = 0;
        for entry in state.merge_statuses.iter_mut() {
            if entry.as_ref().is_some_and(|s| filter(s.location())) {
                *entry = None;
                merges_removed += 1;
            }
        }
        if merges_removed > 0 {
            state.num_available_merge_results -= merges_removed;
            state.invalidate_merge_cache();
        }
        (maps_removed, merges_removed)
    }

    /// Removes everything, keeping the shuffle registered.
    pub fn remove_all_map_outputs(&self) {
        let mut state = self.state.write();
        if state.num_available_map_outputs > 0 {
            state.map_statuses.iter_mut().for_each(|e| *e = None);
            state.num_available_map_outputs = 0;
            state.invalidate_map_cache();
        }
    }

    pub fn remove_all_merge_results(&self) {
        let mut state = self.state.write();
        if state.num_available_merge_results > 0 {
            state.merge_statuses.iter_mut().for_each(|e| *e = None);
            state.num_available_merge_results = 0;
            state.invalidate_merge_cache();
        }
    }

    pub fn num_available_map_outputs(&self) -> usize {
        self.state.read().num_available_map_outputs
    }

    pub fn num_available_merge_results(&self) -> usize {
        self.state.read().num_available_merge_results
    }

    /// Map indices with no registered output yet.
    pub fn find_missing_maps(&self) -> Vec<u32> {
        let state = self.state.read();
        state
            .map_statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn merge_status(&self, reduce_id: u32) -> Option<MergeStatus> {
        self.state.read().merge_statuses[reduce_id as usize].clone()
    }

    /// Runs `f` against the map-status array under the read lock.
    pub fn with_map_statuses<R>(&self, f: impl FnOnce(&[Option<MapStatus>]) -> R) -> R {
        f(&self.state.read().map_statuses)
    }

    /// Runs `f` against the merge-status array under the read lock.
    pub fn with_merge_statuses<R>(
        &self,
        f: impl FnOnce(&[Option<MergeStatus>]) -> R,
    ) -> R {
        f(&self.state.read().merge_statuses)
    }

    /// The serialized map-status payload, produced at most once per cache
    /// generation: concurrent callers race on an upgradable read, the winner
    /// serializes (possibly publishing a broadcast) and everyone else reuses
    /// the cached bytes.
    pub fn serialized_map_status(&self) -> Result<Bytes> {
        let state = self.state.upgradable_read();
        if let Some(bytes) = &state.cached_serialized_map {
            return Ok(bytes.clone());
        }
        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        if let Some(bytes) = &state.cached_serialized_map {
            return Ok(bytes.clone());
        }
        let serialized = serialize_output_statuses(
            &state.map_statuses,
            self.codec.as_ref(),
            self.min_broadcast_size,
            &self.broadcast_manager,
        )?;
        state.cached_serialized_map = Some(serialized.payload.clone());
        state.cached_broadcast_map = serialized.broadcast;
        Ok(serialized.payload)
    }

    /// The serialized merge-status payload; same caching discipline as
    /// [`ShuffleStatus::serialized_map_status`].
    pub fn serialized_merge_status(&self) -> Result<Bytes> {
        let state = self.state.upgradable_read();
        if let Some(bytes) = &state.cached_serialized_merge {
            return Ok(bytes.clone());
        }
        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        if let Some(bytes) = &state.cached_serialized_merge {
            return Ok(bytes.clone());
        }
        let serialized = serialize_output_statuses(
            &state.merge_statuses,
            self.codec.as_ref(),
            self.min_broadcast_size,
            &self.broadcast_manager,
        )?;
        state.cached_serialized_merge = Some(serialized.payload.clone());
        state.cached_broadcast_merge = serialized.broadcast;
        Ok(serialized.payload)
    }

    pub fn invalidate_serialized_map_output_status_cache(&self) {
        self.state.write().invalidate_map_cache();
    }

    pub fn invalidate_serialized_merge_output_status_cache(&self) {
        self.state.write().invalidate_merge_cache();
    }

    /// Whether either serialization cache currently owns a broadcast.
    pub fn has_cached_serialized_broadcast(&self) -> bool {
        let state = self.state.read();
        state.cached_broadcast_map.is_some() || state.cached_broadcast_merge.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use arbalest_core::broadcast::LocalBroadcastManager;
    use arbalest_core::error::ShuffleError;
    use arbalest_core::serde::codec_by_name;

    use super::*;

    fn new_status(num_maps: usize, num_reducers: usize) -> ShuffleStatus {
        ShuffleStatus::new(
            num_maps,
            num_reducers,
            Arc::new(LocalBroadcastManager::new()),
            codec_by_name("zstd"),
            usize::MAX,
        )
    }

    fn map_status(executor: &str, map_id: i64) -> MapStatus {
        MapStatus::new(
            BlockManagerId::new(executor, "host-a", 7337),
            &[100, 200],
            map_id,
            u64::MAX,
        )
    }

    #[test]
    fn counter_tracks_non_null_entries() {
        let status = new_status(3, 2);
        assert_eq!(status.num_available_map_outputs(), 0);

        status.add_map_output(0, map_status("a", 5));
        status.add_map_output(2, map_status("b", 6));
        assert_eq!(status.num_available_map_outputs(), 2);
        assert_eq!(status.find_missing_maps(), vec![1]);

        // overwriting the same slot must not double-count
        status.add_map_output(0, map_status("c", 7));
        assert_eq!(status.num_available_map_outputs(), 2);

        status.remove_map_output(0, &BlockManagerId::new("c", "host-a", 7337));
        assert_eq!(status.num_available_map_outputs(), 1);
        assert_eq!(status.find_missing_maps(), vec![0, 1]);
    }

    #[test]
    fn last_written_status_wins() {
        let status = new_status(1, 1);
        status.add_map_output(0, map_status("a", 5));
        status.add_map_output(0, map_status("b", 9));
        status.with_map_statuses(|statuses| {
            assert_eq!(statuses[0].as_ref().unwrap().map_id(), 9);
        });
    }

    #[test]
    fn removal_with_stale_address_is_a_no_op() {
        let status = new_status(1, 1);
        status.add_map_output(0, map_status("a", 5));
        status.remove_map_output(0, &BlockManagerId::new("other", "host-x", 1));
        assert_eq!(status.num_available_map_outputs(), 1);
        status.with_map_statuses(|statuses| assert!(statuses[0].is_some()));
    }

    #[test]
    fn update_map_output_moves_location_in_place() {
        let status = new_status(2, 1);
        status.add_map_output(0, map_status("a", 5));
        let moved = BlockManagerId::new("a", "host-b", 7337);
        status.update_map_output(5, moved.clone());
        status.with_map_statuses(|statuses| {
            assert_eq!(statuses[0].as_ref().unwrap().location(), &moved);
        });
        // unknown map id: logged, not an error
        status.update_map_output(42, moved);
    }

    #[derive(Debug)]
    struct CountingCodec(AtomicUsize);

    impl StatusCodec for CountingCodec {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(data.to_vec())
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    #[test]
    fn concurrent_serialization_happens_once() {
        let codec = Arc::new(CountingCodec(AtomicUsize::new(0)));
        let status = Arc::new(ShuffleStatus::new(
            50,
            4,
            Arc::new(LocalBroadcastManager::new()),
            codec.clone(),
            usize::MAX,
        ));
        for i in 0..50 {
            status.add_map_output(i, map_status(&format!("exec-{i}"), i as i64));
        }

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let status = status.clone();
                std::thread::spawn(move || status.serialized_map_status().unwrap())
            })
            .collect();
        let payloads: Vec<Bytes> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(codec.0.load(Ordering::SeqCst), 1);
        assert!(payloads.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn large_payloads_are_broadcast_and_invalidated() {
        let manager = Arc::new(LocalBroadcastManager::new());
        let status = ShuffleStatus::new(
            8,
            4,
            manager.clone(),
            codec_by_name("none"),
            1,
        );
        status.add_map_output(0, map_status("a", 5));

        let payload = status.serialized_map_status().unwrap();
        assert_eq!(payload[0], arbalest_core::serde::BROADCAST);
        assert!(status.has_cached_serialized_broadcast());
        assert_eq!(manager.num_values(), 1);

        status.invalidate_serialized_map_output_status_cache();
        assert!(!status.has_cached_serialized_broadcast());
        assert_eq!(manager.num_values(), 0);
    }

    #[test]
    fn broadcast_destroy_failures_are_swallowed() {
        #[derive(Debug)]
        struct FailingDestroy(LocalBroadcastManager);

        impl BroadcastManager for FailingDestroy {
            fn publish(&self, value: Bytes) -> Result<u64> {
                self.0.publish(value)
            }

            fn read(&self, id: u64) -> Result<Bytes> {
                self.0.read(id)
            }

            fn destroy(&self, _id: u64) -> Result<()> {
                Err(ShuffleError::General("destroy exploded".to_string()))
            }
        }

        let status = ShuffleStatus::new(
            1,
            1,
            Arc::new(FailingDestroy(LocalBroadcastManager::new())),
            codec_by_name("none"),
            1,
        );
        status.add_map_output(0, map_status("a", 5));
        status.serialized_map_status().unwrap();
        // must not panic or propagate
        status.invalidate_serialized_map_output_status_cache();
        assert!(!status.has_cached_serialized_broadcast());
    }
}
