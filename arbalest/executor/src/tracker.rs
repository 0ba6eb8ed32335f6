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

//! Executor-side cache of map-output and merge-result statuses.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use roaring::RoaringBitmap;

use arbalest_core::broadcast::BroadcastManager;
use arbalest_core::config::TrackerConfig;
use arbalest_core::error::{Result, ShuffleError};
use arbalest_core::fetch_plan::{
    convert_map_statuses, get_map_sizes_for_merge_result, BlocksByAddress,
};
use arbalest_core::serde::{codec_by_name, deserialize_output_statuses, StatusCodec};
use arbalest_core::status::{MapStatus, MergeStatus};
use arbalest_core::transport::{TrackerClient, TrackerRequest, TrackerResponse};
use arbalest_core::ShuffleId;

use crate::keyed_lock::KeyedLock;

/// Executor-side client of the driver's map-output tracker.
///
/// Statuses are fetched lazily per shuffle id and cached until the driver's
/// epoch moves past the locally known one. Concurrent first-time fetches of
/// one shuffle are coalesced into a single RPC round-trip by a keyed lock.
pub struct MapOutputTrackerWorker {
    config: TrackerConfig,
    client: Arc<dyn TrackerClient>,
    broadcast_manager: Arc<dyn BroadcastManager>,
    codec: Arc<dyn StatusCodec>,
    map_statuses: DashMap<ShuffleId, Arc<Vec<Option<MapStatus>>>>,
    merge_statuses: DashMap<ShuffleId, Arc<Vec<Option<MergeStatus>>>>,
    fetch_locks: KeyedLock,
    epoch: Mutex<u64>,
}

impl MapOutputTrackerWorker {
    pub fn new(
        config: TrackerConfig,
        client: Arc<dyn TrackerClient>,
        broadcast_manager: Arc<dyn BroadcastManager>,
    ) -> Self {
        let codec = codec_by_name(&config.map_status_compression_codec);
        Self {
            config,
            client,
            broadcast_manager,
            codec,
            map_statuses: DashMap::new(),
            merge_statuses: DashMap::new(),
            fetch_locks: KeyedLock::default(),
            epoch: Mutex::new(0),
        }
    }

    /// Per-destination fetch plan for the reduce partitions
    /// `[start_partition, end_partition)` restricted to maps
    /// `[start_map_index, end_map_index)`.
    pub async fn get_map_sizes_by_executor_id(
        &self,
        shuffle_id: ShuffleId,
        start_map_index: u32,
        end_map_index: u32,
        start_partition: u32,
        end_partition: u32,
    ) -> Result<BlocksByAddress> {
        let (map_statuses, merge_statuses) = self.get_statuses(shuffle_id).await?;
        let result = convert_map_statuses(
            shuffle_id,
            start_partition,
            end_partition,
            &map_statuses,
            start_map_index,
            end_map_index,
            merge_statuses.as_deref().map(|v| &v[..]),
        );
        self.purge_on_metadata_failure(&result);
        result
    }

    /// Fallback plan after a failed merged fetch: the original blocks behind
    /// the merged partition, or behind one chunk of it when `chunk_tracker`
    /// is given.
    pub async fn get_map_sizes_for_merge_result(
        &self,
        shuffle_id: ShuffleId,
        partition_id: u32,
        chunk_tracker: Option<&RoaringBitmap>,
    ) -> Result<BlocksByAddress> {
        let (map_statuses, merge_statuses) = self.get_statuses(shuffle_id).await?;
        let merge_status = merge_statuses
            .as_ref()
            .and_then(|statuses| statuses.get(partition_id as usize))
            .and_then(|s| s.as_ref());
        let result = get_map_sizes_for_merge_result(
            shuffle_id,
            partition_id,
            &map_statuses,
            merge_status,
            chunk_tracker,
        );
        self.purge_on_metadata_failure(&result);
        result
    }

    /// Adopts a newer driver epoch, dropping every cached status.
    pub fn update_epoch(&self, new_epoch: u64) {
        let mut epoch = self.epoch.lock();
        if new_epoch > *epoch {
            info!("Updating epoch to {new_epoch} and clearing cache");
            *epoch = new_epoch;
            self.map_statuses.clear();
            self.merge_statuses.clear();
        }
    }

    pub fn get_epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    /// Drops the cached statuses of one shuffle.
    pub fn unregister_shuffle(&self, shuffle_id: ShuffleId) {
        self.map_statuses.remove(&shuffle_id);
        self.merge_statuses.remove(&shuffle_id);
    }

    async fn get_statuses(
        &self,
        shuffle_id: ShuffleId,
    ) -> Result<(
        Arc<Vec<Option<MapStatus>>>,
        Option<Arc<Vec<Option<MergeStatus>>>>,
    )> {
        let fetch_merge = self.config.push_based_shuffle_enabled;
        if let Some(statuses) = self.cached_statuses(shuffle_id, fetch_merge) {
            return Ok(statuses);
        }

        // one fetch per shuffle id at a time; losers of the race hit the
        // cache filled in by the winner
        let _guard = self.fetch_locks.lock(shuffle_id).await;
        if let Some(statuses) = self.cached_statuses(shuffle_id, fetch_merge) {
            return Ok(statuses);
        }
        debug!("Don't have map outputs for shuffle {shuffle_id}, fetching them");

        let map_statuses = match self.map_statuses.get(&shuffle_id) {
            Some(cached) => cached.value().clone(),
            None => {
                let payload = self
                    .ask_statuses(TrackerRequest::GetMapOutputStatuses { shuffle_id })
                    .await?;
                let statuses: Vec<Option<MapStatus>> = deserialize_output_statuses(
                    &payload,
                    self.codec.as_ref(),
                    self.broadcast_manager.as_ref(),
                )?;
                let statuses = Arc::new(statuses);
                self.map_statuses.insert(shuffle_id, statuses.clone());
                statuses
            }
        };

        let merge_statuses = if fetch_merge {
            match self.merge_statuses.get(&shuffle_id) {
                Some(cached) => Some(cached.value().clone()),
                None => {
                    let payload = self
                        .ask_statuses(TrackerRequest::GetMergeResultStatuses { shuffle_id })
                        .await?;
                    let statuses: Vec<Option<MergeStatus>> = deserialize_output_statuses(
                        &payload,
                        self.codec.as_ref(),
                        self.broadcast_manager.as_ref(),
                    )?;
                    let statuses = Arc::new(statuses);
                    self.merge_statuses.insert(shuffle_id, statuses.clone());
                    Some(statuses)
                }
            }
        } else {
            None
        };

        Ok((map_statuses, merge_statuses))
    }

    fn cached_statuses(
        &self,
        shuffle_id: ShuffleId,
        fetch_merge: bool,
    ) -> Option<(
        Arc<Vec<Option<MapStatus>>>,
        Option<Arc<Vec<Option<MergeStatus>>>>,
    )> {
        let map_statuses = self.map_statuses.get(&shuffle_id)?.value().clone();
        if !fetch_merge {
            return Some((map_statuses, None));
        }
        let merge_statuses = self.merge_statuses.get(&shuffle_id)?.value().clone();
        Some((map_statuses, Some(merge_statuses)))
    }

    async fn ask_statuses(&self, request: TrackerRequest) -> Result<bytes::Bytes> {
        match self.client.ask(request).await? {
            TrackerResponse::SerializedStatuses(payload) => Ok(payload),
            other => Err(ShuffleError::RpcFailure(format!(
                "unexpected tracker response: {other:?}"
            ))),
        }
    }

    /// A metadata failure means the cached view was stale or partial; drop
    /// everything so the next attempt refetches.
    fn purge_on_metadata_failure<T>(&self, result: &Result<T>) {
        if let Err(ShuffleError::MetadataFetchFailed { shuffle_id, .. }) = result {
            info!("Metadata fetch failed for shuffle {shuffle_id}, clearing worker caches");
            self.map_statuses.clear();
            self.merge_statuses.clear();
        }
    }
}
