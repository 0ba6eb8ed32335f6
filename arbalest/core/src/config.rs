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

//! Arbalest configuration
//!
//! Configuration is carried as plain structs with builder-style `with_*`
//! methods. The dotted key constants are the names under which the
//! surrounding engine exposes these settings; the structs are what the core
//! consumes.

use crate::error::{Result, ShuffleError};

pub const SHUFFLE_PUSH_ENABLED: &str = "shuffle.push.enabled";
/// Individual blocks larger than this are never pushed (KiB).
pub const SHUFFLE_PUSH_MAX_BLOCK_SIZE_TO_PUSH: &str = "shuffle.push.maxBlockSizeToPush";
/// Upper bound on the bytes carried by one push request (MiB).
pub const SHUFFLE_PUSH_MAX_BLOCK_BATCH_SIZE: &str = "shuffle.push.maxBlockBatchSize";
/// Global cap on bytes in flight to all destinations (MiB).
pub const REDUCER_MAX_SIZE_IN_FLIGHT: &str = "reducer.maxSizeInFlight";
pub const REDUCER_MAX_REQS_IN_FLIGHT: &str = "reducer.maxReqsInFlight";
pub const REDUCER_MAX_BLOCKS_IN_FLIGHT_PER_ADDRESS: &str =
    "reducer.maxBlocksInFlightPerAddress";
/// Serialized status payloads at or above this size travel via broadcast (bytes).
pub const SHUFFLE_MAP_OUTPUT_MIN_SIZE_FOR_BROADCAST: &str =
    "shuffle.mapOutput.minSizeForBroadcast";
pub const SHUFFLE_MAP_OUTPUT_DISPATCHER_NUM_THREADS: &str =
    "shuffle.mapOutput.dispatcher.numThreads";
pub const SHUFFLE_NUM_PUSH_THREADS: &str = "shuffle.numPushThreads";
pub const SHUFFLE_REDUCE_LOCALITY_ENABLED: &str = "shuffle.reduceLocality.enabled";
pub const SHUFFLE_MAP_OUTPUT_PARALLEL_AGGREGATION_THRESHOLD: &str =
    "shuffle.mapOutput.parallelAggregationThreshold";
pub const SHUFFLE_MAP_STATUS_COMPRESSION_CODEC: &str =
    "shuffle.mapStatus.compressionCodec";
/// Blocks at or above this size keep an exact size in highly compressed
/// statuses instead of the average (bytes).
pub const SHUFFLE_ACCURATE_BLOCK_THRESHOLD: &str = "shuffle.accurateBlockThreshold";
pub const SHUFFLE_USE_OLD_FETCH_PROTOCOL: &str = "shuffle.useOldFetchProtocol";
pub const RPC_MESSAGE_MAX_SIZE: &str = "rpc.message.maxSize";

/// Share of map outputs a single location must hold before it is reported as
/// a preferred location for a reduce task.
pub const REDUCER_PREF_LOCS_FRACTION: f64 = 0.2;
/// Locality hints are skipped entirely once a shuffle has this many maps.
pub const SHUFFLE_PREF_MAP_THRESHOLD: usize = 1000;
/// Locality hints are skipped entirely once a shuffle has this many reducers.
pub const SHUFFLE_PREF_REDUCE_THRESHOLD: usize = 1000;

/// Configuration shared by the driver-side tracker master and the
/// executor-side tracker worker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Whether push-based shuffle is enabled. Merge statuses are tracked and
    /// fetched only when this is set.
    pub push_based_shuffle_enabled: bool,
    /// Serialized status payloads at or above this size are published through
    /// the broadcast mechanism instead of travelling inline (bytes).
    pub min_broadcast_size: usize,
    /// The maximum RPC message size (bytes). `min_broadcast_size` must not
    /// exceed it.
    pub max_rpc_message_size: usize,
    /// Number of dedicated dispatcher threads serving status requests.
    pub dispatcher_num_threads: usize,
    /// Whether reduce-task locality hints are computed at all.
    pub reduce_locality_enabled: bool,
    /// Once `num_maps * num_reducers` exceeds this, shuffle statistics are
    /// aggregated in parallel.
    pub parallel_aggregation_threshold: u64,
    /// Name of the codec compressing serialized statuses.
    pub map_status_compression_codec: String,
    /// Blocks at or above this size keep exact sizes in highly compressed map
    /// statuses (bytes).
    pub accurate_block_threshold: u64,
    /// Use the legacy `OpenBlocks` fetch protocol for every fetch.
    pub use_old_fetch_protocol: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            push_based_shuffle_enabled: false,
            min_broadcast_size: 512 * 1024,
            max_rpc_message_size: 128 * 1024 * 1024,
            dispatcher_num_threads: 8,
            reduce_locality_enabled: true,
            parallel_aggregation_threshold: 10_000_000,
            map_status_compression_codec: "zstd".to_string(),
            accurate_block_threshold: 100 * 1024 * 1024,
            use_old_fetch_protocol: false,
        }
    }
}

impl TrackerConfig {
    /// Validates settings that would otherwise fail far from their origin.
    pub fn validate(&self) -> Result<()> {
        if self.min_broadcast_size > self.max_rpc_message_size {
            return Err(ShuffleError::Configuration(format!(
                "{SHUFFLE_MAP_OUTPUT_MIN_SIZE_FOR_BROADCAST} ({}) must not exceed \
                 {RPC_MESSAGE_MAX_SIZE} ({})",
                self.min_broadcast_size, self.max_rpc_message_size
            )));
        }
        if self.dispatcher_num_threads == 0 {
            return Err(ShuffleError::Configuration(format!(
                "{SHUFFLE_MAP_OUTPUT_DISPATCHER_NUM_THREADS} must be positive"
            )));
        }
        Ok(())
    }

    pub fn with_push_based_shuffle_enabled(mut self, enabled: bool) -> Self {
        self.push_based_shuffle_enabled = enabled;
        self
    }

    pub fn with_min_broadcast_size(mut self, bytes: usize) -> Self {
        self.min_broadcast_size = bytes;
        self
    }

    pub fn with_max_rpc_message_size(mut self, bytes: usize) -> Self {
        self.max_rpc_message_size = bytes;
        self
    }

    pub fn with_dispatcher_num_threads(mut self, threads: usize) -> Self {
        self.dispatcher_num_threads = threads;
        self
    }

    pub fn with_reduce_locality_enabled(mut self, enabled: bool) -> Self {
        self.reduce_locality_enabled = enabled;
        self
    }

    pub fn with_parallel_aggregation_threshold(mut self, threshold: u64) -> Self {
        self.parallel_aggregation_threshold = threshold;
        self
    }

    pub fn with_map_status_compression_codec(
        mut self,
        codec: impl Into<String>,
    ) -> Self {
        self.map_status_compression_codec = codec.into();
        self
    }

    pub fn with_accurate_block_threshold(mut self, bytes: u64) -> Self {
        self.accurate_block_threshold = bytes;
        self
    }

    pub fn with_use_old_fetch_protocol(mut self, enabled: bool) -> Self {
        self.use_old_fetch_protocol = enabled;
        self
    }
}

/// Flow-control knobs for the mapper-side block pusher.
#[derive(Debug, Clone)]
pub struct PushShuffleConfig {
    /// Individual blocks larger than this are left for pull-based fallback
    /// (bytes).
    pub max_block_size_to_push: u64,
    /// Upper bound on the bytes grouped into one push request (bytes).
    pub max_block_batch_size: u64,
    /// Global cap on bytes in flight across all destinations (bytes).
    pub max_bytes_in_flight: u64,
    /// Global cap on outstanding push requests.
    pub max_reqs_in_flight: usize,
    /// Cap on blocks in flight towards a single destination.
    pub max_blocks_in_flight_per_address: usize,
    /// Size of the process-wide push thread pool; 0 means one thread per
    /// available core.
    pub num_push_threads: usize,
}

impl Default for PushShuffleConfig {
    fn default() -> Self {
        Self {
            max_block_size_to_push: 1024 * 1024,
            max_block_batch_size: 3 * 1024 * 1024,
            max_bytes_in_flight: 48 * 1024 * 1024,
            max_reqs_in_flight: usize::MAX,
            max_blocks_in_flight_per_address: usize::MAX,
            num_push_threads: 0,
        }
    }
}

impl PushShuffleConfig {
    pub fn with_max_block_size_to_push(mut self, bytes: u64) -> Self {
        self.max_block_size_to_push = bytes;
        self
    }

    pub fn with_max_block_batch_size(mut self, bytes: u64) -> Self {
        self.max_block_batch_size = bytes;
        self
    }

    pub fn with_max_bytes_in_flight(mut self, bytes: u64) -> Self {
        self.max_bytes_in_flight = bytes;
        self
    }

    pub fn with_max_reqs_in_flight(mut self, reqs: usize) -> Self {
        self.max_reqs_in_flight = reqs;
        self
    }

    pub fn with_max_blocks_in_flight_per_address(mut self, blocks: usize) -> Self {
        self.max_blocks_in_flight_per_address = blocks;
        self
    }

    pub fn with_num_push_threads(mut self, threads: usize) -> Self {
        self.num_push_threads = threads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_size_must_fit_in_rpc_message() {
        let config = TrackerConfig::default()
            .with_min_broadcast_size(256)
            .with_max_rpc_message_size(128);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ShuffleError::Configuration(_)));

        let config = TrackerConfig::default()
            .with_min_broadcast_size(128)
            .with_max_rpc_message_size(128);
        config.validate().unwrap();
    }

    #[test]
    fn dispatcher_needs_at_least_one_thread() {
        let config = TrackerConfig::default().with_dispatcher_num_threads(0);
        assert!(config.validate().is_err());
    }
}
