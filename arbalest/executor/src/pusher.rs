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

//! Mapper-side block pusher.
//!
//! Once a map task has written its shuffle data file, the pusher slices the
//! file into push requests (contiguous runs of blocks bound for one merger)
//! and streams them out under flow control: a global cap on bytes and
//! requests in flight, and a per-destination cap on blocks in flight.
//! Requests that would overrun a destination are parked in per-destination
//! deferred queues and drained as capacity frees up.
//!
//! Failures are classified per destination: a connection failure blacks out
//! the destination for the lifetime of the pusher, a finalized-merge
//! rejection stops all further pushing, and anything else is left to the
//! transport's own retry policy.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use log::{debug, error, warn};
use parking_lot::Mutex;
use rand::seq::SliceRandom;

use arbalest_core::block_id::BlockId;
use arbalest_core::config::PushShuffleConfig;
use arbalest_core::error::{Result, ShuffleError};
use arbalest_core::status::BlockManagerId;
use arbalest_core::transport::{
    is_too_late_block_push, BlockPushClient, BlockPushListener,
};
use arbalest_core::ShuffleId;

use crate::dedicated_executor::DedicatedExecutor;

static PUSH_POOL: OnceLock<DedicatedExecutor> = OnceLock::new();

/// The process-wide push pool, created on first use and shared by every
/// pusher in the process.
fn push_pool(configured_threads: usize) -> &'static DedicatedExecutor {
    PUSH_POOL.get_or_init(|| {
        let num_threads = if configured_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            configured_threads
        };
        DedicatedExecutor::new("shuffle-block-push", num_threads)
    })
}

/// A run of contiguous blocks in the shuffle data file, all bound for one
/// merger.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub address: BlockManagerId,
    pub blocks: Vec<(BlockId, u64)>,
    /// File offset of the first block.
    pub offset: u64,
    data_file: Arc<PathBuf>,
}

impl PushRequest {
    pub fn size(&self) -> u64 {
        self.blocks.iter().map(|(_, size)| *size).sum()
    }
}

struct InFlightRequest {
    address: BlockManagerId,
    remaining: HashSet<String>,
}

#[derive(Default)]
struct PusherState {
    push_requests: VecDeque<PushRequest>,
    deferred_push_requests: HashMap<BlockManagerId, VecDeque<PushRequest>>,
    bytes_in_flight: u64,
    reqs_in_flight: usize,
    blocks_in_flight_per_address: HashMap<BlockManagerId, usize>,
    in_flight: HashMap<u64, InFlightRequest>,
    unreachable_block_managers: HashSet<BlockManagerId>,
    stop_pushing: bool,
    next_request_id: u64,
}

/// Pushes the shuffle output of map tasks to remote mergers.
///
/// All queue and counter state lives under one mutex; the dispatch pass
/// holds it for the whole drain, which is cheap since queue operations are.
/// Transport callbacks never touch the lock directly; they hop onto the
/// push pool first.
pub struct ShuffleBlockPusher {
    config: PushShuffleConfig,
    client: Arc<dyn BlockPushClient>,
    state: Mutex<PusherState>,
}

impl ShuffleBlockPusher {
    pub fn new(config: PushShuffleConfig, client: Arc<dyn BlockPushClient>) -> Arc<Self> {
        Arc::new(Self {
            config,
            client,
            state: Mutex::new(PusherState::default()),
        })
    }

    /// Slices a finished map task's data file into push requests and starts
    /// pushing them in randomized order.
    pub fn initiate_block_push(
        self: &Arc<Self>,
        data_file: &Path,
        partition_lengths: &[u64],
        shuffle_id: ShuffleId,
        map_index: u32,
        merger_locs: &[BlockManagerId],
    ) {
        if merger_locs.is_empty() {
            return;
        }
        let data_file = Arc::new(data_file.to_path_buf());
        let mut requests = self.prepare_block_push_requests(
            shuffle_id,
            map_index,
            &data_file,
            partition_lengths,
            merger_locs,
        );
        // concurrent mappers walk their requests in different orders so one
        // merger is not hammered by everyone at once
        requests.shuffle(&mut rand::thread_rng());
        {
            let mut state = self.state.lock();
            let before = requests.len();
            requests.retain(|r| !state.unreachable_block_managers.contains(&r.address));
            let dropped = before - requests.len();
            if dropped > 0 {
                warn!(
                    "Dropped {dropped} push requests of map {map_index} in shuffle \
                     {shuffle_id} targeting unreachable block managers"
                );
            }
            state.push_requests.extend(requests);
        }
        self.push_up_to_max();
    }

    /// Groups partitions into push requests in one pass over the partition
    /// lengths. Zero-sized blocks are skipped, blocks over the configured
    /// push limit are left for pull-based fallback (and break contiguity),
    /// and a request ends whenever the merger changes or a size/count limit
    /// would be exceeded.
    fn prepare_block_push_requests(
        &self,
        shuffle_id: ShuffleId,
        map_index: u32,
        data_file: &Arc<PathBuf>,
        partition_lengths: &[u64],
        merger_locs: &[BlockManagerId],
    ) -> Vec<PushRequest> {
        let num_partitions = partition_lengths.len();
        let num_mergers = merger_locs.len();
        let mut requests = Vec::new();
        let mut blocks: Vec<(BlockId, u64)> = Vec::new();
        let mut request_size: u64 = 0;
        let mut request_offset: u64 = 0;
        let mut request_merger: usize = 0;
        let mut offset: u64 = 0;

        let mut emit =
            |blocks: &mut Vec<(BlockId, u64)>, request_offset: u64, request_merger: usize| {
                if !blocks.is_empty() {
                    requests.push(PushRequest {
                        address: merger_locs[request_merger].clone(),
                        blocks: std::mem::take(blocks),
                        offset: request_offset,
                        data_file: data_file.clone(),
                    });
                }
            };

        for (reduce_id, &block_size) in partition_lengths.iter().enumerate() {
            // every mapper computes the same partition-to-merger assignment
            let merger_id = ((reduce_id as f64 / num_partitions as f64) * num_mergers as f64)
                as usize;
            let merger_id = merger_id.min(num_mergers - 1);
            if block_size == 0 {
                offset += block_size;
                continue;
            }
            if block_size > self.config.max_block_size_to_push {
                debug!(
                    "Block of partition {reduce_id} in shuffle {shuffle_id} is too large \
                     to push ({block_size} bytes), leaving it for pull-based fetch"
                );
                // the gap breaks contiguity, so the open request ends here
                emit(&mut blocks, request_offset, request_merger);
                request_size = 0;
                offset += block_size;
                continue;
            }
            if !blocks.is_empty()
                && (merger_id != request_merger
                    || request_size + block_size > self.config.max_block_batch_size
                    || blocks.len() >= self.config.max_blocks_in_flight_per_address)
            {
                emit(&mut blocks, request_offset, request_merger);
                request_size = 0;
            }
            if blocks.is_empty() {
                request_offset = offset;
                request_merger = merger_id;
            }
            blocks.push((
                BlockId::ShufflePush {
                    shuffle_id,
                    map_index,
                    reduce_id: reduce_id as u32,
                },
                block_size,
            ));
            request_size += block_size;
            offset += block_size;
        }
        emit(&mut blocks, request_offset, request_merger);
        requests
    }

    /// Dispatches as many queued requests as flow control admits: deferred
    /// queues first, then the main queue, deferring requests whose
    /// destination is saturated.
    pub fn push_up_to_max(self: &Arc<Self>) {
        let to_send = {
            let mut state = self.state.lock();
            let mut to_send: Vec<(u64, PushRequest)> = Vec::new();

            let addresses: Vec<BlockManagerId> =
                state.deferred_push_requests.keys().cloned().collect();
            for address in addresses {
                while !state.stop_pushing {
                    let Some((front_size, front_blocks)) = state
                        .deferred_push_requests
                        .get(&address)
                        .and_then(|q| q.front())
                        .map(|r| (r.size(), r.blocks.len()))
                    else {
                        break;
                    };
                    if !self.is_pushable(&state, front_size)
                        || self.is_maxed_out(&state, &address, front_blocks)
                    {
                        break;
                    }
                    let request = state
                        .deferred_push_requests
                        .get_mut(&address)
                        .and_then(|q| q.pop_front())
                        .expect("front was just observed");
                    debug!("Processing deferred push request for {address} with {front_blocks} blocks");
                    let request_id = Self::admit(&mut state, &request);
                    to_send.push((request_id, request));
                }
                if state
                    .deferred_push_requests
                    .get(&address)
                    .is_some_and(|q| q.is_empty())
                {
                    state.deferred_push_requests.remove(&address);
                }
            }

            while !state.stop_pushing {
                let Some(front_size) = state.push_requests.front().map(|r| r.size()) else {
                    break;
                };
                if !self.is_pushable(&state, front_size) {
                    break;
                }
                let request = state
                    .push_requests
                    .pop_front()
                    .expect("front was just observed");
                if self.is_maxed_out(&state, &request.address, request.blocks.len()) {
                    debug!(
                        "Deferring push request for {} with {} blocks",
                        request.address,
                        request.blocks.len()
                    );
                    state
                        .deferred_push_requests
                        .entry(request.address.clone())
                        .or_default()
                        .push_back(request);
                } else {
                    let request_id = Self::admit(&mut state, &request);
                    to_send.push((request_id, request));
                }
            }
            to_send
        };

        for (request_id, request) in to_send {
            self.send_request(request_id, request);
        }
    }

    fn is_pushable(&self, state: &PusherState, front_size: u64) -> bool {
        state.bytes_in_flight == 0
            || (state.reqs_in_flight + 1 <= self.config.max_reqs_in_flight
                && state.bytes_in_flight + front_size <= self.config.max_bytes_in_flight)
    }

    fn is_maxed_out(
        &self,
        state: &PusherState,
        address: &BlockManagerId,
        num_blocks: usize,
    ) -> bool {
        state
            .blocks_in_flight_per_address
            .get(address)
            .copied()
            .unwrap_or(0)
            + num_blocks
            > self.config.max_blocks_in_flight_per_address
    }

    fn admit(state: &mut PusherState, request: &PushRequest) -> u64 {
        state.bytes_in_flight += request.size();
        state.reqs_in_flight += 1;
        *state
            .blocks_in_flight_per_address
            .entry(request.address.clone())
            .or_default() += request.blocks.len();
        let request_id = state.next_request_id;
        state.next_request_id += 1;
        state.in_flight.insert(
            request_id,
            InFlightRequest {
                address: request.address.clone(),
                remaining: request
                    .blocks
                    .iter()
                    .map(|(block_id, _)| block_id.to_string())
                    .collect(),
            },
        );
        request_id
    }

    /// Loads the request's file segment once and hands per-block views of it
    /// to the transport.
    fn send_request(self: &Arc<Self>, request_id: u64, request: PushRequest) {
        debug!(
            "Sending {} shuffle blocks ({} bytes) to {}",
            request.blocks.len(),
            request.size(),
            request.address
        );
        let listener = Arc::new(PushResultListener {
            pusher: self.clone(),
            request_id,
            block_sizes: request
                .blocks
                .iter()
                .map(|(block_id, size)| (block_id.to_string(), *size))
                .collect(),
        });

        let segment = match read_file_segment(&request.data_file, request.offset, request.size())
        {
            Ok(segment) => segment,
            Err(e) => {
                error!(
                    "Failed to read shuffle data from {}: {e}",
                    request.data_file.display()
                );
                for (block_id, _) in &request.blocks {
                    listener.on_block_push_failure(
                        &block_id.to_string(),
                        ShuffleError::IoError(std::io::Error::other(e.to_string())),
                    );
                }
                return;
            }
        };

        let mut block_ids = Vec::with_capacity(request.blocks.len());
        let mut buffers = Vec::with_capacity(request.blocks.len());
        let mut position = 0usize;
        for (block_id, size) in &request.blocks {
            buffers.push(segment.slice(position..position + *size as usize));
            position += *size as usize;
            block_ids.push(block_id.to_string());
        }

        let client = self.client.clone();
        let address = request.address.clone();
        let pool = push_pool(self.config.num_push_threads);
        pool.spawn(async move {
            if let Err(e) = client
                .push_blocks(
                    &address.host,
                    address.port,
                    block_ids.clone(),
                    buffers,
                    listener.clone(),
                )
                .await
            {
                warn!("Failed to push blocks to {address}: {e}");
                for block_id in block_ids {
                    let error = per_block_error(&e, &block_id);
                    listener.on_block_push_failure(&block_id, error);
                }
            }
        });
    }

    /// Settles one block's outcome and reports whether another dispatch pass
    /// is worthwhile.
    fn update_state_and_check_if_push_more(
        &self,
        request_id: u64,
        block_id: &str,
        bytes_pushed: u64,
        failure: Option<ShuffleError>,
    ) -> bool {
        let mut state = self.state.lock();
        let (address, request_complete) = match state.in_flight.get_mut(&request_id) {
            Some(entry) => {
                if !entry.remaining.remove(block_id) {
                    warn!("Received a push result for untracked block {block_id}");
                    return false;
                }
                (entry.address.clone(), entry.remaining.is_empty())
            }
            None => {
                warn!("Received a push result for untracked request {request_id}");
                return false;
            }
        };
        if request_complete {
            state.in_flight.remove(&request_id);
            state.reqs_in_flight -= 1;
        }
        state.bytes_in_flight -= bytes_pushed;
        if let Some(count) = state.blocks_in_flight_per_address.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                state.blocks_in_flight_per_address.remove(&address);
            }
        }

        if let Some(error) = &failure {
            if error.is_connection_failure()
                && !state.unreachable_block_managers.contains(&address)
            {
                state.unreachable_block_managers.insert(address.clone());
                let before = state.push_requests.len();
                state.push_requests.retain(|r| r.address != address);
                let mut dropped = before - state.push_requests.len();
                if let Some(queue) = state.deferred_push_requests.remove(&address) {
                    dropped += queue.len();
                }
                warn!(
                    "Connection to {address} failed; marked it unreachable and dropped \
                     {dropped} queued block push requests"
                );
            }
            if is_too_late_block_push(error) {
                debug!("Stop pushing: the merge for {block_id} has been finalized");
                state.stop_pushing = true;
                return false;
            }
            debug!("Push of block {block_id} failed, the transport may retry it: {error}");
        }

        request_complete
            && (!state.push_requests.is_empty() || !state.deferred_push_requests.is_empty())
    }

    /// Whether a finalized-merge rejection has stopped this pusher.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stop_pushing
    }

    /// Destinations blacked out by connection failures. The set persists for
    /// the lifetime of the pusher.
    pub fn unreachable_block_managers(&self) -> HashSet<BlockManagerId> {
        self.state.lock().unreachable_block_managers.clone()
    }
}

/// Routes per-block outcomes from transport threads onto the push pool,
/// where the state update (and any follow-up dispatch) runs.
struct PushResultListener {
    pusher: Arc<ShuffleBlockPusher>,
    request_id: u64,
    block_sizes: HashMap<String, u64>,
}

impl PushResultListener {
    fn submit(&self, block_id: String, failure: Option<ShuffleError>) {
        let pusher = self.pusher.clone();
        let request_id = self.request_id;
        let bytes_pushed = self.block_sizes.get(&block_id).copied().unwrap_or(0);
        push_pool(pusher.config.num_push_threads).spawn(async move {
            if pusher.update_state_and_check_if_push_more(
                request_id,
                &block_id,
                bytes_pushed,
                failure,
            ) {
                pusher.push_up_to_max();
            }
        });
    }
}

impl BlockPushListener for PushResultListener {
    fn on_block_push_success(&self, block_id: &str) {
        self.submit(block_id.to_string(), None);
    }

    fn on_block_push_failure(&self, block_id: &str, error: ShuffleError) {
        self.submit(block_id.to_string(), Some(error));
    }
}

/// Reproduces a request-level transport error for one block, preserving the
/// connection-failure classification.
fn per_block_error(error: &ShuffleError, block_id: &str) -> ShuffleError {
    match error {
        ShuffleError::ConnectionFailed(message) => {
            ShuffleError::ConnectionFailed(message.clone())
        }
        other => ShuffleError::BlockPushFailure {
            block_id: block_id.to_string(),
            message: other.to_string(),
        },
    }
}

fn read_file_segment(path: &Path, offset: u64, len: u64) -> Result<Bytes> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = vec![0u8; len as usize];
    file.read_exact(&mut buffer)?;
    Ok(Bytes::from(buffer))
}
