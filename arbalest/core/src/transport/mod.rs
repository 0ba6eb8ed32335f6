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

//! Transport seams.
//!
//! The actual RPC/transport implementation lives outside this crate. These
//! traits are the complete surface the shuffle core needs from it: pushing
//! blocks to a merger, opening block streams for fetches, and asking the
//! driver-side tracker for serialized statuses.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, ShuffleError};
use crate::transport::protocol::{BlockTransferMessage, StreamHandle};
use crate::ShuffleId;

pub mod protocol;

/// Appended by a merger to push-rejection messages once the merge for a
/// shuffle partition has been finalized. A pusher seeing this marker stops
/// pushing altogether: the merger will accept nothing further.
pub const TOO_LATE_BLOCK_PUSH_MESSAGE_SUFFIX: &str =
    "received after merged shuffle is finalized";

/// Whether a push failure tells us the merge has been finalized.
pub fn is_too_late_block_push(error: &ShuffleError) -> bool {
    match error {
        ShuffleError::BlockPushFailure { message, .. } => {
            message.contains(TOO_LATE_BLOCK_PUSH_MESSAGE_SUFFIX)
        }
        _ => false,
    }
}

/// Receives the outcome of individual block pushes.
///
/// Callbacks run on transport threads. Implementations must not do blocking
/// work or re-enter the pusher directly; they hand off to the push pool.
pub trait BlockPushListener: Send + Sync {
    fn on_block_push_success(&self, block_id: &str);

    fn on_block_push_failure(&self, block_id: &str, error: ShuffleError);
}

/// Mapper-side transport: streams blocks to a remote merger.
#[async_trait]
pub trait BlockPushClient: Send + Sync {
    /// Pushes `buffers[i]` as `block_ids[i]` to the given merger. Outcomes
    /// are reported per block through the listener; the returned future
    /// resolves once all pushes have been handed to the transport.
    async fn push_blocks(
        &self,
        host: &str,
        port: u16,
        block_ids: Vec<String>,
        buffers: Vec<Bytes>,
        listener: Arc<dyn BlockPushListener>,
    ) -> Result<()>;
}

/// Receives fetched blocks on the reducer side.
pub trait BlockFetchListener: Send + Sync {
    fn on_block_fetch_success(&self, block_id: &str, data: Bytes);

    fn on_block_fetch_failure(&self, block_id: &str, error: &ShuffleError);
}

/// Reducer-side transport: opens a block stream on a remote block manager
/// and pulls its chunks.
#[async_trait]
pub trait BlockTransferClient: Send + Sync {
    /// Sends an open/fetch message and returns the stream handle to pull
    /// chunks from.
    async fn open_block_stream(
        &self,
        message: BlockTransferMessage,
    ) -> Result<StreamHandle>;

    /// Fetches one chunk of an open stream.
    async fn fetch_chunk(&self, stream_id: u64, chunk_index: u32) -> Result<Bytes>;
}

/// Requests served by the driver-side tracker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerRequest {
    GetMapOutputStatuses { shuffle_id: ShuffleId },
    GetMergeResultStatuses { shuffle_id: ShuffleId },
    StopMapOutputTracker,
}

/// Replies from the driver-side tracker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerResponse {
    /// Tag-prefixed serialized status array (see [`crate::serde`]).
    SerializedStatuses(Bytes),
    /// Acknowledgement of [`TrackerRequest::StopMapOutputTracker`].
    Stopped(bool),
}

/// Executor-side handle on the driver's tracker endpoint. Asks use the
/// transport's configured timeout; a timeout surfaces as
/// [`ShuffleError::RpcFailure`] and callers treat it as a fetch failure.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn ask(&self, request: TrackerRequest) -> Result<TrackerResponse>;
}
