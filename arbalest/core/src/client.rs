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

//! Client API for fetching blocks from block managers and mergers.
//!
//! [`build_block_transfer_message`] turns an array of block-id strings into
//! the wire message that opens the stream; [`OneForOneBlockFetcher`] drives
//! the stream, interpreting each received chunk as one whole block.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use log::{error, trace};

use crate::block_id::BlockId;
use crate::error::{Result, ShuffleError};
use crate::transport::protocol::{
    BlockTransferMessage, ChunkIdGroup, FetchShuffleBlockChunks, FetchShuffleBlocks,
    OpenBlocks, ReduceIdGroup,
};
use crate::transport::{BlockFetchListener, BlockTransferClient};

const SHUFFLE_BLOCK_ID_PREFIX: &str = "shuffle_";
const SHUFFLE_CHUNK_ID_PREFIX: &str = "shuffleChunk_";

/// Whether every id is an unmerged shuffle block or a merged shuffle chunk.
/// One request only ever carries one of the two kinds, but the cheap prefix
/// scan does not need to know which.
fn are_shuffle_blocks_or_chunks(block_ids: &[String]) -> bool {
    block_ids.iter().all(|id| {
        id.starts_with(SHUFFLE_BLOCK_ID_PREFIX) || id.starts_with(SHUFFLE_CHUNK_ID_PREFIX)
    })
}

/// Builds the message opening a block stream for the given block ids.
///
/// With the old fetch protocol, or for ids that are not shuffle blocks, this
/// is a plain [`OpenBlocks`] carrying the raw strings. Otherwise the ids are
/// parsed and grouped into [`FetchShuffleBlocks`] (per map id, with batched
/// ranges stored as `[start, end)` pairs) or [`FetchShuffleBlockChunks`]
/// (per reduce id). All ids in one request must belong to one shuffle.
pub fn build_block_transfer_message(
    app_id: &str,
    exec_id: &str,
    block_ids: &[String],
    use_old_fetch_protocol: bool,
) -> Result<BlockTransferMessage> {
    if block_ids.is_empty() {
        return Err(ShuffleError::IllegalState(
            "zero-sized block ids array".to_string(),
        ));
    }
    if use_old_fetch_protocol || !are_shuffle_blocks_or_chunks(block_ids) {
        return Ok(BlockTransferMessage::OpenBlocks(OpenBlocks {
            app_id: app_id.to_string(),
            exec_id: exec_id.to_string(),
            block_ids: block_ids.to_vec(),
        }));
    }
    if block_ids[0].starts_with(SHUFFLE_CHUNK_ID_PREFIX) {
        build_fetch_shuffle_block_chunks(app_id, exec_id, block_ids)
    } else {
        build_fetch_shuffle_blocks(app_id, exec_id, block_ids)
    }
}

fn check_shuffle_id(expected: u32, id: &BlockId, raw: &str) -> Result<()> {
    if id.shuffle_id() != expected {
        return Err(ShuffleError::IllegalState(format!(
            "expected shuffleId={expected}, got: {raw}"
        )));
    }
    Ok(())
}

fn build_fetch_shuffle_block_chunks(
    app_id: &str,
    exec_id: &str,
    block_ids: &[String],
) -> Result<BlockTransferMessage> {
    let mut shuffle_id = None;
    let mut chunk_ids_by_reduce_id: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for raw in block_ids {
        let block_id = BlockId::from_str(raw)?;
        match block_id {
            BlockId::ShuffleChunk {
                shuffle_id: s,
                reduce_id,
                chunk_id,
            } => {
                let expected = *shuffle_id.get_or_insert(s);
                check_shuffle_id(expected, &block_id, raw)?;
                chunk_ids_by_reduce_id.entry(reduce_id).or_default().push(chunk_id);
            }
            _ => {
                return Err(ShuffleError::IllegalState(format!(
                    "expected a shuffle chunk id, got: {raw}"
                )))
            }
        }
    }
    let (reduce_ids, chunk_ids): (Vec<u32>, Vec<ChunkIdGroup>) = chunk_ids_by_reduce_id
        .into_iter()
        .map(|(reduce_id, ids)| (reduce_id, ChunkIdGroup { ids }))
        .unzip();
    Ok(BlockTransferMessage::FetchShuffleBlockChunks(
        FetchShuffleBlockChunks {
            app_id: app_id.to_string(),
            exec_id: exec_id.to_string(),
            shuffle_id: shuffle_id.expect("block_ids is non-empty"),
            reduce_ids,
            chunk_ids,
        },
    ))
}

fn build_fetch_shuffle_blocks(
    app_id: &str,
    exec_id: &str,
    block_ids: &[String],
) -> Result<BlockTransferMessage> {
    let batch_fetch_enabled = matches!(
        BlockId::from_str(&block_ids[0])?,
        BlockId::ShuffleBatch { .. }
    );
    let mut shuffle_id = None;
    let mut reduce_ids_by_map_id: BTreeMap<i64, Vec<u32>> = BTreeMap::new();
    for raw in block_ids {
        let block_id = BlockId::from_str(raw)?;
        match block_id {
            BlockId::Shuffle {
                shuffle_id: s,
                map_id,
                reduce_id,
            } if !batch_fetch_enabled => {
                let expected = *shuffle_id.get_or_insert(s);
                check_shuffle_id(expected, &block_id, raw)?;
                reduce_ids_by_map_id.entry(map_id).or_default().push(reduce_id);
            }
            // batched ids store the [start, end) range as consecutive pairs
            BlockId::ShuffleBatch {
                shuffle_id: s,
                map_id,
                start_reduce_id,
                end_reduce_id,
            } if batch_fetch_enabled => {
                let expected = *shuffle_id.get_or_insert(s);
                check_shuffle_id(expected, &block_id, raw)?;
                let ids = reduce_ids_by_map_id.entry(map_id).or_default();
                ids.push(start_reduce_id);
                ids.push(end_reduce_id);
            }
            _ => {
                return Err(ShuffleError::IllegalState(format!(
                    "mixed batched and single shuffle block ids: {raw}"
                )))
            }
        }
    }
    let (map_ids, reduce_ids): (Vec<i64>, Vec<ReduceIdGroup>) = reduce_ids_by_map_id
        .into_iter()
        .map(|(map_id, ids)| (map_id, ReduceIdGroup { ids }))
        .unzip();
    Ok(BlockTransferMessage::FetchShuffleBlocks(FetchShuffleBlocks {
        app_id: app_id.to_string(),
        exec_id: exec_id.to_string(),
        shuffle_id: shuffle_id.expect("block_ids is non-empty"),
        map_ids,
        reduce_ids,
        batch_fetch_enabled,
    }))
}

/// Fetches a set of blocks from one remote block manager, interpreting each
/// stream chunk as one whole block.
///
/// Chunk index `i` corresponds to `block_ids[i]`. A failed merged chunk
/// fails alone (the reducer falls back to fetching the original unmerged
/// blocks), while a failed unmerged block poisons the rest of the stream,
/// so it and every later block are failed.
pub struct OneForOneBlockFetcher {
    client: Arc<dyn BlockTransferClient>,
    block_ids: Vec<String>,
    listener: Arc<dyn BlockFetchListener>,
    message: BlockTransferMessage,
}

impl OneForOneBlockFetcher {
    pub fn try_new(
        client: Arc<dyn BlockTransferClient>,
        app_id: &str,
        exec_id: &str,
        block_ids: Vec<String>,
        use_old_fetch_protocol: bool,
        listener: Arc<dyn BlockFetchListener>,
    ) -> Result<Self> {
        let message =
            build_block_transfer_message(app_id, exec_id, &block_ids, use_old_fetch_protocol)?;
        Ok(Self {
            client,
            block_ids,
            listener,
            message,
        })
    }

    /// Opens the stream and fetches every chunk, reporting each block to the
    /// listener.
    pub async fn start(&self) {
        let handle = match self.client.open_block_stream(self.message.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed while starting block fetches: {e}");
                self.fail_blocks(&self.block_ids, &e);
                return;
            }
        };
        trace!(
            "Opened block stream {} with {} chunks",
            handle.stream_id,
            handle.num_chunks
        );
        if handle.num_chunks as usize != self.block_ids.len() {
            let e = ShuffleError::Internal(format!(
                "stream {} has {} chunks for {} blocks",
                handle.stream_id,
                handle.num_chunks,
                self.block_ids.len()
            ));
            self.fail_blocks(&self.block_ids, &e);
            return;
        }

        // All chunks are requested immediately; upstream grouping keeps the
        // total request size reasonable.
        let fetches = (0..handle.num_chunks)
            .map(|i| self.client.fetch_chunk(handle.stream_id, i));
        let results = join_all(fetches).await;

        let mut stream_error: Option<ShuffleError> = None;
        for (i, result) in results.into_iter().enumerate() {
            let block_id = &self.block_ids[i];
            if let Some(e) = &stream_error {
                self.listener.on_block_fetch_failure(block_id, e);
                continue;
            }
            match result {
                Ok(data) => self.listener.on_block_fetch_success(block_id, data),
                Err(e) => {
                    self.listener.on_block_fetch_failure(block_id, &e);
                    if !block_id.starts_with(SHUFFLE_CHUNK_ID_PREFIX) {
                        stream_error = Some(e);
                    }
                }
            }
        }
    }

    fn fail_blocks(&self, block_ids: &[String], error: &ShuffleError) {
        for block_id in block_ids {
            self.listener.on_block_fetch_failure(block_id, error);
        }
    }
}
