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

//! Block-transfer protocol messages.
//!
//! These are the messages a reducer sends to a block manager or merger to
//! open a stream of blocks, and the stream handle it gets back. They are
//! encoded with prost; the field numbering is part of the wire contract.

use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::error::Result;

/// Legacy fetch message carrying raw block-id strings.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenBlocks {
    #[prost(string, tag = "1")]
    pub app_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub exec_id: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub block_ids: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Fetch of unmerged shuffle blocks, grouped per map id.
///
/// `reduce_ids[i]` lists the reduce ids requested from `map_ids[i]`. When
/// `batch_fetch_enabled` is set each group holds `[start, end)` pairs
/// instead of individual reduce ids.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchShuffleBlocks {
    #[prost(string, tag = "1")]
    pub app_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub exec_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "3")]
    pub shuffle_id: u32,
    #[prost(int64, repeated, tag = "4")]
    pub map_ids: ::prost::alloc::vec::Vec<i64>,
    #[prost(message, repeated, tag = "5")]
    pub reduce_ids: ::prost::alloc::vec::Vec<ReduceIdGroup>,
    #[prost(bool, tag = "6")]
    pub batch_fetch_enabled: bool,
}

/// Fetch of merged shuffle chunks, grouped per reduce id.
///
/// `chunk_ids[i]` lists the chunk ids requested from `reduce_ids[i]`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchShuffleBlockChunks {
    #[prost(string, tag = "1")]
    pub app_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub exec_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "3")]
    pub shuffle_id: u32,
    #[prost(uint32, repeated, tag = "4")]
    pub reduce_ids: ::prost::alloc::vec::Vec<u32>,
    #[prost(message, repeated, tag = "5")]
    pub chunk_ids: ::prost::alloc::vec::Vec<ChunkIdGroup>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReduceIdGroup {
    #[prost(uint32, repeated, tag = "1")]
    pub ids: ::prost::alloc::vec::Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChunkIdGroup {
    #[prost(uint32, repeated, tag = "1")]
    pub ids: ::prost::alloc::vec::Vec<u32>,
}

/// Reply to any open/fetch message: the stream to pull chunks from.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamHandle {
    #[prost(uint64, tag = "1")]
    pub stream_id: u64,
    #[prost(uint32, tag = "2")]
    pub num_chunks: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockTransferEnvelope {
    #[prost(oneof = "block_transfer_envelope::Message", tags = "1, 2, 3, 4")]
    pub message: ::core::option::Option<block_transfer_envelope::Message>,
}

pub mod block_transfer_envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        OpenBlocks(super::OpenBlocks),
        #[prost(message, tag = "2")]
        FetchShuffleBlocks(super::FetchShuffleBlocks),
        #[prost(message, tag = "3")]
        FetchShuffleBlockChunks(super::FetchShuffleBlockChunks),
        #[prost(message, tag = "4")]
        StreamHandle(super::StreamHandle),
    }
}

/// A decoded block-transfer message.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockTransferMessage {
    OpenBlocks(OpenBlocks),
    FetchShuffleBlocks(FetchShuffleBlocks),
    FetchShuffleBlockChunks(FetchShuffleBlockChunks),
    StreamHandle(StreamHandle),
}

impl BlockTransferMessage {
    /// Encodes the message into its framed wire form.
    pub fn encode(&self) -> Bytes {
        let message = match self {
            BlockTransferMessage::OpenBlocks(m) => {
                block_transfer_envelope::Message::OpenBlocks(m.clone())
            }
            BlockTransferMessage::FetchShuffleBlocks(m) => {
                block_transfer_envelope::Message::FetchShuffleBlocks(m.clone())
            }
            BlockTransferMessage::FetchShuffleBlockChunks(m) => {
                block_transfer_envelope::Message::FetchShuffleBlockChunks(m.clone())
            }
            BlockTransferMessage::StreamHandle(m) => {
                block_transfer_envelope::Message::StreamHandle(m.clone())
            }
        };
        let envelope = BlockTransferEnvelope {
            message: Some(message),
        };
        let mut buf = BytesMut::with_capacity(envelope.encoded_len());
        envelope
            .encode(&mut buf)
            .expect("BytesMut grows on demand");
        buf.freeze()
    }

    /// Decodes a framed wire message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope = BlockTransferEnvelope::decode(bytes)?;
        let message = envelope.message.ok_or_else(|| {
            crate::error::ShuffleError::Serde("empty block transfer envelope".to_string())
        })?;
        Ok(match message {
            block_transfer_envelope::Message::OpenBlocks(m) => {
                BlockTransferMessage::OpenBlocks(m)
            }
            block_transfer_envelope::Message::FetchShuffleBlocks(m) => {
                BlockTransferMessage::FetchShuffleBlocks(m)
            }
            block_transfer_envelope::Message::FetchShuffleBlockChunks(m) => {
                BlockTransferMessage::FetchShuffleBlockChunks(m)
            }
            block_transfer_envelope::Message::StreamHandle(m) => {
                BlockTransferMessage::StreamHandle(m)
            }
        })
    }
}
