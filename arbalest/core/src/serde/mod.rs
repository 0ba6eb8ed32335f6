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

//! Serialized-status wire format.
//!
//! Status arrays travel between driver and executors as a one-byte tag
//! followed by a codec-compressed object encoding:
//!
//! * tag [`DIRECT`]: the compressed bytes encode the status array itself;
//! * tag [`BROADCAST`]: the compressed bytes encode a broadcast id whose
//!   published value is a complete `DIRECT`-tagged payload.
//!
//! The broadcast form is chosen whenever the direct payload reaches the
//! configured minimum broadcast size, so wide shuffles do not funnel their
//! full status array through every RPC reply. The format is bit-exact across
//! versions: both tags and the envelope layout are frozen.

use std::sync::Arc;

use bincode::config::Configuration;
use bincode::{Decode, Encode};
use bytes::Bytes;
use log::debug;

use crate::broadcast::{BroadcastHandle, BroadcastManager};
use crate::error::{Result, ShuffleError};

pub mod codec;

pub use codec::{codec_by_name, StatusCodec};

/// Payload tag: the remainder encodes the status array inline.
pub const DIRECT: u8 = 0;
/// Payload tag: the remainder encodes a broadcast id.
pub const BROADCAST: u8 = 1;

const BINCODE_CONFIG: Configuration = bincode::config::standard();

/// A serialized status array, plus the broadcast handle backing it when the
/// payload was large enough to publish.
#[derive(Debug)]
pub struct SerializedStatuses {
    pub payload: Bytes,
    pub broadcast: Option<BroadcastHandle>,
}

fn encode_direct<T: Encode>(
    statuses: &[Option<T>],
    codec: &dyn StatusCodec,
) -> Result<Vec<u8>> {
    let encoded = bincode::encode_to_vec(statuses, BINCODE_CONFIG)?;
    let compressed = codec.compress(&encoded)?;
    let mut payload = Vec::with_capacity(compressed.len() + 1);
    payload.push(DIRECT);
    payload.extend_from_slice(&compressed);
    Ok(payload)
}

/// Serializes a status array, publishing it through the broadcast manager
/// when the direct payload reaches `min_broadcast_size`.
///
/// The returned [`BroadcastHandle`], if any, is owned by the caller; it must
/// be destroyed when the serialized form is invalidated.
pub fn serialize_output_statuses<T: Encode>(
    statuses: &[Option<T>],
    codec: &dyn StatusCodec,
    min_broadcast_size: usize,
    broadcast_manager: &Arc<dyn BroadcastManager>,
) -> Result<SerializedStatuses> {
    let direct = encode_direct(statuses, codec)?;
    if direct.len() < min_broadcast_size {
        return Ok(SerializedStatuses {
            payload: Bytes::from(direct),
            broadcast: None,
        });
    }

    let direct_len = direct.len();
    let id = broadcast_manager.publish(Bytes::from(direct))?;
    let encoded_id = bincode::encode_to_vec(id, BINCODE_CONFIG)?;
    let compressed = codec.compress(&encoded_id)?;
    let mut payload = Vec::with_capacity(compressed.len() + 1);
    payload.push(BROADCAST);
    payload.extend_from_slice(&compressed);
    debug!(
        "Serialized statuses ({direct_len} bytes) exceed the broadcast threshold \
         ({min_broadcast_size} bytes), published as broadcast {id}"
    );
    Ok(SerializedStatuses {
        payload: Bytes::from(payload),
        broadcast: Some(BroadcastHandle::new(id, broadcast_manager.clone())),
    })
}

fn decode_direct<T: Decode<()>>(
    payload: &[u8],
    codec: &dyn StatusCodec,
) -> Result<Vec<Option<T>>> {
    let decompressed = codec.decompress(&payload[1..])?;
    let (statuses, _) = bincode::decode_from_slice(&decompressed, BINCODE_CONFIG)?;
    Ok(statuses)
}

/// Decodes a serialized status array, resolving the broadcast indirection
/// when present.
pub fn deserialize_output_statuses<T: Decode<()>>(
    payload: &[u8],
    codec: &dyn StatusCodec,
    broadcast_manager: &dyn BroadcastManager,
) -> Result<Vec<Option<T>>> {
    match payload.first() {
        Some(&DIRECT) => decode_direct(payload, codec),
        Some(&BROADCAST) => {
            let decompressed = codec.decompress(&payload[1..])?;
            let (id, _): (u64, usize) =
                bincode::decode_from_slice(&decompressed, BINCODE_CONFIG)?;
            let value = broadcast_manager.read(id)?;
            if value.first() != Some(&DIRECT) {
                return Err(ShuffleError::Serde(format!(
                    "broadcast {id} does not hold a direct status payload"
                )));
            }
            decode_direct(&value, codec)
        }
        _ => Err(ShuffleError::Serde(
            "serialized statuses carry an unknown tag".to_string(),
        )),
    }
}
