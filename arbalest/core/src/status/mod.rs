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

//! Map-output and merge-result statuses tracked by the driver and consumed
//! by reducers.

use std::fmt::{Display, Formatter};

use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use roaring::RoaringBitmap;

pub mod map_status;
pub mod merge_status;

pub use map_status::{
    CompressedMapStatus, HighlyCompressedMapStatus, MapStatus,
    MIN_PARTITIONS_FOR_HIGHLY_COMPRESSED,
};
pub use merge_status::MergeStatus;

/// Identity of a block manager: the executor it runs in and the host/port it
/// serves blocks on. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct BlockManagerId {
    pub executor_id: String,
    pub host: String,
    pub port: u16,
}

impl BlockManagerId {
    pub fn new(
        executor_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            executor_id: executor_id.into(),
            host: host.into(),
            port,
        }
    }
}

impl Display for BlockManagerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BlockManagerId({}, {}:{})",
            self.executor_id, self.host, self.port
        )
    }
}

/// A roaring bitmap of map or reduce indices with a stable byte encoding, so
/// statuses carrying one can travel through the serialized-status format.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBitmap(pub RoaringBitmap);

impl Default for IndexBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBitmap {
    pub fn new() -> Self {
        Self(RoaringBitmap::new())
    }

    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        Self(indices.into_iter().collect())
    }
}

impl std::ops::Deref for IndexBitmap {
    type Target = RoaringBitmap;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for IndexBitmap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Encode for IndexBitmap {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let mut buf = Vec::with_capacity(self.0.serialized_size());
        self.0
            .serialize_into(&mut buf)
            .map_err(|e| EncodeError::OtherString(e.to_string()))?;
        buf.encode(encoder)
    }
}

impl<Context> Decode<Context> for IndexBitmap {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let buf: Vec<u8> = Vec::decode(decoder)?;
        let bitmap = RoaringBitmap::deserialize_from(&buf[..])
            .map_err(|e| DecodeError::OtherString(e.to_string()))?;
        Ok(IndexBitmap(bitmap))
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for IndexBitmap {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Self::decode(decoder)
    }
}
