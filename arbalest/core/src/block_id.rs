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

//! Shuffle block identifiers and their string grammar.
//!
//! Block ids travel as strings on the wire. The grammar is fixed:
//!
//! * `shuffle_<shuffleId>_<mapId>_<reduceId>`: one unmerged block. A map id
//!   of `-1` is the sentinel address of a merged partition.
//! * `shuffle_<shuffleId>_<mapId>_<startReduce>_<endReduce>`: a contiguous
//!   batch of unmerged blocks, end exclusive.
//! * `shuffleChunk_<shuffleId>_<reduceId>_<chunkId>`: one chunk of a merged
//!   partition file.
//! * `shufflePush_<shuffleId>_<mapIndex>_<reduceId>`: a block on its way to
//!   a remote merger.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::ShuffleError;
use crate::ShuffleId;

pub const SHUFFLE_BLOCK_PREFIX: &str = "shuffle";
pub const SHUFFLE_CHUNK_PREFIX: &str = "shuffleChunk";
pub const SHUFFLE_PUSH_PREFIX: &str = "shufflePush";

/// Map id used in place of a real map id when a block id addresses a whole
/// merged partition.
pub const MERGED_SHUFFLE_MAP_ID: i64 = -1;

/// A parsed shuffle block identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    Shuffle {
        shuffle_id: ShuffleId,
        map_id: i64,
        reduce_id: u32,
    },
    ShuffleBatch {
        shuffle_id: ShuffleId,
        map_id: i64,
        start_reduce_id: u32,
        end_reduce_id: u32,
    },
    ShuffleChunk {
        shuffle_id: ShuffleId,
        reduce_id: u32,
        chunk_id: u32,
    },
    ShufflePush {
        shuffle_id: ShuffleId,
        map_index: u32,
        reduce_id: u32,
    },
}

impl BlockId {
    pub fn shuffle_id(&self) -> ShuffleId {
        match self {
            BlockId::Shuffle { shuffle_id, .. }
            | BlockId::ShuffleBatch { shuffle_id, .. }
            | BlockId::ShuffleChunk { shuffle_id, .. }
            | BlockId::ShufflePush { shuffle_id, .. } => *shuffle_id,
        }
    }

    pub fn is_shuffle_chunk(&self) -> bool {
        matches!(self, BlockId::ShuffleChunk { .. })
    }

    /// Whether this id addresses a whole merged partition rather than a
    /// single map's output.
    pub fn is_merged_block_address(&self) -> bool {
        matches!(
            self,
            BlockId::Shuffle {
                map_id: MERGED_SHUFFLE_MAP_ID,
                ..
            }
        )
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockId::Shuffle {
                shuffle_id,
                map_id,
                reduce_id,
            } => write!(f, "{SHUFFLE_BLOCK_PREFIX}_{shuffle_id}_{map_id}_{reduce_id}"),
            BlockId::ShuffleBatch {
                shuffle_id,
                map_id,
                start_reduce_id,
                end_reduce_id,
            } => write!(
                f,
                "{SHUFFLE_BLOCK_PREFIX}_{shuffle_id}_{map_id}_{start_reduce_id}_{end_reduce_id}"
            ),
            BlockId::ShuffleChunk {
                shuffle_id,
                reduce_id,
                chunk_id,
            } => write!(
                f,
                "{SHUFFLE_CHUNK_PREFIX}_{shuffle_id}_{reduce_id}_{chunk_id}"
            ),
            BlockId::ShufflePush {
                shuffle_id,
                map_index,
                reduce_id,
            } => write!(
                f,
                "{SHUFFLE_PUSH_PREFIX}_{shuffle_id}_{map_index}_{reduce_id}"
            ),
        }
    }
}

impl FromStr for BlockId {
    type Err = ShuffleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ShuffleError::Serde(format!("unexpected shuffle block id format: {s}"));
        let parts: Vec<&str> = s.split('_').collect();
        match (parts.first().copied(), parts.len()) {
            (Some(SHUFFLE_BLOCK_PREFIX), 4) => Ok(BlockId::Shuffle {
                shuffle_id: parts[1].parse().map_err(|_| bad())?,
                map_id: parts[2].parse().map_err(|_| bad())?,
                reduce_id: parts[3].parse().map_err(|_| bad())?,
            }),
            (Some(SHUFFLE_BLOCK_PREFIX), 5) => Ok(BlockId::ShuffleBatch {
                shuffle_id: parts[1].parse().map_err(|_| bad())?,
                map_id: parts[2].parse().map_err(|_| bad())?,
                start_reduce_id: parts[3].parse().map_err(|_| bad())?,
                end_reduce_id: parts[4].parse().map_err(|_| bad())?,
            }),
            (Some(SHUFFLE_CHUNK_PREFIX), 4) => Ok(BlockId::ShuffleChunk {
                shuffle_id: parts[1].parse().map_err(|_| bad())?,
                reduce_id: parts[2].parse().map_err(|_| bad())?,
                chunk_id: parts[3].parse().map_err(|_| bad())?,
            }),
            (Some(SHUFFLE_PUSH_PREFIX), 4) => Ok(BlockId::ShufflePush {
                shuffle_id: parts[1].parse().map_err(|_| bad())?,
                map_index: parts[2].parse().map_err(|_| bad())?,
                reduce_id: parts[3].parse().map_err(|_| bad())?,
            }),
            _ => Err(bad()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let ids = [
            BlockId::Shuffle {
                shuffle_id: 7,
                map_id: 42,
                reduce_id: 3,
            },
            BlockId::Shuffle {
                shuffle_id: 7,
                map_id: MERGED_SHUFFLE_MAP_ID,
                reduce_id: 3,
            },
            BlockId::ShuffleBatch {
                shuffle_id: 7,
                map_id: 42,
                start_reduce_id: 3,
                end_reduce_id: 9,
            },
            BlockId::ShuffleChunk {
                shuffle_id: 7,
                reduce_id: 3,
                chunk_id: 1,
            },
            BlockId::ShufflePush {
                shuffle_id: 7,
                map_index: 4,
                reduce_id: 3,
            },
        ];
        for id in ids {
            let parsed: BlockId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn merged_sentinel_renders_negative_map_id() {
        let id = BlockId::Shuffle {
            shuffle_id: 10,
            map_id: MERGED_SHUFFLE_MAP_ID,
            reduce_id: 0,
        };
        assert_eq!(id.to_string(), "shuffle_10_-1_0");
        assert!(id.is_merged_block_address());
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in [
            "shuffle_1_2",
            "shuffle_1_2_3_4_5",
            "shuffleChunk_1_2",
            "shuffleChunk_1_2_3_4",
            "rdd_1_2",
            "shuffle_x_2_3",
            "",
        ] {
            assert!(bad.parse::<BlockId>().is_err(), "accepted {bad:?}");
        }
    }
}
