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

//! Arbalest error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

/// Result type alias for Arbalest operations.
pub type Result<T> = result::Result<T, ShuffleError>;

/// Error types for the shuffle data plane and map-output tracking core.
#[derive(Debug)]
pub enum ShuffleError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration error with invalid settings. Fatal at startup.
    Configuration(String),
    /// Programming error: an operation was applied to a shuffle in a state
    /// that does not admit it (unknown id, double registration).
    IllegalState(String),
    /// I/O operation error.
    IoError(io::Error),
    /// Encoding or decoding of a wire payload failed.
    Serde(String),
    /// An RPC ask failed or timed out; callers treat this as a fetch failure.
    RpcFailure(String),
    /// Connection to a remote block manager could not be established.
    ConnectionFailed(String),
    /// A map status or merge status required for a fetch was missing:
    /// (shuffle_id, reduce_id, message).
    MetadataFetchFailed {
        shuffle_id: u32,
        reduce_id: u32,
        message: String,
    },
    /// Transport-level block fetch failure:
    /// (address, shuffle_id, map_id, reduce_id, message).
    FetchFailed {
        address: String,
        shuffle_id: u32,
        map_id: i64,
        reduce_id: u32,
        message: String,
    },
    /// A block push was rejected or failed at the remote merger.
    BlockPushFailure { block_id: String, message: String },
}

impl ShuffleError {
    /// Whether this failure means the remote destination is unreachable and
    /// no further blocks should be sent to it.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ShuffleError::ConnectionFailed(_))
    }
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for ShuffleError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

impl From<String> for ShuffleError {
    fn from(e: String) -> Self {
        ShuffleError::General(e)
    }
}

impl From<io::Error> for ShuffleError {
    fn from(e: io::Error) -> Self {
        ShuffleError::IoError(e)
    }
}

impl From<prost::EncodeError> for ShuffleError {
    fn from(e: prost::EncodeError) -> Self {
        ShuffleError::Serde(format!("protobuf encode error: {e}"))
    }
}

impl From<prost::DecodeError> for ShuffleError {
    fn from(e: prost::DecodeError) -> Self {
        ShuffleError::Serde(format!("protobuf decode error: {e}"))
    }
}

impl From<bincode::error::EncodeError> for ShuffleError {
    fn from(e: bincode::error::EncodeError) -> Self {
        ShuffleError::Serde(format!("status encode error: {e}"))
    }
}

impl From<bincode::error::DecodeError> for ShuffleError {
    fn from(e: bincode::error::DecodeError) -> Self {
        ShuffleError::Serde(format!("status decode error: {e}"))
    }
}

impl Display for ShuffleError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ShuffleError::General(desc) => write!(f, "General error: {desc}"),
            ShuffleError::Internal(desc) => write!(f, "Internal Arbalest error: {desc}"),
            ShuffleError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            ShuffleError::IllegalState(desc) => write!(f, "Illegal state: {desc}"),
            ShuffleError::IoError(desc) => write!(f, "IO error: {desc}"),
            ShuffleError::Serde(desc) => write!(f, "Serialization error: {desc}"),
            ShuffleError::RpcFailure(desc) => write!(f, "RPC failure: {desc}"),
            ShuffleError::ConnectionFailed(desc) => {
                write!(f, "Connection failed: {desc}")
            }
            ShuffleError::MetadataFetchFailed {
                shuffle_id,
                reduce_id,
                message,
            } => {
                write!(
                    f,
                    "Missing output status for shuffle {shuffle_id} partition {reduce_id}: {message}"
                )
            }
            ShuffleError::FetchFailed {
                address,
                shuffle_id,
                map_id,
                reduce_id,
                message,
            } => {
                write!(
                    f,
                    "Block fetch error from {address}, shuffle {shuffle_id}, map {map_id}, \
                     reduce {reduce_id}: {message}"
                )
            }
            ShuffleError::BlockPushFailure { block_id, message } => {
                write!(f, "Block push error for {block_id}: {message}")
            }
        }
    }
}

impl Error for ShuffleError {}
