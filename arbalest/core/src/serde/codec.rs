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

//! Compression codecs for serialized status payloads.
//!
//! Codecs are selected by name through an explicit registry. An unknown name
//! resolves to the no-op codec so a misconfigured codec degrades to
//! uncompressed payloads instead of failing the driver.

use std::fmt::Debug;
use std::sync::Arc;

use log::warn;

use crate::error::{Result, ShuffleError};

pub const ZSTD_CODEC: &str = "zstd";
pub const LZ4_CODEC: &str = "lz4";
pub const NOOP_CODEC: &str = "none";

const ZSTD_LEVEL: i32 = 3;

/// Compresses and decompresses opaque status payloads.
pub trait StatusCodec: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct ZstdCodec;

impl StatusCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        ZSTD_CODEC
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| ShuffleError::Serde(format!("zstd compression failed: {e}")))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|e| ShuffleError::Serde(format!("zstd decompression failed: {e}")))
    }
}

#[derive(Debug)]
pub struct Lz4Codec;

impl StatusCodec for Lz4Codec {
    fn name(&self) -> &'static str {
        LZ4_CODEC
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| ShuffleError::Serde(format!("lz4 decompression failed: {e}")))
    }
}

#[derive(Debug)]
pub struct NoopCodec;

impl StatusCodec for NoopCodec {
    fn name(&self) -> &'static str {
        NOOP_CODEC
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Resolves a codec by its configured name.
pub fn codec_by_name(name: &str) -> Arc<dyn StatusCodec> {
    match name {
        ZSTD_CODEC => Arc::new(ZstdCodec),
        LZ4_CODEC => Arc::new(Lz4Codec),
        NOOP_CODEC => Arc::new(NoopCodec),
        other => {
            warn!("Unknown status compression codec '{other}', falling back to '{NOOP_CODEC}'");
            Arc::new(NoopCodec)
        }
    }
}
