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

//! Broadcast seam.
//!
//! Large serialized status payloads travel to executors through the engine's
//! broadcast mechanism rather than inline in RPC replies. The mechanism
//! itself is an external collaborator; the core only needs publish, read and
//! destroy. Implementations may block: the callers sit on dedicated
//! dispatcher threads.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{Result, ShuffleError};

/// Publishes opaque byte payloads so that every executor can read them by id.
pub trait BroadcastManager: Send + Sync + Debug {
    /// Publishes a value and returns its broadcast id.
    fn publish(&self, value: Bytes) -> Result<u64>;

    /// Reads a published value.
    fn read(&self, id: u64) -> Result<Bytes>;

    /// Removes a published value from all executors.
    fn destroy(&self, id: u64) -> Result<()>;
}

/// An owned reference to one published broadcast value.
///
/// The owner (a `ShuffleStatus`) destroys the value explicitly when its
/// serialization cache is invalidated; consumers only ever hold the plain id
/// that travels inside the serialized payload.
#[derive(Debug, Clone)]
pub struct BroadcastHandle {
    id: u64,
    manager: Arc<dyn BroadcastManager>,
}

impl BroadcastHandle {
    pub fn new(id: u64, manager: Arc<dyn BroadcastManager>) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Destroys the published value.
    pub fn destroy(self) -> Result<()> {
        self.manager.destroy(self.id)
    }
}

/// Process-local broadcast backing for tests and local mode.
#[derive(Debug, Default)]
pub struct LocalBroadcastManager {
    values: DashMap<u64, Bytes>,
    next_id: AtomicU64,
}

impl LocalBroadcastManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently live broadcast values.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }
}

impl BroadcastManager for LocalBroadcastManager {
    fn publish(&self, value: Bytes) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.values.insert(id, value);
        Ok(id)
    }

    fn read(&self, id: u64) -> Result<Bytes> {
        self.values
            .get(&id)
            .map(|v| v.clone())
            .ok_or_else(|| ShuffleError::General(format!("unknown broadcast id {id}")))
    }

    fn destroy(&self, id: u64) -> Result<()> {
        self.values.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_read_destroy() {
        let manager = Arc::new(LocalBroadcastManager::new());
        let id = manager.publish(Bytes::from_static(b"payload")).unwrap();
        assert_eq!(manager.read(id).unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(manager.num_values(), 1);

        let handle = BroadcastHandle::new(id, manager.clone());
        handle.destroy().unwrap();
        assert_eq!(manager.num_values(), 0);
        assert!(manager.read(id).is_err());
    }
}
