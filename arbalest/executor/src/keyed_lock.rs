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

//! A striped table of async mutexes keyed by shuffle id.
//!
//! Coalesces concurrent first-time status fetches for the same shuffle into
//! one RPC round-trip while letting different shuffles proceed in parallel.
//! Two shuffles hashing to the same stripe serialize needlessly, which is
//! harmless.

use tokio::sync::{Mutex, MutexGuard};

const DEFAULT_NUM_STRIPES: usize = 32;

pub struct KeyedLock {
    stripes: Vec<Mutex<()>>,
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_STRIPES)
    }
}

impl KeyedLock {
    pub fn new(num_stripes: usize) -> Self {
        assert!(num_stripes > 0);
        Self {
            stripes: (0..num_stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, key: u32) -> MutexGuard<'_, ()> {
        self.stripes[key as usize % self.stripes.len()].lock().await
    }
}
