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

//! A dedicated task pool isolated from the transport runtime.
//!
//! Push completion handling re-enters pusher state and may trigger further
//! dispatch; running it on transport threads would block the transport and
//! invert lock ordering. Work is handed to this pool instead.

use std::future::Future;

use tokio::runtime::Runtime;

pub struct DedicatedExecutor {
    runtime: Runtime,
}

impl DedicatedExecutor {
    /// Creates a pool of `num_threads` worker threads named after `name`.
    pub fn new(name: &str, num_threads: usize) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads.max(1))
            .thread_name(name)
            .enable_all()
            .build()
            .expect("failed to build dedicated executor runtime");
        Self { runtime }
    }

    /// Submits a task to the pool.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }
}
