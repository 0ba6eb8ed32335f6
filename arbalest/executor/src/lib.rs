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

//! Executor-side shuffle components.
//!
//! Reducers resolve block locations through the [`tracker`] cache; mappers
//! stream finished shuffle output to remote mergers through the [`pusher`].

pub mod dedicated_executor;
pub mod keyed_lock;
pub mod pusher;
pub mod tracker;

pub use pusher::ShuffleBlockPusher;
pub use tracker::MapOutputTrackerWorker;
