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

//! Driver-side map-output tracking.
//!
//! The driver records, per shuffle, where every map task's output lives and
//! which map outputs have been merged into each reduce partition. Reducers
//! obtain this view as a serialized payload through the tracker endpoint,
//! whose requests are served by a dedicated dispatcher so that status
//! serialization can block without starving the transport.

pub mod dispatcher;
pub mod shuffle_status;
pub mod tracker;

pub use dispatcher::TrackerMessage;
pub use shuffle_status::ShuffleStatus;
pub use tracker::{MapOutputTrackerMaster, ShuffleStatistics};
