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

//! Dispatcher for tracker status requests.
//!
//! Serving a status request can block on compression and broadcast publish,
//! so requests are never handled on transport threads. They go through an
//! unbounded FIFO drained by a fixed pool of dedicated OS threads. Shutdown
//! uses a poison pill: the first worker to see it re-enqueues it before
//! exiting so its peers terminate too.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use arbalest_core::error::{Result, ShuffleError};
use arbalest_core::ShuffleId;

use crate::shuffle_status::ShuffleStatus;

/// A queued status request, answered through the attached reply channel.
#[derive(Debug)]
pub enum TrackerMessage {
    GetMapOutputStatuses {
        shuffle_id: ShuffleId,
        reply: oneshot::Sender<Result<Bytes>>,
    },
    GetMergeResultStatuses {
        shuffle_id: ShuffleId,
        reply: oneshot::Sender<Result<Bytes>>,
    },
    PoisonPill,
}

pub(crate) struct StatusRequestDispatcher {
    sender: mpsc::Sender<TrackerMessage>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StatusRequestDispatcher {
    pub(crate) fn new(
        num_threads: usize,
        shuffle_statuses: Arc<DashMap<ShuffleId, Arc<ShuffleStatus>>>,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<TrackerMessage>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let receiver = receiver.clone();
            let sender = sender.clone();
            let shuffle_statuses = shuffle_statuses.clone();
            let worker = std::thread::Builder::new()
                .name(format!("map-output-dispatcher-{i}"))
                .spawn(move || loop {
                    let message = { receiver.lock().recv() };
                    match message {
                        Ok(TrackerMessage::PoisonPill) => {
                            // wake the next worker, then exit
                            let _ = sender.send(TrackerMessage::PoisonPill);
                            break;
                        }
                        Ok(message) => handle_message(&shuffle_statuses, message),
                        Err(_) => break,
                    }
                })
                .map_err(|e| {
                    ShuffleError::Internal(format!(
                        "failed to spawn map output dispatcher thread: {e}"
                    ))
                })?;
            workers.push(worker);
        }
        Ok(Self {
            sender,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueues a request; the FIFO is unbounded so this never blocks.
    pub(crate) fn post(&self, message: TrackerMessage) {
        if self.sender.send(message).is_err() {
            error!("Status request posted after the dispatcher stopped");
        }
    }

    /// Poisons the queue and waits for every worker to exit.
    pub(crate) fn stop(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        info!("Stopping the map output status dispatcher");
        let _ = self.sender.send(TrackerMessage::PoisonPill);
        for worker in workers {
            if worker.join().is_err() {
                error!("A map output dispatcher thread panicked during shutdown");
            }
        }
    }
}

fn handle_message(
    shuffle_statuses: &DashMap<ShuffleId, Arc<ShuffleStatus>>,
    message: TrackerMessage,
) {
    match message {
        TrackerMessage::GetMapOutputStatuses { shuffle_id, reply } => {
            debug!("Handling request to send map output locations for shuffle {shuffle_id}");
            let result = match shuffle_statuses.get(&shuffle_id) {
                Some(status) => status.serialized_map_status(),
                None => Err(ShuffleError::IllegalState(format!(
                    "map output statuses requested for unregistered shuffle {shuffle_id}"
                ))),
            };
            let _ = reply.send(result);
        }
        TrackerMessage::GetMergeResultStatuses { shuffle_id, reply } => {
            debug!("Handling request to send merge result locations for shuffle {shuffle_id}");
            let result = match shuffle_statuses.get(&shuffle_id) {
                Some(status) => status.serialized_merge_status(),
                None => Err(ShuffleError::IllegalState(format!(
                    "merge result statuses requested for unregistered shuffle {shuffle_id}"
                ))),
            };
            let _ = reply.send(result);
        }
        TrackerMessage::PoisonPill => {}
    }
}

impl Drop for StatusRequestDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
