// MIT License
//
// Copyright (c) 2025 Takatoshi Kondo
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Fixed pool of packet workers.
//!
//! Every endpoint is pinned to one worker by hashing its identity, so the
//! packets of a connection are processed sequentially and in order while
//! different connections proceed in parallel.

use crate::packet::Packet;
use crate::processor::Processor;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};

pub struct Dispatcher {
    workers: RwLock<Vec<mpsc::UnboundedSender<Packet>>>,
    handles: RwLock<Vec<JoinHandle<()>>>,
    size: usize,
}

impl Dispatcher {
    /// Spawn `size` workers (at least one) on the current runtime
    pub fn new(size: usize, processor: Arc<Processor>) -> Self {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for worker_id in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            workers.push(tx);
            handles.push(tokio::spawn(run_worker(worker_id, rx, processor.clone())));
        }

        Self {
            workers: RwLock::new(workers),
            handles: RwLock::new(handles),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `packet` on the worker owning its endpoint
    pub fn dispatch(&self, packet: Packet) {
        let workers = self.workers.read();
        if workers.is_empty() {
            trace!("Dispatcher stopped, dropping {}", packet.kind());
            return;
        }
        let index = packet.endpoint().shard(workers.len());
        if let Err(e) = workers[index].send(packet) {
            error!("Worker {index} is gone, dropping {}", e.0.kind());
        }
    }

    /// Stop accepting packets. Workers finish what is queued and exit.
    pub fn shutdown(&self) {
        self.workers.write().clear();
    }

    /// Wait for all workers to exit after [`Self::shutdown`]
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.write());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    worker_id: usize,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    processor: Arc<Processor>,
) {
    trace!("Worker {worker_id} started");
    while let Some(packet) = rx.recv().await {
        let kind = packet.kind();
        let endpoint = packet.endpoint().clone();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| processor.process(packet)));
        if let Err(panic) = result {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Worker {worker_id} panicked handling {kind} from {endpoint:?}: {message}");
        }
    }
    trace!("Worker {worker_id} stopped");
}
