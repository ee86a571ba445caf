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

//! Transport-neutral connection handle.

pub mod local;
pub mod mqtt;

use crate::packet::{OutboundPacket, Packet, Property};
use futures::stream::BoxStream;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Ordered sequence of packets read from one connection. It ends when the
/// transport closes.
pub type PacketStream = BoxStream<'static, Packet>;

/// One live client connection as the core sees it.
///
/// `write` never blocks and never reports failures: packets for a closed
/// transport are dropped. Writes issued from one task reach the wire in order.
pub trait Endpoint: Send + Sync + 'static {
    fn write(&self, packet: OutboundPacket);

    /// Inbound packets. Can be taken once, later calls get an empty stream.
    fn receive(&self) -> PacketStream;

    /// Flushes pending writes and shuts the transport down. Idempotent.
    fn close(&self);

    fn is_v5(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Epoch millis at which the transport was established
    fn connected_at_millis(&self) -> u64;

    fn remote_addr(&self) -> String;

    /// v5.0 CONNECT properties, empty until CONNECT is read
    fn connect_properties(&self) -> Vec<Property> {
        Vec::new()
    }

    /// v5.0 will properties, empty until CONNECT is read
    fn will_properties(&self) -> Vec<Property> {
        Vec::new()
    }
}

/// Shared endpoint handle compared and hashed by identity
#[derive(Clone)]
pub struct EndpointRef(Arc<dyn Endpoint>);

impl EndpointRef {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self(endpoint)
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.0
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    /// Stable worker index for this endpoint in a pool of `workers`
    pub fn shard(&self, workers: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() % workers.max(1) as u64) as usize
    }
}

impl std::ops::Deref for EndpointRef {
    type Target = dyn Endpoint;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Hash for EndpointRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl PartialEq for EndpointRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for EndpointRef {}

impl PartialOrd for EndpointRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EndpointRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl std::fmt::Debug for EndpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EndpointRef({:p})", self.addr())
    }
}

pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
