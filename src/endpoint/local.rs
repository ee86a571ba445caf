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

//! In-process endpoint pair. The broker side implements [`Endpoint`]; the
//! [`LocalPeer`] side plays the client by pushing decoded packets in and
//! reading what the broker wrote.

use super::{epoch_millis, Endpoint, EndpointRef, PacketStream};
use crate::packet::{OutboundPacket, Packet, ProtocolVersion};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub struct LocalEndpoint {
    version: ProtocolVersion,
    connected_at: u64,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<OutboundPacket>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
}

impl LocalEndpoint {
    pub fn pair(version: ProtocolVersion) -> LocalPeer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let endpoint = Arc::new(LocalEndpoint {
            version,
            connected_at: epoch_millis(),
            connected: AtomicBool::new(true),
            closed,
            outbound: outbound_tx,
            inbound: Mutex::new(Some(inbound_rx)),
        });
        LocalPeer {
            local: endpoint.clone(),
            endpoint: EndpointRef::new(endpoint),
            inbound: inbound_tx,
            outbound: outbound_rx,
        }
    }
}

impl Endpoint for LocalEndpoint {
    fn write(&self, packet: OutboundPacket) {
        if !self.connected.load(Ordering::Acquire) {
            return;
        }
        let _ = self.outbound.send(packet);
    }

    fn receive(&self) -> PacketStream {
        let Some(rx) = self.inbound.lock().take() else {
            return futures::stream::empty().boxed();
        };
        let closed = self.closed.subscribe();
        futures::stream::unfold((rx, closed), |(mut rx, mut closed)| async move {
            if *closed.borrow() {
                return None;
            }
            let next = tokio::select! {
                packet = rx.recv() => packet,
                _ = closed.wait_for(|closed| *closed) => None,
            };
            next.map(|packet| (packet, (rx, closed)))
        })
        .boxed()
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.closed.send_replace(true);
        }
    }

    fn is_v5(&self) -> bool {
        self.version == ProtocolVersion::V5_0
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn connected_at_millis(&self) -> u64 {
        self.connected_at
    }

    fn remote_addr(&self) -> String {
        "local".to_string()
    }
}

/// Client side of a [`LocalEndpoint`]
pub struct LocalPeer {
    local: Arc<LocalEndpoint>,
    endpoint: EndpointRef,
    inbound: mpsc::UnboundedSender<Packet>,
    outbound: mpsc::UnboundedReceiver<OutboundPacket>,
}

impl LocalPeer {
    /// Broker-side handle, used to build packets and to hand to the context
    pub fn endpoint(&self) -> &EndpointRef {
        &self.endpoint
    }

    pub fn send(&self, packet: Packet) {
        let _ = self.inbound.send(packet);
    }

    pub async fn recv(&mut self) -> Option<OutboundPacket> {
        self.outbound.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<OutboundPacket> {
        tokio::time::timeout(timeout, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<OutboundPacket> {
        self.outbound.try_recv().ok()
    }

    /// Drops the transport without a DISCONNECT
    pub fn drop_transport(&self) {
        self.local.close();
    }

    pub fn is_closed(&self) -> bool {
        !self.local.is_connected()
    }
}
