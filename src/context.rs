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

//! Broker orchestrator.
//!
//! A [`Context`] is built once at startup. It owns the routing state, the
//! packet processor and the worker pool, and turns every endpoint's inbound
//! packet stream into dispatched work.

use crate::acceptor::Acceptor;
use crate::auth::{AllowAllAuthenticator, Authenticator};
use crate::config::ListenerConfig;
use crate::dispatcher::Dispatcher;
use crate::endpoint::EndpointRef;
use crate::packet::{CloseReason, ClosePacket, Packet};
use crate::processor::Processor;
use crate::router::Router;
use futures::StreamExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

pub struct Context {
    router: Arc<Router>,
    processor: Arc<Processor>,
    dispatcher: Dispatcher,
    acceptors: Mutex<Vec<Acceptor>>,
}

impl Context {
    /// Must be called from within a tokio runtime; the workers are spawned
    /// immediately.
    pub fn new(authenticator: Arc<dyn Authenticator>, workers: usize) -> Arc<Self> {
        let router = Arc::new(Router::new());
        let processor = Arc::new(Processor::new(router.clone(), authenticator));
        let dispatcher = Dispatcher::new(workers, processor.clone());
        debug!("Context started with {} workers", dispatcher.size());
        Arc::new(Self {
            router,
            processor,
            dispatcher,
            acceptors: Mutex::new(Vec::new()),
        })
    }

    /// Context that accepts every client
    pub fn allow_all(workers: usize) -> Arc<Self> {
        Self::new(Arc::new(AllowAllAuthenticator), workers)
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Hand one decoded packet to the worker owning its endpoint
    pub fn accept(&self, packet: Packet) {
        self.dispatcher.dispatch(packet);
    }

    /// Pump `endpoint`'s packets into the dispatcher until the transport
    /// closes or a deadline passes.
    ///
    /// Before CONNECT the deadline is `connect_timeout`. After CONNECT with a
    /// non-zero keep alive it is 1.5 times the keep alive, restarted by every
    /// packet. Either way the end of the stream is reported as a
    /// [`Packet::Close`].
    pub async fn serve(self: Arc<Self>, endpoint: EndpointRef, connect_timeout: Option<Duration>) {
        let mut packets = endpoint.receive();
        let mut deadline = connect_timeout;
        let mut connected = false;

        loop {
            let next = match deadline {
                Some(limit) => match tokio::time::timeout(limit, packets.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let reason = if connected {
                            CloseReason::KeepAliveTimeout
                        } else {
                            CloseReason::ConnectTimeout
                        };
                        debug!("{endpoint:?} idle for {limit:?}, closing ({reason:?})");
                        self.close_packet(&endpoint, reason);
                        return;
                    }
                },
                None => packets.next().await,
            };

            let Some(packet) = next else {
                trace!("{endpoint:?} stream ended");
                self.close_packet(&endpoint, CloseReason::TransportClosed);
                return;
            };

            if let Packet::Connect(connect) = &packet {
                if !connected {
                    connected = true;
                    deadline = keep_alive_deadline(connect.keep_alive);
                }
            }
            self.accept(packet);
        }
    }

    pub fn spawn_serve(
        self: &Arc<Self>,
        endpoint: EndpointRef,
        connect_timeout: Option<Duration>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.clone().serve(endpoint, connect_timeout))
    }

    /// Bind one listener and serve every connection it accepts
    pub async fn start_listener(self: &Arc<Self>, config: ListenerConfig) -> anyhow::Result<SocketAddr> {
        let connect_timeout = Some(Duration::from_millis(config.connect_timeout_ms))
            .filter(|timeout| !timeout.is_zero());
        let (acceptor, mut endpoints) = Acceptor::bind(config).await?;
        let local_addr = acceptor.local_addr();
        self.acceptors.lock().push(acceptor);

        let context = self.clone();
        tokio::spawn(async move {
            while let Some(endpoint) = endpoints.recv().await {
                trace!("Serving {endpoint:?} from {}", endpoint.remote_addr());
                context.spawn_serve(endpoint, connect_timeout);
            }
            trace!("Listener {local_addr} stopped");
        });
        Ok(local_addr)
    }

    /// Start every listener. A listener that fails to bind is logged and
    /// skipped; the addresses of the ones that started are returned.
    pub async fn start_listeners(self: &Arc<Self>, configs: &[ListenerConfig]) -> Vec<SocketAddr> {
        let mut started = Vec::with_capacity(configs.len());
        for config in configs {
            match self.start_listener(config.clone()).await {
                Ok(addr) => started.push(addr),
                Err(e) => error!("Failed to start listener {}: {e}", config.bind_addr()),
            }
        }
        started
    }

    /// Close every acceptor and live endpoint, then stop the workers
    pub async fn shutdown(&self) {
        let acceptors = std::mem::take(&mut *self.acceptors.lock());
        for acceptor in &acceptors {
            acceptor.close();
        }

        let sessions = self.router.endpoints().sessions();
        info!(
            "Shutting down: {} listeners, {} connected clients",
            acceptors.len(),
            sessions.len()
        );
        for session in sessions {
            session.endpoint().close();
        }

        self.dispatcher.shutdown();
        self.dispatcher.join().await;
    }

    fn close_packet(&self, endpoint: &EndpointRef, reason: CloseReason) {
        self.accept(Packet::Close(ClosePacket {
            endpoint: endpoint.clone(),
            reason,
        }));
    }
}

fn keep_alive_deadline(keep_alive: u16) -> Option<Duration> {
    (keep_alive > 0).then(|| Duration::from_millis(u64::from(keep_alive) * 1500))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_deadline_is_one_and_a_half_times() {
        assert_eq!(keep_alive_deadline(0), None);
        assert_eq!(keep_alive_deadline(10), Some(Duration::from_secs(15)));
        assert_eq!(keep_alive_deadline(1), Some(Duration::from_millis(1500)));
    }
}
