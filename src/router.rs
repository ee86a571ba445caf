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

//! Message fan-out shared by the packet processor and session timers.

use crate::endpoint_registry::EndpointRegistry;
use crate::packet::{Message, Qos, WillMessage};
use crate::retained_store::RetainedStore;
use crate::session::ClientSession;
use crate::session_store::SessionStore;
use crate::topic_filter::TopicFilter;
use crate::topic_registry::TopicRegistry;
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const CLIENT_LOCK_STRIPES: usize = 64;

/// Striped locks serializing attach, detach and expiry of one client id.
/// Two connections of the same client run on different workers, so the
/// per-connection ordering alone does not order them.
#[derive(Debug)]
struct ClientLocks {
    stripes: Box<[Mutex<()>]>,
}

impl Default for ClientLocks {
    fn default() -> Self {
        Self {
            stripes: (0..CLIENT_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

impl ClientLocks {
    fn lock(&self, client_id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        client_id.hash(&mut hasher);
        self.stripes[hasher.finish() as usize % self.stripes.len()].lock()
    }
}

#[derive(Debug, Default)]
pub struct Router {
    endpoints: EndpointRegistry,
    topics: TopicRegistry,
    retained: RetainedStore,
    sessions: SessionStore,
    client_locks: ClientLocks,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    pub fn retained(&self) -> &RetainedStore {
        &self.retained
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Held while a client id changes hands between connections and the
    /// detached-session store. Not reentrant.
    pub fn lock_client(&self, client_id: &str) -> MutexGuard<'_, ()> {
        self.client_locks.lock(client_id)
    }

    /// Update the retained store and deliver `message` to every matching
    /// subscriber at min(message QoS, granted QoS). Offline persistent
    /// sessions get QoS 1/2 messages queued. Returns the number of
    /// subscribers that received or queued the message.
    pub fn publish(&self, message: Message) -> usize {
        if message.retain {
            self.retained.store(message.clone());
        }

        let subscribers = self.topics.matches(&message.topic);
        let mut delivered = 0;
        for (client_id, granted) in subscribers {
            let qos = message.qos.min(granted);
            if let Some(session) = self.endpoints.lookup(&client_id) {
                // retain is cleared when forwarding to established subscriptions
                if session.deliver(&message, qos, false) {
                    delivered += 1;
                }
            } else {
                let mut queued = message.clone();
                queued.qos = qos;
                queued.retain = false;
                if self.sessions.enqueue(&client_id, queued) {
                    delivered += 1;
                } else {
                    trace!("Subscriber {client_id} offline, '{}' not queued", message.topic);
                }
            }
        }

        trace!(
            "Published '{}' with QoS {:?} to {delivered} subscriber(s)",
            message.topic,
            message.qos
        );
        delivered
    }

    /// Deliver retained messages matching a freshly granted subscription
    pub fn deliver_retained(&self, session: &ClientSession, filter: &TopicFilter, granted: Qos) {
        for message in self.retained.get_matching(filter) {
            let qos = message.qos.min(granted);
            session.deliver(&message, qos, true);
        }
    }

    pub fn publish_will(&self, client_id: &str, will: WillMessage) {
        debug!("Publishing will of {client_id} on '{}'", will.topic);
        self.publish(will.into_message());
    }

    /// Keep the session's subscriptions for an offline client and arm its
    /// expiry and will delay timers. The caller holds [`Router::lock_client`].
    /// Nothing is detached while another connection owns the client id; the
    /// will of the stale connection is dropped as on takeover.
    pub fn detach_session(self: &Arc<Self>, session: &ClientSession, will: Option<WillMessage>) {
        let client_id = session.client_id().to_string();
        if self.endpoints.lookup(&client_id).is_some() {
            debug!("Client {client_id} is connected again, session not detached");
            return;
        }
        let (pending_will, immediate_will) = match will {
            Some(will) if will.delay_interval > 0 => (Some(will), None),
            will => (None, will),
        };
        let will_delay = pending_will.as_ref().map(|will| will.delay_interval);

        if let Some(will) = immediate_will {
            self.publish_will(&client_id, will);
        }

        let generation = self.sessions.detach(&client_id, pending_will);

        if let Some(delay) = will_delay {
            let router = self.clone();
            let id = client_id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(delay))).await;
                router.fire_pending_will(&id, generation);
            });
            self.sessions.set_will_timer(&client_id, generation, timer);
        }

        let expiry = session.session_expiry_interval();
        if expiry != u32::MAX {
            let router = self.clone();
            let id = client_id.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(expiry))).await;
                router.expire_session(&id, generation);
            });
            self.sessions.set_expiry_timer(&client_id, generation, timer);
        }
    }

    fn fire_pending_will(&self, client_id: &str, generation: u64) {
        let _guard = self.lock_client(client_id);
        if self.endpoints.lookup(client_id).is_some() {
            trace!("Client {client_id} online, delayed will not published");
            return;
        }
        if let Some(will) = self.sessions.take_pending_will(client_id, generation) {
            self.publish_will(client_id, will);
        }
    }

    fn expire_session(&self, client_id: &str, generation: u64) {
        let _guard = self.lock_client(client_id);
        let Some(pending_will) = self.sessions.expire(client_id, generation) else {
            return;
        };
        if self.endpoints.lookup(client_id).is_some() {
            debug!("Client {client_id} online, expiry of detached state only");
            return;
        }
        if let Some(will) = pending_will {
            self.publish_will(client_id, will);
        }
        self.topics.unsubscribe_all(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::local::{LocalEndpoint, LocalPeer};
    use crate::packet::{ConnectPacket, OutboundPacket, ProtocolVersion};
    use mqtt_endpoint_tokio::mqtt_ep::prelude::IntoPayload;

    fn persistent_session(peer: &LocalPeer, client_id: &str) -> ClientSession {
        let will = WillMessage::new(
            format!("will/{client_id}"),
            Qos::AtMostOnce,
            false,
            "gone".into_payload(),
        )
        .with_delay_interval(5);
        let connect = ConnectPacket::new(peer.endpoint().clone(), client_id)
            .persistent(10)
            .will(will);
        ClientSession::from_connect(client_id, &connect)
    }

    fn online(router: &Router, peer: &LocalPeer, client_id: &str) {
        router.endpoints().register(
            client_id,
            Arc::new(ClientSession::new(client_id, peer.endpoint().clone())),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_skipped_when_client_connected_again() {
        let router = Arc::new(Router::new());
        let mut watcher = LocalEndpoint::pair(ProtocolVersion::V5_0);
        online(&router, &watcher, "watcher");
        router
            .topics()
            .subscribe("watcher", "will/c1", Qos::AtMostOnce)
            .unwrap();

        let old = LocalEndpoint::pair(ProtocolVersion::V5_0);
        let old_session = persistent_session(&old, "c1");
        let new = LocalEndpoint::pair(ProtocolVersion::V5_0);
        online(&router, &new, "c1");
        router
            .topics()
            .subscribe("c1", "a/b", Qos::AtLeastOnce)
            .unwrap();

        {
            let _guard = router.lock_client("c1");
            let will = old_session.take_will();
            router.detach_session(&old_session, will);
        }
        assert!(!router.sessions().contains("c1"));

        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert!(router.topics().has_subscriptions("c1"));
        assert!(watcher.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_spare_client_back_before_resume() {
        let router = Arc::new(Router::new());
        let mut watcher = LocalEndpoint::pair(ProtocolVersion::V5_0);
        online(&router, &watcher, "watcher");
        router
            .topics()
            .subscribe("watcher", "will/c1", Qos::AtMostOnce)
            .unwrap();

        let old = LocalEndpoint::pair(ProtocolVersion::V5_0);
        let old_session = persistent_session(&old, "c1");
        router
            .topics()
            .subscribe("c1", "a/b", Qos::AtLeastOnce)
            .unwrap();
        {
            let _guard = router.lock_client("c1");
            let will = old_session.take_will();
            router.detach_session(&old_session, will);
        }
        assert!(router.sessions().contains("c1"));

        // registered but not resumed yet
        let new = LocalEndpoint::pair(ProtocolVersion::V5_0);
        online(&router, &new, "c1");

        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert!(router.topics().has_subscriptions("c1"));
        assert!(!router.sessions().contains("c1"));
        assert!(watcher.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_will_fires_for_offline_client() {
        let router = Arc::new(Router::new());
        let mut watcher = LocalEndpoint::pair(ProtocolVersion::V5_0);
        online(&router, &watcher, "watcher");
        router
            .topics()
            .subscribe("watcher", "will/c1", Qos::AtMostOnce)
            .unwrap();

        let old = LocalEndpoint::pair(ProtocolVersion::V5_0);
        let old_session = persistent_session(&old, "c1");
        {
            let _guard = router.lock_client("c1");
            let will = old_session.take_will();
            router.detach_session(&old_session, will);
        }

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        match watcher.try_recv() {
            Some(OutboundPacket::Publish(publish)) => assert_eq!(publish.topic, "will/c1"),
            other => panic!("Expected will PUBLISH, got {other:?}"),
        }
        assert!(watcher.try_recv().is_none());
    }
}
