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

use crate::endpoint::EndpointRef;
use crate::session::ClientSession;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Client id -> current session. At most one session per client id.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    sessions: DashMap<String, Arc<ClientSession>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` current for `client_id`, returning the session it
    /// evicted. The caller must close the evicted session's endpoint.
    pub fn register(&self, client_id: &str, session: Arc<ClientSession>) -> Option<Arc<ClientSession>> {
        let evicted = self.sessions.insert(client_id.to_string(), session);
        if let Some(evicted) = &evicted {
            trace!(
                "Client {client_id} taken over, evicting {:?}",
                evicted.endpoint()
            );
        }
        evicted
    }

    pub fn lookup(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(client_id).map(|session| session.clone())
    }

    /// Remove the entry only while it still belongs to `expected`, so a
    /// stale connection can not unregister its successor.
    pub fn remove(&self, client_id: &str, expected: &EndpointRef) -> bool {
        self.sessions
            .remove_if(client_id, |_, session| session.endpoint() == expected)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of all current sessions
    pub fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::local::LocalEndpoint;
    use crate::packet::ProtocolVersion;

    fn session(client_id: &str) -> (Arc<ClientSession>, EndpointRef) {
        let peer = LocalEndpoint::pair(ProtocolVersion::V5_0);
        let endpoint = peer.endpoint().clone();
        (Arc::new(ClientSession::new(client_id, endpoint.clone())), endpoint)
    }

    #[test]
    fn test_register_evicts_previous_session() {
        let registry = EndpointRegistry::new();
        let (first, first_endpoint) = session("c1");
        let (second, second_endpoint) = session("c1");

        assert!(registry.register("c1", first).is_none());
        let evicted = registry.register("c1", second).unwrap();
        assert_eq!(evicted.endpoint(), &first_endpoint);
        assert_eq!(registry.lookup("c1").unwrap().endpoint(), &second_endpoint);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_remove_keeps_successor() {
        let registry = EndpointRegistry::new();
        let (first, first_endpoint) = session("c1");
        let (second, second_endpoint) = session("c1");
        registry.register("c1", first);
        registry.register("c1", second);

        assert!(!registry.remove("c1", &first_endpoint));
        assert!(registry.lookup("c1").is_some());
        assert!(registry.remove("c1", &second_endpoint));
        assert!(registry.is_empty());
    }
}
