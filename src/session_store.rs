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

//! Persistent sessions whose client is currently offline.

use crate::packet::{Message, Qos, WillMessage};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Offline queue bound per session; the oldest message is dropped beyond it
pub const MAX_OFFLINE_MESSAGES: usize = 1_000;

/// Session state kept between connections
#[derive(Debug)]
pub struct DetachedSession {
    /// Distinguishes this detach from later ones for timer callbacks
    generation: u64,
    /// Offline messages (QoS1/QoS2 only)
    offline_messages: VecDeque<Message>,
    /// Will waiting for its delay to elapse
    pending_will: Option<WillMessage>,
    expiry_timer: Option<JoinHandle<()>>,
    will_timer: Option<JoinHandle<()>>,
}

impl DetachedSession {
    /// Add offline message
    fn add_offline_message(&mut self, client_id: &str, message: Message) {
        if self.offline_messages.len() >= MAX_OFFLINE_MESSAGES {
            if let Some(dropped) = self.offline_messages.pop_front() {
                debug!(
                    "Offline queue of {client_id} full, dropping oldest message on '{}'",
                    dropped.topic
                );
            }
        }
        self.offline_messages.push_back(message);
        trace!(
            "Added offline message for {client_id}, total: {}",
            self.offline_messages.len()
        );
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.will_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for DetachedSession {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

/// Detached persistent sessions by client id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, DetachedSession>,
    generation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep state for an offline client. Returns the generation that timer
    /// callbacks must present.
    pub fn detach(&self, client_id: &str, pending_will: Option<WillMessage>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions.insert(
            client_id.to_string(),
            DetachedSession {
                generation,
                offline_messages: VecDeque::new(),
                pending_will,
                expiry_timer: None,
                will_timer: None,
            },
        );
        debug!("Session {client_id} detached (generation {generation})");
        generation
    }

    pub fn set_expiry_timer(&self, client_id: &str, generation: u64, timer: JoinHandle<()>) {
        match self.sessions.get_mut(client_id) {
            Some(mut session) if session.generation == generation => {
                if let Some(old_timer) = session.expiry_timer.replace(timer) {
                    old_timer.abort();
                }
            }
            _ => timer.abort(),
        }
    }

    pub fn set_will_timer(&self, client_id: &str, generation: u64, timer: JoinHandle<()>) {
        match self.sessions.get_mut(client_id) {
            Some(mut session) if session.generation == generation => {
                if let Some(old_timer) = session.will_timer.replace(timer) {
                    old_timer.abort();
                }
            }
            _ => timer.abort(),
        }
    }

    /// Client reconnected: drop the detached state and hand back its queue.
    /// A pending will is discarded.
    pub fn resume(&self, client_id: &str) -> Option<Vec<Message>> {
        let (_, mut session) = self.sessions.remove(client_id)?;
        session.cancel_timers();
        if session.pending_will.take().is_some() {
            debug!("Pending will of {client_id} cancelled by reconnect");
        }
        Some(std::mem::take(&mut session.offline_messages).into())
    }

    /// Forget a detached session entirely
    pub fn discard(&self, client_id: &str) -> bool {
        self.sessions.remove(client_id).is_some()
    }

    /// Queue a message for an offline client. Returns false if the client
    /// has no detached session or the message is QoS 0.
    pub fn enqueue(&self, client_id: &str, message: Message) -> bool {
        if message.qos == Qos::AtMostOnce {
            return false;
        }
        match self.sessions.get_mut(client_id) {
            Some(mut session) => {
                session.add_offline_message(client_id, message);
                true
            }
            None => false,
        }
    }

    /// Will delay elapsed: take the will if this detach is still current
    pub fn take_pending_will(&self, client_id: &str, generation: u64) -> Option<WillMessage> {
        let mut session = self.sessions.get_mut(client_id)?;
        if session.generation != generation {
            return None;
        }
        session.will_timer = None;
        session.pending_will.take()
    }

    /// Expiry elapsed: remove the session if this detach is still current.
    /// Returns the will that had not fired yet, if any.
    pub fn expire(&self, client_id: &str, generation: u64) -> Option<Option<WillMessage>> {
        let (_, mut session) = self
            .sessions
            .remove_if(client_id, |_, session| session.generation == generation)?;
        // this runs on the expiry timer itself, do not abort it
        session.expiry_timer = None;
        debug!("Session {client_id} expired");
        Some(session.pending_will.take())
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    pub fn offline_message_count(&self, client_id: &str) -> usize {
        self.sessions
            .get(client_id)
            .map(|session| session.offline_messages.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_endpoint_tokio::mqtt_ep::prelude::IntoPayload;

    fn message(topic: &str, qos: Qos) -> Message {
        Message::new(topic, qos, false, "payload".into_payload())
    }

    #[test]
    fn test_enqueue_requires_detached_session() {
        let store = SessionStore::new();
        assert!(!store.enqueue("c1", message("t", Qos::AtLeastOnce)));

        store.detach("c1", None);
        assert!(store.enqueue("c1", message("t", Qos::AtLeastOnce)));
        assert!(!store.enqueue("c1", message("t", Qos::AtMostOnce)));
        assert_eq!(store.offline_message_count("c1"), 1);
    }

    #[test]
    fn test_offline_queue_drops_oldest() {
        let store = SessionStore::new();
        store.detach("c1", None);
        for i in 0..MAX_OFFLINE_MESSAGES + 5 {
            store.enqueue("c1", message(&format!("t/{i}"), Qos::AtLeastOnce));
        }
        assert_eq!(store.offline_message_count("c1"), MAX_OFFLINE_MESSAGES);

        let queued = store.resume("c1").unwrap();
        assert_eq!(queued.first().unwrap().topic, "t/5");
        assert_eq!(
            queued.last().unwrap().topic,
            format!("t/{}", MAX_OFFLINE_MESSAGES + 4)
        );
        assert!(!store.contains("c1"));
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let store = SessionStore::new();
        let will = WillMessage::new("w", Qos::AtMostOnce, false, "bye".into_payload());
        let first = store.detach("c1", Some(will.clone()));
        let second = store.detach("c1", Some(will));
        assert_ne!(first, second);

        assert!(store.take_pending_will("c1", first).is_none());
        assert!(store.expire("c1", first).is_none());
        assert!(store.contains("c1"));

        assert!(store.take_pending_will("c1", second).is_some());
        // the will already fired, expiry has nothing left to publish
        assert!(matches!(store.expire("c1", second), Some(None)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_resume_cancels_pending_will() {
        let store = SessionStore::new();
        let will = WillMessage::new("w", Qos::AtMostOnce, false, "bye".into_payload());
        let generation = store.detach("c1", Some(will));

        assert!(store.resume("c1").is_some());
        assert!(store.take_pending_will("c1", generation).is_none());
        assert!(store.resume("c1").is_none());
    }
}
