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

//! QoS 1/2 in-flight tracking for one session.
//!
//! Inbound QoS 2 (client -> broker):
//! PUBLISH received, PUBREC sent (`Acknowledged`) -> PUBREL received
//! (`Released`, message fanned out) -> PUBCOMP sent (`Complete`, dropped).
//!
//! Outbound (broker -> client):
//! PUBLISH sent (`Published`) -> PUBACK received (QoS 1, `Complete`), or
//! PUBREC received and PUBREL sent (QoS 2, `Released`) -> PUBCOMP received
//! (`Complete`). States only move forward.

use crate::packet::{Message, Qos};
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InflightState {
    Published,
    Acknowledged,
    Released,
    Complete,
}

#[derive(Debug, Clone)]
pub struct InflightMessage {
    pub packet_id: u16,
    pub message: Message,
    pub state: InflightState,
}

/// Result of feeding an acknowledgment into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Moved to the contained state
    Advanced(InflightState),
    /// No exchange with this packet id
    Unknown,
    /// Exchange exists but is not waiting for this acknowledgment
    Unexpected(InflightState),
}

#[derive(Debug)]
pub struct InflightStore {
    inbound: HashMap<u16, InflightMessage>,
    outbound: HashMap<u16, InflightMessage>,
    next_packet_id: u16,
}

impl Default for InflightStore {
    fn default() -> Self {
        Self {
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            next_packet_id: 1,
        }
    }
}

impl InflightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound QoS 2 PUBLISH that is about to be answered with PUBREC.
    ///
    /// Returns false when the packet id was already in flight. The newer
    /// message replaces the older one and the exchange restarts at
    /// `Acknowledged`, so a retransmission is still fanned out only once.
    pub fn record_inbound(&mut self, packet_id: u16, message: Message) -> bool {
        let previous = self.inbound.insert(
            packet_id,
            InflightMessage {
                packet_id,
                message,
                state: InflightState::Acknowledged,
            },
        );
        match previous {
            None => true,
            Some(previous) => {
                debug!(
                    "Inbound packet id {packet_id} reused while {:?}, keeping latest PUBLISH",
                    previous.state
                );
                false
            }
        }
    }

    /// PUBREL received. Returns the message to fan out; the exchange is
    /// complete once the caller writes PUBCOMP.
    pub fn release_inbound(&mut self, packet_id: u16) -> Option<Message> {
        let entry = self.inbound.remove(&packet_id)?;
        trace!(
            "Inbound packet id {packet_id}: {:?} -> {:?}",
            entry.state,
            InflightState::Released
        );
        Some(entry.message)
    }

    /// Allocate a packet id for an outbound QoS 1/2 PUBLISH and track it.
    /// Returns None when all 65535 ids are in flight.
    pub fn begin_outbound(&mut self, message: Message) -> Option<u16> {
        let packet_id = self.allocate_packet_id()?;
        self.outbound.insert(
            packet_id,
            InflightMessage {
                packet_id,
                message,
                state: InflightState::Published,
            },
        );
        Some(packet_id)
    }

    /// PUBACK received for an outbound QoS 1 PUBLISH
    pub fn acknowledge_outbound(&mut self, packet_id: u16) -> AckOutcome {
        match self.outbound.get(&packet_id) {
            None => AckOutcome::Unknown,
            Some(entry)
                if entry.state == InflightState::Published
                    && entry.message.qos == Qos::AtLeastOnce =>
            {
                self.outbound.remove(&packet_id);
                AckOutcome::Advanced(InflightState::Complete)
            }
            Some(entry) => AckOutcome::Unexpected(entry.state),
        }
    }

    /// PUBREC received for an outbound QoS 2 PUBLISH. On success the caller
    /// writes PUBREL and the entry sits at `Released`.
    pub fn receive_pubrec(&mut self, packet_id: u16) -> AckOutcome {
        match self.outbound.get_mut(&packet_id) {
            None => AckOutcome::Unknown,
            Some(entry) if entry.message.qos != Qos::ExactlyOnce => {
                AckOutcome::Unexpected(entry.state)
            }
            // a repeated PUBREC gets the PUBREL again
            Some(entry) if entry.state <= InflightState::Released => {
                entry.state = InflightState::Released;
                AckOutcome::Advanced(InflightState::Released)
            }
            Some(entry) => AckOutcome::Unexpected(entry.state),
        }
    }

    /// PUBCOMP received for an outbound QoS 2 PUBLISH
    pub fn complete_outbound(&mut self, packet_id: u16) -> AckOutcome {
        match self.outbound.get(&packet_id) {
            None => AckOutcome::Unknown,
            Some(entry) if entry.state == InflightState::Released => {
                self.outbound.remove(&packet_id);
                AckOutcome::Advanced(InflightState::Complete)
            }
            Some(entry) => AckOutcome::Unexpected(entry.state),
        }
    }

    pub fn outbound_state(&self, packet_id: u16) -> Option<InflightState> {
        self.outbound.get(&packet_id).map(|entry| entry.state)
    }

    pub fn inbound_state(&self, packet_id: u16) -> Option<InflightState> {
        self.inbound.get(&packet_id).map(|entry| entry.state)
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Drop every exchange
    pub fn clear(&mut self) {
        self.inbound.clear();
        self.outbound.clear();
    }

    /// Next free id in 1..=65535, wrapping and skipping ids still in flight
    fn allocate_packet_id(&mut self) -> Option<u16> {
        if self.outbound.len() >= u16::MAX as usize {
            return None;
        }
        loop {
            let candidate = self.next_packet_id;
            self.next_packet_id = match self.next_packet_id.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if !self.outbound.contains_key(&candidate) {
                return Some(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_endpoint_tokio::mqtt_ep::prelude::IntoPayload;

    fn message(qos: Qos) -> Message {
        Message::new("a/b", qos, false, "payload".into_payload())
    }

    #[test]
    fn test_qos1_outbound_lifecycle() {
        let mut store = InflightStore::new();
        let id = store.begin_outbound(message(Qos::AtLeastOnce)).unwrap();
        assert_eq!(store.outbound_state(id), Some(InflightState::Published));
        assert_eq!(store.receive_pubrec(id), AckOutcome::Unexpected(InflightState::Published));
        assert_eq!(
            store.acknowledge_outbound(id),
            AckOutcome::Advanced(InflightState::Complete)
        );
        assert_eq!(store.outbound_len(), 0);
        assert_eq!(store.acknowledge_outbound(id), AckOutcome::Unknown);
    }

    #[test]
    fn test_qos2_outbound_lifecycle() {
        let mut store = InflightStore::new();
        let id = store.begin_outbound(message(Qos::ExactlyOnce)).unwrap();
        assert_eq!(store.complete_outbound(id), AckOutcome::Unexpected(InflightState::Published));
        assert_eq!(store.acknowledge_outbound(id), AckOutcome::Unexpected(InflightState::Published));
        assert_eq!(store.receive_pubrec(id), AckOutcome::Advanced(InflightState::Released));
        assert_eq!(store.receive_pubrec(id), AckOutcome::Advanced(InflightState::Released));
        assert_eq!(store.complete_outbound(id), AckOutcome::Advanced(InflightState::Complete));
        assert_eq!(store.outbound_state(id), None);
    }

    #[test]
    fn test_qos2_inbound_release_once() {
        let mut store = InflightStore::new();
        assert!(store.record_inbound(7, message(Qos::ExactlyOnce)));
        assert!(!store.record_inbound(7, message(Qos::ExactlyOnce)));
        assert_eq!(store.inbound_state(7), Some(InflightState::Acknowledged));
        assert!(store.release_inbound(7).is_some());
        assert!(store.release_inbound(7).is_none());
        assert_eq!(store.inbound_len(), 0);
    }

    #[test]
    fn test_packet_ids_skip_zero_and_in_flight() {
        let mut store = InflightStore::new();
        store.next_packet_id = u16::MAX;
        let first = store.begin_outbound(message(Qos::AtLeastOnce)).unwrap();
        assert_eq!(first, u16::MAX);
        // wraps past 0
        let second = store.begin_outbound(message(Qos::AtLeastOnce)).unwrap();
        assert_eq!(second, 1);

        store.next_packet_id = u16::MAX;
        let third = store.begin_outbound(message(Qos::AtLeastOnce)).unwrap();
        assert_eq!(third, 2);
    }

    #[test]
    fn test_packet_id_exhaustion() {
        let mut store = InflightStore::new();
        for _ in 0..u16::MAX {
            assert!(store.begin_outbound(message(Qos::AtLeastOnce)).is_some());
        }
        assert!(store.begin_outbound(message(Qos::AtLeastOnce)).is_none());
        store.acknowledge_outbound(42);
        assert_eq!(store.begin_outbound(message(Qos::AtLeastOnce)), Some(42));
    }
}
