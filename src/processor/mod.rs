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

//! Per-packet protocol handlers.
//!
//! Handlers run on dispatcher workers and never await: every effect is a
//! registry update or a non-blocking endpoint write. Packets of one
//! connection are always handled by the same worker, in arrival order.

mod connect;
mod pub_impl;
mod sub_impl;

use crate::auth::Authenticator;
use crate::endpoint::EndpointRef;
use crate::inflight::AckOutcome;
use crate::packet::{AckPacket, AckReason, AuthPacket, DisconnectReason, OutboundPacket, Packet, PingPacket};
use crate::router::Router;
use crate::session::ClientSession;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct Processor {
    router: Arc<Router>,
    authenticator: Arc<dyn Authenticator>,
    /// endpoint -> client id it connected as
    attached: DashMap<EndpointRef, String>,
}

impl Processor {
    pub fn new(router: Arc<Router>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            router,
            authenticator,
            attached: DashMap::new(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Handle one inbound packet
    pub fn process(&self, packet: Packet) {
        trace!("Processing {} from {:?}", packet.kind(), packet.endpoint());
        match packet {
            Packet::Connect(p) => self.process_connect(p),
            Packet::Publish(p) => self.process_publish(p),
            Packet::Subscribe(p) => self.process_subscribe(p),
            Packet::Unsubscribe(p) => self.process_unsubscribe(p),
            Packet::Puback(p) => self.process_puback(p),
            Packet::Pubrec(p) => self.process_pubrec(p),
            Packet::Pubrel(p) => self.process_pubrel(p),
            Packet::Pubcomp(p) => self.process_pubcomp(p),
            Packet::Ping(p) => self.process_ping(p),
            Packet::Disconnect(p) => self.process_disconnect(p),
            Packet::Auth(p) => self.process_auth(p),
            Packet::Close(p) => self.process_close(p),
        }
    }

    /// Current session of the client that connected on `endpoint`. None for
    /// endpoints that have not connected or whose session was taken over.
    fn session_for(&self, endpoint: &EndpointRef) -> Option<Arc<ClientSession>> {
        let client_id = self.attached.get(endpoint)?.value().clone();
        let session = self.router.endpoints().lookup(&client_id)?;
        (session.endpoint() == endpoint).then_some(session)
    }

    /// Like [`Self::session_for`], closing the endpoint when there is none
    fn require_session(&self, endpoint: &EndpointRef, kind: &str) -> Option<Arc<ClientSession>> {
        let session = self.session_for(endpoint);
        if session.is_none() {
            if self.attached.contains_key(endpoint) {
                debug!("{kind} from {endpoint:?} after its session ended, closing");
            } else {
                warn!("{kind} from {endpoint:?} before CONNECT, closing");
            }
            endpoint.close();
        }
        session
    }

    fn protocol_violation(&self, endpoint: &EndpointRef, reason: &str) {
        warn!("Protocol violation from {endpoint:?}: {reason}");
        endpoint.write(OutboundPacket::Disconnect {
            reason: DisconnectReason::ProtocolError,
        });
        endpoint.close();
    }

    fn process_puback(&self, p: AckPacket) {
        let Some(session) = self.require_session(&p.endpoint, "PUBACK") else {
            return;
        };
        let outcome = session.inflight().acknowledge_outbound(p.packet_id);
        log_ack_outcome("PUBACK", session.client_id(), p.packet_id, outcome);
    }

    fn process_pubrec(&self, p: AckPacket) {
        let Some(session) = self.require_session(&p.endpoint, "PUBREC") else {
            return;
        };
        let outcome = session.inflight().receive_pubrec(p.packet_id);
        log_ack_outcome("PUBREC", session.client_id(), p.packet_id, outcome);
        if let AckOutcome::Advanced(_) = outcome {
            p.endpoint.write(OutboundPacket::Pubrel {
                packet_id: p.packet_id,
                reason: AckReason::Success,
            });
        }
    }

    fn process_pubcomp(&self, p: AckPacket) {
        let Some(session) = self.require_session(&p.endpoint, "PUBCOMP") else {
            return;
        };
        let outcome = session.inflight().complete_outbound(p.packet_id);
        log_ack_outcome("PUBCOMP", session.client_id(), p.packet_id, outcome);
    }

    fn process_ping(&self, p: PingPacket) {
        if self.require_session(&p.endpoint, "PINGREQ").is_some() {
            p.endpoint.write(OutboundPacket::Pingresp);
        }
    }

    fn process_auth(&self, p: AuthPacket) {
        // enhanced authentication exchanges are not supported, AUTH is accepted and ignored
        trace!("AUTH from {:?} ignored", p.endpoint);
    }
}

fn log_ack_outcome(kind: &str, client_id: &str, packet_id: u16, outcome: AckOutcome) {
    match outcome {
        AckOutcome::Advanced(state) => {
            trace!("{kind} from {client_id} for packet id {packet_id}, now {state:?}")
        }
        AckOutcome::Unknown => {
            debug!("{kind} from {client_id} for unknown packet id {packet_id}, ignored")
        }
        AckOutcome::Unexpected(state) => {
            debug!("{kind} from {client_id} for packet id {packet_id} in state {state:?}, ignored")
        }
    }
}
