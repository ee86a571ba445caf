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
use crate::inflight::InflightStore;
use crate::packet::{
    ConnectPacket, Message, OutboundPacket, OutboundPublish, ProtocolVersion, Qos, WillMessage,
};
use parking_lot::{Mutex, MutexGuard};
use tracing::{trace, warn};

/// State of one connected client, owned by the endpoint registry while the
/// client is current.
#[derive(Debug)]
pub struct ClientSession {
    client_id: String,
    endpoint: EndpointRef,
    protocol: ProtocolVersion,
    clean_start: bool,
    keep_alive: u16,
    session_expiry_interval: u32,
    username: Option<String>,
    will: Mutex<Option<WillMessage>>,
    inflight: Mutex<InflightStore>,
}

impl ClientSession {
    /// Clean session without will or credentials
    pub fn new(client_id: impl Into<String>, endpoint: EndpointRef) -> Self {
        let protocol = if endpoint.is_v5() {
            ProtocolVersion::V5_0
        } else {
            ProtocolVersion::V3_1_1
        };
        Self {
            client_id: client_id.into(),
            endpoint,
            protocol,
            clean_start: true,
            keep_alive: 0,
            session_expiry_interval: 0,
            username: None,
            will: Mutex::new(None),
            inflight: Mutex::new(InflightStore::new()),
        }
    }

    pub fn from_connect(client_id: impl Into<String>, connect: &ConnectPacket) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint: connect.endpoint.clone(),
            protocol: connect.protocol,
            clean_start: connect.clean_start,
            keep_alive: connect.keep_alive,
            session_expiry_interval: connect.session_expiry_interval,
            username: connect.username.clone(),
            will: Mutex::new(connect.will.clone()),
            inflight: Mutex::new(InflightStore::new()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &EndpointRef {
        &self.endpoint
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn clean_start(&self) -> bool {
        self.clean_start
    }

    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn session_expiry_interval(&self) -> u32 {
        self.session_expiry_interval
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Whether subscriptions outlive the connection
    pub fn is_persistent(&self) -> bool {
        !self.clean_start && self.session_expiry_interval > 0
    }

    /// Remove and return the will. Once taken it can not fire again.
    pub fn take_will(&self) -> Option<WillMessage> {
        self.will.lock().take()
    }

    pub fn has_will(&self) -> bool {
        self.will.lock().is_some()
    }

    pub fn inflight(&self) -> MutexGuard<'_, InflightStore> {
        self.inflight.lock()
    }

    /// Write a PUBLISH to this client at `qos`, tracking it when QoS > 0.
    /// Returns false if no packet id was available.
    pub fn deliver(&self, message: &Message, qos: Qos, retain: bool) -> bool {
        let mut outbound = message.clone();
        outbound.qos = qos;
        outbound.retain = retain;

        let packet_id = if qos == Qos::AtMostOnce {
            None
        } else {
            match self.inflight.lock().begin_outbound(outbound.clone()) {
                Some(packet_id) => Some(packet_id),
                None => {
                    warn!(
                        "No packet id available for client {}, dropping message on '{}'",
                        self.client_id, message.topic
                    );
                    return false;
                }
            }
        };

        trace!(
            "Delivering '{}' to client {} with QoS {qos:?}, packet_id {packet_id:?}",
            message.topic,
            self.client_id
        );
        self.endpoint.write(OutboundPacket::Publish(OutboundPublish {
            packet_id,
            topic: outbound.topic,
            qos,
            retain,
            dup: false,
            payload: outbound.payload,
            props: outbound.props,
        }));
        true
    }
}
