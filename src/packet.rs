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

//! Protocol-level packet model shared by the core and every transport.
//!
//! Transports decode wire frames into [`Packet`] values, each carrying the
//! [`EndpointRef`] it arrived on. The core answers with [`OutboundPacket`]
//! values written through that same endpoint.

use crate::endpoint::EndpointRef;
use mqtt_endpoint_tokio::mqtt_ep;

pub use mqtt_ep::common::ArcPayload;
pub use mqtt_ep::packet::{Property, Qos};

/// Negotiated protocol level of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V3_1_1,
    V5_0,
}

/// Application message as it travels through the broker
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub payload: ArcPayload,
    pub props: Vec<Property>,
}

impl Message {
    pub fn new(topic: impl Into<String>, qos: Qos, retain: bool, payload: ArcPayload) -> Self {
        Self {
            topic: topic.into(),
            qos,
            retain,
            payload,
            props: Vec::new(),
        }
    }
}

/// Will message registered at CONNECT time
#[derive(Debug, Clone)]
pub struct WillMessage {
    pub topic: String,
    pub payload: ArcPayload,
    pub qos: Qos,
    pub retain: bool,
    /// Will Delay Interval in seconds (v5.0 only, 0 otherwise)
    pub delay_interval: u32,
    pub props: Vec<Property>,
}

impl WillMessage {
    pub fn new(topic: impl Into<String>, qos: Qos, retain: bool, payload: ArcPayload) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            retain,
            delay_interval: 0,
            props: Vec::new(),
        }
    }

    pub fn with_delay_interval(mut self, delay_interval: u32) -> Self {
        self.delay_interval = delay_interval;
        self
    }

    pub fn into_message(self) -> Message {
        Message {
            topic: self.topic,
            qos: self.qos,
            retain: self.retain,
            payload: self.payload,
            props: self.props,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectPacket {
    pub endpoint: EndpointRef,
    pub protocol: ProtocolVersion,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub clean_start: bool,
    /// Keep alive in seconds, 0 disables the watchdog
    pub keep_alive: u16,
    /// Session Expiry Interval in seconds. v3.1.1 sessions without clean
    /// session use `u32::MAX` (never expire).
    pub session_expiry_interval: u32,
    pub will: Option<WillMessage>,
}

impl ConnectPacket {
    /// CONNECT with clean start, no credentials, no will and keep alive disabled.
    pub fn new(endpoint: EndpointRef, client_id: impl Into<String>) -> Self {
        let protocol = if endpoint.is_v5() {
            ProtocolVersion::V5_0
        } else {
            ProtocolVersion::V3_1_1
        };
        Self {
            endpoint,
            protocol,
            client_id: client_id.into(),
            username: None,
            password: None,
            clean_start: true,
            keep_alive: 0,
            session_expiry_interval: 0,
            will: None,
        }
    }

    /// Non-clean session. v3.1.1 sessions never expire, v5.0 sessions
    /// keep the expiry interval given here.
    pub fn persistent(mut self, session_expiry_interval: u32) -> Self {
        self.clean_start = false;
        self.session_expiry_interval = match self.protocol {
            ProtocolVersion::V3_1_1 => u32::MAX,
            ProtocolVersion::V5_0 => session_expiry_interval,
        };
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: u16) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn will(mut self, will: WillMessage) -> Self {
        self.will = Some(will);
        self
    }
}

#[derive(Debug, Clone)]
pub struct PublishPacket {
    pub endpoint: EndpointRef,
    /// Present for QoS 1 and QoS 2
    pub packet_id: Option<u16>,
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
    pub payload: ArcPayload,
    pub props: Vec<Property>,
}

impl PublishPacket {
    pub fn new(
        endpoint: EndpointRef,
        packet_id: Option<u16>,
        topic: impl Into<String>,
        qos: Qos,
        payload: ArcPayload,
    ) -> Self {
        Self {
            endpoint,
            packet_id,
            topic: topic.into(),
            qos,
            retain: false,
            dup: false,
            payload,
            props: Vec::new(),
        }
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }

    pub fn to_message(&self) -> Message {
        Message {
            topic: self.topic.clone(),
            qos: self.qos,
            retain: self.retain,
            payload: self.payload.clone(),
            props: self.props.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribeEntry {
    pub topic_filter: String,
    pub qos: Qos,
}

impl SubscribeEntry {
    pub fn new(topic_filter: impl Into<String>, qos: Qos) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscribePacket {
    pub endpoint: EndpointRef,
    pub packet_id: u16,
    pub entries: Vec<SubscribeEntry>,
}

#[derive(Debug, Clone)]
pub struct UnsubscribePacket {
    pub endpoint: EndpointRef,
    pub packet_id: u16,
    pub topic_filters: Vec<String>,
}

/// PUBACK, PUBREC, PUBREL and PUBCOMP share this shape
#[derive(Debug, Clone)]
pub struct AckPacket {
    pub endpoint: EndpointRef,
    pub packet_id: u16,
}

#[derive(Debug, Clone)]
pub struct PingPacket {
    pub endpoint: EndpointRef,
}

#[derive(Debug, Clone)]
pub struct DisconnectPacket {
    pub endpoint: EndpointRef,
    /// v5.0 reason code 0x04 (Disconnect with Will Message)
    pub publish_will: bool,
}

#[derive(Debug, Clone)]
pub struct AuthPacket {
    pub endpoint: EndpointRef,
}

/// Why a connection went away without a DISCONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TransportClosed,
    KeepAliveTimeout,
    ConnectTimeout,
}

/// Synthetic packet emitted when the transport closes
#[derive(Debug, Clone)]
pub struct ClosePacket {
    pub endpoint: EndpointRef,
    pub reason: CloseReason,
}

/// Inbound packet, tagged by MQTT control packet type
#[derive(Debug, Clone)]
pub enum Packet {
    Connect(ConnectPacket),
    Publish(PublishPacket),
    Subscribe(SubscribePacket),
    Unsubscribe(UnsubscribePacket),
    Puback(AckPacket),
    Pubrec(AckPacket),
    Pubrel(AckPacket),
    Pubcomp(AckPacket),
    Ping(PingPacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
    Close(ClosePacket),
}

impl Packet {
    pub fn endpoint(&self) -> &EndpointRef {
        match self {
            Packet::Connect(p) => &p.endpoint,
            Packet::Publish(p) => &p.endpoint,
            Packet::Subscribe(p) => &p.endpoint,
            Packet::Unsubscribe(p) => &p.endpoint,
            Packet::Puback(p) | Packet::Pubrec(p) | Packet::Pubrel(p) | Packet::Pubcomp(p) => {
                &p.endpoint
            }
            Packet::Ping(p) => &p.endpoint,
            Packet::Disconnect(p) => &p.endpoint,
            Packet::Auth(p) => &p.endpoint,
            Packet::Close(p) => &p.endpoint,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::Publish(_) => "PUBLISH",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::Puback(_) => "PUBACK",
            Packet::Pubrec(_) => "PUBREC",
            Packet::Pubrel(_) => "PUBREL",
            Packet::Pubcomp(_) => "PUBCOMP",
            Packet::Ping(_) => "PINGREQ",
            Packet::Disconnect(_) => "DISCONNECT",
            Packet::Auth(_) => "AUTH",
            Packet::Close(_) => "CLOSE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnackCode {
    Accepted,
    IdentifierRejected,
    BadUsernameOrPassword,
    NotAuthorized,
}

/// Reason attached to PUBACK/PUBREC/PUBREL/PUBCOMP. Only v5.0 puts it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    Success,
    NoMatchingSubscribers,
    PacketIdNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubackCode {
    Granted(Qos),
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubackCode {
    Success,
    NoSubscriptionExisted,
}

/// Server initiated DISCONNECT reason (v5.0 only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    SessionTakenOver,
    KeepAliveTimeout,
    ProtocolError,
}

#[derive(Debug, Clone)]
pub struct OutboundPublish {
    pub packet_id: Option<u16>,
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
    pub payload: ArcPayload,
    pub props: Vec<Property>,
}

/// Packet written by the core through [`crate::endpoint::Endpoint::write`]
#[derive(Debug, Clone)]
pub enum OutboundPacket {
    Connack {
        session_present: bool,
        code: ConnackCode,
    },
    Publish(OutboundPublish),
    Puback {
        packet_id: u16,
        reason: AckReason,
    },
    Pubrec {
        packet_id: u16,
        reason: AckReason,
    },
    Pubrel {
        packet_id: u16,
        reason: AckReason,
    },
    Pubcomp {
        packet_id: u16,
        reason: AckReason,
    },
    Suback {
        packet_id: u16,
        codes: Vec<SubackCode>,
    },
    Unsuback {
        packet_id: u16,
        codes: Vec<UnsubackCode>,
    },
    Pingresp,
    Disconnect {
        reason: DisconnectReason,
    },
}

impl OutboundPacket {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundPacket::Connack { .. } => "CONNACK",
            OutboundPacket::Publish(_) => "PUBLISH",
            OutboundPacket::Puback { .. } => "PUBACK",
            OutboundPacket::Pubrec { .. } => "PUBREC",
            OutboundPacket::Pubrel { .. } => "PUBREL",
            OutboundPacket::Pubcomp { .. } => "PUBCOMP",
            OutboundPacket::Suback { .. } => "SUBACK",
            OutboundPacket::Unsuback { .. } => "UNSUBACK",
            OutboundPacket::Pingresp => "PINGRESP",
            OutboundPacket::Disconnect { .. } => "DISCONNECT",
        }
    }
}
