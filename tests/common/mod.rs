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

#![allow(dead_code)]

use mqtt_edge_broker::endpoint::local::{LocalEndpoint, LocalPeer};
use mqtt_edge_broker::packet::{
    AckPacket, ConnackCode, ConnectPacket, DisconnectPacket, OutboundPacket, OutboundPublish,
    Packet, ProtocolVersion, PublishPacket, Qos, SubackCode, SubscribeEntry, SubscribePacket,
    UnsubackCode, UnsubscribePacket,
};
use mqtt_edge_broker::Context;
use mqtt_endpoint_tokio::mqtt_ep::prelude::IntoPayload;
use std::sync::Arc;
use std::time::Duration;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const SILENCE: Duration = Duration::from_millis(200);

pub fn broker() -> Arc<Context> {
    Context::allow_all(4)
}

/// New in-process connection served by `context`, not yet CONNECTed
pub fn attach(context: &Arc<Context>, version: ProtocolVersion) -> LocalPeer {
    let peer = LocalEndpoint::pair(version);
    context.spawn_serve(peer.endpoint().clone(), None);
    peer
}

pub async fn expect_packet(peer: &mut LocalPeer) -> OutboundPacket {
    peer.recv_timeout(RECV_TIMEOUT)
        .await
        .expect("Timed out waiting for a packet from the broker")
}

pub async fn expect_silence(peer: &mut LocalPeer) {
    if let Some(packet) = peer.recv_timeout(SILENCE).await {
        panic!("Unexpected {} from the broker: {packet:?}", packet.kind());
    }
}

pub async fn expect_connack(peer: &mut LocalPeer) -> (bool, ConnackCode) {
    match expect_packet(peer).await {
        OutboundPacket::Connack {
            session_present,
            code,
        } => (session_present, code),
        other => panic!("Expected CONNACK, got {other:?}"),
    }
}

pub async fn expect_publish(peer: &mut LocalPeer) -> OutboundPublish {
    match expect_packet(peer).await {
        OutboundPacket::Publish(publish) => publish,
        other => panic!("Expected PUBLISH, got {other:?}"),
    }
}

/// Send `connect` and return the CONNACK fields
pub async fn send_connect(
    peer: &mut LocalPeer,
    build: impl FnOnce(ConnectPacket) -> ConnectPacket,
    client_id: &str,
) -> (bool, ConnackCode) {
    let connect = build(ConnectPacket::new(peer.endpoint().clone(), client_id));
    peer.send(Packet::Connect(connect));
    expect_connack(peer).await
}

/// Attach and CONNECT with clean start, asserting acceptance
pub async fn connect(context: &Arc<Context>, client_id: &str, version: ProtocolVersion) -> LocalPeer {
    connect_with(context, client_id, version, |c| c).await
}

pub async fn connect_with(
    context: &Arc<Context>,
    client_id: &str,
    version: ProtocolVersion,
    build: impl FnOnce(ConnectPacket) -> ConnectPacket,
) -> LocalPeer {
    let mut peer = attach(context, version);
    let (_, code) = send_connect(&mut peer, build, client_id).await;
    assert_eq!(code, ConnackCode::Accepted, "CONNACK for {client_id}");
    peer
}

pub async fn subscribe(peer: &mut LocalPeer, packet_id: u16, filter: &str, qos: Qos) -> Vec<SubackCode> {
    peer.send(Packet::Subscribe(SubscribePacket {
        endpoint: peer.endpoint().clone(),
        packet_id,
        entries: vec![SubscribeEntry::new(filter, qos)],
    }));
    match expect_packet(peer).await {
        OutboundPacket::Suback {
            packet_id: acked,
            codes,
        } => {
            assert_eq!(acked, packet_id);
            codes
        }
        other => panic!("Expected SUBACK, got {other:?}"),
    }
}

pub async fn unsubscribe(peer: &mut LocalPeer, packet_id: u16, filter: &str) -> Vec<UnsubackCode> {
    peer.send(Packet::Unsubscribe(UnsubscribePacket {
        endpoint: peer.endpoint().clone(),
        packet_id,
        topic_filters: vec![filter.to_string()],
    }));
    match expect_packet(peer).await {
        OutboundPacket::Unsuback {
            packet_id: acked,
            codes,
        } => {
            assert_eq!(acked, packet_id);
            codes
        }
        other => panic!("Expected UNSUBACK, got {other:?}"),
    }
}

pub fn publish_packet(
    peer: &LocalPeer,
    packet_id: Option<u16>,
    topic: &str,
    qos: Qos,
    payload: &str,
) -> PublishPacket {
    PublishPacket::new(
        peer.endpoint().clone(),
        packet_id,
        topic,
        qos,
        payload.into_payload(),
    )
}

pub fn publish(peer: &LocalPeer, packet_id: Option<u16>, topic: &str, qos: Qos, payload: &str) {
    peer.send(Packet::Publish(publish_packet(peer, packet_id, topic, qos, payload)));
}

pub fn ack(peer: &LocalPeer, packet_id: u16) -> AckPacket {
    AckPacket {
        endpoint: peer.endpoint().clone(),
        packet_id,
    }
}

pub fn disconnect(peer: &LocalPeer, publish_will: bool) {
    peer.send(Packet::Disconnect(DisconnectPacket {
        endpoint: peer.endpoint().clone(),
        publish_will,
    }));
}

pub fn payload_str(publish: &OutboundPublish) -> String {
    String::from_utf8_lossy(publish.payload.as_slice()).into_owned()
}

/// Poll `condition` until it holds or `RECV_TIMEOUT` passes
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not met within {RECV_TIMEOUT:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
