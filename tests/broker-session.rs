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

mod common;

use common::*;
use mqtt_edge_broker::packet::{AckReason, OutboundPacket, ProtocolVersion, Qos};
use std::time::Duration;

#[tokio::test]
async fn test_offline_messages_are_replayed_after_reconnect() {
    let broker = broker();
    let mut mailbox =
        connect_with(&broker, "mailbox", ProtocolVersion::V5_0, |c| c.persistent(60)).await;
    subscribe(&mut mailbox, 1, "inbox/#", Qos::AtLeastOnce).await;
    disconnect(&mailbox, false);
    wait_until(|| broker.router().sessions().contains("mailbox")).await;

    let mut publisher = connect(&broker, "publisher", ProtocolVersion::V5_0).await;
    publish(&publisher, Some(1), "inbox/a", Qos::AtLeastOnce, "queued");
    assert!(matches!(
        expect_packet(&mut publisher).await,
        OutboundPacket::Puback {
            packet_id: 1,
            reason: AckReason::Success
        }
    ));
    // QoS 0 is not kept for offline clients
    publish(&publisher, None, "inbox/b", Qos::AtMostOnce, "lost");
    publish(&publisher, Some(2), "inbox/c", Qos::ExactlyOnce, "queued too");
    expect_packet(&mut publisher).await;
    publisher.send(mqtt_edge_broker::packet::Packet::Pubrel(ack(&publisher, 2)));
    expect_packet(&mut publisher).await;
    wait_until(|| broker.router().sessions().offline_message_count("mailbox") == 2).await;

    let mut peer = attach(&broker, ProtocolVersion::V5_0);
    let (session_present, _) = send_connect(&mut peer, |c| c.persistent(60), "mailbox").await;
    assert!(session_present);

    let first = expect_publish(&mut peer).await;
    assert_eq!(first.topic, "inbox/a");
    assert_eq!(first.qos, Qos::AtLeastOnce);
    assert!(first.packet_id.is_some());
    let second = expect_publish(&mut peer).await;
    assert_eq!(second.topic, "inbox/c");
    assert_eq!(second.qos, Qos::ExactlyOnce);
    expect_silence(&mut peer).await;
    assert!(!broker.router().sessions().contains("mailbox"));
}

#[tokio::test]
async fn test_clean_start_discards_previous_session() {
    let broker = broker();
    let mut client = connect_with(&broker, "fresh", ProtocolVersion::V5_0, |c| c.persistent(60)).await;
    subscribe(&mut client, 1, "topic", Qos::AtLeastOnce).await;
    disconnect(&client, false);
    wait_until(|| broker.router().sessions().contains("fresh")).await;

    let mut peer = attach(&broker, ProtocolVersion::V5_0);
    let (session_present, _) = send_connect(&mut peer, |c| c, "fresh").await;
    assert!(!session_present);
    assert!(!broker.router().sessions().contains("fresh"));
    assert!(!broker.router().topics().has_subscriptions("fresh"));
}

#[tokio::test]
async fn test_zero_expiry_is_not_persistent() {
    let broker = broker();
    let mut client = connect_with(&broker, "brief", ProtocolVersion::V5_0, |c| c.persistent(0)).await;
    subscribe(&mut client, 1, "topic", Qos::AtLeastOnce).await;
    disconnect(&client, false);
    wait_until(|| !broker.router().topics().has_subscriptions("brief")).await;
    assert!(!broker.router().sessions().contains("brief"));

    let mut peer = attach(&broker, ProtocolVersion::V5_0);
    let (session_present, _) = send_connect(&mut peer, |c| c.persistent(0), "brief").await;
    assert!(!session_present);
}

#[tokio::test(start_paused = true)]
async fn test_session_expires_after_interval() {
    let broker = broker();
    let mut client = connect_with(&broker, "expiring", ProtocolVersion::V5_0, |c| c.persistent(5)).await;
    subscribe(&mut client, 1, "topic", Qos::AtLeastOnce).await;
    client.drop_transport();
    wait_until(|| broker.router().sessions().contains("expiring")).await;

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(broker.router().sessions().contains("expiring"));
    assert!(broker.router().topics().has_subscriptions("expiring"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_until(|| !broker.router().sessions().contains("expiring")).await;
    assert!(!broker.router().topics().has_subscriptions("expiring"));

    let mut peer = attach(&broker, ProtocolVersion::V5_0);
    let (session_present, _) = send_connect(&mut peer, |c| c.persistent(5), "expiring").await;
    assert!(!session_present);
}

#[tokio::test(start_paused = true)]
async fn test_v3_persistent_session_never_expires() {
    let broker = broker();
    let mut client =
        connect_with(&broker, "durable", ProtocolVersion::V3_1_1, |c| c.persistent(0)).await;
    subscribe(&mut client, 1, "topic", Qos::AtLeastOnce).await;
    disconnect(&client, false);
    wait_until(|| broker.router().sessions().contains("durable")).await;

    tokio::time::sleep(Duration::from_secs(7 * 24 * 3600)).await;
    assert!(broker.router().sessions().contains("durable"));

    let mut peer = attach(&broker, ProtocolVersion::V3_1_1);
    let (session_present, _) = send_connect(&mut peer, |c| c.persistent(0), "durable").await;
    assert!(session_present);
    assert_eq!(
        broker.router().topics().subscriptions("durable"),
        vec![("topic".to_string(), Qos::AtLeastOnce)]
    );
}

#[tokio::test]
async fn test_inflight_messages_are_dropped_on_disconnect() {
    let broker = broker();
    let mut subscriber = connect(&broker, "subscriber", ProtocolVersion::V5_0).await;
    let publisher = connect(&broker, "publisher", ProtocolVersion::V5_0).await;
    subscribe(&mut subscriber, 1, "work", Qos::AtLeastOnce).await;

    publish(&publisher, Some(1), "work", Qos::AtLeastOnce, "job");
    expect_publish(&mut subscriber).await;
    let session = broker.router().endpoints().lookup("subscriber").unwrap();
    assert_eq!(session.inflight().outbound_len(), 1);

    subscriber.drop_transport();
    wait_until(|| broker.router().endpoints().lookup("subscriber").is_none()).await;
    assert_eq!(session.inflight().outbound_len(), 0);
}
