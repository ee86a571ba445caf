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
use mqtt_edge_broker::packet::{OutboundPacket, Packet, ProtocolVersion, Qos};

#[tokio::test]
async fn test_retained_message_delivered_after_suback() {
    let broker = broker();
    let publisher = connect(&broker, "publisher", ProtocolVersion::V5_0).await;
    publisher.send(Packet::Publish(
        publish_packet(&publisher, None, "sport/tennis/score", Qos::AtMostOnce, "15-30").retain(true),
    ));
    wait_until(|| broker.router().retained().len() == 1).await;

    let mut subscriber = connect(&broker, "subscriber", ProtocolVersion::V5_0).await;
    subscriber.send(Packet::Subscribe(mqtt_edge_broker::packet::SubscribePacket {
        endpoint: subscriber.endpoint().clone(),
        packet_id: 1,
        entries: vec![mqtt_edge_broker::packet::SubscribeEntry::new(
            "sport/tennis/score",
            Qos::AtLeastOnce,
        )],
    }));

    assert!(matches!(
        expect_packet(&mut subscriber).await,
        OutboundPacket::Suback { packet_id: 1, .. }
    ));
    let retained = expect_publish(&mut subscriber).await;
    assert_eq!(retained.topic, "sport/tennis/score");
    assert!(retained.retain);
    assert_eq!(retained.qos, Qos::AtMostOnce);
    assert_eq!(payload_str(&retained), "15-30");
}

#[tokio::test]
async fn test_live_delivery_clears_retain_flag() {
    let broker = broker();
    let mut subscriber = connect(&broker, "subscriber", ProtocolVersion::V3_1_1).await;
    let publisher = connect(&broker, "publisher", ProtocolVersion::V3_1_1).await;
    subscribe(&mut subscriber, 1, "live", Qos::AtMostOnce).await;

    publisher.send(Packet::Publish(
        publish_packet(&publisher, None, "live", Qos::AtMostOnce, "now").retain(true),
    ));
    let live = expect_publish(&mut subscriber).await;
    assert!(!live.retain);
    assert_eq!(broker.router().retained().len(), 1);
}

#[tokio::test]
async fn test_retained_qos_capped_by_subscription() {
    let broker = broker();
    let mut publisher = connect(&broker, "publisher", ProtocolVersion::V5_0).await;
    publisher.send(Packet::Publish(
        publish_packet(&publisher, Some(1), "qos/two", Qos::ExactlyOnce, "x").retain(true),
    ));
    expect_packet(&mut publisher).await;
    publisher.send(Packet::Pubrel(ack(&publisher, 1)));
    expect_packet(&mut publisher).await;

    let mut subscriber = connect(&broker, "subscriber", ProtocolVersion::V5_0).await;
    subscribe(&mut subscriber, 1, "qos/#", Qos::AtLeastOnce).await;
    let retained = expect_publish(&mut subscriber).await;
    assert_eq!(retained.qos, Qos::AtLeastOnce);
    assert!(retained.packet_id.is_some());
}

#[tokio::test]
async fn test_empty_payload_deletes_retained_message() {
    let broker = broker();
    let publisher = connect(&broker, "publisher", ProtocolVersion::V5_0).await;
    publisher.send(Packet::Publish(
        publish_packet(&publisher, None, "to/delete", Qos::AtMostOnce, "value").retain(true),
    ));
    wait_until(|| broker.router().retained().len() == 1).await;

    publisher.send(Packet::Publish(
        publish_packet(&publisher, None, "to/delete", Qos::AtMostOnce, "").retain(true),
    ));
    wait_until(|| broker.router().retained().is_empty()).await;

    let mut subscriber = connect(&broker, "subscriber", ProtocolVersion::V5_0).await;
    subscribe(&mut subscriber, 1, "to/#", Qos::AtMostOnce).await;
    expect_silence(&mut subscriber).await;
}

#[tokio::test]
async fn test_latest_retained_message_wins() {
    let broker = broker();
    let publisher = connect(&broker, "publisher", ProtocolVersion::V5_0).await;
    for value in ["1", "2", "3"] {
        publisher.send(Packet::Publish(
            publish_packet(&publisher, None, "counter", Qos::AtMostOnce, value).retain(true),
        ));
    }
    publisher.send(Packet::Publish(
        publish_packet(&publisher, None, "other", Qos::AtMostOnce, "o").retain(true),
    ));
    wait_until(|| broker.router().retained().len() == 2).await;

    let mut subscriber = connect(&broker, "subscriber", ProtocolVersion::V5_0).await;
    subscribe(&mut subscriber, 1, "counter", Qos::AtMostOnce).await;
    assert_eq!(payload_str(&expect_publish(&mut subscriber).await), "3");
    expect_silence(&mut subscriber).await;
}

#[tokio::test]
async fn test_wildcard_subscription_receives_all_matching_retained() {
    let broker = broker();
    let publisher = connect(&broker, "publisher", ProtocolVersion::V5_0).await;
    for topic in ["home/kitchen/temp", "home/bedroom/temp", "home/kitchen/light", "$SYS/home"] {
        publisher.send(Packet::Publish(
            publish_packet(&publisher, None, topic, Qos::AtMostOnce, topic).retain(true),
        ));
    }
    wait_until(|| broker.router().retained().len() == 4).await;

    let mut subscriber = connect(&broker, "subscriber", ProtocolVersion::V5_0).await;
    subscribe(&mut subscriber, 1, "home/+/temp", Qos::AtMostOnce).await;
    let mut topics = vec![
        expect_publish(&mut subscriber).await.topic,
        expect_publish(&mut subscriber).await.topic,
    ];
    topics.sort();
    assert_eq!(topics, vec!["home/bedroom/temp", "home/kitchen/temp"]);
    expect_silence(&mut subscriber).await;

    let mut everything = connect(&broker, "everything", ProtocolVersion::V5_0).await;
    subscribe(&mut everything, 1, "#", Qos::AtMostOnce).await;
    for _ in 0..3 {
        assert!(!expect_publish(&mut everything).await.topic.starts_with('$'));
    }
    expect_silence(&mut everything).await;
}
