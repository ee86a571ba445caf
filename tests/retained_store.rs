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

use mqtt_edge_broker::packet::{Message, Qos};
use mqtt_edge_broker::retained_store::RetainedStore;
use mqtt_edge_broker::topic_filter::TopicFilter;
use mqtt_endpoint_tokio::mqtt_ep::prelude::IntoPayload;

fn retained(topic: &str, qos: Qos, payload: &str) -> Message {
    Message::new(topic, qos, true, payload.into_payload())
}

fn matching_topics(store: &RetainedStore, filter: &str) -> Vec<String> {
    let filter = TopicFilter::new(filter).expect("valid filter");
    let mut topics: Vec<String> = store
        .get_matching(&filter)
        .into_iter()
        .map(|m| m.topic)
        .collect();
    topics.sort();
    topics
}

fn populated() -> RetainedStore {
    let store = RetainedStore::new();
    for topic in [
        "sport/tennis/score",
        "sport/tennis/player1",
        "sport/football/score",
        "sport",
        "news/today",
        "$SYS/broker/uptime",
    ] {
        store.store(retained(topic, Qos::AtMostOnce, topic));
    }
    store
}

#[test]
fn test_store_and_retrieve_exact_match() {
    let store = RetainedStore::new();
    store.store(retained("sport/tennis/score", Qos::AtLeastOnce, "15-30"));

    let filter = TopicFilter::new("sport/tennis/score").unwrap();
    let messages = store.get_matching(&filter);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "sport/tennis/score");
    assert_eq!(messages[0].qos, Qos::AtLeastOnce);
    assert_eq!(messages[0].payload.as_slice(), b"15-30");
}

#[test]
fn test_store_overwrite() {
    let store = RetainedStore::new();
    store.store(retained("a/b", Qos::AtMostOnce, "first"));
    store.store(retained("a/b", Qos::ExactlyOnce, "second"));

    assert_eq!(store.len(), 1);
    let messages = store.get_matching(&TopicFilter::new("a/b").unwrap());
    assert_eq!(messages[0].payload.as_slice(), b"second");
    assert_eq!(messages[0].qos, Qos::ExactlyOnce);
}

#[test]
fn test_empty_payload_removes_message() {
    let store = populated();
    let before = store.len();
    store.store(retained("sport/tennis/score", Qos::AtMostOnce, ""));

    assert_eq!(store.len(), before - 1);
    assert_eq!(matching_topics(&store, "sport/tennis/+"), vec!["sport/tennis/player1"]);
}

#[test]
fn test_remove_message() {
    let store = populated();
    store.remove("sport");
    store.remove("does/not/exist");

    assert!(matching_topics(&store, "sport").is_empty());
    assert_eq!(matching_topics(&store, "sport/#").len(), 3);
}

#[test]
fn test_single_level_wildcard() {
    let store = populated();
    assert_eq!(
        matching_topics(&store, "sport/+/score"),
        vec!["sport/football/score", "sport/tennis/score"]
    );
    assert_eq!(matching_topics(&store, "+"), vec!["sport"]);
}

#[test]
fn test_multi_level_wildcard() {
    let store = populated();
    assert_eq!(
        matching_topics(&store, "sport/#"),
        vec![
            "sport",
            "sport/football/score",
            "sport/tennis/player1",
            "sport/tennis/score"
        ]
    );
    assert_eq!(
        matching_topics(&store, "sport/tennis/#"),
        vec!["sport/tennis/player1", "sport/tennis/score"]
    );
}

#[test]
fn test_root_wildcards_skip_system_topics() {
    let store = populated();
    let all = matching_topics(&store, "#");
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(|topic| !topic.starts_with('$')));
    assert_eq!(matching_topics(&store, "$SYS/#"), vec!["$SYS/broker/uptime"]);
    assert!(matching_topics(&store, "+/broker/uptime").is_empty());
}

#[test]
fn test_empty_levels_are_distinct() {
    let store = RetainedStore::new();
    store.store(retained("a//b", Qos::AtMostOnce, "x"));
    store.store(retained("a/b", Qos::AtMostOnce, "y"));

    assert_eq!(matching_topics(&store, "a/+/b"), vec!["a//b"]);
    assert_eq!(matching_topics(&store, "a//b"), vec!["a//b"]);
}

#[test]
fn test_no_match() {
    let store = populated();
    assert!(matching_topics(&store, "weather/#").is_empty());
    assert!(matching_topics(&store, "sport/tennis").is_empty());
}

#[test]
fn test_empty_store() {
    let store = RetainedStore::new();
    assert!(store.is_empty());
    assert!(matching_topics(&store, "#").is_empty());
}
