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

use crate::packet::Message;
use crate::topic_filter::{LevelRef, TopicFilter};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Trie node for retained messages
#[derive(Debug, Default)]
struct RetainedTrieNode {
    /// Retained message at this exact topic name (if any)
    message: Option<Message>,
    /// Child nodes for each segment
    children: HashMap<String, RetainedTrieNode>,
}

impl RetainedTrieNode {
    fn is_empty(&self) -> bool {
        self.message.is_none() && self.children.is_empty()
    }
}

/// Retained message store using a trie keyed by topic level
#[derive(Debug, Default)]
pub struct RetainedStore {
    root: RwLock<RetainedTrieNode>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a retained message, replacing any previous one for its topic.
    /// An empty payload deletes the retained message instead.
    pub fn store(&self, message: Message) {
        if message.payload.len() == 0 {
            self.remove(&message.topic);
            return;
        }

        let mut root = self.root.write();
        let segments: Vec<&str> = message.topic.split('/').collect();
        let node = Self::get_or_create_node(&mut root, &segments);
        trace!(
            "Stored retained message for topic '{}' with QoS {:?}",
            message.topic,
            message.qos
        );
        node.message = Some(message);
    }

    /// Remove the retained message for a topic name, pruning empty branches
    pub fn remove(&self, topic_name: &str) {
        let mut root = self.root.write();
        let segments: Vec<&str> = topic_name.split('/').collect();
        if Self::remove_at(&mut root, &segments) {
            trace!("Removed retained message for topic '{topic_name}'");
        }
    }

    /// All retained messages whose topic matches `topic_filter`
    pub fn get_matching(&self, topic_filter: &TopicFilter) -> Vec<Message> {
        let root = self.root.read();
        let mut results = Vec::new();
        Self::search_matching(&root, topic_filter, 0, &mut results);
        results
    }

    pub fn len(&self) -> usize {
        fn count(node: &RetainedTrieNode) -> usize {
            node.message.is_some() as usize + node.children.values().map(count).sum::<usize>()
        }
        count(&self.root.read())
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_empty()
    }

    fn get_or_create_node<'a>(
        node: &'a mut RetainedTrieNode,
        segments: &[&str],
    ) -> &'a mut RetainedTrieNode {
        match segments.split_first() {
            None => node,
            Some((segment, rest)) => {
                let child = node.children.entry(segment.to_string()).or_default();
                Self::get_or_create_node(child, rest)
            }
        }
    }

    /// Returns true if a message was removed
    fn remove_at(node: &mut RetainedTrieNode, segments: &[&str]) -> bool {
        match segments.split_first() {
            None => node.message.take().is_some(),
            Some((segment, rest)) => {
                let Some(child) = node.children.get_mut(*segment) else {
                    return false;
                };
                let removed = Self::remove_at(child, rest);
                if child.is_empty() {
                    node.children.remove(*segment);
                }
                removed
            }
        }
    }

    fn search_matching(
        node: &RetainedTrieNode,
        filter: &TopicFilter,
        depth: usize,
        results: &mut Vec<Message>,
    ) {
        let Some(level) = filter.level(depth) else {
            // Filter exhausted - only the node itself matches
            if let Some(message) = &node.message {
                results.push(message.clone());
            }
            return;
        };

        // Wildcards at the first level never match topics starting with '$'
        let visible = |segment: &str| depth > 0 || !segment.starts_with('$');

        match level {
            LevelRef::MultiWildcard => {
                // '#' also matches the parent level
                if depth > 0 {
                    if let Some(message) = &node.message {
                        results.push(message.clone());
                    }
                }
                for (segment, child) in &node.children {
                    if visible(segment) {
                        Self::collect_all_messages(child, results);
                    }
                }
            }
            LevelRef::SingleWildcard => {
                for (segment, child) in &node.children {
                    if visible(segment) {
                        Self::search_matching(child, filter, depth + 1, results);
                    }
                }
            }
            LevelRef::Literal(segment) => {
                if let Some(child) = node.children.get(segment) {
                    Self::search_matching(child, filter, depth + 1, results);
                }
            }
        }
    }

    fn collect_all_messages(node: &RetainedTrieNode, results: &mut Vec<Message>) {
        if let Some(message) = &node.message {
            results.push(message.clone());
        }
        for child in node.children.values() {
            Self::collect_all_messages(child, results);
        }
    }
}
