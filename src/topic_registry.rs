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

use crate::packet::Qos;
use crate::topic_filter::{TopicFilter, TopicFilterError};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tracing::trace;

pub type ClientId = String;

/// Subscribers of one topic filter
#[derive(Debug)]
struct FilterEntry {
    filter: TopicFilter,
    subscribers: HashMap<ClientId, Qos>,
}

/// Topic filter -> subscriber map with a per-client reverse index.
///
/// Filters live in a sharded concurrent map so subscribing to one filter
/// never blocks matching or subscribing on unrelated filters.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    filters: DashMap<String, FilterEntry>,
    /// client id -> filters it holds, for teardown
    by_client: DashMap<ClientId, HashSet<String>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a subscription.
    /// Returns Ok(is_new) where is_new is false when an existing subscription's QoS was replaced.
    pub fn subscribe(
        &self,
        client_id: &str,
        topic_filter: &str,
        qos: Qos,
    ) -> Result<bool, TopicFilterError> {
        let filter = TopicFilter::new(topic_filter)?;

        let is_new = {
            let mut entry = self
                .filters
                .entry(topic_filter.to_string())
                .or_insert_with(|| FilterEntry {
                    filter,
                    subscribers: HashMap::new(),
                });
            entry
                .subscribers
                .insert(client_id.to_string(), qos)
                .is_none()
        };
        self.by_client
            .entry(client_id.to_string())
            .or_default()
            .insert(topic_filter.to_string());

        trace!("Client {client_id} subscribed to '{topic_filter}' with QoS {qos:?}, is_new: {is_new}");
        Ok(is_new)
    }

    /// Returns true if the subscription existed
    pub fn unsubscribe(&self, client_id: &str, topic_filter: &str) -> bool {
        let removed = self.remove_subscriber(client_id, topic_filter);
        if let Some(mut filters) = self.by_client.get_mut(client_id) {
            filters.remove(topic_filter);
        }
        self.by_client
            .remove_if(client_id, |_, filters| filters.is_empty());

        trace!("Client {client_id} unsubscribed from '{topic_filter}', removed: {removed}");
        removed
    }

    fn remove_subscriber(&self, client_id: &str, topic_filter: &str) -> bool {
        let removed = match self.filters.get_mut(topic_filter) {
            Some(mut entry) => entry.subscribers.remove(client_id).is_some(),
            None => false,
        };
        if removed {
            self.filters
                .remove_if(topic_filter, |_, entry| entry.subscribers.is_empty());
        }
        removed
    }

    /// Remove every subscription held by `client_id`
    pub fn unsubscribe_all(&self, client_id: &str) {
        let Some((_, filters)) = self.by_client.remove(client_id) else {
            return;
        };
        for topic_filter in &filters {
            self.remove_subscriber(client_id, topic_filter);
        }
        trace!("Removed {} subscriptions of client {client_id}", filters.len());
    }

    /// Subscribers whose filters match `topic`.
    ///
    /// A client matching through several filters appears once, with the
    /// highest QoS granted among them.
    pub fn matches(&self, topic: &str) -> HashMap<ClientId, Qos> {
        let mut result: HashMap<ClientId, Qos> = HashMap::new();
        for entry in self.filters.iter() {
            if !entry.filter.matches(topic) {
                continue;
            }
            for (client_id, qos) in &entry.subscribers {
                result
                    .entry(client_id.clone())
                    .and_modify(|granted| *granted = (*granted).max(*qos))
                    .or_insert(*qos);
            }
        }
        result
    }

    /// Filters and QoS held by `client_id`
    pub fn subscriptions(&self, client_id: &str) -> Vec<(String, Qos)> {
        let Some(filters) = self.by_client.get(client_id).map(|f| f.clone()) else {
            return Vec::new();
        };
        filters
            .into_iter()
            .filter_map(|topic_filter| {
                let qos = self
                    .filters
                    .get(&topic_filter)
                    .and_then(|entry| entry.subscribers.get(client_id).copied())?;
                Some((topic_filter, qos))
            })
            .collect()
    }

    pub fn has_subscriptions(&self, client_id: &str) -> bool {
        self.by_client.contains_key(client_id)
    }

    /// Number of distinct topic filters with at least one subscriber
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}
