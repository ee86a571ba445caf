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

use super::Processor;
use crate::packet::{OutboundPacket, SubackCode, SubscribePacket, UnsubackCode, UnsubscribePacket};
use crate::topic_filter::TopicFilter;
use tracing::{debug, trace};

impl Processor {
    pub(super) fn process_subscribe(&self, p: SubscribePacket) {
        let Some(session) = self.require_session(&p.endpoint, "SUBSCRIBE") else {
            return;
        };
        if p.entries.is_empty() {
            self.protocol_violation(&p.endpoint, "SUBSCRIBE without topic filters");
            return;
        }

        let client_id = session.client_id();
        let mut granted = Vec::with_capacity(p.entries.len());
        let codes = p
            .entries
            .iter()
            .map(|entry| {
                match self
                    .router
                    .topics()
                    .subscribe(client_id, &entry.topic_filter, entry.qos)
                {
                    Ok(_) => {
                        if let Ok(filter) = TopicFilter::new(&entry.topic_filter) {
                            granted.push((filter, entry.qos));
                        }
                        SubackCode::Granted(entry.qos)
                    }
                    Err(e) => {
                        debug!(
                            "Client {client_id} subscription to '{}' rejected: {e}",
                            entry.topic_filter
                        );
                        SubackCode::Failure
                    }
                }
            })
            .collect();

        p.endpoint.write(OutboundPacket::Suback {
            packet_id: p.packet_id,
            codes,
        });

        for (filter, qos) in granted {
            trace!("Sending retained messages for '{filter}' to {client_id}");
            self.router.deliver_retained(&session, &filter, qos);
        }
    }

    pub(super) fn process_unsubscribe(&self, p: UnsubscribePacket) {
        let Some(session) = self.require_session(&p.endpoint, "UNSUBSCRIBE") else {
            return;
        };
        if p.topic_filters.is_empty() {
            self.protocol_violation(&p.endpoint, "UNSUBSCRIBE without topic filters");
            return;
        }

        let codes = p
            .topic_filters
            .iter()
            .map(|topic_filter| {
                if self
                    .router
                    .topics()
                    .unsubscribe(session.client_id(), topic_filter)
                {
                    UnsubackCode::Success
                } else {
                    UnsubackCode::NoSubscriptionExisted
                }
            })
            .collect();

        p.endpoint.write(OutboundPacket::Unsuback {
            packet_id: p.packet_id,
            codes,
        });
    }
}
