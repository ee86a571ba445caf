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
use crate::packet::{AckPacket, AckReason, OutboundPacket, PublishPacket, Qos};
use crate::topic_filter::validate_topic_name;
use tracing::{debug, trace};

impl Processor {
    pub(super) fn process_publish(&self, p: PublishPacket) {
        let Some(session) = self.require_session(&p.endpoint, "PUBLISH") else {
            return;
        };
        if let Err(e) = validate_topic_name(&p.topic) {
            self.protocol_violation(&p.endpoint, &format!("PUBLISH topic '{}': {e}", p.topic));
            return;
        }

        let packet_id = match (p.qos, p.packet_id) {
            (Qos::AtMostOnce, _) => None,
            (_, Some(packet_id)) if packet_id != 0 => Some(packet_id),
            _ => {
                self.protocol_violation(&p.endpoint, "QoS 1/2 PUBLISH without packet id");
                return;
            }
        };

        trace!(
            "PUBLISH from {} on '{}' QoS {:?} retain {} dup {}",
            session.client_id(),
            p.topic,
            p.qos,
            p.retain,
            p.dup
        );

        match (p.qos, packet_id) {
            (Qos::AtLeastOnce, Some(packet_id)) => {
                let delivered = self.router.publish(p.to_message());
                p.endpoint.write(OutboundPacket::Puback {
                    packet_id,
                    reason: delivered_reason(delivered),
                });
            }
            (Qos::ExactlyOnce, Some(packet_id)) => {
                // fan-out waits for PUBREL so a retransmitted PUBLISH is delivered once
                let is_new = session.inflight().record_inbound(packet_id, p.to_message());
                if !is_new {
                    debug!(
                        "Retransmitted QoS 2 PUBLISH {packet_id} from {}",
                        session.client_id()
                    );
                }
                let reason = if self.router.topics().matches(&p.topic).is_empty() {
                    AckReason::NoMatchingSubscribers
                } else {
                    AckReason::Success
                };
                p.endpoint.write(OutboundPacket::Pubrec { packet_id, reason });
            }
            _ => {
                self.router.publish(p.to_message());
            }
        }
    }

    pub(super) fn process_pubrel(&self, p: AckPacket) {
        let Some(session) = self.require_session(&p.endpoint, "PUBREL") else {
            return;
        };
        let released = session.inflight().release_inbound(p.packet_id);
        let reason = match released {
            Some(message) => {
                self.router.publish(message);
                AckReason::Success
            }
            None => {
                debug!(
                    "PUBREL from {} for unknown packet id {}",
                    session.client_id(),
                    p.packet_id
                );
                AckReason::PacketIdNotFound
            }
        };
        p.endpoint.write(OutboundPacket::Pubcomp {
            packet_id: p.packet_id,
            reason,
        });
    }
}

fn delivered_reason(delivered: usize) -> AckReason {
    if delivered == 0 {
        AckReason::NoMatchingSubscribers
    } else {
        AckReason::Success
    }
}
