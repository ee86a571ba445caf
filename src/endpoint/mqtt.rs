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

//! Network endpoint backed by `mqtt-endpoint-tokio`.
//!
//! A reader task turns decoded frames into [`Packet`]s and a writer task
//! serializes [`OutboundPacket`]s into version specific frames. Both run for
//! the lifetime of the connection.

use super::{epoch_millis, Endpoint, EndpointRef, PacketStream};
use crate::config::ListenerConfig;
use crate::packet::{
    AckPacket, AckReason, AuthPacket, ConnackCode, ConnectPacket, DisconnectPacket,
    DisconnectReason, OutboundPacket, OutboundPublish, Packet, PingPacket, ProtocolVersion,
    PublishPacket, SubackCode, SubscribeEntry, SubscribePacket, UnsubackCode, UnsubscribePacket,
    WillMessage,
};
use anyhow::anyhow;
use futures::StreamExt;
use mqtt_endpoint_tokio::mqtt_ep;
use mqtt_ep::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

type ServerEndpoint = mqtt_ep::Endpoint<mqtt_ep::role::Server>;

enum Command {
    Write(OutboundPacket),
    Close,
}

pub struct MqttEndpoint {
    remote_addr: String,
    connected_at: u64,
    connected: AtomicBool,
    version: Arc<OnceLock<ProtocolVersion>>,
    commands: mpsc::UnboundedSender<Command>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    connect_props: OnceLock<Vec<mqtt_ep::packet::Property>>,
    will_props: OnceLock<Vec<mqtt_ep::packet::Property>>,
}

impl MqttEndpoint {
    /// Attaches `transport` to a server role endpoint and starts its reader
    /// and writer tasks.
    pub async fn attach<T>(
        transport: T,
        remote_addr: String,
        config: &ListenerConfig,
    ) -> anyhow::Result<EndpointRef>
    where
        T: mqtt_ep::transport::TransportOps + Send + 'static,
    {
        let endpoint: ServerEndpoint = mqtt_ep::Endpoint::new(mqtt_ep::Version::Undetermined);

        let mut opts_builder = mqtt_ep::connection_option::ConnectionOption::builder()
            .auto_pub_response(false)
            .auto_ping_response(false)
            .connection_establish_timeout_ms(config.connect_timeout_ms)
            .shutdown_timeout_ms(5_000u64);

        if let Some(recv_buf_size) = config.recv_buffer_size {
            opts_builder = opts_builder.recv_buffer_size(recv_buf_size);
        }

        let opts = opts_builder
            .build()
            .map_err(|e| anyhow!("invalid connection option: {e:?}"))?;
        endpoint
            .attach_with_options(transport, mqtt_ep::Mode::Server, opts)
            .await
            .map_err(|e| anyhow!("transport attach failed for {remote_addr}: {e}"))?;
        trace!("Transport from {remote_addr} attached");

        let endpoint = Arc::new(endpoint);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let version = Arc::new(OnceLock::new());

        let this = Arc::new(MqttEndpoint {
            remote_addr: remote_addr.clone(),
            connected_at: epoch_millis(),
            connected: AtomicBool::new(true),
            version: version.clone(),
            commands: commands_tx,
            inbound: Mutex::new(Some(inbound_rx)),
            connect_props: OnceLock::new(),
            will_props: OnceLock::new(),
        });
        let endpoint_ref = EndpointRef::new(this.clone());

        tokio::spawn(write_loop(endpoint.clone(), commands_rx, version, remote_addr));
        tokio::spawn(read_loop(
            endpoint,
            this,
            endpoint_ref.clone(),
            inbound_tx,
            config.max_message_size,
        ));

        Ok(endpoint_ref)
    }

    fn decode(
        &self,
        endpoint: &EndpointRef,
        packet: mqtt_ep::packet::Packet,
        max_message_size: usize,
    ) -> Decoded {
        use mqtt_ep::packet::Packet as Wire;

        let packet = match packet {
            Wire::V3_1_1Connect(connect) => {
                let _ = self.version.set(ProtocolVersion::V3_1_1);
                Packet::Connect(connect_from_v3_1_1(endpoint.clone(), &connect))
            }
            Wire::V5_0Connect(connect) => {
                let _ = self.version.set(ProtocolVersion::V5_0);
                let _ = self.connect_props.set(connect.props().to_vec());
                let _ = self.will_props.set(connect.will_props().to_vec());
                Packet::Connect(connect_from_v5_0(endpoint.clone(), &connect))
            }
            Wire::V3_1_1Publish(publish) => {
                if publish.payload().len() > max_message_size {
                    return Decoded::Violation("PUBLISH exceeds maximum message size");
                }
                Packet::Publish(PublishPacket {
                    endpoint: endpoint.clone(),
                    packet_id: publish.packet_id(),
                    topic: publish.topic_name().to_string(),
                    qos: publish.qos(),
                    retain: publish.retain(),
                    dup: publish.dup(),
                    payload: publish.payload().clone(),
                    props: Vec::new(),
                })
            }
            Wire::V5_0Publish(publish) => {
                if publish.payload().len() > max_message_size {
                    return Decoded::Violation("PUBLISH exceeds maximum message size");
                }
                // Topic aliases are per connection, subscription ids are server to client only
                let props = publish
                    .props()
                    .iter()
                    .filter(|prop| {
                        !matches!(
                            prop,
                            mqtt_ep::packet::Property::TopicAlias(_)
                                | mqtt_ep::packet::Property::SubscriptionIdentifier(_)
                        )
                    })
                    .cloned()
                    .collect();
                Packet::Publish(PublishPacket {
                    endpoint: endpoint.clone(),
                    packet_id: publish.packet_id(),
                    topic: publish.topic_name().to_string(),
                    qos: publish.qos(),
                    retain: publish.retain(),
                    dup: publish.dup(),
                    payload: publish.payload().clone(),
                    props,
                })
            }
            Wire::V3_1_1Subscribe(sub) => Packet::Subscribe(SubscribePacket {
                endpoint: endpoint.clone(),
                packet_id: sub.packet_id(),
                entries: sub
                    .entries()
                    .iter()
                    .map(|e| SubscribeEntry::new(e.topic_filter(), e.sub_opts().qos()))
                    .collect(),
            }),
            Wire::V5_0Subscribe(sub) => Packet::Subscribe(SubscribePacket {
                endpoint: endpoint.clone(),
                packet_id: sub.packet_id(),
                entries: sub
                    .entries()
                    .iter()
                    .map(|e| SubscribeEntry::new(e.topic_filter(), e.sub_opts().qos()))
                    .collect(),
            }),
            Wire::V3_1_1Unsubscribe(unsub) => Packet::Unsubscribe(UnsubscribePacket {
                endpoint: endpoint.clone(),
                packet_id: unsub.packet_id(),
                topic_filters: unsub
                    .entries()
                    .iter()
                    .map(|e| e.as_ref().to_string())
                    .collect(),
            }),
            Wire::V5_0Unsubscribe(unsub) => Packet::Unsubscribe(UnsubscribePacket {
                endpoint: endpoint.clone(),
                packet_id: unsub.packet_id(),
                topic_filters: unsub
                    .entries()
                    .iter()
                    .map(|e| e.as_ref().to_string())
                    .collect(),
            }),
            Wire::V3_1_1Puback(p) => Packet::Puback(ack(endpoint, p.packet_id())),
            Wire::V5_0Puback(p) => Packet::Puback(ack(endpoint, p.packet_id())),
            Wire::V3_1_1Pubrec(p) => Packet::Pubrec(ack(endpoint, p.packet_id())),
            Wire::V5_0Pubrec(p) => Packet::Pubrec(ack(endpoint, p.packet_id())),
            Wire::V3_1_1Pubrel(p) => Packet::Pubrel(ack(endpoint, p.packet_id())),
            Wire::V5_0Pubrel(p) => Packet::Pubrel(ack(endpoint, p.packet_id())),
            Wire::V3_1_1Pubcomp(p) => Packet::Pubcomp(ack(endpoint, p.packet_id())),
            Wire::V5_0Pubcomp(p) => Packet::Pubcomp(ack(endpoint, p.packet_id())),
            Wire::V3_1_1Pingreq(_) | Wire::V5_0Pingreq(_) => Packet::Ping(PingPacket {
                endpoint: endpoint.clone(),
            }),
            Wire::V3_1_1Disconnect(_) => Packet::Disconnect(DisconnectPacket {
                endpoint: endpoint.clone(),
                publish_will: false,
            }),
            Wire::V5_0Disconnect(disconnect) => Packet::Disconnect(DisconnectPacket {
                endpoint: endpoint.clone(),
                publish_will: disconnect.reason_code()
                    == Some(
                        mqtt_ep::result_code::DisconnectReasonCode::DisconnectWithWillMessage,
                    ),
            }),
            Wire::V5_0Auth(_) => Packet::Auth(AuthPacket {
                endpoint: endpoint.clone(),
            }),
            other => {
                debug!(
                    "Ignoring {:?} from {}, not a client to server packet",
                    other.packet_type(),
                    self.remote_addr
                );
                return Decoded::Skip;
            }
        };
        Decoded::Packet(packet)
    }
}

enum Decoded {
    Packet(Packet),
    Skip,
    Violation(&'static str),
}

fn ack(endpoint: &EndpointRef, packet_id: u16) -> AckPacket {
    AckPacket {
        endpoint: endpoint.clone(),
        packet_id,
    }
}

fn connect_from_v3_1_1(
    endpoint: EndpointRef,
    connect: &mqtt_ep::packet::v3_1_1::Connect,
) -> ConnectPacket {
    let clean_start = connect.clean_session();
    let will = connect.will_flag().then(|| {
        let topic = connect
            .will_topic()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let payload = connect.will_payload().unwrap_or_default();
        WillMessage::new(topic, connect.will_qos(), connect.will_retain(), payload.into_payload())
    });

    ConnectPacket {
        endpoint,
        protocol: ProtocolVersion::V3_1_1,
        client_id: connect.client_id().to_string(),
        username: connect.user_name().map(|s| s.to_string()),
        password: connect.password().map(|p| p.to_vec()),
        clean_start,
        keep_alive: connect.keep_alive(),
        // clean_session=false means the session never expires
        session_expiry_interval: if clean_start { 0 } else { u32::MAX },
        will,
    }
}

fn connect_from_v5_0(endpoint: EndpointRef, connect: &mqtt_ep::packet::v5_0::Connect) -> ConnectPacket {
    let session_expiry_interval = connect
        .props()
        .iter()
        .find_map(|prop| {
            if let mqtt_ep::packet::Property::SessionExpiryInterval(_) = prop {
                prop.as_u32()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let will = connect.will_flag().then(|| {
        let topic = connect
            .will_topic()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let payload = connect.will_payload().unwrap_or_default();
        let will_props = connect.will_props().to_vec();
        let delay_interval = will_props
            .iter()
            .find_map(|prop| {
                if let mqtt_ep::packet::Property::WillDelayInterval(_) = prop {
                    prop.as_u32()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        let mut will =
            WillMessage::new(topic, connect.will_qos(), connect.will_retain(), payload.into_payload())
                .with_delay_interval(delay_interval);
        // Will Delay Interval is consumed by the broker, the rest travels with the message
        will.props = will_props
            .into_iter()
            .filter(|prop| !matches!(prop, mqtt_ep::packet::Property::WillDelayInterval(_)))
            .collect();
        will
    });

    ConnectPacket {
        endpoint,
        protocol: ProtocolVersion::V5_0,
        client_id: connect.client_id().to_string(),
        username: connect.user_name().map(|s| s.to_string()),
        password: connect.password().map(|p| p.to_vec()),
        clean_start: connect.clean_start(),
        keep_alive: connect.keep_alive(),
        session_expiry_interval,
        will,
    }
}

impl Endpoint for MqttEndpoint {
    fn write(&self, packet: OutboundPacket) {
        if !self.connected.load(Ordering::Acquire) {
            trace!("Dropping {} for closed {}", packet.kind(), self.remote_addr);
            return;
        }
        let _ = self.commands.send(Command::Write(packet));
    }

    fn receive(&self) -> PacketStream {
        match self.inbound.lock().take() {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|packet| (packet, rx))
            })
            .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Close);
        }
    }

    fn is_v5(&self) -> bool {
        self.version.get().copied() != Some(ProtocolVersion::V3_1_1)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn connected_at_millis(&self) -> u64 {
        self.connected_at
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }

    fn connect_properties(&self) -> Vec<mqtt_ep::packet::Property> {
        self.connect_props.get().cloned().unwrap_or_default()
    }

    fn will_properties(&self) -> Vec<mqtt_ep::packet::Property> {
        self.will_props.get().cloned().unwrap_or_default()
    }
}

async fn read_loop(
    endpoint: Arc<ServerEndpoint>,
    this: Arc<MqttEndpoint>,
    endpoint_ref: EndpointRef,
    inbound: mpsc::UnboundedSender<Packet>,
    max_message_size: usize,
) {
    loop {
        match endpoint.recv().await {
            Ok(packet) => match this.decode(&endpoint_ref, packet, max_message_size) {
                Decoded::Packet(packet) => {
                    if inbound.send(packet).is_err() {
                        break;
                    }
                }
                Decoded::Skip => {}
                Decoded::Violation(reason) => {
                    warn!("Closing {}: {reason}", this.remote_addr);
                    break;
                }
            },
            Err(e) => {
                debug!("Connection {} ended: {e}", this.remote_addr);
                break;
            }
        }
    }
    this.close();
}

async fn write_loop(
    endpoint: Arc<ServerEndpoint>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    version: Arc<OnceLock<ProtocolVersion>>,
    remote_addr: String,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Write(packet) => {
                let kind = packet.kind();
                let tracked = is_tracked_publish(&packet);
                let version = version.get().copied().unwrap_or(ProtocolVersion::V5_0);
                if let Err(e) = send_outbound(&endpoint, version, packet).await {
                    if tracked {
                        // the session still holds the packet id; ending the
                        // connection releases its in-flight state
                        warn!("Failed to send {kind} to {remote_addr}: {e}, closing");
                        if let Err(e) = endpoint.close().await {
                            debug!("Failed to close {remote_addr}: {e}");
                        }
                        break;
                    }
                    debug!("Failed to send {kind} to {remote_addr}: {e}");
                }
            }
            Command::Close => {
                if let Err(e) = endpoint.close().await {
                    debug!("Failed to close {remote_addr}: {e}");
                }
                break;
            }
        }
    }
}

/// QoS 1/2 PUBLISH whose packet id is recorded in the session's in-flight store
fn is_tracked_publish(packet: &OutboundPacket) -> bool {
    matches!(
        packet,
        OutboundPacket::Publish(OutboundPublish {
            packet_id: Some(_),
            ..
        })
    )
}

async fn send_outbound(
    endpoint: &ServerEndpoint,
    version: ProtocolVersion,
    packet: OutboundPacket,
) -> anyhow::Result<()> {
    match version {
        ProtocolVersion::V3_1_1 => send_v3_1_1(endpoint, packet).await,
        ProtocolVersion::V5_0 => send_v5_0(endpoint, packet).await,
    }
}

async fn register_publish_id(endpoint: &ServerEndpoint, publish: &OutboundPublish) -> anyhow::Result<()> {
    if let Some(packet_id) = publish.packet_id {
        endpoint
            .register_packet_id(packet_id)
            .await
            .map_err(|e| anyhow!("packet id {packet_id} unavailable: {e:?}"))?;
    }
    Ok(())
}

async fn send_v3_1_1(endpoint: &ServerEndpoint, packet: OutboundPacket) -> anyhow::Result<()> {
    use mqtt_ep::packet::v3_1_1;
    use mqtt_ep::result_code::{ConnectReturnCode, SubackReturnCode};

    match packet {
        OutboundPacket::Connack {
            session_present,
            code,
        } => {
            let return_code = match code {
                ConnackCode::Accepted => ConnectReturnCode::Accepted,
                ConnackCode::IdentifierRejected => ConnectReturnCode::IdentifierRejected,
                ConnackCode::BadUsernameOrPassword => ConnectReturnCode::BadUserNameOrPassword,
                ConnackCode::NotAuthorized => ConnectReturnCode::NotAuthorized,
            };
            let connack = v3_1_1::Connack::builder()
                .session_present(session_present)
                .return_code(return_code)
                .build()
                .map_err(|e| anyhow!("CONNACK: {e:?}"))?;
            endpoint.send(connack).await?;
        }
        OutboundPacket::Publish(publish) => {
            register_publish_id(endpoint, &publish).await?;
            let mut builder = v3_1_1::Publish::builder()
                .topic_name(&publish.topic)
                .map_err(|e| anyhow!("PUBLISH topic: {e:?}"))?
                .qos(publish.qos)
                .retain(publish.retain)
                .dup(publish.dup)
                .payload(publish.payload);
            if let Some(packet_id) = publish.packet_id {
                builder = builder.packet_id(packet_id);
            }
            let publish = builder.build().map_err(|e| anyhow!("PUBLISH: {e:?}"))?;
            endpoint.send(publish).await?;
        }
        OutboundPacket::Puback { packet_id, .. } => {
            let puback = v3_1_1::Puback::builder()
                .packet_id(packet_id)
                .build()
                .map_err(|e| anyhow!("PUBACK: {e:?}"))?;
            endpoint.send(puback).await?;
        }
        OutboundPacket::Pubrec { packet_id, .. } => {
            let pubrec = v3_1_1::Pubrec::builder()
                .packet_id(packet_id)
                .build()
                .map_err(|e| anyhow!("PUBREC: {e:?}"))?;
            endpoint.send(pubrec).await?;
        }
        OutboundPacket::Pubrel { packet_id, .. } => {
            let pubrel = v3_1_1::Pubrel::builder()
                .packet_id(packet_id)
                .build()
                .map_err(|e| anyhow!("PUBREL: {e:?}"))?;
            endpoint.send(pubrel).await?;
        }
        OutboundPacket::Pubcomp { packet_id, .. } => {
            let pubcomp = v3_1_1::Pubcomp::builder()
                .packet_id(packet_id)
                .build()
                .map_err(|e| anyhow!("PUBCOMP: {e:?}"))?;
            endpoint.send(pubcomp).await?;
        }
        OutboundPacket::Suback { packet_id, codes } => {
            let return_codes = codes
                .into_iter()
                .map(|code| match code {
                    SubackCode::Granted(mqtt_ep::packet::Qos::AtMostOnce) => {
                        SubackReturnCode::SuccessMaximumQos0
                    }
                    SubackCode::Granted(mqtt_ep::packet::Qos::AtLeastOnce) => {
                        SubackReturnCode::SuccessMaximumQos1
                    }
                    SubackCode::Granted(mqtt_ep::packet::Qos::ExactlyOnce) => {
                        SubackReturnCode::SuccessMaximumQos2
                    }
                    SubackCode::Failure => SubackReturnCode::Failure,
                })
                .collect();
            let suback = v3_1_1::Suback::builder()
                .packet_id(packet_id)
                .return_codes(return_codes)
                .build()
                .map_err(|e| anyhow!("SUBACK: {e:?}"))?;
            endpoint.send(suback).await?;
        }
        OutboundPacket::Unsuback { packet_id, .. } => {
            let unsuback = v3_1_1::Unsuback::builder()
                .packet_id(packet_id)
                .build()
                .map_err(|e| anyhow!("UNSUBACK: {e:?}"))?;
            endpoint.send(unsuback).await?;
        }
        OutboundPacket::Pingresp => {
            let pingresp = v3_1_1::Pingresp::builder()
                .build()
                .map_err(|e| anyhow!("PINGRESP: {e:?}"))?;
            endpoint.send(pingresp).await?;
        }
        OutboundPacket::Disconnect { reason } => {
            // v3.1.1 has no server DISCONNECT, closing the transport is the signal
            trace!("Suppressing DISCONNECT ({reason:?}) for v3.1.1 client");
        }
    }
    Ok(())
}

async fn send_v5_0(endpoint: &ServerEndpoint, packet: OutboundPacket) -> anyhow::Result<()> {
    use mqtt_ep::packet::v5_0;
    use mqtt_ep::result_code::{
        ConnectReasonCode, DisconnectReasonCode, PubackReasonCode, PubcompReasonCode,
        PubrecReasonCode, PubrelReasonCode, SubackReasonCode, UnsubackReasonCode,
    };

    match packet {
        OutboundPacket::Connack {
            session_present,
            code,
        } => {
            let reason_code = match code {
                ConnackCode::Accepted => ConnectReasonCode::Success,
                ConnackCode::IdentifierRejected => ConnectReasonCode::ClientIdentifierNotValid,
                ConnackCode::BadUsernameOrPassword => ConnectReasonCode::BadUserNameOrPassword,
                ConnackCode::NotAuthorized => ConnectReasonCode::NotAuthorized,
            };
            let connack = v5_0::Connack::builder()
                .session_present(session_present)
                .reason_code(reason_code)
                .build()
                .map_err(|e| anyhow!("CONNACK: {e:?}"))?;
            endpoint.send(connack).await?;
        }
        OutboundPacket::Publish(publish) => {
            register_publish_id(endpoint, &publish).await?;
            let mut builder = v5_0::Publish::builder()
                .topic_name(&publish.topic)
                .map_err(|e| anyhow!("PUBLISH topic: {e:?}"))?
                .qos(publish.qos)
                .retain(publish.retain)
                .dup(publish.dup)
                .payload(publish.payload);
            if !publish.props.is_empty() {
                builder = builder.props(publish.props);
            }
            if let Some(packet_id) = publish.packet_id {
                builder = builder.packet_id(packet_id);
            }
            let publish = builder.build().map_err(|e| anyhow!("PUBLISH: {e:?}"))?;
            endpoint.send(publish).await?;
        }
        OutboundPacket::Puback { packet_id, reason } => {
            let reason_code = match reason {
                AckReason::NoMatchingSubscribers => PubackReasonCode::NoMatchingSubscribers,
                _ => PubackReasonCode::Success,
            };
            let puback = v5_0::Puback::builder()
                .packet_id(packet_id)
                .reason_code(reason_code)
                .build()
                .map_err(|e| anyhow!("PUBACK: {e:?}"))?;
            endpoint.send(puback).await?;
        }
        OutboundPacket::Pubrec { packet_id, reason } => {
            let reason_code = match reason {
                AckReason::NoMatchingSubscribers => PubrecReasonCode::NoMatchingSubscribers,
                _ => PubrecReasonCode::Success,
            };
            let pubrec = v5_0::Pubrec::builder()
                .packet_id(packet_id)
                .reason_code(reason_code)
                .build()
                .map_err(|e| anyhow!("PUBREC: {e:?}"))?;
            endpoint.send(pubrec).await?;
        }
        OutboundPacket::Pubrel { packet_id, reason } => {
            let reason_code = match reason {
                AckReason::PacketIdNotFound => PubrelReasonCode::PacketIdentifierNotFound,
                _ => PubrelReasonCode::Success,
            };
            let pubrel = v5_0::Pubrel::builder()
                .packet_id(packet_id)
                .reason_code(reason_code)
                .build()
                .map_err(|e| anyhow!("PUBREL: {e:?}"))?;
            endpoint.send(pubrel).await?;
        }
        OutboundPacket::Pubcomp { packet_id, reason } => {
            let reason_code = match reason {
                AckReason::PacketIdNotFound => PubcompReasonCode::PacketIdentifierNotFound,
                _ => PubcompReasonCode::Success,
            };
            let pubcomp = v5_0::Pubcomp::builder()
                .packet_id(packet_id)
                .reason_code(reason_code)
                .build()
                .map_err(|e| anyhow!("PUBCOMP: {e:?}"))?;
            endpoint.send(pubcomp).await?;
        }
        OutboundPacket::Suback { packet_id, codes } => {
            let reason_codes = codes
                .into_iter()
                .map(|code| match code {
                    SubackCode::Granted(mqtt_ep::packet::Qos::AtMostOnce) => {
                        SubackReasonCode::GrantedQos0
                    }
                    SubackCode::Granted(mqtt_ep::packet::Qos::AtLeastOnce) => {
                        SubackReasonCode::GrantedQos1
                    }
                    SubackCode::Granted(mqtt_ep::packet::Qos::ExactlyOnce) => {
                        SubackReasonCode::GrantedQos2
                    }
                    SubackCode::Failure => SubackReasonCode::UnspecifiedError,
                })
                .collect();
            let suback = v5_0::Suback::builder()
                .packet_id(packet_id)
                .reason_codes(reason_codes)
                .build()
                .map_err(|e| anyhow!("SUBACK: {e:?}"))?;
            endpoint.send(suback).await?;
        }
        OutboundPacket::Unsuback { packet_id, codes } => {
            let reason_codes = codes
                .into_iter()
                .map(|code| match code {
                    UnsubackCode::Success => UnsubackReasonCode::Success,
                    UnsubackCode::NoSubscriptionExisted => {
                        UnsubackReasonCode::NoSubscriptionExisted
                    }
                })
                .collect();
            let unsuback = v5_0::Unsuback::builder()
                .packet_id(packet_id)
                .reason_codes(reason_codes)
                .build()
                .map_err(|e| anyhow!("UNSUBACK: {e:?}"))?;
            endpoint.send(unsuback).await?;
        }
        OutboundPacket::Pingresp => {
            let pingresp = v5_0::Pingresp::builder()
                .build()
                .map_err(|e| anyhow!("PINGRESP: {e:?}"))?;
            endpoint.send(pingresp).await?;
        }
        OutboundPacket::Disconnect { reason } => {
            let reason_code = match reason {
                DisconnectReason::SessionTakenOver => DisconnectReasonCode::SessionTakenOver,
                DisconnectReason::KeepAliveTimeout => DisconnectReasonCode::KeepAliveTimeout,
                DisconnectReason::ProtocolError => DisconnectReasonCode::ProtocolError,
            };
            let disconnect = v5_0::Disconnect::builder()
                .reason_code(reason_code)
                .build()
                .map_err(|e| anyhow!("DISCONNECT: {e:?}"))?;
            endpoint.send(disconnect).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Qos;

    fn publish(packet_id: Option<u16>, qos: Qos) -> OutboundPacket {
        OutboundPacket::Publish(OutboundPublish {
            packet_id,
            topic: "t".to_string(),
            qos,
            retain: false,
            dup: false,
            payload: "p".into_payload(),
            props: Vec::new(),
        })
    }

    #[test]
    fn test_only_publish_with_packet_id_is_tracked() {
        assert!(is_tracked_publish(&publish(Some(1), Qos::AtLeastOnce)));
        assert!(is_tracked_publish(&publish(Some(2), Qos::ExactlyOnce)));
        assert!(!is_tracked_publish(&publish(None, Qos::AtMostOnce)));
        assert!(!is_tracked_publish(&OutboundPacket::Pingresp));
        assert!(!is_tracked_publish(&OutboundPacket::Puback {
            packet_id: 1,
            reason: AckReason::Success,
        }));
    }
}
