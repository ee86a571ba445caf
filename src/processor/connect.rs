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
use crate::packet::{
    CloseReason, ClosePacket, ConnackCode, ConnectPacket, DisconnectPacket, DisconnectReason,
    OutboundPacket,
};
use crate::session::ClientSession;
use crate::topic_filter::validate_topic_name;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

impl Processor {
    pub(super) fn process_connect(&self, p: ConnectPacket) {
        let endpoint = p.endpoint.clone();
        if !endpoint.is_connected() {
            debug!("CONNECT from {endpoint:?} after transport closed, ignored");
            return;
        }
        if self.attached.contains_key(&endpoint) {
            warn!("Second CONNECT on {endpoint:?}, closing");
            endpoint.close();
            return;
        }

        if let Some(will) = &p.will {
            if let Err(e) = validate_topic_name(&will.topic) {
                warn!(
                    "CONNECT from {endpoint:?} with invalid will topic '{}': {e}, closing",
                    will.topic
                );
                endpoint.close();
                return;
            }
        }

        let client_id = if p.client_id.is_empty() {
            if !p.clean_start {
                warn!("Empty client id without clean start from {endpoint:?} rejected");
                self.refuse(&p, ConnackCode::IdentifierRejected);
                return;
            }
            format!("auto-{}", Uuid::new_v4().simple())
        } else {
            p.client_id.clone()
        };

        if !self
            .authenticator
            .authenticate(&client_id, p.username.as_deref(), p.password.as_deref())
        {
            info!("Client {client_id} failed authentication");
            self.refuse(&p, ConnackCode::BadUsernameOrPassword);
            return;
        }

        let session = Arc::new(ClientSession::from_connect(client_id.clone(), &p));
        let router = &self.router;
        let mut queued = Vec::new();
        let session_present = {
            let _guard = router.lock_client(&client_id);
            self.attached.insert(endpoint.clone(), client_id.clone());
            let evicted = router.endpoints().register(&client_id, session.clone());

            if let Some(old) = &evicted {
                self.take_over(old);
            }

            if p.clean_start {
                router.topics().unsubscribe_all(&client_id);
                router.sessions().discard(&client_id);
                false
            } else {
                let resumed = router.sessions().resume(&client_id);
                let present = resumed.is_some()
                    || evicted.as_ref().is_some_and(|old| old.is_persistent())
                    || router.topics().has_subscriptions(&client_id);
                queued = resumed.unwrap_or_default();
                present
            }
        };

        info!(
            "Client {client_id} connected from {} (clean_start={}, keep_alive={}, session_present={session_present})",
            endpoint.remote_addr(),
            p.clean_start,
            p.keep_alive
        );
        endpoint.write(OutboundPacket::Connack {
            session_present,
            code: ConnackCode::Accepted,
        });

        if !queued.is_empty() {
            trace!("Sending {} offline messages to client {client_id}", queued.len());
        }
        for message in queued {
            let qos = message.qos;
            session.deliver(&message, qos, message.retain);
        }
    }

    fn refuse(&self, p: &ConnectPacket, code: ConnackCode) {
        p.endpoint.write(OutboundPacket::Connack {
            session_present: false,
            code,
        });
        p.endpoint.close();
    }

    /// A newer connection claimed this client id. The old connection loses
    /// its will and in-flight state and is closed.
    fn take_over(&self, old: &ClientSession) {
        info!(
            "Client {} taken over, closing previous connection {:?}",
            old.client_id(),
            old.endpoint()
        );
        if old.take_will().is_some() {
            debug!("Will of replaced connection {} discarded", old.client_id());
        }
        old.inflight().clear();
        self.attached.remove(old.endpoint());
        if old.clean_start() {
            self.router.topics().unsubscribe_all(old.client_id());
        }
        old.endpoint().write(OutboundPacket::Disconnect {
            reason: DisconnectReason::SessionTakenOver,
        });
        old.endpoint().close();
    }

    pub(super) fn process_disconnect(&self, p: DisconnectPacket) {
        let Some(session) = self.session_for(&p.endpoint) else {
            self.attached.remove(&p.endpoint);
            p.endpoint.close();
            return;
        };
        debug!(
            "Client {} disconnected (publish_will={})",
            session.client_id(),
            p.publish_will
        );
        if !p.publish_will {
            session.take_will();
        }
        self.end_session(&session);
        p.endpoint.close();
    }

    pub(super) fn process_close(&self, p: ClosePacket) {
        let Some(session) = self.session_for(&p.endpoint) else {
            trace!("Transport {:?} closed ({:?})", p.endpoint, p.reason);
            self.attached.remove(&p.endpoint);
            p.endpoint.close();
            return;
        };
        match p.reason {
            CloseReason::KeepAliveTimeout => {
                info!("Client {} keep alive expired", session.client_id());
                p.endpoint.write(OutboundPacket::Disconnect {
                    reason: DisconnectReason::KeepAliveTimeout,
                });
            }
            reason => debug!("Client {} connection lost ({reason:?})", session.client_id()),
        }
        self.end_session(&session);
        p.endpoint.close();
    }

    /// Unregister the session and publish whatever will it still holds.
    /// Persistent sessions keep their subscriptions and get detached.
    fn end_session(&self, session: &Arc<ClientSession>) {
        let endpoint = session.endpoint();
        self.attached.remove(endpoint);
        let _guard = self.router.lock_client(session.client_id());
        if !self
            .router
            .endpoints()
            .remove(session.client_id(), endpoint)
        {
            trace!("Session {} already replaced", session.client_id());
            return;
        }

        let will = session.take_will();
        session.inflight().clear();

        if session.is_persistent() {
            self.router.detach_session(session, will);
        } else {
            if let Some(will) = will {
                self.router.publish_will(session.client_id(), will);
            }
            self.router.topics().unsubscribe_all(session.client_id());
        }
    }
}
