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

//! Listening sockets. Each accepted connection is wrapped in an
//! [`MqttEndpoint`] and handed out through a channel.

use crate::config::{ListenerConfig, TlsConfig};
use crate::endpoint::mqtt::MqttEndpoint;
use crate::endpoint::EndpointRef;
use anyhow::anyhow;
use mqtt_endpoint_tokio::mqtt_ep;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{rustls, TlsAcceptor};
use tracing::{error, info, trace};

pub struct Acceptor {
    config: ListenerConfig,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Acceptor {
    /// Bind the listener described by `config` and start accepting.
    pub async fn bind(
        config: ListenerConfig,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<EndpointRef>)> {
        let tls = config.tls.as_ref().map(load_tls_acceptor).transpose()?;
        let listener = bind_listener(&config).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "mqtt start success {local_addr} ({}, max_message_size={}, connect_timeout_ms={})",
            config.scheme(),
            config.max_message_size,
            config.connect_timeout_ms
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(accept_loop(listener, tls, config.clone(), tx));

        Ok((
            Self {
                config,
                local_addr,
                task,
            },
            rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Stop accepting and release the listening socket
    pub fn close(&self) {
        if !self.task.is_finished() {
            info!("Closing listener {}", self.local_addr);
            self.task.abort();
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    config: ListenerConfig,
    endpoints: mpsc::UnboundedSender<EndpointRef>,
) {
    let scheme = config.scheme();
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                trace!("New {scheme} connection from: {addr}");
                configure_individual_socket_options(&stream, &addr, &config);

                let tls = tls.clone();
                let config = config.clone();
                let endpoints = endpoints.clone();
                tokio::spawn(async move {
                    let attached = match tls {
                        Some(acceptor) => attach_tls(acceptor, stream, addr, &config).await,
                        None => {
                            let transport = mqtt_ep::transport::TcpTransport::from_stream(stream);
                            MqttEndpoint::attach(transport, addr.to_string(), &config).await
                        }
                    };
                    match attached {
                        Ok(endpoint) => {
                            if let Err(e) = endpoints.send(endpoint) {
                                e.0.close();
                            }
                        }
                        Err(e) => error!("{scheme} connection from {addr} failed: {e}"),
                    }
                });
            }
            Err(e) => error!("Failed to accept {scheme} connection: {e}"),
        }
    }
}

async fn attach_tls(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    addr: SocketAddr,
    config: &ListenerConfig,
) -> anyhow::Result<EndpointRef> {
    let handshake = acceptor.accept(stream);
    let tls_stream = tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), handshake)
        .await
        .map_err(|_| anyhow!("TLS handshake timed out"))?
        .map_err(|e| anyhow!("TLS handshake failed: {e}"))?;
    let transport = mqtt_ep::transport::TlsTransport::from_stream(tls_stream);
    MqttEndpoint::attach(transport, addr.to_string(), config).await
}

async fn bind_listener(config: &ListenerConfig) -> anyhow::Result<TcpListener> {
    let bind_addr = config.bind_addr();
    let addr = tokio::net::lookup_host(&bind_addr)
        .await?
        .next()
        .ok_or_else(|| anyhow!("Cannot resolve listener address '{bind_addr}'"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| anyhow!("Failed to set SO_REUSEADDR: {e}"))?;
    #[cfg(target_os = "linux")]
    if config.reuse_port.unwrap_or(false) {
        socket
            .set_reuse_port(true)
            .map_err(|e| anyhow!("Failed to set SO_REUSEPORT: {e}"))?;
    }
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|e| anyhow!("Failed to bind {bind_addr}: {e}"))?;
    socket.listen(1024)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Configure individual socket options if specified
fn configure_individual_socket_options(stream: &TcpStream, addr: &SocketAddr, config: &ListenerConfig) {
    if let Some(no_delay) = config.no_delay {
        if let Err(e) = stream.set_nodelay(no_delay) {
            error!("Failed to set TCP_NODELAY for {addr}: {e}");
        }
    }

    if let Some(keepalive_time) = config.keepalive_time.filter(|t| *t > 0) {
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(u64::from(keepalive_time)));
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            error!("Failed to enable keepalive for {addr}: {e}");
        }
    }
}

fn load_certs(path: &str) -> anyhow::Result<Vec<rustls::Certificate>> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{path}': {e}"))?;
    let mut reader = BufReader::new(file);
    let certs: Vec<rustls::Certificate> = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(rustls::Certificate)
        .collect();
    if certs.is_empty() {
        return Err(anyhow!("No certificate found in '{path}'"));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> anyhow::Result<rustls::PrivateKey> {
    let open = || {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| anyhow!("Failed to open private key file '{path}': {e}"))
    };

    // Try PKCS8 first, then PKCS1
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut open()?)?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut open()?)?;
    }
    keys.into_iter()
        .next()
        .map(rustls::PrivateKey)
        .ok_or_else(|| anyhow!("No private key found in '{path}'"))
}

/// Load TLS configuration for a listener
fn load_tls_acceptor(tls: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
    let cert_chain = load_certs(&tls.cert)?;
    let private_key = load_private_key(&tls.key)?;
    let builder = rustls::ServerConfig::builder().with_safe_defaults();

    let config = match &tls.ca {
        Some(ca) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in load_certs(ca)? {
                roots
                    .add(&cert)
                    .map_err(|e| anyhow!("Invalid CA certificate in '{ca}': {e}"))?;
            }
            let verifier = rustls::server::AllowAnyAuthenticatedClient::new(roots);
            builder
                .with_client_cert_verifier(Arc::new(verifier))
                .with_single_cert(cert_chain, private_key)?
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)?,
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}
