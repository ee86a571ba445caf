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

//! Broker configuration document.
//!
//! The file is JSON with `//` and `/* */` comments allowed:
//!
//! ```json5
//! {
//!     "listeners": [
//!         { "host": "0.0.0.0", "port": 1883 },
//!         { "port": 8883, "tls": { "cert": "server.crt", "key": "server.key" } }
//!     ],
//!     "log": { "level": "info" }
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Default file looked up when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "mqtt.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_listeners")]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub log: LogConfig,
    /// Password file for [`crate::auth::PasswordAuthenticator`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_file: Option<String>,
    /// Packet processing workers, defaults to the number of CPUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Largest accepted PUBLISH payload in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Time allowed between accept and CONNECT
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv_buffer_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_delay: Option<bool>,
    /// TCP keepalive idle time in seconds (0 disables)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_port: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert: String,
    /// PEM private key (PKCS8 or PKCS1)
    pub key: String,
    /// PEM CA bundle. When set, clients must present a certificate signed by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listeners() -> Vec<ListenerConfig> {
    vec![ListenerConfig::tcp(default_host(), 1883)]
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_message_size() -> usize {
    4 * 1024 * 1024
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ListenerConfig {
    /// Plain TCP listener with default limits
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_message_size: default_max_message_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            recv_buffer_size: None,
            no_delay: None,
            keepalive_time: None,
            reuse_port: None,
            tls: None,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "tls"
        } else {
            "tcp"
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listeners: default_listeners(),
            log: LogConfig::default(),
            auth_file: None,
            workers: None,
        }
    }
}

impl BrokerConfig {
    /// Load configuration from a JSON file
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| anyhow!("Failed to open config file '{}': {e}", path.display()))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let config: BrokerConfig = read_json5(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise [`DEFAULT_CONFIG_FILE`] when it exists,
    /// otherwise the built-in default.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::load_json(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load_json(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(anyhow!("At least one listener must be configured"));
        }
        for listener in &self.listeners {
            if listener.max_message_size == 0 {
                return Err(anyhow!(
                    "Listener {} has max_message_size 0",
                    listener.bind_addr()
                ));
            }
        }
        Ok(())
    }
}

/// Read a JSON5 document. JSON5 already allows `//` and `/* */` comments.
pub fn read_json5<T: DeserializeOwned, R: Read>(mut reader: R) -> Result<T> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    Ok(json5::from_str(&content)?)
}
