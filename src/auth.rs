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

//! Connection authentication.
//!
//! Password file format (comments allowed):
//!
//! ```json5
//! {
//!     "authentication": [
//!         { "name": "u1", "method": "sha256", "salt": "salt", "digest": "<hex sha256(salt + password)>" },
//!         { "name": "u2", "method": "plain_password", "password": "mypassword" },
//!         { "name": "anonymous", "method": "anonymous" }
//!     ]
//! }
//! ```

use crate::config::read_json5;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, trace};

/// Decides whether a CONNECT may proceed. Called from packet workers,
/// so implementations must not block for long.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, client_id: &str, username: Option<&str>, password: Option<&[u8]>) -> bool;
}

/// Accepts every connection
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthenticator;

impl Authenticator for AllowAllAuthenticator {
    fn authenticate(&self, _client_id: &str, _username: Option<&str>, _password: Option<&[u8]>) -> bool {
        true
    }
}

/// Authentication method for users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// SHA256 hashed password with optional salt
    Sha256,
    /// Plain text password (not recommended for production)
    PlainPassword,
    /// Connections without a user name are accepted
    Anonymous,
}

/// Authentication entry for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationEntry {
    pub name: String,
    pub method: AuthMethod,
    /// Password digest (SHA256 hash or plain password)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Alternative field name for plain_password method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Salt for SHA256 hashing
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PasswordFile {
    authentication: Vec<AuthenticationEntry>,
}

/// User name / password check against a password file
#[derive(Debug, Default)]
pub struct PasswordAuthenticator {
    /// Authentication map: username -> AuthenticationEntry
    authentication: HashMap<String, AuthenticationEntry>,
    /// Anonymous username (if configured)
    anonymous: Option<String>,
}

impl PasswordAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load users from a JSON file
    pub fn load_json(path: &str) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| anyhow!("Failed to open auth file '{path}': {e}"))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let file: PasswordFile = read_json5(reader)?;

        let mut authenticator = Self::new();
        for entry in file.authentication {
            authenticator.add_entry(entry)?;
        }
        Ok(authenticator)
    }

    pub fn add_entry(&mut self, entry: AuthenticationEntry) -> Result<()> {
        let name = entry.name.clone();
        if !Self::is_valid_user_name(&name) {
            return Err(anyhow!("Invalid username: {name}"));
        }

        // Handle password field for plain_password method
        let digest = if entry.method == AuthMethod::PlainPassword {
            entry.password.or(entry.digest)
        } else {
            entry.digest
        };
        if entry.method != AuthMethod::Anonymous && digest.is_none() {
            return Err(anyhow!("User {name} has no password digest"));
        }

        if entry.method == AuthMethod::Anonymous {
            if self.anonymous.is_some() {
                return Err(anyhow!("Only one anonymous user can be configured"));
            }
            self.anonymous = Some(name.clone());
        }

        self.authentication.insert(
            name.clone(),
            AuthenticationEntry {
                name,
                method: entry.method,
                digest,
                password: None,
                salt: entry.salt,
            },
        );
        Ok(())
    }

    pub fn is_valid_user_name(name: &str) -> bool {
        !name.is_empty() && !name.starts_with('@')
    }

    pub fn sha256hash(message: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        let result = hasher.finalize();
        hex::encode(result)
    }

    pub fn login(&self, username: &str, password: &str) -> bool {
        let Some(auth) = self.authentication.get(username) else {
            return false;
        };
        match (&auth.method, &auth.digest) {
            (AuthMethod::Sha256, Some(digest)) => {
                let hash = Self::sha256hash(&format!("{}{password}", auth.salt));
                digest.eq_ignore_ascii_case(&hash)
            }
            (AuthMethod::PlainPassword, Some(digest)) => digest == password,
            _ => false,
        }
    }

    pub fn login_anonymous(&self) -> Option<&str> {
        self.anonymous.as_deref()
    }
}

impl Authenticator for PasswordAuthenticator {
    fn authenticate(&self, client_id: &str, username: Option<&str>, password: Option<&[u8]>) -> bool {
        let accepted = match username {
            None => self.login_anonymous().is_some(),
            Some(username) => {
                let password = password
                    .and_then(|p| std::str::from_utf8(p).ok())
                    .unwrap_or_default();
                self.login(username, password)
            }
        };
        if accepted {
            trace!("Client {client_id} authenticated as {username:?}");
        } else {
            debug!("Authentication failed for client {client_id}, user {username:?}");
        }
        accepted
    }
}
