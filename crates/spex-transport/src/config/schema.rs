use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use spex_core::{Result, SpexError};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    pub connection: ConnectionSection,

    #[serde(default)]
    pub sessions: SessionsSection,

    #[serde(default)]
    pub discovery: DiscoverySection,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(SpexError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.connection.validate()?;
        self.sessions.validate()?;
        Ok(())
    }

    /// Runtime knobs derived from the validated file.
    pub fn settings(&self) -> Settings {
        Settings {
            response_timeout: Duration::from_millis(self.sessions.response_timeout_ms),
            open_tunnel_retries: self.sessions.open_tunnel_retries,
            mailbox_capacity: self.sessions.mailbox_capacity,
            retire_stale_slots: self.discovery.retire_stale_slots,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    pub remote: String,

    #[serde(default = "default_local")]
    pub local: String,

    /// Session id handed out by the login step.
    pub root_session: u32,
}

impl ConnectionSection {
    pub fn validate(&self) -> Result<()> {
        self.remote_addr()?;
        self.local_addr()?;
        if self.root_session == 0 {
            return Err(SpexError::Config(
                "connection.root_session must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        self.remote.parse().map_err(|e| {
            SpexError::Config(format!("connection.remote must be a SocketAddr: {e}"))
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local.parse().map_err(|e| {
            SpexError::Config(format!("connection.local must be a SocketAddr: {e}"))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsSection {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_open_tunnel_retries")]
    pub open_tunnel_retries: usize,

    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            open_tunnel_retries: default_open_tunnel_retries(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl SessionsSection {
    pub fn validate(&self) -> Result<()> {
        if !(10..=60000).contains(&self.response_timeout_ms) {
            return Err(SpexError::Config(
                "sessions.response_timeout_ms must be between 10 and 60000".into(),
            ));
        }
        if !(1..=16).contains(&self.open_tunnel_retries) {
            return Err(SpexError::Config(
                "sessions.open_tunnel_retries must be between 1 and 16".into(),
            ));
        }
        if !(1..=65536).contains(&self.mailbox_capacity) {
            return Err(SpexError::Config(
                "sessions.mailbox_capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverySection {
    /// Emit detach events for cached slots missing from a full refresh.
    #[serde(default)]
    pub retire_stale_slots: bool,
}

/// Knobs shared by the transport components.
#[derive(Debug, Clone)]
pub struct Settings {
    pub response_timeout: Duration,
    pub open_tunnel_retries: usize,
    pub mailbox_capacity: usize,
    pub retire_stale_slots: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(default_response_timeout_ms()),
            open_tunnel_retries: default_open_tunnel_retries(),
            mailbox_capacity: default_mailbox_capacity(),
            retire_stale_slots: false,
        }
    }
}

fn default_local() -> String {
    "0.0.0.0:0".into()
}
fn default_response_timeout_ms() -> u64 {
    500
}
fn default_open_tunnel_retries() -> usize {
    3
}
fn default_mailbox_capacity() -> usize {
    256
}
