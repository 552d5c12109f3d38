//! Client config loader (strict parsing).

pub mod schema;

use std::fs;

use spex_core::{Result, SpexError};

pub use schema::{ClientConfig, ConnectionSection, DiscoverySection, SessionsSection, Settings};

pub fn load_from_file(path: &str) -> Result<ClientConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| SpexError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ClientConfig> {
    let cfg: ClientConfig = serde_yaml::from_str(s)
        .map_err(|e| SpexError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
