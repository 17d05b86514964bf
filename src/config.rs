//! Configuration for the sweep server and its client pool.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SWEEPD_`-prefixed environment variables (`SWEEPD_SERVER__PORT=6969`).

use std::{path::Path, time::Duration};

use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const MIN_READERS: usize = 2;
pub const MAX_READERS: usize = 16;
pub const MIN_PUBLISHERS: usize = 1;
pub const MAX_PUBLISHERS: usize = 2;
pub const MIN_CONNECTIONS: usize = 1;
pub const MAX_CONNECTIONS: usize = 16;
pub const DEFAULT_PORT: u16 = 50000;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;
/// Requests are small JSON control records; anything larger is hostile.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Clamps `value` into `[lo, hi]`.
pub fn clamp(value: usize, lo: usize, hi: usize) -> usize {
   value.clamp(lo, hi)
}

/// Server-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
   pub host:              String,
   pub port:              u16,
   pub readers:           usize,
   pub publishers:        usize,
   pub cache_capacity:    usize,
   pub start_delay_ms:    u64,
   pub poll_interval_ms:  u64,
   pub accept_poll_ms:    u64,
   /// Longest a reply write may make no progress before the peer is dropped
   pub send_timeout_ms:   u64,
   pub max_frame_bytes:   usize,
   pub max_request_bytes: usize,
}

impl Default for ServerConfig {
   fn default() -> Self {
      Self {
         host:              "0.0.0.0".to_string(),
         port:              DEFAULT_PORT,
         readers:           8,
         publishers:        2,
         cache_capacity:    1000,
         start_delay_ms:    100,
         poll_interval_ms:  50,
         accept_poll_ms:    100,
         send_timeout_ms:   1000,
         max_frame_bytes:   DEFAULT_MAX_FRAME_BYTES,
         max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
      }
   }
}

impl ServerConfig {
   /// Number of decode workers, clamped to the supported range
   pub fn effective_readers(&self) -> usize {
      clamp(self.readers, MIN_READERS, MAX_READERS)
   }

   pub fn effective_publishers(&self) -> usize {
      clamp(self.publishers, MIN_PUBLISHERS, MAX_PUBLISHERS)
   }

   pub fn bind_addr(&self) -> String {
      format!("{}:{}", self.host, self.port)
   }

   pub fn start_delay(&self) -> Duration {
      Duration::from_millis(self.start_delay_ms)
   }

   pub fn poll_interval(&self) -> Duration {
      Duration::from_millis(self.poll_interval_ms)
   }

   pub fn accept_poll(&self) -> Duration {
      Duration::from_millis(self.accept_poll_ms)
   }

   pub fn send_timeout(&self) -> Duration {
      Duration::from_millis(self.send_timeout_ms)
   }

   /// Rejects values that clamping cannot repair.
   pub fn validate(&self) -> Result<(), ConfigError> {
      if self.host.trim().is_empty() {
         return Err(ConfigError::Invalid("server host is empty".to_string()));
      }
      if self.cache_capacity == 0 {
         return Err(ConfigError::Invalid("cache_capacity must be at least 1".to_string()));
      }
      if self.poll_interval_ms == 0 || self.accept_poll_ms == 0 {
         return Err(ConfigError::Invalid("poll intervals must be non-zero".to_string()));
      }
      if self.send_timeout_ms == 0 {
         return Err(ConfigError::Invalid("send_timeout_ms must be non-zero".to_string()));
      }
      if self.max_frame_bytes < 16 {
         return Err(ConfigError::Invalid(format!(
            "max_frame_bytes {} is too small",
            self.max_frame_bytes
         )));
      }
      if self.max_request_bytes < 16 || self.max_request_bytes > self.max_frame_bytes {
         return Err(ConfigError::Invalid(format!(
            "max_request_bytes {} must lie between 16 and max_frame_bytes",
            self.max_request_bytes
         )));
      }
      Ok(())
   }
}

/// Client-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
   pub host:            String,
   pub port:            u16,
   pub connections:     usize,
   pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
   fn default() -> Self {
      Self {
         host:            "localhost".to_string(),
         port:            DEFAULT_PORT,
         connections:     1,
         max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
      }
   }
}

impl ClientConfig {
   pub fn effective_connections(&self) -> usize {
      clamp(self.connections, MIN_CONNECTIONS, MAX_CONNECTIONS)
   }

   pub fn server_addr(&self) -> String {
      format!("{}:{}", self.host, self.port)
   }

   pub fn validate(&self) -> Result<(), ConfigError> {
      if self.host.trim().is_empty() {
         return Err(ConfigError::Invalid("client host is empty".to_string()));
      }
      if self.max_frame_bytes < 16 {
         return Err(ConfigError::Invalid(format!(
            "max_frame_bytes {} is too small",
            self.max_frame_bytes
         )));
      }
      Ok(())
   }
}

/// Combined configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub server: ServerConfig,
   pub client: ClientConfig,
}

impl Config {
   /// Loads defaults, merges `path` when given, then the environment.
   pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
      let mut figment = Figment::from(Serialized::defaults(Self::default()));
      if let Some(path) = path {
         figment = figment.merge(Toml::file(path));
      }
      let config: Self = figment
         .merge(Env::prefixed("SWEEPD_").split("__"))
         .extract()?;
      config.server.validate()?;
      config.client.validate()?;
      Ok(config)
   }

   pub fn to_toml(&self) -> Result<String, ConfigError> {
      toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
   }
}
