//! Configuration for the stream client.
//!
//! [`ExchangeConfig`] mirrors the account `config.json` (credentials and
//! client certificate paths), with `BETFAIR_`-prefixed environment variables
//! layered on top; [`StreamConfig`] holds queue capacities and the frame
//! buffer size.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json};
use figment::Figment;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::ClientCertificate;
use crate::network::Endpoint;
use crate::stream::error::StreamResult;
use crate::stream::transport::DEFAULT_FRAME_BUFFER_CAPACITY;

/// Prefix of environment variables that override config file keys
pub const ENV_PREFIX: &str = "BETFAIR_";

/// Configuration loading errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    /// Config is not valid JSON or misses required keys
    #[error("Invalid config: {0}")]
    Parse(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Account configuration
#[derive(Clone, Deserialize)]
pub struct ExchangeConfig {
    pub username: String,
    pub password: String,
    /// Application key
    pub api_key: String,
    /// Path to the PEM client certificate
    pub ssl_cert: PathBuf,
    /// Path to the PEM private key
    pub ssl_key: PathBuf,
    #[serde(default, alias = "Locale")]
    pub locale: Option<String>,
    /// `live`, `integration`, or the address of either endpoint
    #[serde(default)]
    pub stream_endpoint: Option<String>,
    /// Session token from a prior login, usually set through
    /// `BETFAIR_SESSION_TOKEN`
    #[serde(default)]
    pub session_token: Option<String>,
}

impl ExchangeConfig {
    /// Read a JSON config file, then apply `BETFAIR_*` environment overrides
    /// (`BETFAIR_STREAM_ENDPOINT`, `BETFAIR_SSL_CERT`, ...)
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                message: "file not found".to_string(),
            });
        }

        let config = Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        Ok(config)
    }

    /// Parse a JSON config document without environment overrides
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(Figment::from(Json::string(json)).extract()?)
    }

    /// Selected streaming endpoint; integration when unset
    pub fn endpoint(&self) -> StreamResult<Endpoint> {
        match &self.stream_endpoint {
            Some(endpoint) => endpoint.parse(),
            None => Ok(Endpoint::Integration),
        }
    }

    /// Load the client certificate named by `ssl_cert` / `ssl_key`
    pub fn client_certificate(&self) -> StreamResult<ClientCertificate> {
        ClientCertificate::from_pem_files(&self.ssl_cert, &self.ssl_key)
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_key", &self.api_key)
            .field("ssl_cert", &self.ssl_cert)
            .field("ssl_key", &self.ssl_key)
            .field("locale", &self.locale)
            .field("stream_endpoint", &self.stream_endpoint)
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Stream session configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Pending market subscription requests. Default: 64
    pub market_request_capacity: usize,
    /// Pending order subscription requests. Default: 1
    pub order_request_capacity: usize,
    /// Unconsumed market snapshots. Default: 64
    pub market_update_capacity: usize,
    /// Unconsumed order snapshots. Default: 64
    pub order_update_capacity: usize,
    /// Unconsumed subscription confirmations. Default: 64
    pub subscription_capacity: usize,
    /// Unconsumed status frames. Default: 64
    pub status_capacity: usize,
    /// Unconsumed errors. Default: 16
    pub error_capacity: usize,
    /// Initial read buffer for frames. Default: 1 MiB
    pub frame_buffer_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            market_request_capacity: 64,
            order_request_capacity: 1,
            market_update_capacity: 64,
            order_update_capacity: 64,
            subscription_capacity: 64,
            status_capacity: 64,
            error_capacity: 16,
            frame_buffer_capacity: DEFAULT_FRAME_BUFFER_CAPACITY,
        }
    }
}
