//! Proxy configuration
//!
//! Loaded from environment variables (optionally via a `.env` file),
//! in the same style as the upstream-client config this crate started
//! from.

use crate::error::{Error, Result};
use std::env;

/// Upstream IMAP connection configuration (the server leg).
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ImapConfig {
    /// Load upstream IMAP configuration from environment variables.
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `NGCRYPT_UPSTREAM_USERNAME`
    /// - `NGCRYPT_UPSTREAM_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `NGCRYPT_UPSTREAM_HOST` (default: `127.0.0.1`)
    /// - `NGCRYPT_UPSTREAM_PORT` (default: `993`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("NGCRYPT_UPSTREAM_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("NGCRYPT_UPSTREAM_PORT")
                .unwrap_or_else(|_| "993".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid NGCRYPT_UPSTREAM_PORT: {e}")))?,
            username: env::var("NGCRYPT_UPSTREAM_USERNAME")
                .map_err(|_| Error::Config("NGCRYPT_UPSTREAM_USERNAME not set".into()))?,
            password: env::var("NGCRYPT_UPSTREAM_PASSWORD")
                .map_err(|_| Error::Config("NGCRYPT_UPSTREAM_PASSWORD not set".into()))?,
        })
    }
}

/// How outgoing messages (APPEND) are encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptMode {
    /// Split-header/split-body NGCRYPT container (`ngcrypt::container`).
    Regular,
    /// Whole-message legacy "wrap" envelope (`legacy::wrap`).
    Wrap,
}

/// How fetched messages are decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptMode {
    /// NGCRYPT two-part container (`ngcrypt::container`).
    Regular,
    /// Legacy "wrap" envelope, recursively unwrapped (`legacy::wrap`).
    Wrap,
    /// Legacy per-leaf MIME-aware walk with header reconstruction
    /// (`legacy::mime`, `DecryptMode::Full`).
    Full,
}

/// Proxy-wide behavior toggles, composed from the environment.
///
/// Grounded in `ngcrypt/imap/backend.go`'s `Backend{Unlock, Cleaner}`
/// and `imap-ex/backend.go`'s `Backend{Encrypt, Decrypt}` fields.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the proxy itself listens on for client connections.
    pub listen_addr: String,
    pub upstream: ImapConfig,
    pub encrypt_mode: EncryptMode,
    pub decrypt_mode: DecryptMode,
    /// Whether `SEARCH` is served by decrypting and scanning locally
    /// (`imap::search`) or forwarded to the upstream verbatim.
    pub enable_search: bool,
    /// Recursion depth limit for `legacy::wrap::decrypt_wrap`.
    pub wrap_depth_limit: u32,
}

impl ProxyConfig {
    /// Load the full proxy configuration from the environment.
    ///
    /// Optional (with defaults):
    /// - `NGCRYPT_LISTEN_ADDR` (default: `127.0.0.1:1143`)
    /// - `NGCRYPT_ENCRYPT_MODE` (`regular` | `wrap`, default: `regular`)
    /// - `NGCRYPT_DECRYPT_MODE` (`regular` | `wrap` | `full`, default: `regular`)
    /// - `NGCRYPT_ENABLE_SEARCH` (`true`/`false`, default: `false`)
    /// - `NGCRYPT_WRAP_DEPTH_LIMIT` (default: `8`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let upstream = ImapConfig::from_env()?;

        let listen_addr =
            env::var("NGCRYPT_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:1143".to_string());

        let encrypt_mode = match env::var("NGCRYPT_ENCRYPT_MODE")
            .unwrap_or_else(|_| "regular".to_string())
            .to_lowercase()
            .as_str()
        {
            "regular" => EncryptMode::Regular,
            "wrap" => EncryptMode::Wrap,
            other => return Err(Error::Config(format!("Invalid NGCRYPT_ENCRYPT_MODE: {other}"))),
        };

        let decrypt_mode = match env::var("NGCRYPT_DECRYPT_MODE")
            .unwrap_or_else(|_| "regular".to_string())
            .to_lowercase()
            .as_str()
        {
            "regular" => DecryptMode::Regular,
            "wrap" => DecryptMode::Wrap,
            "full" => DecryptMode::Full,
            other => return Err(Error::Config(format!("Invalid NGCRYPT_DECRYPT_MODE: {other}"))),
        };

        let enable_search = env::var("NGCRYPT_ENABLE_SEARCH")
            .ok()
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        let wrap_depth_limit = env::var("NGCRYPT_WRAP_DEPTH_LIMIT")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("Invalid NGCRYPT_WRAP_DEPTH_LIMIT: {e}")))?;

        Ok(Self {
            listen_addr,
            upstream,
            encrypt_mode,
            decrypt_mode,
            enable_search,
            wrap_depth_limit,
        })
    }
}
