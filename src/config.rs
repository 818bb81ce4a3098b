//! # Configuration Management
//!
//! Centralized configuration for the chat server, the chat client and the
//! UDP session layer.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()` (prefix `CHAT_`)
//! - Direct instantiation with defaults
//!
//! Startup-fatal problems (bad endpoint strings, a certificate without a
//! private key) surface as [`ProtocolError::ConfigError`].

use crate::error::{constants, ProtocolError, Result};
use crate::transport::tls::TlsServerConfig;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};

/// Default base port; TLS listens on the next one.
pub const DEFAULT_PORT: u16 = 12345;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// UDP session configuration
    #[serde(default)]
    pub udp: UdpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let flag = |v: String| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");

        if let Some(port) = lookup("CHAT_PORT") {
            let port = parse_port(&port)?;
            config.server.port = port;
            config.client.port = port;
        }
        if let Some(v) = lookup("CHAT_GLOBAL_BIND") {
            config.server.global_bind = flag(v);
        }
        if let Some(v) = lookup("CHAT_BUFFERED") {
            let buffered = flag(v);
            config.server.buffered = buffered;
            config.client.buffered = buffered;
        }
        if let Some(path) = lookup("CHAT_CERT_PATH") {
            config.server.cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("CHAT_KEY_PATH") {
            config.server.key_path = Some(PathBuf::from(path));
        }
        if let Some(name) = lookup("CHAT_USERNAME") {
            config.client.username = name;
        }
        if let Some(host) = lookup("CHAT_HOST") {
            config.client.host = host;
        }
        if let Some(proxy) = lookup("CHAT_SOCKS_PROXY") {
            config.client.socks_proxy = Some(proxy);
        }
        if let Some(level) = lookup("CHAT_LOG_LEVEL") {
            config.logging.log_level = level
                .parse()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.udp.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }
}

fn strict(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base port: plaintext TCP and UDP; TLS uses `port + 1`
    pub port: u16,

    /// Bind all interfaces instead of loopback only
    pub global_bind: bool,

    /// Coalesce each binary frame into a single write
    pub buffered: bool,

    /// PEM certificate chain; enables the TLS listener
    pub cert_path: Option<PathBuf>,

    /// PEM PKCS#8 private key for `cert_path`
    pub key_path: Option<PathBuf>,

    /// Bound on the TLS handshake for an accepted connection
    #[serde(with = "duration_serde")]
    pub tls_handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            global_bind: false,
            buffered: false,
            cert_path: None,
            key_path: None,
            tls_handshake_timeout: timeout::TLS_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn bind_ip(&self) -> IpAddr {
        if self.global_bind {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }

    /// Port of the TLS listener, if one is configured.
    pub fn tls_port(&self) -> Option<u16> {
        self.cert_path.as_ref()?;
        self.port.checked_add(1)
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match (&self.cert_path, &self.key_path) {
            (Some(cert), key) => {
                if !cert.exists() {
                    errors.push(format!("Certificate file not found: {}", cert.display()));
                }
                match key {
                    Some(key) if !key.exists() => {
                        errors.push(format!("Key file not found: {}", key.display()));
                    }
                    Some(_) => {}
                    None => errors.push(constants::ERR_MISSING_PRIVATE_KEY.to_string()),
                }
                if self.port == u16::MAX {
                    errors.push("TLS port would overflow (base port is 65535)".to_string());
                }
            }
            (None, Some(_)) => {
                errors.push("key_path is set but cert_path is not".to_string());
            }
            (None, None) => {}
        }

        if self.tls_handshake_timeout.as_millis() < 100 {
            errors.push("TLS handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.tls_handshake_timeout.as_secs() > 60 {
            errors.push("TLS handshake timeout too long (maximum: 60s)".to_string());
        }

        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }

    /// Validate before binding, first writing a self-signed certificate to
    /// the configured paths when `generate` is set.
    pub fn prepare(&self, generate: bool) -> Result<()> {
        if generate {
            match (&self.cert_path, &self.key_path) {
                (Some(cert), Some(key)) => {
                    TlsServerConfig::generate_self_signed(cert, key)?;
                    info!(cert = %cert.display(), key = %key.display(), "Generated self-signed certificate");
                }
                _ => {
                    return Err(ProtocolError::ConfigError(
                        "certificate generation needs both cert_path and key_path".into(),
                    ))
                }
            }
        }
        self.validate_strict()
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name announced in Hello
    pub username: String,

    /// Server host name or address
    pub host: String,

    /// Server base port
    pub port: u16,

    /// Use the text encoding instead of binary
    pub text: bool,

    /// Connect to the TLS listener (`port + 1`)
    pub tls: bool,

    /// Verify the server certificate against platform roots
    pub verify_tls: bool,

    /// Advertise cipher-upgrade support in Hello
    pub xor: bool,

    /// Coalesce each binary frame into a single write
    pub buffered: bool,

    /// Talk over UDP instead of TCP
    pub udp: bool,

    /// SOCKS4 proxy as `host:port`
    pub socks_proxy: Option<String>,

    /// How long to wait for the server's answer to Hello
    #[serde(with = "duration_serde")]
    pub hello_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: String::from("anonymous"),
            host: String::from("127.0.0.1"),
            port: DEFAULT_PORT,
            text: false,
            tls: false,
            verify_tls: true,
            xor: false,
            buffered: false,
            udp: false,
            socks_proxy: None,
            hello_timeout: timeout::HELLO_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Port to dial: the TLS listener sits one above the base port.
    pub fn connect_port(&self) -> Result<u16> {
        if self.tls {
            self.port.checked_add(1).ok_or_else(|| {
                ProtocolError::ConfigError("TLS port would overflow".to_string())
            })
        } else {
            Ok(self.port)
        }
    }

    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.username.trim().is_empty() {
            errors.push("Username cannot be empty".to_string());
        }
        if self.host.trim().is_empty() {
            errors.push("Server host cannot be empty".to_string());
        }
        if let Some(proxy) = &self.socks_proxy {
            if let Err(e) = parse_endpoint(proxy) {
                errors.push(format!("Invalid SOCKS proxy '{proxy}': {e}"));
            }
        }
        if self.udp && (self.tls || self.text || self.socks_proxy.is_some()) {
            errors.push("UDP cannot be combined with TLS, text or SOCKS".to_string());
        }
        if self.tls && self.port == u16::MAX {
            errors.push("TLS port would overflow (base port is 65535)".to_string());
        }
        if self.hello_timeout.as_millis() < 100 {
            errors.push("Hello timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }
}

/// UDP session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Re-ping a session whose ping is older than this
    #[serde(with = "duration_serde")]
    pub ping_retry: Duration,

    /// Evict a session whose ping is older than this
    #[serde(with = "duration_serde")]
    pub ping_timeout: Duration,

    /// Periodic sweep in addition to the reset-triggered one
    #[serde(with = "option_duration_serde")]
    pub sweep_interval: Option<Duration>,

    /// Receive buffer size per datagram
    pub max_datagram: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            ping_retry: timeout::UDP_PING_RETRY,
            ping_timeout: timeout::UDP_PING_TIMEOUT,
            sweep_interval: None,
            max_datagram: MAX_DATAGRAM_SIZE,
        }
    }
}

impl UdpConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ping_retry >= self.ping_timeout {
            errors.push("ping_retry must be shorter than ping_timeout".to_string());
        }
        if let Some(interval) = self.sweep_interval {
            if interval.as_millis() < 100 {
                errors.push("Sweep interval too short (minimum: 100ms)".to_string());
            }
        }
        if self.max_datagram < 5 {
            errors.push("max_datagram too small (minimum: 5 bytes)".to_string());
        } else if self.max_datagram > MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "max_datagram too large: {} (maximum: {MAX_DATAGRAM_SIZE})",
                self.max_datagram
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

/// Parse a port in decimal or `0x`-prefixed hex.
pub fn parse_port(s: &str) -> Result<u16> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|_| ProtocolError::ConfigError(format!("Invalid port: '{s}'")))
}

/// Split `host:port` on the last colon. Brackets around an IPv6 host are
/// stripped.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let endpoint = endpoint.trim();
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| ProtocolError::ConfigError(constants::ERR_INVALID_ENDPOINT.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProtocolError::ConfigError(
            constants::ERR_INVALID_ENDPOINT.to_string(),
        ));
    }
    Ok((host.to_string(), parse_port(port)?))
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Same as `duration_serde`, absent means disabled.
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
