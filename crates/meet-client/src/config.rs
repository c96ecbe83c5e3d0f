//! Client core configuration.
//!
//! Loaded from environment variables. The backend and socket URLs are
//! required; everything else has a default.

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use common::types::MediaKind;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default audio peer server (`host:port`).
pub const DEFAULT_AUDIO_SERVER_URL: &str = "localhost:3001";

/// Default video peer server (`host:port`).
pub const DEFAULT_VIDEO_SERVER_URL: &str = "localhost:3002";

pub const DEFAULT_AUDIO_SERVER_PORT: u16 = 3001;
pub const DEFAULT_VIDEO_SERVER_PORT: u16 = 3002;

/// Default peer server path.
pub const DEFAULT_PEER_SERVER_PATH: &str = "/";

/// Default number of signaling reconnection attempts.
pub const DEFAULT_RECONNECTION_ATTEMPTS: u32 = 5;

/// Default base delay between reconnection attempts.
pub const DEFAULT_RECONNECTION_DELAY_MS: u64 = 1000;

/// Default cap on the reconnection delay.
pub const DEFAULT_RECONNECTION_DELAY_MAX_MS: u64 = 5000;

/// Default signaling connect timeout.
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 20_000;

/// Default timeout for peer server registration.
pub const DEFAULT_PEER_OPEN_TIMEOUT_MS: u64 = 10_000;

/// Default delay before a finished teardown allows another one.
pub const DEFAULT_CLEANUP_SETTLE_MS: u64 = 1000;

/// Default timeout for HTTP collaborator calls.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Location of one peer-transport server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerServerConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl PeerServerConfig {
    /// Parses `host[:port]`. A missing or unparsable port falls back to
    /// `default_port`; an empty host falls back to `localhost`.
    #[must_use]
    pub fn parse(value: &str, default_port: u16, path: &str) -> Self {
        let (host, port) = match value.split_once(':') {
            Some((host, port)) => (host, port.parse().unwrap_or(default_port)),
            None => (value, default_port),
        };
        let host = if host.is_empty() { "localhost" } else { host };

        Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        }
    }

    /// Default server for a media kind.
    #[must_use]
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::parse(
                DEFAULT_AUDIO_SERVER_URL,
                DEFAULT_AUDIO_SERVER_PORT,
                DEFAULT_PEER_SERVER_PATH,
            ),
            MediaKind::Video => Self::parse(
                DEFAULT_VIDEO_SERVER_URL,
                DEFAULT_VIDEO_SERVER_PORT,
                DEFAULT_PEER_SERVER_PATH,
            ),
        }
    }

    /// `host:port`, used to key registrations.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

/// Client core configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST backend (membership, chat).
    pub backend_url: String,

    /// URL of the signaling server.
    pub socket_url: String,

    pub audio_server: PeerServerConfig,
    pub video_server: PeerServerConfig,

    /// Signaling reconnection attempts before giving up.
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,

    /// Signaling connect timeout (also bounds the wait for a socket id).
    pub socket_timeout: Duration,

    /// Peer server registration timeout.
    pub peer_open_timeout: Duration,

    /// Delay after teardown before the cleanup guard is released.
    pub cleanup_settle: Duration,

    pub http_timeout: Duration,

    pub observability: ObservabilityConfig,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (testable without touching the process env).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let backend_url = required_url(vars, "BACKEND_URL")?;
        let socket_url = required_url(vars, "SOCKET_URL")?;

        let peer_path = vars
            .get("PEER_SERVER_PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_PEER_SERVER_PATH.to_string());

        let audio_server = PeerServerConfig::parse(
            vars.get("AUDIO_SERVER_URL")
                .map_or(DEFAULT_AUDIO_SERVER_URL, String::as_str),
            DEFAULT_AUDIO_SERVER_PORT,
            &peer_path,
        );

        let video_server = PeerServerConfig::parse(
            vars.get("VIDEO_SERVER_URL")
                .map_or(DEFAULT_VIDEO_SERVER_URL, String::as_str),
            DEFAULT_VIDEO_SERVER_PORT,
            &peer_path,
        );

        let reconnection_attempts = vars
            .get("SOCKET_RECONNECTION_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECTION_ATTEMPTS);

        let reconnection_delay_ms = vars
            .get("SOCKET_RECONNECTION_DELAY_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECTION_DELAY_MS);

        let reconnection_delay_max_ms = vars
            .get("SOCKET_RECONNECTION_DELAY_MAX_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECTION_DELAY_MAX_MS);

        if reconnection_delay_max_ms < reconnection_delay_ms {
            return Err(ConfigError::InvalidValue(format!(
                "SOCKET_RECONNECTION_DELAY_MAX_MS ({reconnection_delay_max_ms}) must be >= SOCKET_RECONNECTION_DELAY_MS ({reconnection_delay_ms})"
            )));
        }

        let socket_timeout_ms = positive_ms(
            vars,
            "SOCKET_TIMEOUT_MS",
            DEFAULT_SOCKET_TIMEOUT_MS,
        )?;
        let peer_open_timeout_ms = positive_ms(
            vars,
            "PEER_OPEN_TIMEOUT_MS",
            DEFAULT_PEER_OPEN_TIMEOUT_MS,
        )?;

        let cleanup_settle_ms = vars
            .get("SESSION_CLEANUP_SETTLE_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CLEANUP_SETTLE_MS);

        let http_timeout_seconds = vars
            .get("HTTP_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS);

        let log_level = vars
            .get("LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = vars
            .get("JSON_LOGS")
            .is_some_and(|s| s.eq_ignore_ascii_case("true") || s == "1");

        Ok(Config {
            backend_url,
            socket_url,
            audio_server,
            video_server,
            reconnection_attempts,
            reconnection_delay: Duration::from_millis(reconnection_delay_ms),
            reconnection_delay_max: Duration::from_millis(reconnection_delay_max_ms),
            socket_timeout: Duration::from_millis(socket_timeout_ms),
            peer_open_timeout: Duration::from_millis(peer_open_timeout_ms),
            cleanup_settle: Duration::from_millis(cleanup_settle_ms),
            http_timeout: Duration::from_secs(http_timeout_seconds),
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }

    /// Peer server for a media kind.
    #[must_use]
    pub fn peer_server(&self, kind: MediaKind) -> &PeerServerConfig {
        match kind {
            MediaKind::Audio => &self.audio_server,
            MediaKind::Video => &self.video_server,
        }
    }
}

fn required_url(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    let value = vars
        .get(name)
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;

    url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidValue(format!("{name} is not a valid URL: {e}")))?;

    Ok(value.trim_end_matches('/').to_string())
}

fn positive_ms(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) => Err(ConfigError::InvalidValue(format!("{name} must be > 0"))),
            Ok(value) => Ok(value),
            Err(e) => Err(ConfigError::InvalidValue(format!("{name}={raw}: {e}"))),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "BACKEND_URL".to_string(),
                "http://localhost:8080/api/".to_string(),
            ),
            (
                "SOCKET_URL".to_string(),
                "http://localhost:8080".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.backend_url, "http://localhost:8080/api");
        assert_eq!(config.socket_url, "http://localhost:8080");
        assert_eq!(config.audio_server.host, "localhost");
        assert_eq!(config.audio_server.port, 3001);
        assert_eq!(config.video_server.port, 3002);
        assert_eq!(config.audio_server.path, "/");
        assert_eq!(config.reconnection_attempts, 5);
        assert_eq!(config.reconnection_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnection_delay_max, Duration::from_millis(5000));
        assert_eq!(config.socket_timeout, Duration::from_millis(20_000));
        assert_eq!(config.cleanup_settle, Duration::from_millis(1000));
        assert_eq!(config.observability.log_level, "info");
        assert!(!config.observability.json_logs);
    }

    #[test]
    fn test_missing_backend_url() {
        let mut vars = base_vars();
        vars.remove("BACKEND_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "BACKEND_URL"));
    }

    #[test]
    fn test_missing_socket_url() {
        let mut vars = base_vars();
        vars.remove("SOCKET_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "SOCKET_URL"));
    }

    #[test]
    fn test_invalid_backend_url() {
        let mut vars = base_vars();
        vars.insert("BACKEND_URL".to_string(), "not a url".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_custom_peer_servers() {
        let mut vars = base_vars();
        vars.insert(
            "AUDIO_SERVER_URL".to_string(),
            "peers.example.com:9001".to_string(),
        );
        vars.insert("VIDEO_SERVER_URL".to_string(), "video.example.com".to_string());
        vars.insert("PEER_SERVER_PATH".to_string(), "/peerjs".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.audio_server.authority(), "peers.example.com:9001");
        assert_eq!(config.video_server.authority(), "video.example.com:3002");
        assert_eq!(config.peer_server(MediaKind::Video).path, "/peerjs");
    }

    #[test]
    fn test_unparsable_port_falls_back_to_default() {
        let server = PeerServerConfig::parse("media:abc", 3001, "/");
        assert_eq!(server.host, "media");
        assert_eq!(server.port, 3001);

        let server = PeerServerConfig::parse(":4000", 3002, "/");
        assert_eq!(server.host, "localhost");
        assert_eq!(server.port, 4000);
    }

    #[test]
    fn test_delay_max_below_base_rejected() {
        let mut vars = base_vars();
        vars.insert("SOCKET_RECONNECTION_DELAY_MS".to_string(), "3000".to_string());
        vars.insert(
            "SOCKET_RECONNECTION_DELAY_MAX_MS".to_string(),
            "1000".to_string(),
        );

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut vars = base_vars();
        vars.insert("SOCKET_TIMEOUT_MS".to_string(), "0".to_string());

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("SOCKET_TIMEOUT_MS"));
    }

    #[test]
    fn test_json_logs_flag() {
        let mut vars = base_vars();
        vars.insert("JSON_LOGS".to_string(), "TRUE".to_string());
        vars.insert("LOG_LEVEL".to_string(), "meet_client=debug".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert!(config.observability.json_logs);
        assert_eq!(config.observability.log_level, "meet_client=debug");
    }

    #[test]
    fn test_default_for_kind() {
        assert_eq!(
            PeerServerConfig::default_for(MediaKind::Audio).to_string(),
            "localhost:3001/"
        );
        assert_eq!(
            PeerServerConfig::default_for(MediaKind::Video).authority(),
            "localhost:3002"
        );
    }
}
