//! Runtime configuration and relay endpoint resolution.

use std::env;
use std::time::Duration;

use url::Url;

use crate::game::snapshot::SnapshotBounds;

/// Port the relay listens on when none is configured.
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Session synchronization settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Explicit relay URL. Wins over host-derived resolution.
    pub relay_url: Option<String>,
    /// Relay port used when deriving the URL from the page host.
    pub relay_port: u16,
    /// How long `connect` waits for the socket to open.
    pub connect_timeout: Duration,
    /// Reconnect attempts after an unexpected close before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt; doubles each attempt.
    pub reconnect_delay: Duration,
    /// Keep-alive period.
    pub heartbeat_interval: Duration,
    /// Latency ping period.
    pub ping_interval: Duration,
    /// Minimum spacing between outbound inputs.
    pub input_send_interval: Duration,
    /// Check incoming snapshots against `snapshot_bounds`.
    pub validate_snapshots: bool,
    /// Plausibility limits for snapshots.
    pub snapshot_bounds: SnapshotBounds,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            relay_port: DEFAULT_RELAY_PORT,
            connect_timeout: Duration::from_secs(15),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            input_send_interval: Duration::from_millis(16),
            validate_snapshots: true,
            snapshot_bounds: SnapshotBounds::default(),
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            relay_url: env::var("RELAY_URL").ok().filter(|v| !v.trim().is_empty()),
            relay_port: parse_var("RELAY_PORT").unwrap_or(defaults.relay_port),
            connect_timeout: millis_var("CONNECT_TIMEOUT_MS").unwrap_or(defaults.connect_timeout),
            max_reconnect_attempts: parse_var("MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_delay: millis_var("RECONNECT_DELAY_MS").unwrap_or(defaults.reconnect_delay),
            heartbeat_interval: millis_var("HEARTBEAT_INTERVAL_MS")
                .unwrap_or(defaults.heartbeat_interval),
            ping_interval: millis_var("PING_INTERVAL_MS").unwrap_or(defaults.ping_interval),
            input_send_interval: millis_var("INPUT_SEND_INTERVAL_MS")
                .unwrap_or(defaults.input_send_interval),
            validate_snapshots: env::var("VALIDATE_SNAPSHOTS")
                .map(|v| !(v == "false" || v == "0"))
                .unwrap_or(defaults.validate_snapshots),
            snapshot_bounds: defaults.snapshot_bounds,
        }
    }
}

/// Ambient facts about where the game was launched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchContext {
    /// Room code carried by the launch URL, if any.
    pub room_id: Option<String>,
    /// Host the game was served from.
    pub page_host: String,
    /// Whether the page itself was served securely.
    pub page_secure: bool,
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self {
            room_id: None,
            page_host: "localhost".to_string(),
            page_secure: false,
        }
    }
}

impl LaunchContext {
    /// Read `ROOM_ID`, `PAGE_HOST` and `PAGE_SECURE`.
    pub fn from_env() -> Self {
        Self {
            room_id: env::var("ROOM_ID").ok(),
            page_host: env::var("PAGE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            page_secure: env::var("PAGE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Room code, if present and non-blank.
    pub fn room(&self) -> Option<&str> {
        self.room_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Pick the relay URL for this launch.
///
/// Any port already on `page_host` is dropped in favour of `relay_port`.
pub fn resolve_relay_url(config: &SyncConfig, ctx: &LaunchContext) -> String {
    if let Some(url) = &config.relay_url {
        return url.clone();
    }

    let host = bare_host(&ctx.page_host);
    if is_loopback(host) {
        return format!("ws://localhost:{}", config.relay_port);
    }

    let scheme = if ctx.page_secure { "wss" } else { "ws" };
    format!("{}://{}:{}", scheme, host, config.relay_port)
}

/// Add the room as a percent-encoded `room` query parameter.
pub fn with_room_query(url: &str, room_id: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(url)?;
    url.query_pairs_mut().append_pair("room", room_id);
    Ok(url.into())
}

/// Host name without a `:port` suffix. Bracketed IPv6 keeps its brackets.
fn bare_host(host: &str) -> &str {
    let host = host.trim();
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name,
        // Unbracketed IPv6
        _ => host,
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn millis_var(name: &str) -> Option<Duration> {
    parse_var::<u64>(name).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(host: &str, secure: bool) -> LaunchContext {
        LaunchContext {
            room_id: None,
            page_host: host.to_string(),
            page_secure: secure,
        }
    }

    #[test]
    fn test_explicit_url_wins() {
        let config = SyncConfig {
            relay_url: Some("wss://relay.example.net/ws".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_relay_url(&config, &ctx("localhost", false)),
            "wss://relay.example.net/ws"
        );
    }

    #[test]
    fn test_loopback_uses_local_default() {
        let config = SyncConfig::default();
        for host in ["localhost", "127.0.0.1", "::1"] {
            assert_eq!(
                resolve_relay_url(&config, &ctx(host, true)),
                "ws://localhost:8080"
            );
        }
    }

    #[test]
    fn test_remote_host_scheme_follows_page() {
        let config = SyncConfig::default();
        assert_eq!(
            resolve_relay_url(&config, &ctx("play.example.com", true)),
            "wss://play.example.com:8080"
        );
        assert_eq!(
            resolve_relay_url(&config, &ctx("play.example.com", false)),
            "ws://play.example.com:8080"
        );
    }

    #[test]
    fn test_room_query() {
        assert_eq!(with_room_query("ws://h:1", "ABC").unwrap(), "ws://h:1/?room=ABC");
        assert_eq!(
            with_room_query("ws://h:1/?v=2", "ABC").unwrap(),
            "ws://h:1/?v=2&room=ABC"
        );
        assert_eq!(
            with_room_query("wss://relay.example.net/ws", "ABC").unwrap(),
            "wss://relay.example.net/ws?room=ABC"
        );
    }

    #[test]
    fn test_room_query_is_encoded() {
        let built = with_room_query("ws://h:1", "A B&room=evil").unwrap();
        assert!(!built.contains(' '));

        let parsed = Url::parse(&built).unwrap();
        let rooms: Vec<_> = parsed
            .query_pairs()
            .filter(|(k, _)| k == "room")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(rooms, vec!["A B&room=evil".to_string()]);
    }

    #[test]
    fn test_room_query_rejects_bad_url() {
        assert!(with_room_query("not a url", "ABC").is_err());
    }

    #[test]
    fn test_page_host_port_dropped() {
        let config = SyncConfig::default();
        assert_eq!(
            resolve_relay_url(&config, &ctx("example.com:3000", true)),
            "wss://example.com:8080"
        );
        assert_eq!(
            resolve_relay_url(&config, &ctx("localhost:5173", false)),
            "ws://localhost:8080"
        );
        assert_eq!(
            resolve_relay_url(&config, &ctx("[::1]:5173", false)),
            "ws://localhost:8080"
        );
        assert_eq!(
            resolve_relay_url(&config, &ctx("[2001:db8::1]:443", true)),
            "wss://[2001:db8::1]:8080"
        );
    }

    #[test]
    fn test_blank_room_is_absent() {
        let mut c = LaunchContext::default();
        assert_eq!(c.room(), None);
        c.room_id = Some("   ".to_string());
        assert_eq!(c.room(), None);
        c.room_id = Some(" XY12 ".to_string());
        assert_eq!(c.room(), Some("XY12"));
    }

    #[test]
    fn test_defaults() {
        let c = SyncConfig::default();
        assert_eq!(c.max_reconnect_attempts, 5);
        assert_eq!(c.reconnect_delay, Duration::from_millis(1000));
        assert_eq!(c.connect_timeout, Duration::from_secs(15));
        assert_eq!(c.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(c.ping_interval, Duration::from_secs(5));
        assert!(c.validate_snapshots);
    }
}
