//! Server configuration loaded from environment variables

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_COUNTDOWN_MS: u64 = 3000;
const DEFAULT_STATIC_DIR: &str = "static";

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket server listens on
    pub bind: SocketAddr,
    /// Delay between `start_race` and the race going live
    pub countdown: Duration,
    /// Directory served as the web client
    pub static_dir: String,
    /// Expose `POST /api/dev/token` for local play without an identity provider
    pub dev_tokens: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            countdown: Duration::from_millis(DEFAULT_COUNTDOWN_MS),
            static_dir: DEFAULT_STATIC_DIR.to_string(),
            dev_tokens: false,
        }
    }
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind = match std::env::var("TYPERACE_BIND") {
            Ok(v) => match v.trim().parse() {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!("Invalid TYPERACE_BIND '{}': {}, using {}", v, e, defaults.bind);
                    defaults.bind
                }
            },
            Err(_) => defaults.bind,
        };

        let countdown = match std::env::var("TYPERACE_COUNTDOWN_MS") {
            Ok(v) => match v.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(e) => {
                    tracing::warn!(
                        "Invalid TYPERACE_COUNTDOWN_MS '{}': {}, using {:?}",
                        v,
                        e,
                        defaults.countdown
                    );
                    defaults.countdown
                }
            },
            Err(_) => defaults.countdown,
        };

        let static_dir = std::env::var("TYPERACE_STATIC_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.static_dir);

        let dev_tokens = std::env::var("TYPERACE_DEV_TOKENS")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        if dev_tokens {
            tracing::warn!("Dev token endpoint ENABLED - anyone can mint identities!");
        }

        Self {
            bind,
            countdown,
            static_dir,
            dev_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "TYPERACE_BIND",
            "TYPERACE_COUNTDOWN_MS",
            "TYPERACE_STATIC_DIR",
            "TYPERACE_DEV_TOKENS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.bind, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.countdown, Duration::from_secs(3));
        assert_eq!(config.static_dir, "static");
        assert!(!config.dev_tokens);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("TYPERACE_BIND", "127.0.0.1:8080");
        std::env::set_var("TYPERACE_COUNTDOWN_MS", "500");
        std::env::set_var("TYPERACE_DEV_TOKENS", "true");

        let config = Config::from_env();
        assert_eq!(config.bind, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.countdown, Duration::from_millis(500));
        assert!(config.dev_tokens);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("TYPERACE_BIND", "not an address");
        std::env::set_var("TYPERACE_COUNTDOWN_MS", "soon");

        let config = Config::from_env();
        assert_eq!(config.bind, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.countdown, Duration::from_secs(3));

        // Negative and fractional values are not milliseconds either
        for bad in ["-250", "1.5", ""] {
            std::env::set_var("TYPERACE_COUNTDOWN_MS", bad);
            assert_eq!(Config::from_env().countdown, Duration::from_secs(3));
        }

        clear_env();
    }
}
