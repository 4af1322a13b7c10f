//! Environment-driven configuration.
//!
//! Everything the process consumes from its environment lives here, loaded
//! once at startup. Invalid numeric values are startup errors rather than
//! silent defaults; a successor process inherits this environment verbatim,
//! so what was valid for the predecessor stays valid for it.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use typhon_gate::{AdmissionConfig, CaptchaConfig};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RATE_LIMIT_MAX: u32 = 20;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}={value}: {message}")]
    Invalid {
        name: &'static str,
        value: String,
        message: String,
    },
}

/// Serving mode selected by `APP_BUILD_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Single-process serving; ctrl-c shuts down. No handoff machinery.
    #[default]
    Dev,
    /// Handoff-capable serving: port-shared listener, SIGHUP spawns a
    /// successor and drains this process behind it.
    Release,
}

impl BuildMode {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("dev") {
            BuildMode::Dev
        } else {
            BuildMode::Release
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Dev => write!(f, "dev"),
            BuildMode::Release => write!(f, "release"),
        }
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub build_mode: BuildMode,
    /// Shared key guarding the system endpoints; they answer 500 while unset.
    pub system_key: Option<String>,
    pub captcha_id: String,
    pub captcha_key: String,
    /// Override for the upstream captcha endpoint (tests, regional mirrors).
    pub captcha_url: Option<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub drain_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match get("APP_PORT") {
            Some(raw) => parse_number::<u16>("APP_PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let build_mode = get("APP_BUILD_MODE")
            .map(|raw| BuildMode::parse(&raw))
            .unwrap_or_default();

        let rate_limit_max = match get("APP_RATE_LIMIT_MAX") {
            Some(raw) => parse_number::<u32>("APP_RATE_LIMIT_MAX", &raw)?,
            None => DEFAULT_RATE_LIMIT_MAX,
        };

        let rate_limit_window_secs = match get("APP_RATE_LIMIT_WINDOW_SECS") {
            Some(raw) => parse_number::<u64>("APP_RATE_LIMIT_WINDOW_SECS", &raw)?,
            None => DEFAULT_RATE_LIMIT_WINDOW_SECS,
        };

        let drain_timeout_secs = match get("APP_DRAIN_TIMEOUT_SECS") {
            Some(raw) => parse_number::<u64>("APP_DRAIN_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_DRAIN_TIMEOUT_SECS,
        };

        Ok(Self {
            port,
            build_mode,
            system_key: get("APP_SYSTEM_KEY").filter(|k| !k.is_empty()),
            captcha_id: get("APP_CAPTCHA_ID").unwrap_or_default(),
            captcha_key: get("APP_CAPTCHA_KEY").unwrap_or_default(),
            captcha_url: get("APP_CAPTCHA_URL").filter(|u| !u.is_empty()),
            rate_limit_max,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            drain_timeout: Duration::from_secs(drain_timeout_secs),
        })
    }

    /// Listening address. IPv4 any-address, matching the deployment's
    /// tcp4-only front.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port))
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            max_requests: self.rate_limit_max,
            window: self.rate_limit_window,
        }
    }

    pub fn captcha_config(&self) -> CaptchaConfig {
        let mut config = CaptchaConfig::new(self.captcha_id.clone(), self.captcha_key.clone());
        if let Some(url) = &self.captcha_url {
            config.verify_url = url.clone();
        }
        config
    }

    pub fn log_config(&self) {
        info!(mode = %self.build_mode, port = self.port, "configuration loaded");
        info!(
            max = self.rate_limit_max,
            window_secs = self.rate_limit_window.as_secs(),
            "admission control"
        );
        info!(
            drain_timeout_secs = self.drain_timeout.as_secs(),
            "drain deadline"
        );
        info!(
            captcha_configured = !self.captcha_id.is_empty(),
            system_key_configured = self.system_key.is_some(),
            "front-door guards"
        );
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.build_mode, BuildMode::Dev);
        assert_eq!(config.rate_limit_max, 20);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.drain_timeout, Duration::from_secs(15));
        assert!(config.system_key.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = config_from(&[
            ("APP_PORT", "8080"),
            ("APP_BUILD_MODE", "release"),
            ("APP_SYSTEM_KEY", "s3cret"),
            ("APP_RATE_LIMIT_MAX", "5"),
            ("APP_RATE_LIMIT_WINDOW_SECS", "10"),
            ("APP_DRAIN_TIMEOUT_SECS", "3"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.build_mode, BuildMode::Release);
        assert_eq!(config.system_key.as_deref(), Some("s3cret"));
        assert_eq!(config.rate_limit_max, 5);
        assert_eq!(config.rate_limit_window, Duration::from_secs(10));
        assert_eq!(config.drain_timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_port_is_a_startup_error() {
        let err = config_from(&[("APP_PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("APP_PORT"));
    }

    #[test]
    fn any_mode_other_than_dev_is_handoff_capable() {
        assert_eq!(BuildMode::parse("dev"), BuildMode::Dev);
        assert_eq!(BuildMode::parse("DEV"), BuildMode::Dev);
        assert_eq!(BuildMode::parse("release"), BuildMode::Release);
        assert_eq!(BuildMode::parse("production"), BuildMode::Release);
        assert_eq!(BuildMode::parse(""), BuildMode::Release);
    }

    #[test]
    fn bind_addr_is_ipv4_any() {
        let config = config_from(&[("APP_PORT", "9000")]).unwrap();
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:9000");
    }

    #[test]
    fn captcha_url_override_reaches_the_client_config() {
        let config = config_from(&[
            ("APP_CAPTCHA_ID", "cid"),
            ("APP_CAPTCHA_KEY", "ckey"),
            ("APP_CAPTCHA_URL", "http://localhost:9999/validate"),
        ])
        .unwrap();
        let captcha = config.captcha_config();
        assert_eq!(captcha.captcha_id, "cid");
        assert_eq!(captcha.verify_url, "http://localhost:9999/validate");
    }
}
