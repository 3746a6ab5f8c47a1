//! Process-wide configuration: environment-variable driven, with the same
//! preset-plus-builder shape the mesh router uses internally.

use thiserror::Error;

use crate::domain_types::{FailureThreshold, RateLimitCount, RateLimitWindowMs, ResetTimeoutMs, SuccessThreshold};
use crate::mesh_router::RouterConfig;
use crate::messaging_guard::GuardConfig;
use crate::peer_channel::PeerChannelConfig;

/// Failure returned by [`AppConfig::from_env`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed.
    #[error("invalid value for {var}: {source}")]
    InvalidEnvVar {
        /// The offending variable's name.
        var: &'static str,
        /// The underlying parse failure.
        source: String,
    },
    /// A value was present but failed domain-type validation.
    #[error("invalid value for {var}: {reason}")]
    OutOfRange {
        /// The offending variable's name.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar { var, source: e.to_string() }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnvVar {
            var,
            source: "value is not valid UTF-8".to_string(),
        }),
    }
}

const DEFAULT_PORT: u16 = 8080;

/// Top-level process configuration, assembled from environment variables
/// with the same in-memory-friendly defaults the bundled demo binary uses.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port the HTTP server binds to (`RELAYMESH_PORT`).
    pub port: u16,
    /// Shared secret used to verify inbound webhook signatures
    /// (`RELAYMESH_WEBHOOK_SECRET`). `None` rejects every webhook delivery.
    pub webhook_secret: Option<String>,
    /// Messaging guard tunables.
    pub guard: GuardConfig,
    /// Mesh router tunables.
    pub router: RouterConfig,
    /// Peer channel tunables.
    pub peer_channel: PeerChannelConfig,
}

impl AppConfig {
    /// Builds configuration from environment variables, falling back to
    /// development defaults for anything unset.
    ///
    /// Recognized variables: `RELAYMESH_PORT`, `RELAYMESH_WEBHOOK_SECRET`,
    /// `RELAYMESH_ENV` (`development` | `production` | `testing`, selects the
    /// router preset), `RELAYMESH_FAILURE_THRESHOLD`, `RELAYMESH_RESET_TIMEOUT_MS`,
    /// `RELAYMESH_SUCCESS_THRESHOLD`, `RELAYMESH_RATE_LIMIT_COUNT`,
    /// `RELAYMESH_RATE_LIMIT_WINDOW_MS`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a set variable fails to parse or fails
    /// domain-type validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_env::<u16>("RELAYMESH_PORT")?.unwrap_or(DEFAULT_PORT);
        let webhook_secret = std::env::var("RELAYMESH_WEBHOOK_SECRET").ok();

        let router = match std::env::var("RELAYMESH_ENV").as_deref() {
            Ok("production") => RouterConfig::production(),
            Ok("testing") => RouterConfig::testing(),
            _ => RouterConfig::development(),
        };

        let mut guard = GuardConfig::default();
        if let Some(v) = parse_env::<u32>("RELAYMESH_FAILURE_THRESHOLD")? {
            guard.failure_threshold = FailureThreshold::try_new(v)
                .map_err(|e| ConfigError::OutOfRange { var: "RELAYMESH_FAILURE_THRESHOLD", reason: e.to_string() })?;
        }
        if let Some(v) = parse_env::<u64>("RELAYMESH_RESET_TIMEOUT_MS")? {
            guard.reset_timeout = ResetTimeoutMs::try_new(v)
                .map_err(|e| ConfigError::OutOfRange { var: "RELAYMESH_RESET_TIMEOUT_MS", reason: e.to_string() })?;
        }
        if let Some(v) = parse_env::<u32>("RELAYMESH_SUCCESS_THRESHOLD")? {
            guard.success_threshold = SuccessThreshold::try_new(v)
                .map_err(|e| ConfigError::OutOfRange { var: "RELAYMESH_SUCCESS_THRESHOLD", reason: e.to_string() })?;
        }
        if let Some(v) = parse_env::<u32>("RELAYMESH_RATE_LIMIT_COUNT")? {
            guard.rate_limit_per_window = RateLimitCount::try_new(v)
                .map_err(|e| ConfigError::OutOfRange { var: "RELAYMESH_RATE_LIMIT_COUNT", reason: e.to_string() })?;
        }
        if let Some(v) = parse_env::<u64>("RELAYMESH_RATE_LIMIT_WINDOW_MS")? {
            guard.rate_limit_window = RateLimitWindowMs::try_new(v)
                .map_err(|e| ConfigError::OutOfRange { var: "RELAYMESH_RATE_LIMIT_WINDOW_MS", reason: e.to_string() })?;
        }

        Ok(Self {
            port,
            webhook_secret,
            guard,
            router,
            peer_channel: PeerChannelConfig::default(),
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            webhook_secret: None,
            guard: GuardConfig::default(),
            router: RouterConfig::development(),
            peer_channel: PeerChannelConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_development_router_preset() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.webhook_secret.is_none());
    }
}
