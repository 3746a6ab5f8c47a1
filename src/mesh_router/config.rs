//! Typed, validated configuration for the mesh router.
//!
//! Mirrors the host platform's router-configuration shape: named presets
//! (`development`, `production`, `testing`), a fluent builder, and a
//! `validate` pass that checks cross-field consistency rather than
//! validating each field independently.

use thiserror::Error;

/// Failure returned by [`RouterConfig::validate`].
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A single field's value is out of its allowed range.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// The offending field's name.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
    /// Two fields are individually valid but inconsistent together.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Tunables governing route selection and delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Minimum reachable-node count the directory must report for `direct`
    /// routing to be attempted during auto route selection.
    pub min_reachable_nodes_for_direct: u32,
    /// Per-attempt timeout for a single route, in milliseconds.
    pub route_attempt_timeout_ms: u64,
    /// Whether a partitioned mesh disables `direct` routing even when a
    /// peer is otherwise reachable.
    pub partition_disables_direct: bool,
    /// Whether store-write failures before transport should abort the send
    /// entirely (`true`) or proceed best-effort (`false`).
    pub require_store_write_before_send: bool,
}

impl RouterConfig {
    /// A preset suited to local development: generous timeouts, store
    /// writes are best-effort so a missing store never blocks a send.
    #[must_use]
    pub fn development() -> Self {
        Self {
            min_reachable_nodes_for_direct: 2,
            route_attempt_timeout_ms: 5_000,
            partition_disables_direct: true,
            require_store_write_before_send: false,
        }
    }

    /// A preset suited to production: strict store-write requirement,
    /// tighter timeouts.
    #[must_use]
    pub fn production() -> Self {
        Self {
            min_reachable_nodes_for_direct: 2,
            route_attempt_timeout_ms: 2_000,
            partition_disables_direct: true,
            require_store_write_before_send: true,
        }
    }

    /// A preset suited to unit/integration tests: short timeouts, relaxed
    /// store requirement so in-memory collaborators need no setup.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            min_reachable_nodes_for_direct: 2,
            route_attempt_timeout_ms: 200,
            partition_disables_direct: true,
            require_store_write_before_send: false,
        }
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any field is out of range, or if the
    /// fields are individually valid but mutually inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_reachable_nodes_for_direct == 0 {
            return Err(ConfigError::InvalidField {
                field: "min_reachable_nodes_for_direct",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.route_attempt_timeout_ms == 0 {
            return Err(ConfigError::InvalidField {
                field: "route_attempt_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.route_attempt_timeout_ms > 60_000 && self.min_reachable_nodes_for_direct > 10 {
            return Err(ConfigError::Inconsistent(
                "a very high reachable-node requirement combined with a minute-scale route timeout \
                 will starve fallback routes of their share of the attempt budget"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// A fluent builder for [`RouterConfig`].
#[derive(Debug, Clone, Default)]
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    /// Starts from the given base preset.
    #[must_use]
    pub fn from(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Overrides the minimum reachable-node threshold for direct routing.
    #[must_use]
    pub fn min_reachable_nodes_for_direct(mut self, value: u32) -> Self {
        self.config.min_reachable_nodes_for_direct = value;
        self
    }

    /// Overrides the per-route attempt timeout.
    #[must_use]
    pub fn route_attempt_timeout_ms(mut self, value: u64) -> Self {
        self.config.route_attempt_timeout_ms = value;
        self
    }

    /// Builds and validates the final configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the resulting configuration is invalid.
    pub fn build(self) -> Result<RouterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_individually_valid() {
        assert!(RouterConfig::development().validate().is_ok());
        assert!(RouterConfig::production().validate().is_ok());
        assert!(RouterConfig::testing().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = RouterConfigBuilder::from(RouterConfig::testing())
            .route_attempt_timeout_ms(0)
            .build();
        assert!(config.is_err());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = RouterConfigBuilder::from(RouterConfig::production())
            .min_reachable_nodes_for_direct(4)
            .build()
            .unwrap();
        assert_eq!(config.min_reachable_nodes_for_direct, 4);
    }
}
