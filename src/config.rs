//! Service configuration, loaded once and handed to each component.

use crate::domain::accrual::InterestRate;
use crate::error::ConfigError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub gateway: GatewayConfig,
    pub interest: InterestConfig,
    pub logging: LoggingConfig,
    pub sandbox: SandboxConfig,
}

impl ServiceConfig {
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache.ttl_secs must be positive".into()));
        }
        if self.cache.stats_ttl_secs == 0 || self.cache.stats_ttl_secs >= self.cache.ttl_secs {
            return Err(ConfigError::Invalid(
                "cache.stats_ttl_secs must be positive and shorter than cache.ttl_secs".into(),
            ));
        }
        if self.gateway.balance_timeout_ms == 0 || self.gateway.settle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("gateway timeouts must be positive".into()));
        }
        if self.gateway.finalize_attempts == 0 {
            return Err(ConfigError::Invalid(
                "gateway.finalize_attempts must be at least 1".into(),
            ));
        }
        if self.interest.account_category.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "interest.account_category is required".into(),
            ));
        }
        if self.interest.currency.trim().is_empty() {
            return Err(ConfigError::Invalid("interest.currency is required".into()));
        }
        if self.sandbox.average_balance < Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "sandbox.average_balance must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of cached entities and list views.
    pub ttl_secs: u64,
    /// Lifetime of cached stats; must be shorter than `ttl_secs`.
    pub stats_ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            stats_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub balance_timeout_ms: u64,
    pub settle_timeout_ms: u64,
    /// Attempts at writing a record's terminal status after settlement.
    pub finalize_attempts: u32,
}

impl GatewayConfig {
    pub fn balance_timeout(&self) -> Duration {
        Duration::from_millis(self.balance_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            balance_timeout_ms: 5_000,
            settle_timeout_ms: 30_000,
            finalize_attempts: 3,
        }
    }
}

/// Date used when looking up the effective interest rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateAnchor {
    /// Last day of the period being calculated.
    #[default]
    PeriodEnd,
    /// Wall-clock date at calculation time.
    Now,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterestConfig {
    pub account_category: String,
    pub currency: String,
    pub rate_anchor: RateAnchor,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            account_category: "SAVINGS".into(),
            currency: "USD".into(),
            rate_anchor: RateAnchor::PeriodEnd,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the tracing subscriber. `RUST_LOG` overrides `level`.
    /// Output goes to stderr so stdout stays machine-readable.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let result = match self.format.as_str() {
            "json" => fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
            _ => fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
        };
        if let Err(e) = result {
            eprintln!("logging already initialised: {}", e);
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// Seed data for the in-memory collaborators used by the CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub tokens: Vec<SandboxToken>,
    pub accounts: Vec<SandboxAccount>,
    pub rates: Vec<InterestRate>,
    pub average_balance: Decimal,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            accounts: Vec::new(),
            rates: Vec::new(),
            average_balance: Decimal::ONE_THOUSAND,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxToken {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxAccount {
    pub id: String,
    pub available: Decimal,
    #[serde(default)]
    pub locked: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "USD".into()
}
