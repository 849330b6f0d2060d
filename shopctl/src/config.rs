//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `SHOPCTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `SHOPCTL_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `SHOPCTL_SWEEPER__INTERVAL=1m` sets the `sweeper.interval` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use shopctl::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Sweeping every {:?}", config.sweeper.interval);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Database**: `database.url`, `database.max_connections` - SQLite connection settings
//! - **Admins**: `admins` - user ids allowed to perform administrator transitions
//! - **Licenses**: `licenses.code_prefix`, `licenses.unit` - code format and duration classes
//! - **Sweeper**: `sweeper.enabled`, `sweeper.interval`, `sweeper.external_timeout` - expiry sweep schedule
//! - **Orders**: `orders.unit_price` - balance charged per unit on fulfillment
//! - **Tiers**: `tiers` - customer classification by total spend
//! - **Notifications**: `notifications.webhook_url` - outbound notification gateway
//! - **Grants**: `grants.separator`, `grants.max_name_len` - resource naming
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! DATABASE_URL="sqlite://data/shop.db"
//! SHOPCTL_ADMINS="[123456789012345678]"
//! SHOPCTL_NOTIFICATIONS__WEBHOOK_URL="http://gateway:8080/notify"
//! SHOPCTL_LOG_FORMAT=json
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::db::models::licenses::LicenseKind;
use crate::errors::Error;
use crate::types::{Actor, UserId};

/// CLI args: config file location plus an optional one-shot task
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "SHOPCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting.
    #[arg(long)]
    pub validate: bool,

    /// Task to run. Defaults to `serve`.
    #[command(subcommand)]
    pub task: Option<Task>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Run the background services until SIGTERM or Ctrl+C
    Serve,
    /// Issue new license codes and print them
    IssueCode {
        /// Duration class: short, long or permanent
        #[arg(long, value_parser = parse_license_kind)]
        kind: LicenseKind,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Run a single expiry sweep and print the report
    Sweep,
    /// Inspect or change the shared stock counter
    Stock {
        #[command(subcommand)]
        action: StockAction,
    },
    /// Check that the database is reachable
    Health,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StockAction {
    Show,
    Set { value: i64 },
    Inc { value: i64 },
    Dec { value: i64 },
}

fn parse_license_kind(name: &str) -> Result<LicenseKind, String> {
    LicenseKind::parse_name(name).ok_or_else(|| format!("unknown license kind '{name}' (expected short, long or permanent)"))
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Users allowed to resolve top-ups, fulfill orders, issue codes and change settings
    pub admins: Vec<UserId>,
    pub licenses: LicenseConfig,
    pub sweeper: SweeperConfig,
    pub orders: OrderConfig,
    /// Ascending by `min_spent`; the first entry is the tier new users start in
    pub tiers: Vec<TierConfig>,
    pub notifications: NotificationConfig,
    pub grants: GrantConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://shop.db`. The file is created if missing.
    pub url: String,
    pub max_connections: u32,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// How long a writer waits for the SQLite write lock before failing
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://shop.db".to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LicenseConfig {
    /// Leading segment of every issued code
    pub code_prefix: String,
    /// Length of one duration unit
    #[serde(with = "humantime_serde")]
    pub unit: Duration,
    pub short_units: u32,
    pub long_units: u32,
    pub max_generation_attempts: u32,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            code_prefix: "Wind-Banner".to_string(),
            unit: Duration::from_secs(24 * 60 * 60),
            short_units: 7,
            long_units: 30,
            max_generation_attempts: 5,
        }
    }
}

impl LicenseConfig {
    /// Number of units a license of this kind lasts, or `None` if it never expires.
    /// Codes with an unrecognised class last a single unit.
    pub fn units_for(&self, kind: &LicenseKind) -> Option<u32> {
        match kind {
            LicenseKind::Short => Some(self.short_units),
            LicenseKind::Long => Some(self.long_units),
            LicenseKind::Permanent => None,
            LicenseKind::Other(_) => Some(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Expired licenses fetched per query; a sweep keeps fetching until none are left
    pub batch_size: i64,
    /// Upper bound on each chat-platform call made while releasing a revoked grant
    #[serde(with = "humantime_serde")]
    pub external_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5 * 60),
            batch_size: 500,
            external_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrderConfig {
    /// Balance charged per unit of quantity when an order is fulfilled
    pub unit_price: i64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self { unit_price: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    pub name: String,
    pub min_spent: i64,
}

impl TierConfig {
    fn new(name: &str, min_spent: i64) -> Self {
        Self {
            name: name.to_string(),
            min_spent,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    /// Gateway that delivers DMs and channel posts. Notifications are only logged when unset.
    pub webhook_url: Option<Url>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Where fulfillment requests for queued orders are posted
    pub fulfillment_channel: Option<String>,
    /// Where new top-up requests are posted for review
    pub topup_channel: Option<String>,
    /// Where grant announcements are posted
    pub announce_channel: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: Duration::from_secs(10),
            fulfillment_channel: None,
            topup_channel: None,
            announce_channel: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrantConfig {
    /// Placed between the emoji and the name of a granted resource
    pub separator: String,
    /// Display names are truncated to this many characters
    pub max_name_len: usize,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            separator: "┃".to_string(),
            max_name_len: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            admins: Vec::new(),
            licenses: LicenseConfig::default(),
            sweeper: SweeperConfig::default(),
            orders: OrderConfig::default(),
            tiers: vec![
                TierConfig::new("bronze", 0),
                TierConfig::new("silver", 50_000),
                TierConfig::new("gold", 200_000),
                TierConfig::new("vip", 500_000),
            ],
            notifications: NotificationConfig::default(),
            grants: GrantConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Error::Internal {
            operation: format!("Config validation: {message}"),
        };

        if self.database.url.trim().is_empty() {
            return Err(invalid("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections must be at least 1".to_string()));
        }

        if self.licenses.code_prefix.trim().is_empty() {
            return Err(invalid("licenses.code_prefix must not be empty".to_string()));
        }
        if self.licenses.unit.is_zero() {
            return Err(invalid("licenses.unit must be greater than zero".to_string()));
        }
        if self.licenses.max_generation_attempts == 0 {
            return Err(invalid("licenses.max_generation_attempts must be at least 1".to_string()));
        }

        if self.sweeper.interval.is_zero() {
            return Err(invalid("sweeper.interval must be greater than zero".to_string()));
        }
        if self.sweeper.batch_size <= 0 {
            return Err(invalid(format!("sweeper.batch_size must be positive, got {}", self.sweeper.batch_size)));
        }
        if self.sweeper.external_timeout.is_zero() {
            return Err(invalid("sweeper.external_timeout must be greater than zero".to_string()));
        }

        if self.orders.unit_price < 0 {
            return Err(invalid(format!("orders.unit_price cannot be negative, got {}", self.orders.unit_price)));
        }

        if self.tiers.is_empty() {
            return Err(invalid("at least one tier must be configured".to_string()));
        }
        if self.tiers.windows(2).any(|pair| pair[0].min_spent >= pair[1].min_spent) {
            return Err(invalid("tiers must be sorted by strictly increasing min_spent".to_string()));
        }

        if self.notifications.timeout.is_zero() {
            return Err(invalid("notifications.timeout must be greater than zero".to_string()));
        }

        if self.grants.max_name_len == 0 {
            return Err(invalid("grants.max_name_len must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // (SHOPCTL_CONFIG names the file itself and is not a config key)
            .merge(Env::prefixed("SHOPCTL_").ignore(&["config"]).split("__"))
            // Common DATABASE_URL pattern
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
    }

    pub fn is_admin(&self, id: &UserId) -> bool {
        self.admins.contains(id)
    }

    /// Resolve a caller into an [`Actor`] using the admin list.
    pub fn actor(&self, id: impl Into<UserId>) -> Actor {
        let id = id.into();
        let is_admin = self.is_admin(&id);
        Actor { id, is_admin }
    }

    /// Tier a user with the given total spend belongs to.
    pub fn tier_for(&self, total_spent: i64) -> &str {
        self.tiers
            .iter()
            .rev()
            .find(|tier| total_spent >= tier.min_spent)
            .or(self.tiers.first())
            .map(|tier| tier.name.as_str())
            .unwrap_or_default()
    }

    /// Tier new users start in.
    pub fn default_tier(&self) -> &str {
        self.tiers.first().map(|tier| tier.name.as_str()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(config: &str) -> Args {
        Args {
            config: config.to_string(),
            validate: false,
            task: None,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.database.url, "sqlite://shop.db");
            assert_eq!(config.licenses.code_prefix, "Wind-Banner");
            assert_eq!(config.licenses.unit, Duration::from_secs(86_400));
            assert_eq!(config.sweeper.interval, Duration::from_secs(300));
            assert_eq!(config.default_tier(), "bronze");
            assert!(config.admins.is_empty());
            assert_eq!(config.log_format, LogFormat::Text);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_sections() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
admins:
  - "111111111111111111"
  - 222222222222222222
licenses:
  code_prefix: Test
  unit: 1h
  short_units: 2
sweeper:
  interval: 30s
  external_timeout: 2s
orders:
  unit_price: 1500
notifications:
  webhook_url: http://gateway:8080/notify
  fulfillment_channel: "999"
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert!(config.is_admin(&UserId::from("111111111111111111")));
            assert!(config.is_admin(&UserId::from("222222222222222222")));
            assert!(!config.is_admin(&UserId::from("333")));
            assert_eq!(config.licenses.code_prefix, "Test");
            assert_eq!(config.licenses.unit, Duration::from_secs(3600));
            assert_eq!(config.licenses.short_units, 2);
            assert_eq!(config.licenses.long_units, 30); // default
            assert_eq!(config.sweeper.interval, Duration::from_secs(30));
            assert_eq!(config.sweeper.external_timeout, Duration::from_secs(2));
            assert_eq!(config.orders.unit_price, 1500);
            assert_eq!(
                config.notifications.webhook_url.as_ref().map(Url::as_str),
                Some("http://gateway:8080/notify")
            );
            assert_eq!(config.notifications.fulfillment_channel.as_deref(), Some("999"));

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
sweeper:
  interval: 10m
"#,
            )?;

            jail.set_env("SHOPCTL_SWEEPER__INTERVAL", "1m");
            jail.set_env("SHOPCTL_LOG_FORMAT", "json");
            jail.set_env("DATABASE_URL", "sqlite://override.db");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.sweeper.interval, Duration::from_secs(60));
            assert_eq!(config.log_format, LogFormat::Json);
            assert_eq!(config.database.url, "sqlite://override.db");

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
sweeper:
  every: 5m
"#,
            )?;

            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.licenses.code_prefix = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sweeper.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sweeper.external_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.licenses.max_generation_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tiers = vec![TierConfig::new("gold", 100), TierConfig::new("silver", 50)];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tiers.clear();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_tier_for_spend() {
        let config = Config::default();

        assert_eq!(config.tier_for(0), "bronze");
        assert_eq!(config.tier_for(49_999), "bronze");
        assert_eq!(config.tier_for(50_000), "silver");
        assert_eq!(config.tier_for(250_000), "gold");
        assert_eq!(config.tier_for(10_000_000), "vip");
    }

    #[test]
    fn test_actor_resolution() {
        let config = Config {
            admins: vec![UserId::from("42")],
            ..Default::default()
        };

        assert!(config.actor("42").is_admin);
        assert!(!config.actor("43").is_admin);
    }

    #[test]
    fn test_license_units() {
        let licenses = LicenseConfig::default();

        assert_eq!(licenses.units_for(&LicenseKind::Short), Some(7));
        assert_eq!(licenses.units_for(&LicenseKind::Long), Some(30));
        assert_eq!(licenses.units_for(&LicenseKind::Permanent), None);
        assert_eq!(licenses.units_for(&LicenseKind::Other("90D".to_string())), Some(1));
    }

    #[test]
    fn test_cli_subcommands() {
        let args = Args::parse_from(["shopctl", "-f", "shop.yaml", "issue-code", "--kind", "long", "--count", "3"]);
        assert_eq!(args.config, "shop.yaml");
        assert_eq!(
            args.task,
            Some(Task::IssueCode {
                kind: LicenseKind::Long,
                count: 3
            })
        );

        let args = Args::parse_from(["shopctl", "stock", "set", "--", "-5"]);
        assert_eq!(
            args.task,
            Some(Task::Stock {
                action: StockAction::Set { value: -5 }
            })
        );

        assert!(Args::try_parse_from(["shopctl", "issue-code", "--kind", "forever"]).is_err());
    }
}
