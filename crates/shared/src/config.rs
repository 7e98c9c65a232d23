//! Application configuration management.

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Ledger engine tuning.
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Compaction daemon configuration.
    #[serde(default)]
    pub compactor: CompactorConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// What the compactor does when a day counter disagrees with the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Log the drift and keep compacting; the entries are authoritative.
    #[default]
    Warn,
    /// Stop the run before persisting the drifting day.
    Halt,
}

/// Ledger engine tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    /// How many days back the balance query scans for a checkpoint before
    /// falling back to an unbounded lookup.
    #[serde(default = "default_query_window_days")]
    pub query_window_days: u32,
    /// How long after midnight UTC a day is considered settled for compaction.
    #[serde(default = "default_settle_grace_secs")]
    pub settle_grace_secs: u64,
    /// Upper bound on days folded by a single compaction call.
    #[serde(default = "default_max_days_per_run")]
    pub max_days_per_run: u32,
    /// Compare-and-swap attempts before a hold update reports contention.
    #[serde(default = "default_cas_max_retries")]
    pub cas_max_retries: u32,
    /// Optional expiry attached to day counters when they are created.
    #[serde(default)]
    pub counter_ttl_secs: Option<u64>,
    /// Drift handling during compaction.
    #[serde(default)]
    pub drift_policy: DriftPolicy,
}

fn default_query_window_days() -> u32 {
    30
}

fn default_settle_grace_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_days_per_run() -> u32 {
    366
}

fn default_cas_max_retries() -> u32 {
    16
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            query_window_days: default_query_window_days(),
            settle_grace_secs: default_settle_grace_secs(),
            max_days_per_run: default_max_days_per_run(),
            cas_max_retries: default_cas_max_retries(),
            counter_ttl_secs: None,
            drift_policy: DriftPolicy::default(),
        }
    }
}

impl LedgerSettings {
    /// Sets the drift policy.
    #[must_use]
    pub fn with_drift_policy(mut self, policy: DriftPolicy) -> Self {
        self.drift_policy = policy;
        self
    }

    /// Sets the settle grace period.
    #[must_use]
    pub fn with_settle_grace_secs(mut self, secs: u64) -> Self {
        self.settle_grace_secs = secs;
        self
    }

    /// Sets the per-run day limit.
    #[must_use]
    pub fn with_max_days_per_run(mut self, days: u32) -> Self {
        self.max_days_per_run = days;
        self
    }

    /// Sets the checkpoint lookup window.
    #[must_use]
    pub fn with_query_window_days(mut self, days: u32) -> Self {
        self.query_window_days = days;
        self
    }
}

/// Compaction daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CompactorConfig {
    /// Seconds between compaction sweeps.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Principals swept on every tick.
    #[serde(default)]
    pub principals: Vec<String>,
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            principals: Vec::new(),
        }
    }
}

const ENV_PREFIX: &str = "TALLY";

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// Sources, lowest priority first: `config/default`, `config/{RUN_MODE}`,
    /// then `TALLY__SECTION__KEY` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("compactor.principals"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Parses configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid.
    pub fn from_toml(document: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/tally"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.ledger.query_window_days, 30);
        assert_eq!(config.ledger.settle_grace_secs, 300);
        assert_eq!(config.ledger.max_days_per_run, 366);
        assert_eq!(config.ledger.cas_max_retries, 16);
        assert_eq!(config.ledger.counter_ttl_secs, None);
        assert_eq!(config.ledger.drift_policy, DriftPolicy::Warn);
        assert_eq!(config.compactor.interval_secs, 300);
        assert!(config.compactor.principals.is_empty());
    }

    #[test]
    fn test_ledger_section_parsed() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            url = "postgres://localhost/tally"

            [ledger]
            query_window_days = 7
            drift_policy = "halt"
            counter_ttl_secs = 172800

            [compactor]
            interval_secs = 60
            principals = ["acct-1", "acct-2"]
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.query_window_days, 7);
        assert_eq!(config.ledger.drift_policy, DriftPolicy::Halt);
        assert_eq!(config.ledger.counter_ttl_secs, Some(172_800));
        assert_eq!(config.compactor.interval_secs, 60);
        assert_eq!(config.compactor.principals, vec!["acct-1", "acct-2"]);
    }

    #[test]
    fn test_missing_database_is_an_error() {
        assert!(AppConfig::from_toml("[ledger]\nquery_window_days = 3\n").is_err());
    }

    #[test]
    fn test_environment_overrides() {
        temp_env::with_vars(
            [
                ("TALLY__DATABASE__URL", Some("postgres://env/tally")),
                ("TALLY__LEDGER__DRIFT_POLICY", Some("halt")),
                ("TALLY__LEDGER__QUERY_WINDOW_DAYS", Some("14")),
                ("TALLY__COMPACTOR__PRINCIPALS", Some("a,b,c")),
            ],
            || {
                let config = AppConfig::load().unwrap();
                assert_eq!(config.database.url, "postgres://env/tally");
                assert_eq!(config.ledger.drift_policy, DriftPolicy::Halt);
                assert_eq!(config.ledger.query_window_days, 14);
                assert_eq!(config.compactor.principals, vec!["a", "b", "c"]);
            },
        );
    }

    #[test]
    fn test_settings_builders() {
        let settings = LedgerSettings::default()
            .with_drift_policy(DriftPolicy::Halt)
            .with_settle_grace_secs(0)
            .with_max_days_per_run(3)
            .with_query_window_days(10);
        assert_eq!(settings.drift_policy, DriftPolicy::Halt);
        assert_eq!(settings.settle_grace_secs, 0);
        assert_eq!(settings.max_days_per_run, 3);
        assert_eq!(settings.query_window_days, 10);
    }
}
