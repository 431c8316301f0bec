//! Layered configuration: defaults, then an optional YAML file, then `APIKIT__*` env vars.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::db::ConnectOpts;
use crate::error::ApiResult;

/// Prefix for environment overrides, e.g. `APIKIT__DATABASE__DSN`.
pub const ENV_PREFIX: &str = "APIKIT__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub database: DbConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// `sqlite:` DSN, e.g. `sqlite://var/apikit.db` or `sqlite::memory:`.
    pub dsn: String,
    pub max_conns: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Option<Duration>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite::memory:".to_owned(),
            // every in-memory connection is a separate database
            max_conns: Some(1),
            acquire_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl DbConfig {
    #[must_use]
    pub fn connect_opts(&self) -> ConnectOpts {
        ConnectOpts {
            max_conns: self.max_conns,
            acquire_timeout: self.acquire_timeout,
            ..ConnectOpts::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Log rendered statements at info instead of debug.
    pub log_statements: bool,
    /// Upper bound applied to `limitSelects`.
    pub max_limit_selects: Option<u64>,
}

impl ApiConfig {
    /// Load the layered configuration.
    ///
    /// # Errors
    /// Returns a configuration error when a layer cannot be parsed or holds unknown keys.
    pub fn load(path: Option<&Path>) -> ApiResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ApiConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Serialize the effective configuration.
    ///
    /// # Errors
    /// Returns an internal error if serialization fails.
    pub fn to_yaml(&self) -> ApiResult<String> {
        serde_yaml::to_string(self).map_err(|e| crate::ApiError::internal(e.to_string()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_in_memory() {
        let cfg = ApiConfig::default();
        assert_eq!(cfg.database.dsn, "sqlite::memory:");
        assert_eq!(cfg.database.max_conns, Some(1));
        assert!(!cfg.query.log_statements);
    }

    #[test]
    fn yaml_layer_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database:\n  dsn: \"sqlite://data/apikit.db\"\n  acquire_timeout: 5s\nquery:\n  max_limit_selects: 50"
        )
        .unwrap();

        let cfg = ApiConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.database.dsn, "sqlite://data/apikit.db");
        assert_eq!(cfg.database.acquire_timeout, Some(Duration::from_secs(5)));
        assert_eq!(cfg.database.max_conns, Some(1));
        assert_eq!(cfg.query.max_limit_selects, Some(50));
    }

    #[test]
    fn env_layer_wins_over_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("apikit.yaml", "query:\n  log_statements: false\n")?;
            jail.set_env("APIKIT__QUERY__LOG_STATEMENTS", "true");

            let cfg: ApiConfig = ApiConfig::figment(Some(Path::new("apikit.yaml"))).extract()?;
            assert!(cfg.query.log_statements);
            Ok(())
        });
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database:\n  host: localhost").unwrap();
        assert!(ApiConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn yaml_round_trip_of_effective_config() {
        let yaml = ApiConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("sqlite::memory:"));
    }
}
