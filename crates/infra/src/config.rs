//! Configuration loading and representation.
//!
//! Everything is read from environment variables. `from_lookup` takes any
//! key lookup so tests never have to mutate the process environment.

use anyhow::{anyhow, bail, Context};

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL (env: DATABASE_URL)
    pub url: String,
    /// Pool size (env: DATABASE_MAX_CONNECTIONS, default 5)
    pub max_connections: u32,
}

/// Behaviour switches of the variant matrix engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MatrixConfig {
    /// Deduplicate variants after an attribute's last option is deleted
    /// (env: CATALOG_DEDUPE_ON_OPTION_COLLAPSE, default true).
    pub dedupe_on_option_collapse: bool,
    /// Re-read and check the product after every write, rolling back on a
    /// violation (env: CATALOG_VERIFY_INVARIANTS, default false).
    pub verify_invariants: bool,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            dedupe_on_option_collapse: true,
            verify_invariants: false,
        }
    }
}

/// Infrastructure configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfraConfig {
    /// `None` when DATABASE_URL is unset (in-memory deployments and tests).
    pub database: Option<DatabaseConfig>,
    pub matrix: MatrixConfig,
}

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

impl InfraConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }

        let database = get("DATABASE_URL").map(|url| DatabaseConfig {
            url,
            max_connections,
        });

        let defaults = MatrixConfig::default();
        let matrix = MatrixConfig {
            dedupe_on_option_collapse: match get("CATALOG_DEDUPE_ON_OPTION_COLLAPSE") {
                Some(raw) => parse_bool("CATALOG_DEDUPE_ON_OPTION_COLLAPSE", &raw)?,
                None => defaults.dedupe_on_option_collapse,
            },
            verify_invariants: match get("CATALOG_VERIFY_INVARIANTS") {
                Some(raw) => parse_bool("CATALOG_VERIFY_INVARIANTS", &raw)?,
                None => defaults.verify_invariants,
            },
        };

        Ok(Self { database, matrix })
    }

    /// The database section, or an error naming the missing variable.
    pub fn require_database(&self) -> anyhow::Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .ok_or_else(|| anyhow!("DATABASE_URL must be set"))
    }
}

fn parse_bool(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => bail!("{key} must be a boolean, got '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<InfraConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InfraConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config, InfraConfig::default());
        assert!(config.matrix.dedupe_on_option_collapse);
        assert!(!config.matrix.verify_invariants);
        assert!(config.require_database().is_err());
    }

    #[test]
    fn reads_database_and_switches() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/bazaar"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("CATALOG_DEDUPE_ON_OPTION_COLLAPSE", "no"),
            ("CATALOG_VERIFY_INVARIANTS", "TRUE"),
        ])
        .unwrap();

        let db = config.require_database().unwrap();
        assert_eq!(db.url, "postgres://localhost/bazaar");
        assert_eq!(db.max_connections, 12);
        assert!(!config.matrix.dedupe_on_option_collapse);
        assert!(config.matrix.verify_invariants);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(load(&[("CATALOG_VERIFY_INVARIANTS", "maybe")]).is_err());
        assert!(load(&[("DATABASE_MAX_CONNECTIONS", "lots")]).is_err());
        assert!(load(&[("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("DATABASE_URL", "  "), ("CATALOG_VERIFY_INVARIANTS", "")]).unwrap();
        assert!(config.database.is_none());
        assert!(!config.matrix.verify_invariants);
    }
}
