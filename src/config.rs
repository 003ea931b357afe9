// ABOUTME: Optional TOML configuration with named connection specs
// ABOUTME: Lets `@alias` stand in for a full connection spec on the command line

use crate::error::UsageError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Contents of a configuration file
///
/// ```toml
/// [connections]
/// prod = "postgres:host=db.example.com:user=admin:password=:database=sales"
/// scratch = "sqlite:filename=/tmp/scratch.db"
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration")
    }

    /// Expand `@alias` to its stored spec; other specs pass through unchanged
    pub fn expand<'a>(&'a self, spec: &'a str) -> Result<&'a str, UsageError> {
        match spec.strip_prefix('@') {
            Some(alias) => self
                .connections
                .get(alias)
                .map(String::as_str)
                .ok_or_else(|| UsageError::UnknownAlias(alias.to_string())),
            None => Ok(spec),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
    let config = Config::from_toml(&contents)
        .with_context(|| format!("Invalid configuration file {}", path.display()))?;
    tracing::debug!(
        "Loaded {} connection alias(es) from {}",
        config.connections.len(),
        path.display()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_alias() {
        let config = Config::from_toml(
            r#"
            [connections]
            scratch = "sqlite:filename=/tmp/scratch.db"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.expand("@scratch").unwrap(),
            "sqlite:filename=/tmp/scratch.db"
        );
        assert_eq!(config.expand("sqlite:filename=x").unwrap(), "sqlite:filename=x");
        assert_eq!(
            config.expand("@missing"),
            Err(UsageError::UnknownAlias("missing".to_string()))
        );
    }

    #[test]
    fn test_empty_config_has_no_aliases() {
        let config = Config::from_toml("").unwrap();
        assert!(config.connections.is_empty());
        assert!(Config::default().expand("@any").is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Config::from_toml("[databases]\nx = 1").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connections]\nlocal = \"sqlite:filename=a.db\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.connections["local"], "sqlite:filename=a.db");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("none.toml")).is_err());
    }
}
