//! Store configuration.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Base name of the content table; an optional prefix is prepended.
pub const BASE_TABLE_NAME: &str = "CONTENT_STORE";

/// Column capacity used for extracted text when the database cannot report it.
pub const DEFAULT_TEXT_CAPACITY: usize = 1000;

/// Prefix for environment variable overrides (e.g. `BINSTORE_TABLE_PREFIX`).
pub const ENV_PREFIX: &str = "BINSTORE_";

/// How a failed table-existence probe is interpreted.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStrictness {
    /// Any probe error means the table is absent.
    #[default]
    AnyError,
    /// Only "no such table" errors mean absent; other errors propagate.
    MissingTableOnly,
}

/// Content store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Prefix prepended to the table name. Blank means no prefix.
    #[serde(default)]
    pub table_prefix: Option<String>,
    /// Dialect identifier. Detected from the connection when unset.
    #[serde(default)]
    pub dialect: Option<String>,
    /// Directory holding `default.properties` and per-dialect overrides.
    /// The built-in statement sets are used when unset.
    #[serde(default)]
    pub statements_dir: Option<PathBuf>,
    /// Interpretation of a failed table-existence probe.
    #[serde(default)]
    pub probe_strictness: ProbeStrictness,
    /// Extracted-text capacity used when the column size is undiscoverable.
    #[serde(default = "default_text_capacity")]
    pub default_text_capacity: usize,
}

fn default_text_capacity() -> usize {
    DEFAULT_TEXT_CAPACITY
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_prefix: None,
            dialect: None,
            statements_dir: None,
            probe_strictness: ProbeStrictness::default(),
            default_text_capacity: default_text_capacity(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from an optional TOML file, overridden by
    /// `BINSTORE_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Full table name: trimmed prefix followed by [`BASE_TABLE_NAME`].
    pub fn table_name(&self) -> String {
        match self.table_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}{BASE_TABLE_NAME}"),
            _ => BASE_TABLE_NAME.to_string(),
        }
    }

    /// Reject settings that would produce broken statements.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(prefix) = self.table_prefix.as_deref().map(str::trim)
            && !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(crate::Error::Config(format!(
                "table_prefix {prefix:?} may only contain ASCII letters, digits and '_'"
            )));
        }
        if self.default_text_capacity == 0 {
            return Err(crate::Error::Config(
                "default_text_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(dialect) = &self.dialect
            && dialect.trim().is_empty()
        {
            return Err(crate::Error::Config("dialect must not be blank".to_string()));
        }
        Ok(())
    }
}
