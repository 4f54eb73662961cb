//! Dialect-scoped SQL statement catalogs.
//!
//! Statements come from `key = value` properties text. A mandatory default
//! set is always loaded; a dialect-specific set, when one exists, overrides
//! the keys it defines and inherits the rest. Every statement names the
//! content table through the [`TABLE_PLACEHOLDER`] substitution point.

use crate::dialect::Dialect;
use crate::error::{DatabaseError, DatabaseResult};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

/// Placeholder replaced by the configured table name.
pub const TABLE_PLACEHOLDER: &str = "{table}";

/// File name of the mandatory default statement set in a statements directory.
pub const DEFAULT_STATEMENTS_FILE: &str = "default.properties";

const STATEMENTS_EXTENSION: &str = "properties";

const BUILTIN_DEFAULT: &str = include_str!("../statements/default.properties");
const BUILTIN_DIALECTS: &[(&str, &str)] = &[
    (Dialect::SQLITE, include_str!("../statements/sqlite.properties")),
    (Dialect::POSTGRES, include_str!("../statements/postgres.properties")),
    (Dialect::MYSQL, include_str!("../statements/mysql.properties")),
];

/// Operations that have a statement in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementKey {
    AddContent,
    GetUsedContent,
    GetUnusedContent,
    MarkUnused,
    MarkUsed,
    RemoveExpired,
    GetMimeType,
    SetMimeType,
    GetExtractedText,
    SetExtractedText,
    GetBinaryKeys,
    CreateTable,
    TableExistsQuery,
    GetRecordState,
    ExtractedTextCapacity,
}

impl StatementKey {
    pub const ALL: [StatementKey; 15] = [
        Self::AddContent,
        Self::GetUsedContent,
        Self::GetUnusedContent,
        Self::MarkUnused,
        Self::MarkUsed,
        Self::RemoveExpired,
        Self::GetMimeType,
        Self::SetMimeType,
        Self::GetExtractedText,
        Self::SetExtractedText,
        Self::GetBinaryKeys,
        Self::CreateTable,
        Self::TableExistsQuery,
        Self::GetRecordState,
        Self::ExtractedTextCapacity,
    ];

    /// Name of the key in statement files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddContent => "add_content",
            Self::GetUsedContent => "get_used_content",
            Self::GetUnusedContent => "get_unused_content",
            Self::MarkUnused => "mark_unused",
            Self::MarkUsed => "mark_used",
            Self::RemoveExpired => "remove_expired",
            Self::GetMimeType => "get_mimetype",
            Self::SetMimeType => "set_mimetype",
            Self::GetExtractedText => "get_extracted_text",
            Self::SetExtractedText => "set_extracted_text",
            Self::GetBinaryKeys => "get_binary_keys",
            Self::CreateTable => "create_table",
            Self::TableExistsQuery => "table_exists_query",
            Self::GetRecordState => "get_record_state",
            Self::ExtractedTextCapacity => "extracted_text_capacity",
        }
    }
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw statement texts: the mandatory default set and optional per-dialect
/// override sets, keyed by normalized dialect identifier.
#[derive(Clone, Debug)]
pub struct StatementSources {
    default: String,
    dialects: HashMap<String, String>,
}

impl StatementSources {
    /// Sources with only a default set.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            dialects: HashMap::new(),
        }
    }

    /// Add (or replace) the override set for a dialect.
    pub fn with_dialect(mut self, dialect: &str, text: impl Into<String>) -> Self {
        self.dialects
            .insert(Dialect::new(dialect).as_str().to_string(), text.into());
        self
    }

    /// The statement sets compiled into this crate.
    pub fn builtin() -> Self {
        BUILTIN_DIALECTS
            .iter()
            .fold(Self::new(BUILTIN_DEFAULT), |sources, (dialect, text)| {
                sources.with_dialect(dialect, *text)
            })
    }

    /// Read `default.properties` and every `<dialect>.properties` file in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> DatabaseResult<Self> {
        let dir = dir.as_ref();
        let default_path = dir.join(DEFAULT_STATEMENTS_FILE);
        let default = std::fs::read_to_string(&default_path).map_err(|e| {
            DatabaseError::Configuration(format!(
                "cannot read default statements {}: {e}",
                default_path.display()
            ))
        })?;

        let entries = std::fs::read_dir(dir).map_err(|e| {
            DatabaseError::Configuration(format!(
                "cannot list statements directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut sources = Self::new(default);
        for entry in entries {
            let path = entry
                .map_err(|e| {
                    DatabaseError::Configuration(format!(
                        "cannot list statements directory {}: {e}",
                        dir.display()
                    ))
                })?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(STATEMENTS_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if path.file_name().and_then(|name| name.to_str()) == Some(DEFAULT_STATEMENTS_FILE) {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| {
                DatabaseError::Configuration(format!(
                    "cannot read dialect statements {}: {e}",
                    path.display()
                ))
            })?;
            tracing::trace!(path = %path.display(), "found dialect statements");
            sources = sources.with_dialect(stem, text);
        }
        Ok(sources)
    }

    pub fn default_text(&self) -> &str {
        &self.default
    }

    pub fn dialect_text(&self, dialect: &Dialect) -> Option<&str> {
        self.dialects.get(dialect.as_str()).map(String::as_str)
    }
}

/// Merged statement set for one dialect and table.
#[derive(Clone, Debug)]
pub struct StatementCatalog {
    dialect: Dialect,
    table_name: String,
    templates: BTreeMap<String, String>,
    overridden: bool,
}

impl StatementCatalog {
    /// Load the default set, then layer the dialect's overrides on top.
    pub fn load(
        sources: &StatementSources,
        dialect: &Dialect,
        table_name: impl Into<String>,
    ) -> DatabaseResult<Self> {
        tracing::trace!("loading default statements");
        let mut templates = parse_properties(sources.default_text())
            .map_err(|e| DatabaseError::Configuration(format!("default statements: {e}")))?;

        let overridden = match sources.dialect_text(dialect) {
            Some(text) => {
                tracing::trace!(dialect = %dialect, "loading dialect-specific statements");
                let overrides = parse_properties(text).map_err(|e| {
                    DatabaseError::Configuration(format!("{dialect} statements: {e}"))
                })?;
                templates.extend(overrides);
                true
            }
            None => {
                tracing::trace!(dialect = %dialect, "no dialect-specific statements; using defaults");
                false
            }
        };

        Ok(Self {
            dialect: dialect.clone(),
            table_name: table_name.into(),
            templates,
            overridden,
        })
    }

    /// Statement for `key` with the table name substituted.
    pub fn statement(&self, key: StatementKey) -> DatabaseResult<String> {
        self.statement_by_name(key.as_str())
    }

    /// Statement for an arbitrary key name with the table name substituted.
    pub fn statement_by_name(&self, name: &str) -> DatabaseResult<String> {
        let template = self.template(name).ok_or_else(|| {
            DatabaseError::Configuration(format!(
                "no statement '{name}' for dialect {}",
                self.dialect
            ))
        })?;
        Ok(template.replace(TABLE_PLACEHOLDER, &self.table_name))
    }

    /// Unsubstituted template text.
    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Keys known to the catalog that have no statement.
    pub fn missing_keys(&self) -> Vec<StatementKey> {
        StatementKey::ALL
            .into_iter()
            .filter(|key| !self.templates.contains_key(key.as_str()))
            .collect()
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Whether a dialect-specific set was layered over the defaults.
    pub fn has_dialect_overrides(&self) -> bool {
        self.overridden
    }
}

/// Parse `key = value` lines.
///
/// Supports `=` or `:` separators, `#`/`!` comment lines, and a trailing
/// backslash to continue a value on the next line (leading whitespace of the
/// continuation is dropped).
pub fn parse_properties(text: &str) -> Result<BTreeMap<String, String>, String> {
    let mut entries = BTreeMap::new();
    let mut lines = text.lines().enumerate();

    while let Some((index, line)) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let mut logical = String::from(trimmed);
        while logical.ends_with('\\') {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let Some(split) = logical.find(|c: char| c == '=' || c == ':') else {
            return Err(format!("line {}: expected 'key = value'", index + 1));
        };
        let key = logical[..split].trim();
        if key.is_empty() {
            return Err(format!("line {}: missing key", index + 1));
        }
        let value = logical[split + 1..].trim();
        entries.insert(key.to_string(), value.to_string());
    }

    Ok(entries)
}
