//! SQL dialect identifiers.

use sqlx::AnyConnection;
use std::fmt;

/// Normalized identifier of a database vendor's SQL variant.
///
/// Identifiers are lowercase and name the override statement set
/// (`<dialect>.properties`) that is layered over the defaults.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Dialect(String);

impl Dialect {
    pub const SQLITE: &'static str = "sqlite";
    pub const POSTGRES: &'static str = "postgres";
    pub const MYSQL: &'static str = "mysql";

    /// Normalize a vendor or driver name.
    pub fn new(name: &str) -> Self {
        let normalized: String = name
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' | '.' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        let canonical = match normalized.as_str() {
            "postgresql" | "pg" | "pgsql" => Self::POSTGRES,
            "sqlite3" => Self::SQLITE,
            "mariadb" => Self::MYSQL,
            "mssql" | "microsoft_sql_server" => "sqlserver",
            "hsqldb" => "hsql",
            _ => return Self(normalized),
        };
        Self(canonical.to_string())
    }

    /// Dialect of the driver behind a connection.
    pub fn detect(conn: &AnyConnection) -> Self {
        Self::new(conn.backend_name())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dialect({})", self.0)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Dialect {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
