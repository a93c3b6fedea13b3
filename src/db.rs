// src/db.rs - Backend pools, connection resolution and migrations

use anyhow::{Context, Result};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use std::borrow::Cow;
use std::time::Duration;

use crate::coerce::{value_as_text, RawRow};
use crate::config::{BackendKind, Config, DatabaseConfig};
use crate::error::{ApiError, ApiResult};

/// A live pool for one of the two supported engines.
#[derive(Clone, Debug)]
pub enum Database {
    Postgres(PgPool),
    MySql(MySqlPool),
}

/// Runs the same body against whichever pool the handle holds. Both arms must
/// produce the same type.
#[macro_export]
macro_rules! dispatch {
    ($db:expr, $pool:ident => $body:expr) => {
        match $db {
            $crate::db::Database::Postgres($pool) => $body,
            $crate::db::Database::MySql($pool) => $body,
        }
    };
}

/// Rewrites `?` placeholders into Postgres `$n` form. Question marks inside
/// quoted literals are kept.
pub fn to_numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match (quote, ch) {
            (None, '\'') | (None, '"') => {
                quote = Some(ch);
                out.push(ch);
            }
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (None, '?') => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            (_, c) => out.push(c),
        }
    }
    out
}

impl Database {
    pub fn kind(&self) -> BackendKind {
        match self {
            Database::Postgres(_) => BackendKind::Postgres,
            Database::MySql(_) => BackendKind::MySql,
        }
    }

    /// SQL in this crate is written with `?` placeholders.
    pub fn sql<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        match self {
            Database::Postgres(_) => Cow::Owned(to_numbered_placeholders(sql)),
            Database::MySql(_) => Cow::Borrowed(sql),
        }
    }

    pub async fn ping(&self) -> bool {
        let result = dispatch!(self, pool => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Ping to {} backend failed: {}", self.kind(), e);
                false
            }
        }
    }

    pub async fn database_name(&self) -> Result<String, sqlx::Error> {
        match self {
            Database::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SELECT current_database()")
                    .fetch_one(pool)
                    .await
            }
            Database::MySql(pool) => {
                let row = pool.fetch_one("SELECT DATABASE() AS db").await?;
                Ok(RawRow::from_mysql(&row).text("db"))
            }
        }
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<RawRow> = match self {
            Database::Postgres(pool) => pool
                .fetch_all(
                    "SELECT tablename FROM pg_catalog.pg_tables \
                     WHERE schemaname = 'public' ORDER BY tablename",
                )
                .await?
                .iter()
                .map(RawRow::from_postgres)
                .collect(),
            Database::MySql(pool) => pool
                .fetch_all("SHOW TABLES")
                .await?
                .iter()
                .map(RawRow::from_mysql)
                .collect(),
        };

        Ok(rows
            .iter()
            .filter_map(|row| value_as_text(row.get_index(0)))
            .collect())
    }
}

/// The process-wide database handles, resolved once at startup and read-only
/// afterwards. An absent handle means the backend is unavailable for the
/// lifetime of the process.
#[derive(Clone, Debug)]
pub struct Connections {
    main_kind: BackendKind,
    primary: Option<Database>,
    secondary: Option<Database>,
}

impl Connections {
    pub fn new(main_kind: BackendKind, primary: Option<Database>, secondary: Option<Database>) -> Self {
        Self { main_kind, primary, secondary }
    }

    /// Opens the backends selected by `database.connect`.
    ///
    /// The secondary role is always the MySQL hospital store. When MySQL is
    /// also the primary engine the same pool serves both roles. A secondary
    /// that cannot be reached is logged and left absent; a primary failure is
    /// fatal only when `require_primary` is set.
    pub async fn resolve(config: &Config) -> Result<Self> {
        let db = &config.database;
        let main_kind = db.db_type;
        let wants_primary = db.connect.opens_primary();
        let wants_secondary = db.connect.opens_secondary();
        let primary_is_mysql = main_kind == BackendKind::MySql;

        let mysql = if wants_secondary || (wants_primary && primary_is_mysql) {
            match open_mysql(config).await {
                Ok(pool) => {
                    log::info!(
                        "Connected to MySQL {}:{}/{}",
                        config.mysql.host, config.mysql.port, config.mysql.dbname
                    );
                    Some(Database::MySql(pool))
                }
                Err(e) => {
                    log::warn!("MySQL connection unavailable: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let primary = if !wants_primary {
            None
        } else if primary_is_mysql {
            mysql.clone()
        } else {
            match open_postgres(config).await {
                Ok(pool) => {
                    log::info!(
                        "Connected to PostgreSQL {}:{}/{}",
                        config.postgres.host, config.postgres.port, config.postgres.dbname
                    );
                    Some(Database::Postgres(pool))
                }
                Err(e) => {
                    log::warn!("PostgreSQL connection unavailable: {:#}", e);
                    None
                }
            }
        };

        if wants_primary && primary.is_none() && db.require_primary {
            anyhow::bail!("Primary {} database is required but could not be reached", main_kind);
        }

        let secondary = if wants_secondary { mysql } else { None };

        Ok(Self::new(main_kind, primary, secondary))
    }

    pub fn main_kind(&self) -> BackendKind {
        self.main_kind
    }

    pub fn primary_handle(&self) -> Option<&Database> {
        self.primary.as_ref()
    }

    pub fn secondary_handle(&self) -> Option<&Database> {
        self.secondary.as_ref()
    }

    pub fn primary(&self) -> ApiResult<&Database> {
        self.primary.as_ref().ok_or_else(|| {
            ApiError::BackendUnavailable(format!(
                "Primary {} database is not connected",
                self.main_kind
            ))
        })
    }

    pub fn secondary(&self) -> ApiResult<&Database> {
        self.secondary.as_ref().ok_or_else(|| {
            ApiError::BackendUnavailable("SIK MySQL database is not connected".to_string())
        })
    }
}

fn pool_timeouts(db: &DatabaseConfig) -> (Duration, Duration) {
    (
        Duration::from_secs(db.connect_timeout),
        Duration::from_secs(db.max_lifetime),
    )
}

async fn open_postgres(config: &Config) -> Result<PgPool> {
    let db = &config.database;
    let (acquire, lifetime) = pool_timeouts(db);
    PgPoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .acquire_timeout(acquire)
        .max_lifetime(lifetime)
        .connect(&config.postgres.url())
        .await
        .with_context(|| {
            format!("Failed to connect to PostgreSQL at {}:{}", config.postgres.host, config.postgres.port)
        })
}

async fn open_mysql(config: &Config) -> Result<MySqlPool> {
    let db = &config.database;
    let (acquire, lifetime) = pool_timeouts(db);
    MySqlPoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .acquire_timeout(acquire)
        .max_lifetime(lifetime)
        .connect(&config.mysql.url())
        .await
        .with_context(|| {
            format!("Failed to connect to MySQL at {}:{}", config.mysql.host, config.mysql.port)
        })
}

const CREATE_USERS_POSTGRES: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(100) NOT NULL UNIQUE,
        password VARCHAR(255) NOT NULL,
        role VARCHAR(20) NOT NULL DEFAULT 'user',
        name VARCHAR(255) NOT NULL,
        dark_mode BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )
"#;

const CREATE_USERS_MYSQL: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        username VARCHAR(100) NOT NULL UNIQUE,
        password VARCHAR(255) NOT NULL,
        role VARCHAR(20) NOT NULL DEFAULT 'user',
        name VARCHAR(255) NOT NULL,
        dark_mode BOOLEAN NOT NULL DEFAULT FALSE,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
"#;

/// Creates the application tables on the primary backend.
pub async fn run_migrations(db: &Database) -> Result<()> {
    let ddl = match db {
        Database::Postgres(_) => CREATE_USERS_POSTGRES,
        Database::MySql(_) => CREATE_USERS_MYSQL,
    };

    dispatch!(db, pool => sqlx::query(ddl).execute(pool).await.map(|_| ()))
        .context("Failed to create users table")?;

    log::info!("Migrations applied on {} backend", db.kind());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_rewrite() {
        assert_eq!(
            to_numbered_placeholders("SELECT * FROM t WHERE a BETWEEN ? AND ? OR b = ?"),
            "SELECT * FROM t WHERE a BETWEEN $1 AND $2 OR b = $3"
        );
    }

    #[test]
    fn test_placeholder_rewrite_skips_literals() {
        assert_eq!(
            to_numbered_placeholders("SELECT '?' AS q, \"a?b\" FROM t WHERE x = ?"),
            "SELECT '?' AS q, \"a?b\" FROM t WHERE x = $1"
        );
        assert_eq!(to_numbered_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_unavailable_handles() {
        let conns = Connections::new(BackendKind::Postgres, None, None);
        assert!(conns.primary_handle().is_none());
        assert!(matches!(conns.primary(), Err(ApiError::BackendUnavailable(_))));
        assert!(matches!(conns.secondary(), Err(ApiError::BackendUnavailable(_))));
        assert_eq!(conns.main_kind(), BackendKind::Postgres);
    }

    #[tokio::test]
    async fn test_resolve_secondary_only_tolerates_unreachable_mysql() {
        let mut config = Config::default();
        config.database.connect = crate::config::ConnectMode::Secondary;
        config.database.connect_timeout = 1;
        config.mysql.host = "127.0.0.1".to_string();
        config.mysql.port = 1;

        let conns = Connections::resolve(&config).await.unwrap();
        assert!(conns.primary_handle().is_none());
        assert!(conns.secondary_handle().is_none());
    }

    #[tokio::test]
    async fn test_resolve_strict_primary_fails_when_unreachable() {
        let mut config = Config::default();
        config.database.connect = crate::config::ConnectMode::Primary;
        config.database.require_primary = true;
        config.database.connect_timeout = 1;
        config.postgres.host = "127.0.0.1".to_string();
        config.postgres.port = 1;

        assert!(Connections::resolve(&config).await.is_err());
    }
}
