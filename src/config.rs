// src/config.rs - Configuration management
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub postgres: PostgresConfig,
    pub mysql: MySqlConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Which relational engine serves as the primary (user/application) store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    #[strum(serialize = "mysql")]
    #[serde(rename = "mysql")]
    MySql,
}

/// Which backends are opened at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    Primary,
    Secondary,
    Both,
}

impl ConnectMode {
    pub fn opens_primary(&self) -> bool {
        matches!(self, ConnectMode::Primary | ConnectMode::Both)
    }

    pub fn opens_secondary(&self) -> bool {
        matches!(self, ConnectMode::Secondary | ConnectMode::Both)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub db_type: BackendKind,
    pub connect: ConnectMode,
    /// Strict mode: a primary that cannot be reached aborts startup.
    pub require_primary: bool,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub max_lifetime: u64,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: BackendKind::Postgres,
            connect: ConnectMode::Both,
            require_primary: false,
            max_connections: 10,
            min_connections: 0,
            connect_timeout: 10,
            max_lifetime: 180,
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "siak_rsbw".to_string(),
            sslmode: "disable".to_string(),
        }
    }
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "backup".to_string(),
            password: String::new(),
            dbname: "sik".to_string(),
        }
    }
}

// Placeholder secret is too short for `validate`, so JWT_SECRET must be set.
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests!!".to_string(),
            token_expiration_hours: 24,
            bcrypt_cost: 12,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// Credentials stay out of Debug output.
impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("dbname", &self.dbname)
            .field("sslmode", &self.sslmode)
            .finish()
    }
}

impl fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("dbname", &self.dbname)
            .finish()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_expiration_hours", &self.token_expiration_hours)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

impl PostgresConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.dbname, self.sslmode
        )
    }
}

impl MySqlConfig {
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}?charset=utf8mb4",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        let path = Path::new(&config_file);
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config)?;

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn override_with_env(config: &mut Config) -> Result<()> {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = env_parse::<u16>("PORT") {
        config.server.port = port;
    }
    if let Some(workers) = env_parse::<usize>("SERVER_WORKERS") {
        config.server.workers = Some(workers);
    }

    if let Ok(db_type) = env::var("DB_TYPE") {
        config.database.db_type = BackendKind::from_str(db_type.trim())
            .map_err(|_| anyhow::anyhow!("Unsupported DB_TYPE '{}', expected postgres or mysql", db_type))?;
    }
    if let Ok(mode) = env::var("DB_CONNECT") {
        config.database.connect = ConnectMode::from_str(mode.trim())
            .map_err(|_| anyhow::anyhow!("Unsupported DB_CONNECT '{}', expected primary, secondary or both", mode))?;
    }
    if let Some(strict) = env_parse::<bool>("DB_REQUIRE_PRIMARY") {
        config.database.require_primary = strict;
    }
    if let Some(max_conn) = env_parse::<u32>("DB_MAX_CONNECTIONS") {
        config.database.max_connections = max_conn;
    }

    if let Ok(v) = env::var("DB_HOST") {
        config.postgres.host = v;
    }
    if let Some(v) = env_parse::<u16>("DB_PORT") {
        config.postgres.port = v;
    }
    if let Ok(v) = env::var("DB_USER") {
        config.postgres.user = v;
    }
    if let Ok(v) = env::var("DB_PASSWORD") {
        config.postgres.password = v;
    }
    if let Ok(v) = env::var("DB_NAME") {
        config.postgres.dbname = v;
    }
    if let Ok(v) = env::var("DB_SSLMODE") {
        config.postgres.sslmode = v;
    }

    if let Ok(v) = env::var("MYSQL_HOST") {
        config.mysql.host = v;
    }
    if let Some(v) = env_parse::<u16>("MYSQL_PORT") {
        config.mysql.port = v;
    }
    if let Ok(v) = env::var("MYSQL_USER") {
        config.mysql.user = v;
    }
    if let Ok(v) = env::var("MYSQL_PASSWORD") {
        config.mysql.password = v;
    }
    if let Ok(v) = env::var("MYSQL_DBNAME") {
        config.mysql.dbname = v;
    }

    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(hours) = env_parse::<i64>("AUTH_TOKEN_EXPIRATION_HOURS") {
        config.auth.token_expiration_hours = hours;
    }
    if let Some(cost) = env_parse::<u32>("AUTH_BCRYPT_COST") {
        config.auth.bcrypt_cost = cost;
    }

    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }
    if let Ok(format) = env::var("LOG_FORMAT") {
        config.logging.format = format;
    }

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.auth.token_expiration_hours <= 0 {
            return Err(anyhow::anyhow!("token_expiration_hours must be positive"));
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(anyhow::anyhow!(
                "bcrypt_cost must be between 4 and 31 (current: {})",
                self.auth.bcrypt_cost
            ));
        }

        if self.database.max_connections == 0
            || self.database.max_connections < self.database.min_connections
        {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be positive and >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if self.is_production() && self.security.allowed_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!("Wildcard CORS origins not allowed in production!"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("APP_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("SIAK backend starting up...");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!(
            "Database: primary={}, connect={}, strict_primary={}",
            self.database.db_type, self.database.connect, self.database.require_primary
        );
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("Logging: {} level, {} format", self.logging.level, self.logging.format);

        if !self.is_production() {
            log::warn!("Running in development mode");
        }
        if !self.security.require_https && self.is_production() {
            log::warn!("HTTPS not required in production mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    } else {
        log::info!("No .env file found, using process environment");
    }
    Ok(())
}
