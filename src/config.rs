use std::{str::FromStr, time::Duration};

use tracing::warn;

const DEV_FALLBACK_SECRET: &str = "dev-insecure-secret-change-me";
const DEFAULT_ACCESS_TTL_SECONDS: u64 = 3600;
/// One year.
pub const MAX_ACCESS_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<String>) -> anyhow::Result<Self> {
        match raw.as_deref().map(str::trim) {
            None | Some("") | Some("development") | Some("dev") => Ok(Self::Development),
            Some("production") | Some("prod") => Ok(Self::Production),
            Some(other) => anyhow::bail!("unknown APP_ENV {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub access_ttl_seconds: u64,
    /// Set when `secret` is the built-in development fallback.
    pub insecure_secret: bool,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Takes precedence over the discrete fields when present.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "localhost".into(),
            port: 5432,
            database: "neighborly".into(),
            user: "postgres".into(),
            password: String::new(),
            ssl_mode: "disable".into(),
            min_connections: 0,
            max_connections: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: AppEnv,
    pub host: String,
    pub port: u16,
    pub db: DbConfig,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let env = AppEnv::parse(get("APP_ENV"))?;

        let defaults = DbConfig::default();
        let db = DbConfig {
            database_url: get("DATABASE_URL"),
            host: get("PGHOST").unwrap_or(defaults.host),
            port: parse_or(get("PGPORT"), "PGPORT", defaults.port),
            database: get("PGDATABASE").unwrap_or(defaults.database),
            user: get("PGUSER").unwrap_or(defaults.user),
            password: get("PGPASSWORD").unwrap_or(defaults.password),
            ssl_mode: get("PGSSLMODE").unwrap_or(defaults.ssl_mode),
            min_connections: parse_or(
                get("PGPOOL_MIN_CONNS"),
                "PGPOOL_MIN_CONNS",
                defaults.min_connections,
            ),
            max_connections: parse_or(
                get("PGPOOL_MAX_CONNS"),
                "PGPOOL_MAX_CONNS",
                defaults.max_connections,
            ),
            connect_timeout: Duration::from_secs(parse_or(
                get("PGCONNECT_TIMEOUT"),
                "PGCONNECT_TIMEOUT",
                defaults.connect_timeout.as_secs(),
            )),
        };

        let (secret, insecure_secret) = match get("JWT_SECRET") {
            Some(secret) => (secret, false),
            None if env == AppEnv::Development => (DEV_FALLBACK_SECRET.to_string(), true),
            None => anyhow::bail!("JWT_SECRET must be set when APP_ENV is not development"),
        };
        let jwt = JwtConfig {
            secret,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "neighborly".into()),
            access_ttl_seconds: access_ttl(get("JWT_ACCESS_TTL_SECONDS")),
            insecure_secret,
        };

        Ok(Self {
            env,
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("APP_PORT"), "APP_PORT", 8080),
            db,
            jwt,
        })
    }
}

fn parse_or<T: FromStr + Copy>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %v, "unparseable config value; using default");
            default
        }),
    }
}

fn access_ttl(raw: Option<String>) -> u64 {
    let ttl = parse_or(raw, "JWT_ACCESS_TTL_SECONDS", DEFAULT_ACCESS_TTL_SECONDS);
    if ttl > MAX_ACCESS_TTL_SECONDS {
        warn!(
            value = ttl,
            max = MAX_ACCESS_TTL_SECONDS,
            "JWT_ACCESS_TTL_SECONDS too large; using default"
        );
        return DEFAULT_ACCESS_TTL_SECONDS;
    }
    ttl
}
