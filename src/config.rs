use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,

    /// Upper bound on message content, in characters.
    pub max_message_len: usize,
    /// How long a `typing_start` stays live without a refresh.
    pub typing_ttl: Duration,
    pub typing_sweep: Duration,
    /// Bound on every store and identity call.
    pub store_timeout: Duration,

    /// Allowed browser origin. Permissive CORS when unset.
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            database_url: "sqlite://chat.db?mode=rwc".to_owned(),
            db_max_connections: 16,
            jwt_secret: String::new(),
            max_message_len: 1000,
            typing_ttl: Duration::from_millis(5000),
            typing_sweep: Duration::from_millis(1000),
            store_timeout: Duration::from_millis(5000),
            cors_origin: None,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Config> {
        let defaults = Config::default();

        let jwt_secret = dotenv::var("JWT_SECRET")
            .map_err(|_| anyhow!("JWT_SECRET must be set"))?;
        if jwt_secret.is_empty() {
            return Err(anyhow!("JWT_SECRET must not be empty"));
        }

        Ok(Config {
            bind_addr: parsed("BIND_ADDR", defaults.bind_addr)?,
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            jwt_secret,
            max_message_len: parsed("MAX_MESSAGE_LEN", defaults.max_message_len)?,
            typing_ttl: millis("TYPING_TTL_MS", defaults.typing_ttl)?,
            typing_sweep: millis("TYPING_SWEEP_MS", defaults.typing_sweep)?,
            store_timeout: millis("STORE_TIMEOUT_MS", defaults.store_timeout)?,
            cors_origin: dotenv::var("CORS_ORIGIN").ok().filter(|origin| !origin.is_empty()),
        })
    }
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key}={raw:?} is not valid")),
        Err(_) => Ok(default),
    }
}

fn millis(key: &str, default: Duration) -> anyhow::Result<Duration> {
    let ms = parsed(key, default.as_millis() as u64)?;
    if ms == 0 {
        return Err(anyhow!("{key} must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}
