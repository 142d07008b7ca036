use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    /// How long a subject stays blocked after an approved pickup.
    pub grace_window: Duration,
    /// How often the grace-window expiry sweep runs.
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret: required("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost".into()),
            grace_window: Duration::from_secs(
                env::var("GRACE_WINDOW_MINUTES")
                    .unwrap_or_else(|_| "10".into())
                    .parse::<u64>()?
                    * 60,
            ),
            sweep_interval: Duration::from_secs(
                env::var("SWEEP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".into())
                    .parse()?,
            ),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
