use std::time::Duration;

use anyhow::{Context, Result};

use crate::{codegen, store::BackendType};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Which link store to run with ("sqlite" or "memory")
    pub store_backend: BackendType,

    /// SQLite connection string, e.g. "sqlite:./snip.db"
    pub database_url: String,

    /// HS256 secret shared with the identity provider that issues bearer tokens
    pub identity_secret: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when generating short links, e.g. "https://go.example.com"
    /// Must NOT have a trailing slash.
    pub base_url: String,

    /// URL to redirect visitors to when they hit the root path ("/").
    pub root_redirect_url: String,

    /// Symbols short codes are drawn from
    pub code_alphabet: String,

    /// Number of symbols per short code
    pub code_length: usize,

    /// How many candidate codes a single creation may try
    pub max_create_attempts: u32,

    /// Upper bound on the whole creation retry loop
    pub create_timeout: Duration,

    /// Bound of the click recording queue
    pub click_queue_capacity: usize,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        let identity_secret = std::env::var("IDENTITY_JWT_SECRET")
            .context("IDENTITY_JWT_SECRET must be set in the environment or .env file")?;

        if identity_secret.trim().is_empty() {
            anyhow::bail!("IDENTITY_JWT_SECRET must not be empty");
        }

        let store_backend = std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "sqlite".into())
            .parse::<BackendType>()
            .map_err(anyhow::Error::msg)
            .context("STORE_BACKEND must be 'sqlite' or 'memory'")?;

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let root_redirect_url = std::env::var("ROOT_REDIRECT_URL")
            .unwrap_or_else(|_| format!("{base_url}/api/links"))
            .trim_end_matches('/')
            .to_owned();

        let code_length = std::env::var("CODE_LENGTH")
            .unwrap_or_else(|_| codegen::DEFAULT_LENGTH.to_string())
            .parse::<usize>()
            .context("CODE_LENGTH must be a positive integer")?;

        let max_create_attempts = std::env::var("MAX_CREATE_ATTEMPTS")
            .unwrap_or_else(|_| "5".into())
            .parse::<u32>()
            .context("MAX_CREATE_ATTEMPTS must be a positive integer")?;
        if max_create_attempts == 0 {
            anyhow::bail!("MAX_CREATE_ATTEMPTS must be at least 1");
        }

        let create_timeout_ms = std::env::var("CREATE_TIMEOUT_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse::<u64>()
            .context("CREATE_TIMEOUT_MS must be a number of milliseconds")?;

        let click_queue_capacity = std::env::var("CLICK_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "1024".into())
            .parse::<usize>()
            .context("CLICK_QUEUE_CAPACITY must be a positive integer")?;
        if click_queue_capacity == 0 {
            anyhow::bail!("CLICK_QUEUE_CAPACITY must be at least 1");
        }

        Ok(Self {
            store_backend,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./snip.db".into()),
            identity_secret,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            base_url,
            root_redirect_url,
            code_alphabet: std::env::var("CODE_ALPHABET")
                .unwrap_or_else(|_| codegen::DEFAULT_ALPHABET.into()),
            code_length,
            max_create_attempts,
            create_timeout: Duration::from_millis(create_timeout_ms),
            click_queue_capacity,
        })
    }

    /// A fully populated config for tests; nothing is read from the environment.
    #[cfg(test)]
    pub fn for_tests(identity_secret: &str) -> Self {
        Self {
            store_backend: BackendType::Memory,
            database_url: "sqlite::memory:".into(),
            identity_secret: identity_secret.into(),
            host: "127.0.0.1".into(),
            port: 3000,
            base_url: "https://sn.ip".into(),
            root_redirect_url: "https://home.example".into(),
            code_alphabet: codegen::DEFAULT_ALPHABET.into(),
            code_length: codegen::DEFAULT_LENGTH,
            max_create_attempts: 5,
            create_timeout: Duration::from_secs(2),
            click_queue_capacity: 64,
        }
    }
}
