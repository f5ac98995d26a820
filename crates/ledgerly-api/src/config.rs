//! Server configuration from environment variables.

use axum::http::HeaderValue;

use ledgerly_core::defaults::{
    AI_CONFIDENCE_THRESHOLD, MAX_FILE_SIZE_BYTES, QUEUE_MAX_ATTEMPTS, SERVER_HOST, SERVER_PORT,
};

/// Where jobs, payments and queue messages live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local stores; state is lost on restart.
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(StoreBackend::Postgres),
            "memory" | "mem" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Prefix for absolute links; relative links are returned when unset.
    pub public_base_url: Option<String>,
    pub max_file_size: usize,
    /// Previews below this confidence are flagged for review.
    pub ai_confidence_threshold: f64,
    pub queue_max_attempts: u32,
    pub stripe_webhook_secret: Option<String>,
    pub xendit_webhook_key: Option<String>,
    pub store_backend: StoreBackend,
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: SERVER_HOST.to_string(),
            port: SERVER_PORT,
            database_url: "postgres://localhost/ledgerly".to_string(),
            public_base_url: None,
            max_file_size: MAX_FILE_SIZE_BYTES,
            ai_confidence_threshold: AI_CONFIDENCE_THRESHOLD,
            queue_max_attempts: QUEUE_MAX_ATTEMPTS,
            stripe_webhook_secret: None,
            xendit_webhook_key: None,
            store_backend: StoreBackend::Postgres,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` / `PORT` | `0.0.0.0` / `3000` |
    /// | `DATABASE_URL` | `postgres://localhost/ledgerly` |
    /// | `PUBLIC_BASE_URL` | unset |
    /// | `MAX_FILE_SIZE` | 25 MiB |
    /// | `AI_CONFIDENCE_THRESHOLD` | `0.85` |
    /// | `QUEUE_MAX_ATTEMPTS` | `3` |
    /// | `STRIPE_WEBHOOK_SECRET` | unset (Stripe webhooks rejected) |
    /// | `XENDIT_API_KEY` | unset (Xendit webhooks rejected) |
    /// | `STORE_BACKEND` | `postgres` |
    /// | `ALLOWED_ORIGINS` | `http://localhost:3000` |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = non_empty_env("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let max_file_size = non_empty_env("MAX_FILE_SIZE")
            .and_then(|v| v.parse().ok())
            .filter(|v: &usize| *v > 0)
            .unwrap_or(defaults.max_file_size);
        let ai_confidence_threshold = non_empty_env("AI_CONFIDENCE_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .filter(|v: &f64| (0.0..=1.0).contains(v))
            .unwrap_or(defaults.ai_confidence_threshold);
        let queue_max_attempts = non_empty_env("QUEUE_MAX_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .filter(|v: &u32| *v > 0)
            .unwrap_or(defaults.queue_max_attempts);
        let store_backend = match non_empty_env("STORE_BACKEND") {
            Some(raw) => StoreBackend::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown STORE_BACKEND, using postgres");
                StoreBackend::Postgres
            }),
            None => defaults.store_backend,
        };
        let allowed_origins = non_empty_env("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.allowed_origins);

        Self {
            host: non_empty_env("HOST").unwrap_or(defaults.host),
            port,
            database_url: non_empty_env("DATABASE_URL").unwrap_or(defaults.database_url),
            public_base_url: non_empty_env("PUBLIC_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            max_file_size,
            ai_confidence_threshold,
            queue_max_attempts,
            stripe_webhook_secret: non_empty_env("STRIPE_WEBHOOK_SECRET"),
            xendit_webhook_key: non_empty_env("XENDIT_API_KEY"),
            store_backend,
            allowed_origins,
        }
    }

    pub fn with_max_file_size(mut self, bytes: usize) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_stripe_secret(mut self, secret: impl Into<String>) -> Self {
        self.stripe_webhook_secret = Some(secret.into());
        self
    }

    pub fn with_xendit_key(mut self, key: impl Into<String>) -> Self {
        self.xendit_webhook_key = Some(key.into());
        self
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into());
        self
    }

    /// `path` prefixed with the public base URL when one is configured.
    pub fn link(&self, path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}{}", base, path),
            None => path.to_string(),
        }
    }

    pub fn cors_origins(&self) -> Vec<HeaderValue> {
        self.allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", origin, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!(StoreBackend::parse("Postgres"), Some(StoreBackend::Postgres));
        assert_eq!(StoreBackend::parse("memory"), Some(StoreBackend::Memory));
        assert_eq!(StoreBackend::parse("redis"), None);
    }

    #[test]
    fn test_link_uses_public_base() {
        let config = AppConfig::default();
        assert_eq!(config.link("/api/preview/x"), "/api/preview/x");
        let config = config.with_public_base_url("https://app.example.com");
        assert_eq!(
            config.link("/api/preview/x"),
            "https://app.example.com/api/preview/x"
        );
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_file_size, 25 * 1024 * 1024);
        assert_eq!(config.port, 3000);
        assert!(config.stripe_webhook_secret.is_none());
    }
}
