//! Environment-driven service configuration.
//!
//! All recognized options are read once at startup; anything malformed is a
//! startup error so the process exits with code 1 instead of limping along
//! with a half-configured service. Absent optional collaborators (Redis,
//! search key) degrade the matching endpoints to 503 at runtime instead.

use std::fmt;

use anyhow::{bail, Context, Result};

/// Runtime mode of the HTTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Debug,
    Release,
    Test,
}

impl ServerMode {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            "test" => Ok(Self::Test),
            other => bail!("SERVER_MODE must be one of debug|release|test, got {other:?}"),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Release => write!(f, "release"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Parsed service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub server_mode: ServerMode,
    pub log_level: String,
    /// Redis connection URL. When absent, async crawl endpoints answer 503
    /// and the result cache is disabled; scrape and search keep working.
    pub redis_url: Option<String>,
    /// Brave Search subscription token. When absent, search answers 503.
    pub brave_search_api_key: Option<String>,
    /// When true the embedded worker is not started (microservices mode).
    pub disable_worker: bool,
}

impl Settings {
    /// Read settings from process environment.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT must be a valid port number, got {raw:?}"))?,
            Err(_) => 8080,
        };

        let server_mode = match std::env::var("SERVER_MODE") {
            Ok(raw) => ServerMode::parse(&raw)?,
            Err(_) => ServerMode::Debug,
        };

        let log_level = match std::env::var("LOG_LEVEL") {
            Ok(raw) => {
                if !matches!(raw.as_str(), "debug" | "info" | "warn" | "error") {
                    bail!("LOG_LEVEL must be one of debug|info|warn|error, got {raw:?}");
                }
                raw
            }
            Err(_) => "info".to_string(),
        };

        let redis_url = std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty());
        let brave_search_api_key = std::env::var("BRAVE_SEARCH_API_KEY")
            .ok()
            .filter(|v| !v.is_empty());

        let disable_worker = match std::env::var("DISABLE_WORKER") {
            Ok(raw) => match raw.as_str() {
                "true" => true,
                "false" => false,
                other => bail!("DISABLE_WORKER must be true or false, got {other:?}"),
            },
            Err(_) => false,
        };

        Ok(Self {
            port,
            server_mode,
            log_level,
            redis_url,
            brave_search_api_key,
            disable_worker,
        })
    }

    /// Address the HTTP listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
