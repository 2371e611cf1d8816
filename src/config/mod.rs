/// Configuration management for the clinicflow engine
///
/// Handles server binding, database location, walk limits and the text generation provider.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub ai: AiConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL holding flows, executions and the clinic tables (e.g., "sqlite://data/clinicflow.db")
    pub url: String,
}

/// Flow walking limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum node executions per run; bounds cyclic flows
    pub max_steps: usize,
    /// Timeout for outbound HTTP calls made by api_call, webhook and ai_analysis nodes
    pub http_timeout_secs: u64,
}

/// OpenAI-compatible text generation provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub base_url: String,
    /// ai_analysis nodes fail when no key is configured
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            http_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let engine_defaults = EngineConfig::default();
        Self {
            server: ServerConfig {
                host: env_or("CLINICFLOW_HOST", "0.0.0.0"),
                port: env_parse("CLINICFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                url: env_or("CLINICFLOW_DATABASE_URL", "sqlite://data/clinicflow.db"),
            },
            engine: EngineConfig {
                max_steps: env_parse("CLINICFLOW_MAX_STEPS", engine_defaults.max_steps),
                http_timeout_secs: env_parse("CLINICFLOW_HTTP_TIMEOUT_SECS", engine_defaults.http_timeout_secs),
            },
            ai: AiConfig {
                base_url: env_or("CLINICFLOW_AI_BASE_URL", "https://api.openai.com/v1"),
                api_key: std::env::var("CLINICFLOW_AI_API_KEY").ok(),
                model: env_or("CLINICFLOW_AI_MODEL", "gpt-4o-mini"),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var, keeping the default when unset or malformed
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
