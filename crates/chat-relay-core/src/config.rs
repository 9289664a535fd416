//! Environment-driven configuration for both tiers.
//!
//! Every knob has a default so a bare `chat-relay-gateway` next to a bare
//! `chat-relay-worker` and a local Redis works out of the box. Values are
//! read once at startup; malformed values fall back to the default.

/// Configuration for the gateway tier.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the worker tier.
    pub backend_url: String,
    /// Cadence of the event polling loop in milliseconds.
    pub poll_interval_ms: u64,
    /// Initial retry backoff after a failed poll, in milliseconds.
    pub retry_backoff_init_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub retry_backoff_max_ms: u64,
    /// Overall deadline for one client request, in milliseconds.
    pub job_timeout_ms: u64,
    /// Whether bearer authentication is enforced.
    pub api_key_required: bool,
    /// The expected shared secret when auth is enforced.
    pub api_key: Option<String>,
    /// Model ids advertised by `GET /v1/models`.
    pub models: Vec<String>,
    /// Listen port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5345".to_string(),
            poll_interval_ms: 500,
            retry_backoff_init_ms: 1000,
            retry_backoff_max_ms: 30000,
            job_timeout_ms: 1_800_000,
            api_key_required: false,
            api_key: None,
            models: vec!["gpt-oss:20b".to_string(), "gpt-oss:120b".to_string()],
            port: 8080,
        }
    }
}

impl GatewayConfig {
    /// Load the gateway configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend_url: env_string("BACKEND_PROXY_URL", defaults.backend_url),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            retry_backoff_init_ms: env_parse(
                "RETRY_BACKOFF_INIT_MS",
                defaults.retry_backoff_init_ms,
            ),
            retry_backoff_max_ms: env_parse("RETRY_BACKOFF_MAX_MS", defaults.retry_backoff_max_ms),
            job_timeout_ms: env_parse("JOB_TIMEOUT_MS", defaults.job_timeout_ms),
            api_key_required: env_string("OPENAI_API_KEY_REQUIRED", "false".to_string()) == "true",
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            models: env_list("GATEWAY_MODELS", defaults.models),
            port: env_parse("PORT", defaults.port),
        }
    }
}

/// Configuration for the worker tier.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Chunk store endpoint.
    pub redis_url: String,
    /// Base URL of the inference backend.
    pub ollama_base_url: String,
    /// Number of concurrent executors (N). The admission ceiling is 2N.
    pub concurrency: usize,
    /// TTL applied to all per-job keys once a job reaches a terminal state.
    pub job_ttl_secs: u64,
    /// Listen port.
    pub port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            concurrency: 10,
            job_ttl_secs: 86_400,
            port: 5345,
        }
    }
}

impl WorkerConfig {
    /// Load the worker configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env_string("REDIS_URL", defaults.redis_url),
            ollama_base_url: env_string("OLLAMA_BASE_URL", defaults.ollama_base_url),
            concurrency: env_parse("WORKER_CONCURRENCY", defaults.concurrency).max(1),
            job_ttl_secs: env_parse("JOB_TTL_SECS", defaults.job_ttl_secs),
            port: env_parse("PORT", defaults.port),
        }
    }

    /// Hard admission ceiling: active plus queued jobs never exceed this.
    pub fn max_queue(&self) -> usize {
        self.concurrency * 2
    }
}

fn env_string(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(val) if !val.is_empty() => val,
        _ => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.backend_url, "http://localhost:5345");
        assert_eq!(cfg.poll_interval_ms, 500);
        assert_eq!(cfg.retry_backoff_init_ms, 1000);
        assert_eq!(cfg.retry_backoff_max_ms, 30000);
        assert_eq!(cfg.job_timeout_ms, 1_800_000);
        assert!(!cfg.api_key_required);
        assert_eq!(cfg.models.len(), 2);
    }

    #[test]
    fn test_worker_defaults_and_ceiling() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.concurrency, 10);
        assert_eq!(cfg.max_queue(), 20);
        assert_eq!(cfg.job_ttl_secs, 86_400);
    }

    #[test]
    fn test_env_parse_fallback() {
        // unset and malformed both fall back
        assert_eq!(env_parse("CHAT_RELAY_TEST_UNSET_KEY", 42u64), 42);
        std::env::set_var("CHAT_RELAY_TEST_BAD_KEY", "not-a-number");
        assert_eq!(env_parse("CHAT_RELAY_TEST_BAD_KEY", 7u64), 7);
        std::env::remove_var("CHAT_RELAY_TEST_BAD_KEY");
    }

    #[test]
    fn test_env_list_parsing() {
        std::env::set_var("CHAT_RELAY_TEST_MODELS", "a, b ,c");
        let models = env_list("CHAT_RELAY_TEST_MODELS", vec![]);
        assert_eq!(models, vec!["a", "b", "c"]);
        std::env::remove_var("CHAT_RELAY_TEST_MODELS");
    }
}
