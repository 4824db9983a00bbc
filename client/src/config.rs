//! Configuration and the explicit context handed to the orchestrator.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use querysync_engine::ResultSet;

use crate::service::{Cache, DataService};

/// Where the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Runtime {
    /// Interactive client with a local cache and live updates.
    #[default]
    Client,
    /// Server-side rendering: one-shot remote queries only.
    Server,
}

impl FromStr for Runtime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Runtime::Client),
            "server" => Ok(Runtime::Server),
            other => Err(ConfigError::InvalidRuntime(other.to_string())),
        }
    }
}

/// Backoff for retried connectivity failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound of the jitter window
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay before retry number `attempt` (1-based):
    /// `min(max_delay, 2^attempt - 1 seconds)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponential = 2f64.powi(attempt.min(64) as i32) - 1.0;
        Duration::from_secs_f64(exponential.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay, uniform in `[0, ceiling(attempt))`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.ceiling(attempt).mul_f64(rand::random::<f64>())
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the data service
    pub server_url: String,
    /// Application identifier sent with every request
    pub application_id: String,
    /// Client key, when the service requires one
    pub client_key: Option<String>,
    /// Runtime profile
    pub runtime: Runtime,
    /// Backoff for connectivity failures
    pub retry: RetryPolicy,
}

impl Config {
    /// A client-profile configuration with default retry settings.
    pub fn new(server_url: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            application_id: application_id.into(),
            client_key: None,
            runtime: Runtime::Client,
            retry: RetryPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("QUERYSYNC_SERVER_URL").ok_or(ConfigError::MissingServerUrl)?;

        let application_id =
            lookup("QUERYSYNC_APPLICATION_ID").ok_or(ConfigError::MissingApplicationId)?;

        let client_key = lookup("QUERYSYNC_CLIENT_KEY");

        let runtime = match lookup("QUERYSYNC_RUNTIME") {
            Some(value) => value.parse()?,
            None => Runtime::default(),
        };

        let max_delay = lookup("QUERYSYNC_RETRY_MAX_DELAY_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidRetryDelay)?;

        Ok(Self {
            server_url,
            application_id,
            client_key,
            runtime,
            retry: RetryPolicy {
                max_delay: Duration::from_secs(max_delay),
            },
        })
    }

    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Options actually used for a query under this configuration.
    ///
    /// The server profile never caches and never subscribes.
    pub fn constrain(&self, options: SyncOptions) -> SyncOptions {
        match self.runtime {
            Runtime::Client => options,
            Runtime::Server => SyncOptions {
                enable_cache: false,
                enable_live: false,
                ..options
            },
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("QUERYSYNC_SERVER_URL environment variable is required")]
    MissingServerUrl,

    #[error("QUERYSYNC_APPLICATION_ID environment variable is required")]
    MissingApplicationId,

    #[error("Invalid QUERYSYNC_RUNTIME value: {0}")]
    InvalidRuntime(String),

    #[error("Invalid QUERYSYNC_RETRY_MAX_DELAY_SECS value")]
    InvalidRetryDelay,
}

/// Per-query options.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Read from and write through to the local cache
    pub enable_cache: bool,
    /// Subscribe to live updates
    pub enable_live: bool,
    /// Results to show before anything is loaded, e.g. rendered server-side
    pub initial_seed: Option<ResultSet>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            enable_cache: true,
            enable_live: true,
            initial_seed: None,
        }
    }
}

impl SyncOptions {
    pub fn without_cache(mut self) -> Self {
        self.enable_cache = false;
        self
    }

    pub fn without_live(mut self) -> Self {
        self.enable_live = false;
        self
    }

    pub fn with_seed(mut self, seed: ResultSet) -> Self {
        self.initial_seed = Some(seed);
        self
    }
}

/// Everything the orchestrator needs, built once at startup.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub service: Arc<dyn DataService>,
    pub cache: Arc<dyn Cache>,
}

impl Context {
    pub fn new(config: Config, service: Arc<dyn DataService>, cache: Arc<dyn Cache>) -> Self {
        Self {
            config: Arc::new(config),
            service,
            cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn loads_required_and_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("QUERYSYNC_SERVER_URL", "http://localhost:1337/parse"),
            ("QUERYSYNC_APPLICATION_ID", "app"),
        ]))
        .unwrap();

        assert_eq!(config.server_url, "http://localhost:1337/parse");
        assert_eq!(config.client_key, None);
        assert_eq!(config.runtime, Runtime::Client);
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn reports_missing_and_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[])),
            Err(ConfigError::MissingServerUrl)
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("QUERYSYNC_SERVER_URL", "u"),
                ("QUERYSYNC_APPLICATION_ID", "a"),
                ("QUERYSYNC_RUNTIME", "browser"),
            ])),
            Err(ConfigError::InvalidRuntime(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[
                ("QUERYSYNC_SERVER_URL", "u"),
                ("QUERYSYNC_APPLICATION_ID", "a"),
                ("QUERYSYNC_RETRY_MAX_DELAY_SECS", "soon"),
            ])),
            Err(ConfigError::InvalidRetryDelay)
        ));
    }

    #[test]
    fn server_runtime_disables_cache_and_live() {
        let seed = ResultSet::default();
        let config = Config::new("u", "a").with_runtime(Runtime::Server);
        let options = config.constrain(SyncOptions::default().with_seed(seed.clone()));

        assert!(!options.enable_cache);
        assert!(!options.enable_live);
        assert_eq!(options.initial_seed, Some(seed));

        let client = Config::new("u", "a");
        assert_eq!(client.constrain(SyncOptions::default()), SyncOptions::default());
    }

    #[test]
    fn retry_ceiling_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(1), Duration::from_secs(1));
        assert_eq!(policy.ceiling(2), Duration::from_secs(3));
        assert_eq!(policy.ceiling(4), Duration::from_secs(15));
        assert_eq!(policy.ceiling(5), Duration::from_secs(30));
        assert_eq!(policy.ceiling(1000), Duration::from_secs(30));

        for attempt in 1..10 {
            assert!(policy.delay(attempt) <= policy.ceiling(attempt));
        }
    }
}
