use crate::router::ShardTable;
use std::time::Duration;

/// Environment variables read by [`TrackerConfig::from_env`]
const ENV_SHARD_ENDPOINTS: [&str; 3] = [
    "FLEET_BACKEND_ENDPOINT1",
    "FLEET_BACKEND_ENDPOINT2",
    "FLEET_BACKEND_ENDPOINT3",
];
const ENV_AUTH_ENDPOINT: &str = "FLEET_AUTH_ENDPOINT";

/// Configuration for the tracker runtime
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Static shard table used to route data requests
    pub shards: ShardTable,
    /// Fixed authentication endpoint
    pub auth_endpoint: String,
    /// Live stream settings
    pub stream: StreamConfig,
    /// Backoff settings for reconnection
    pub backoff: BackoffConfig,
    /// Recently viewed cache settings
    pub recent: RecentConfig,
}

impl TrackerConfig {
    /// Create a new builder for configuration
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    /// Build the production configuration from environment variables.
    ///
    /// Reads `FLEET_BACKEND_ENDPOINT1..3` for the standard three-shard table
    /// and `FLEET_AUTH_ENDPOINT` for the auth endpoint. All other settings
    /// keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
        };

        let shards = ShardTable::standard(
            read(ENV_SHARD_ENDPOINTS[0])?,
            read(ENV_SHARD_ENDPOINTS[1])?,
            read(ENV_SHARD_ENDPOINTS[2])?,
        );

        Self::builder()
            .shards(shards)
            .auth_endpoint(read(ENV_AUTH_ENDPOINT)?)
            .build()
    }
}

/// Builder for TrackerConfig
#[derive(Debug, Clone, Default)]
pub struct TrackerConfigBuilder {
    shards: Option<ShardTable>,
    auth_endpoint: Option<String>,
    stream: StreamConfig,
    backoff: BackoffConfig,
    recent: RecentConfig,
}

impl TrackerConfigBuilder {
    /// Set the shard table
    pub fn shards(mut self, table: ShardTable) -> Self {
        self.shards = Some(table);
        self
    }

    /// Set the authentication endpoint
    pub fn auth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.auth_endpoint = Some(endpoint.into());
        self
    }

    /// Set stream configuration
    pub fn stream(mut self, config: StreamConfig) -> Self {
        self.stream = config;
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    /// Set recent cache configuration
    pub fn recent(mut self, config: RecentConfig) -> Self {
        self.recent = config;
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<TrackerConfig, ConfigError> {
        let shards = self.shards.ok_or(ConfigError::MissingShardTable)?;

        let auth_endpoint = self
            .auth_endpoint
            .filter(|e| !e.trim().is_empty())
            .ok_or(ConfigError::MissingAuthEndpoint)?;

        // Validate backoff config
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(ConfigError::InvalidBackoff(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }

        if self.backoff.multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoff(
                "multiplier must be >= 1".to_string(),
            ));
        }

        // Validate stream config
        if self.stream.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidStream(
                "connect_timeout must be > 0".to_string(),
            ));
        }

        if self.stream.freshness_threshold.is_zero() {
            return Err(ConfigError::InvalidStream(
                "freshness_threshold must be > 0".to_string(),
            ));
        }

        if let Some(idle) = self.stream.idle_timeout {
            if idle.is_zero() {
                return Err(ConfigError::InvalidStream(
                    "idle_timeout must be > 0 when set".to_string(),
                ));
            }
        }

        // Validate recent cache
        if self.recent.max_entries == 0 {
            return Err(ConfigError::InvalidRecent(
                "max_entries cannot be 0".to_string(),
            ));
        }

        Ok(TrackerConfig {
            shards,
            auth_endpoint,
            stream: self.stream,
            backoff: self.backoff,
            recent: self.recent,
        })
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// No shard table supplied
    #[error("Shard table is required")]
    MissingShardTable,
    /// No auth endpoint supplied
    #[error("Auth endpoint is required")]
    MissingAuthEndpoint,
    /// Required environment variable missing or empty
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
    /// Shard table violates its invariants
    #[error("Invalid shard table: {0}")]
    InvalidShardTable(String),
    /// Invalid backoff configuration
    #[error("Invalid backoff configuration: {0}")]
    InvalidBackoff(String),
    /// Invalid stream configuration
    #[error("Invalid stream configuration: {0}")]
    InvalidStream(String),
    /// Invalid recent cache configuration
    #[error("Invalid recent cache configuration: {0}")]
    InvalidRecent(String),
}

/// Live location stream settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Path appended to the shard endpoint, e.g. `/api/live`
    pub stream_path: String,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Reconnect when nothing at all arrives for this long (None disables)
    pub idle_timeout: Option<Duration>,
    /// A session is stale when no sample was accepted for longer than this
    pub freshness_threshold: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_path: "/api/live".to_string(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(60)),
            freshness_threshold: Duration::from_secs(30),
        }
    }
}

/// Backoff configuration for reconnection
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (typically 2.0)
    pub multiplier: f64,
    /// Whether to add random jitter to delays.
    /// Off by default so successive waits never shrink.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Clamp the exponent so powi never overflows to inf for long outages
        let exponent = attempt.min(64) as i32;
        let base_delay = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        if self.jitter {
            // Full jitter: random value between 0 and capped_delay
            let jittered = rand::random::<f64>() * capped_delay;
            Duration::from_millis(jittered as u64)
        } else {
            Duration::from_millis(capped_delay as u64)
        }
    }
}

/// Recently viewed cache settings
#[derive(Debug, Clone)]
pub struct RecentConfig {
    /// Maximum number of remembered entities
    pub max_entries: usize,
    /// Storage key holding the JSON list
    pub storage_key: String,
}

impl Default for RecentConfig {
    fn default() -> Self {
        Self {
            max_entries: 5,
            storage_key: "recentBuses".to_string(),
        }
    }
}
