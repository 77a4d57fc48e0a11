//! Configuration Module
//!
//! Loads the edge layer configuration from environment variables once at
//! startup. The resulting [`Config`] is immutable; anything that cannot be
//! parsed or would leave caching or rate limiting undefined is rejected with
//! [`EdgeError::InvalidConfiguration`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EdgeError, Result};
use crate::policy::CacheCategory;
use crate::ratelimit::{FailMode, TrustedProxies};
use crate::store::RetryPolicy;

// == Store Settings ==
/// Which store implementation backs the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("expected 'redis' or 'memory', got '{other}'")),
        }
    }
}

/// Connection, pooling and retry parameters for the backing store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: i64,
    /// Connect with `rediss://`
    pub tls: bool,
    /// Skip certificate verification (development only)
    pub tls_insecure: bool,
    pub pool_size: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
    /// Namespace prepended to every key
    pub key_prefix: String,
    pub memory_max_entries: usize,
    pub memory_sweep_interval: Duration,
}

// == Cache Settings ==
/// Per-category freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlTable {
    pub analytics: Duration,
    pub route_optimization: Duration,
    pub ml_predictions: Duration,
    pub external_api: Duration,
    pub realtime: Duration,
    pub session: Duration,
}

impl TtlTable {
    pub fn get(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Analytics => self.analytics,
            CacheCategory::RouteOptimization => self.route_optimization,
            CacheCategory::MlPredictions => self.ml_predictions,
            CacheCategory::ExternalApi => self.external_api,
            CacheCategory::Realtime => self.realtime,
            CacheCategory::Session => self.session,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttls: TtlTable,
    /// Largest request or response body the cache will buffer and store
    pub max_payload_bytes: usize,
    pub max_keys_per_pattern: usize,
    /// How long a follower waits on an in-flight computation for the same key
    pub single_flight_wait: Duration,
    /// Cap on concurrently running write-backs
    pub max_background_writes: usize,
}

// == Rate Limit Settings ==
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub limit: u64,
    pub window: Duration,
    pub fail_mode: FailMode,
}

// == Feature Flags ==
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub cache_warming: bool,
    pub warming_interval: Duration,
    pub warming_paths: Vec<String>,
    pub metrics: bool,
    pub metrics_interval: Duration,
}

// == Config ==
/// Edge layer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    /// Peers whose `X-Forwarded-For` header is believed
    pub trusted_proxies: TrustedProxies,
    /// Upper bound on a single health probe
    pub health_probe_timeout: Duration,
    pub features: FeatureFlags,
}

impl Config {
    /// Loads and validates configuration from the process environment.
    ///
    /// Unset variables take their defaults; set but unparseable ones are an
    /// error rather than a silent fallback.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let defaults = Config::default();

        let store = StoreSettings {
            backend: vars.parse("STORE_BACKEND", defaults.store.backend)?,
            host: vars.string("REDIS_HOST").unwrap_or(defaults.store.host),
            port: vars.parse("REDIS_PORT", defaults.store.port)?,
            username: vars.string("REDIS_USERNAME"),
            password: vars.string("REDIS_PASSWORD"),
            database: vars.parse("REDIS_DB", defaults.store.database)?,
            tls: vars.flag("REDIS_TLS", defaults.store.tls)?,
            tls_insecure: vars.flag("REDIS_TLS_INSECURE", defaults.store.tls_insecure)?,
            pool_size: vars.parse("REDIS_POOL_SIZE", defaults.store.pool_size)?,
            connect_timeout: vars.millis("REDIS_CONNECT_TIMEOUT_MS", defaults.store.connect_timeout)?,
            read_timeout: vars.millis("REDIS_READ_TIMEOUT_MS", defaults.store.read_timeout)?,
            write_timeout: vars.millis("REDIS_WRITE_TIMEOUT_MS", defaults.store.write_timeout)?,
            retry: RetryPolicy {
                max_attempts: vars.parse("REDIS_MAX_RETRIES", defaults.store.retry.max_attempts)?,
                base_delay: vars.millis("REDIS_RETRY_BASE_MS", defaults.store.retry.base_delay)?,
                max_delay: vars.millis("REDIS_RETRY_MAX_MS", defaults.store.retry.max_delay)?,
            },
            key_prefix: vars
                .string("CACHE_KEY_PREFIX")
                .unwrap_or(defaults.store.key_prefix),
            memory_max_entries: vars.parse("MEMORY_MAX_ENTRIES", defaults.store.memory_max_entries)?,
            memory_sweep_interval: vars.secs(
                "MEMORY_SWEEP_INTERVAL_SECS",
                defaults.store.memory_sweep_interval,
            )?,
        };

        let ttls = &defaults.cache.ttls;
        let cache = CacheSettings {
            ttls: TtlTable {
                analytics: vars.secs("CACHE_TTL_ANALYTICS", ttls.analytics)?,
                route_optimization: vars
                    .secs("CACHE_TTL_ROUTE_OPTIMIZATION", ttls.route_optimization)?,
                ml_predictions: vars.secs("CACHE_TTL_ML_PREDICTIONS", ttls.ml_predictions)?,
                external_api: vars.secs("CACHE_TTL_EXTERNAL_API", ttls.external_api)?,
                realtime: vars.secs("CACHE_TTL_REALTIME", ttls.realtime)?,
                session: vars.secs("CACHE_TTL_SESSION", ttls.session)?,
            },
            max_payload_bytes: vars
                .parse("CACHE_MAX_PAYLOAD_BYTES", defaults.cache.max_payload_bytes)?,
            max_keys_per_pattern: vars
                .parse("CACHE_MAX_KEYS_PER_PATTERN", defaults.cache.max_keys_per_pattern)?,
            single_flight_wait: vars
                .millis("CACHE_SINGLE_FLIGHT_WAIT_MS", defaults.cache.single_flight_wait)?,
            max_background_writes: vars
                .parse("CACHE_MAX_BACKGROUND_WRITES", defaults.cache.max_background_writes)?,
        };

        let rate_limit = RateLimitSettings {
            limit: vars.parse("RATE_LIMIT_REQUESTS", defaults.rate_limit.limit)?,
            window: vars.secs("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit.window)?,
            fail_mode: vars.parse("RATE_LIMIT_FAIL_MODE", defaults.rate_limit.fail_mode)?,
        };

        let features = FeatureFlags {
            cache_warming: vars.flag("CACHE_WARMING_ENABLED", defaults.features.cache_warming)?,
            warming_interval: vars
                .secs("CACHE_WARMING_INTERVAL_SECS", defaults.features.warming_interval)?,
            warming_paths: vars
                .string("CACHE_WARMING_PATHS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|path| !path.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            metrics: vars.flag("METRICS_ENABLED", defaults.features.metrics)?,
            metrics_interval: vars.secs("METRICS_INTERVAL_SECS", defaults.features.metrics_interval)?,
        };

        let config = Self {
            server_port: vars.parse("SERVER_PORT", defaults.server_port)?,
            store,
            cache,
            rate_limit,
            trusted_proxies: vars.parse("TRUSTED_PROXIES", defaults.trusted_proxies.clone())?,
            health_probe_timeout: vars
                .millis("HEALTH_PROBE_TIMEOUT_MS", defaults.health_probe_timeout)?,
            features,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would leave cache or rate-limit behavior undefined.
    pub fn validate(&self) -> Result<()> {
        for category in CacheCategory::ALL {
            if self.cache.ttls.get(category).is_zero() {
                return Err(invalid(format!("TTL for category '{category}' must be positive")));
            }
        }

        let positive = [
            ("RATE_LIMIT_REQUESTS", self.rate_limit.limit as usize),
            ("REDIS_POOL_SIZE", self.store.pool_size),
            ("REDIS_MAX_RETRIES", self.store.retry.max_attempts as usize),
            ("CACHE_MAX_PAYLOAD_BYTES", self.cache.max_payload_bytes),
            ("CACHE_MAX_KEYS_PER_PATTERN", self.cache.max_keys_per_pattern),
            ("CACHE_MAX_BACKGROUND_WRITES", self.cache.max_background_writes),
            ("MEMORY_MAX_ENTRIES", self.store.memory_max_entries),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(invalid(format!("{name} must be positive")));
        }

        let durations = [
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit.window),
            ("REDIS_CONNECT_TIMEOUT_MS", self.store.connect_timeout),
            ("REDIS_READ_TIMEOUT_MS", self.store.read_timeout),
            ("REDIS_WRITE_TIMEOUT_MS", self.store.write_timeout),
            ("HEALTH_PROBE_TIMEOUT_MS", self.health_probe_timeout),
            ("MEMORY_SWEEP_INTERVAL_SECS", self.store.memory_sweep_interval),
            ("METRICS_INTERVAL_SECS", self.features.metrics_interval),
            ("CACHE_WARMING_INTERVAL_SECS", self.features.warming_interval),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(invalid(format!("{name} must be positive")));
        }

        if self.store.retry.base_delay > self.store.retry.max_delay {
            return Err(invalid(
                "REDIS_RETRY_BASE_MS must not exceed REDIS_RETRY_MAX_MS".to_string(),
            ));
        }

        if let Some(path) = self
            .features
            .warming_paths
            .iter()
            .find(|path| !path.starts_with('/'))
        {
            return Err(invalid(format!("warming path '{path}' must start with '/'")));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            store: StoreSettings {
                backend: StoreBackend::Redis,
                host: "127.0.0.1".to_string(),
                port: 6379,
                username: None,
                password: None,
                database: 0,
                tls: false,
                tls_insecure: false,
                pool_size: 8,
                connect_timeout: Duration::from_millis(2000),
                read_timeout: Duration::from_millis(500),
                write_timeout: Duration::from_millis(500),
                retry: RetryPolicy::default(),
                key_prefix: "freight:".to_string(),
                memory_max_entries: 10_000,
                memory_sweep_interval: Duration::from_secs(30),
            },
            cache: CacheSettings {
                ttls: TtlTable {
                    analytics: Duration::from_secs(300),
                    route_optimization: Duration::from_secs(1800),
                    ml_predictions: Duration::from_secs(3600),
                    external_api: Duration::from_secs(600),
                    realtime: Duration::from_secs(30),
                    session: Duration::from_secs(86_400),
                },
                max_payload_bytes: 1024 * 1024,
                max_keys_per_pattern: 1000,
                single_flight_wait: Duration::from_millis(2000),
                max_background_writes: 64,
            },
            rate_limit: RateLimitSettings {
                limit: 100,
                window: Duration::from_secs(60),
                fail_mode: FailMode::Open,
            },
            trusted_proxies: TrustedProxies::default(),
            health_probe_timeout: Duration::from_millis(1000),
            features: FeatureFlags {
                cache_warming: false,
                warming_interval: Duration::from_secs(300),
                warming_paths: Vec::new(),
                metrics: false,
                metrics_interval: Duration::from_secs(60),
            },
        }
    }
}

// == Variable Parsing ==
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of a variable.
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(name) {
            Some(raw) => raw
                .parse()
                .map_err(|e| invalid(format!("{name}={raw}: {e}"))),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool> {
        match self.string(name) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(format!("{name}={raw}: expected a boolean"))),
            },
            None => Ok(default),
        }
    }

    fn secs(&self, name: &str, default: Duration) -> Result<Duration> {
        self.parse(name, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, name: &str, default: Duration) -> Result<Duration> {
        self.parse(name, default.as_millis() as u64)
            .map(Duration::from_millis)
    }
}

fn invalid(message: String) -> EdgeError {
    EdgeError::InvalidConfiguration(message)
}
