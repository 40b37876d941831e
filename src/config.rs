//! Configuration module
//!
//! Loads configuration from environment variables, including the outbox
//! processor, publisher destination mapping, and circuit-breaker knobs
//! enumerated in the write path's configuration surface.

use std::collections::HashMap;
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Rate limit: requests per minute per API key
    pub rate_limit_per_minute: i32,

    /// `outbox.processor.enabled` - whether the background dispatcher
    /// should run in this process at all.
    pub outbox_processor_enabled: bool,
    /// `outbox.processor.batchSize`
    pub outbox_batch_size: u32,
    /// `outbox.processor.cleanupDays`
    pub outbox_cleanup_days: u32,

    /// `publisher.type` - identifies the bus backend the publisher
    /// trait is backed by. `LoggingPublisher` is used regardless until
    /// a real backend is wired in; this just names the intent.
    pub publisher_type: String,
    /// `publisher.destinationPrefix`
    pub publisher_destination_prefix: Option<String>,
    /// `publisher.destinationMappings` - event type -> destination
    /// override, consulted before falling back to prefix + event type.
    pub publisher_destination_mappings: HashMap<String, String>,

    /// `resilience.circuitBreaker.enabled`
    pub circuit_breaker_enabled: bool,
    /// Consecutive-failure threshold before the event store circuit
    /// opens. Only meaningful when `circuit_breaker_enabled`.
    pub circuit_breaker_event_store_threshold: u32,
    /// Same, for the outbox dispatcher's publish calls.
    pub circuit_breaker_outbox_threshold: u32,
    /// Same, for projection updates.
    pub circuit_breaker_projection_threshold: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let rate_limit_per_minute = env::var("RATE_LIMIT_PER_MINUTE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_PER_MINUTE"))?;

        let outbox_processor_enabled = env::var("OUTBOX_PROCESSOR_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let outbox_batch_size = env::var("OUTBOX_PROCESSOR_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("OUTBOX_PROCESSOR_BATCH_SIZE"))?;

        let outbox_cleanup_days = env::var("OUTBOX_PROCESSOR_CLEANUP_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("OUTBOX_PROCESSOR_CLEANUP_DAYS"))?;

        let publisher_type = env::var("PUBLISHER_TYPE").unwrap_or_else(|_| "logging".to_string());
        let publisher_destination_prefix = env::var("PUBLISHER_DESTINATION_PREFIX").ok();
        let publisher_destination_mappings = env::var("PUBLISHER_DESTINATION_MAPPINGS")
            .ok()
            .map(|raw| parse_destination_mappings(&raw))
            .unwrap_or_default();

        let circuit_breaker_enabled = env::var("RESILIENCE_CIRCUIT_BREAKER_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let circuit_breaker_event_store_threshold = env::var("RESILIENCE_CIRCUIT_BREAKER_EVENT_STORE_THRESHOLD")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RESILIENCE_CIRCUIT_BREAKER_EVENT_STORE_THRESHOLD"))?;
        let circuit_breaker_outbox_threshold = env::var("RESILIENCE_CIRCUIT_BREAKER_OUTBOX_THRESHOLD")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RESILIENCE_CIRCUIT_BREAKER_OUTBOX_THRESHOLD"))?;
        let circuit_breaker_projection_threshold = env::var("RESILIENCE_CIRCUIT_BREAKER_PROJECTION_THRESHOLD")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RESILIENCE_CIRCUIT_BREAKER_PROJECTION_THRESHOLD"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            rate_limit_per_minute,
            outbox_processor_enabled,
            outbox_batch_size,
            outbox_cleanup_days,
            publisher_type,
            publisher_destination_prefix,
            publisher_destination_mappings,
            circuit_breaker_enabled,
            circuit_breaker_event_store_threshold,
            circuit_breaker_outbox_threshold,
            circuit_breaker_projection_threshold,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Resolve the publish destination for an event type: an explicit
    /// mapping entry wins, then `prefix + "." + eventType`, then the
    /// bare event type.
    pub fn resolve_destination(&self, event_type: &str) -> String {
        if let Some(mapped) = self.publisher_destination_mappings.get(event_type) {
            return mapped.clone();
        }
        match &self.publisher_destination_prefix {
            Some(prefix) => format!("{prefix}.{event_type}"),
            None => event_type.to_string(),
        }
    }
}

/// Parses `type.a=dest.a,type.b=dest.b` into a mapping. Malformed pairs
/// (no `=`) are skipped rather than failing config load - a typo here
/// should degrade to the prefix fallback, not crash the process.
fn parse_destination_mappings(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
