//! Process configuration read from `DDMRP_*` environment variables.
//!
//! Unset variables keep the component defaults; set but unparsable ones are
//! an error rather than being silently ignored.

use std::time::Duration;

use chrono::NaiveTime;

use ddmrp_core::{DomainError, OrganizationId, OrganizationSettings, OrganizationSettingsStore};
use ddmrp_engine::SchedulerConfig;
use ddmrp_events::{ConsumerConfig, PublisherConfig, RetryPolicy, SubscriberConfig};

pub const ENV_PREFIX: &str = "DDMRP_";

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_STREAM_KEY: &str = "ddmrp:events";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: format!("{ENV_PREFIX}{key}"),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub subscriber: SubscriberConfig,
    pub publisher: PublisherConfig,
    pub scheduler: SchedulerConfig,
    /// Fallback for organizations without explicit settings.
    pub auto_replenishment: bool,
    /// Organizations enrolled in the scheduled recalculation at startup.
    pub recalculation_organizations: Vec<OrganizationId>,
    pub redis_url: String,
    pub stream_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscriber: SubscriberConfig::default(),
            publisher: PublisherConfig::default(),
            scheduler: SchedulerConfig::default(),
            auto_replenishment: false,
            recalculation_organizations: Vec::new(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            stream_key: DEFAULT_STREAM_KEY.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (full names, prefix included).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        let mut consumer: ConsumerConfig = config.subscriber.consumer.clone();
        if let Some(name) = env.string("CONSUMER_NAME") {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("CONSUMER_NAME", &name, "must not be empty"));
            }
            consumer.name = name;
        }
        if let Some(n) = env.parse::<u32>("MAX_DELIVER")? {
            consumer = consumer.with_max_deliver(n);
        }
        if let Some(ms) = env.parse::<u64>("ACK_WAIT_MS")? {
            consumer = consumer.with_ack_wait(Duration::from_millis(ms));
        }

        let mut subscriber = config.subscriber.clone().with_consumer(consumer);
        if let Some(n) = env.parse::<usize>("FETCH_BATCH")? {
            subscriber = subscriber.with_batch_size(n);
        }
        if let Some(ms) = env.parse::<u64>("FETCH_WAIT_MS")? {
            subscriber = subscriber.with_fetch_wait(Duration::from_millis(ms));
        }
        if let Some(n) = env.parse::<usize>("WORKERS")? {
            subscriber = subscriber.with_workers(n);
        }
        config.subscriber = subscriber;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::exponential(
            env.parse("PUBLISH_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            env.parse::<u64>("PUBLISH_INITIAL_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            env.parse::<u64>("PUBLISH_MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
        );
        if retry.initial_backoff > retry.max_backoff {
            return Err(ConfigError::invalid(
                "PUBLISH_INITIAL_BACKOFF_MS",
                &retry.initial_backoff.as_millis().to_string(),
                "exceeds the maximum backoff",
            ));
        }
        config.publisher = config.publisher.with_retry(retry);

        if let Some(enabled) = env.parse::<bool>("AUTO_REPLENISHMENT")? {
            config.auto_replenishment = enabled;
        }

        if let Some(raw) = env.string("RECALC_AT") {
            let run_at = NaiveTime::parse_from_str(&raw, "%H:%M")
                .map_err(|e| ConfigError::invalid("RECALC_AT", &raw, e.to_string()))?;
            config.scheduler = config.scheduler.with_run_at(run_at);
        }
        if let Some(secs) = env.parse::<u64>("RECALC_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::invalid("RECALC_TIMEOUT_SECS", "0", "must be positive"));
            }
            config.scheduler = config.scheduler.with_timeout(Duration::from_secs(secs));
        }
        if let Some(n) = env.parse::<usize>("RECALC_PARALLELISM")? {
            config.scheduler = config.scheduler.with_parallelism(n);
        }
        if let Some(raw) = env.string("RECALC_ORGANIZATIONS") {
            config.recalculation_organizations = parse_organizations(&raw)?;
        }

        if let Some(url) = env.string("REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(key) = env.string("STREAM_KEY") {
            config.stream_key = key;
        }

        Ok(config)
    }

    /// Settings store seeded from this configuration: the auto-replenishment
    /// fallback plus one entry per enrolled organization.
    pub fn settings_store(&self) -> OrganizationSettingsStore {
        let store =
            OrganizationSettingsStore::new().with_default_auto_replenishment(self.auto_replenishment);
        for organization_id in &self.recalculation_organizations {
            store.upsert(
                *organization_id,
                OrganizationSettings {
                    auto_replenishment: self.auto_replenishment,
                    recalculation_enabled: true,
                },
            );
        }
        store
    }
}

/// Comma-separated organization ids; blank entries are skipped.
fn parse_organizations(raw: &str) -> Result<Vec<OrganizationId>, ConfigError> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: OrganizationId = part
            .parse()
            .map_err(|e: DomainError| ConfigError::invalid("RECALC_ORGANIZATIONS", raw, e.to_string()))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::invalid(key, &raw, e.to_string())),
        }
    }
}
