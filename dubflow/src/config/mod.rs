//! Process configuration read from the environment.
//!
//! `.env` is loaded by `main` before this runs. Every key is optional; unset or
//! blank keys fall back to the defaults below, and a key that is set but does
//! not parse is a configuration error rather than a silent default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::domain::RetryPolicy;
use crate::pipeline::{
    PipelineConfig, PollPolicy, PurgeConfig, RateLimiterConfig, WorkerPoolConfig,
};
use crate::{Error, Result};

/// Default upload limit: 500 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Credentials and endpoint overrides of the hosted providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub ffmpeg_path: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_base_url: Option<String>,
    pub deepl_api_key: Option<String>,
    pub deepl_base_url: Option<String>,
    pub sync_api_key: Option<String>,
    pub sync_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub api: ApiServerConfig,
    /// Root directory of stored blobs.
    pub storage_dir: PathBuf,
    /// URL prefix under which stored blobs are served.
    pub public_base_url: String,
    pub log_dir: String,
    pub max_upload_bytes: usize,
    /// Reuse a pending or processing job for the same content and language.
    pub dedupe_in_flight: bool,
    pub worker: WorkerPoolConfig,
    pub rate_limit: RateLimiterConfig,
    pub retry: RetryPolicy,
    pub purge: PurgeConfig,
    pub pipeline: PipelineConfig,
    pub providers: ProviderSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:dubflow.db?mode=rwc".to_string(),
            api: ApiServerConfig::default(),
            storage_dir: PathBuf::from("./data/blobs"),
            public_base_url: "http://localhost:8080/files".to_string(),
            log_dir: "./logs".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            dedupe_in_flight: false,
            worker: WorkerPoolConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            retry: RetryPolicy::default(),
            purge: PurgeConfig::default(),
            pipeline: PipelineConfig::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(url) = env.string("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(bind_address) = env.string("API_BIND_ADDRESS") {
            config.api.bind_address = bind_address;
        }
        if let Some(port) = env.parse::<u16>("API_PORT")? {
            config.api.port = port;
        }
        if let Some(dir) = env.string("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(url) = env.string("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = env.string("LOG_DIR") {
            config.log_dir = dir;
        }
        if let Some(bytes) = env.parse::<usize>("MAX_UPLOAD_BYTES")? {
            config.max_upload_bytes = bytes;
        }
        // Multipart framing adds a little on top of the file itself.
        config.api.body_limit = config.max_upload_bytes.saturating_add(1024 * 1024);
        if let Some(flag) = env.flag("DEDUPE_IN_FLIGHT")? {
            config.dedupe_in_flight = flag;
        }

        if let Some(workers) = env.parse::<usize>("WORKER_CONCURRENCY")? {
            if workers == 0 {
                return Err(Error::config("WORKER_CONCURRENCY must be at least 1"));
            }
            config.worker.max_workers = workers;
        }
        if let Some(secs) = env.parse::<u64>("JOB_TIMEOUT_SECS")? {
            config.worker.job_timeout_secs = secs;
        }
        if let Some(starts) = env.parse::<u32>("RATE_LIMIT_JOBS")? {
            config.rate_limit.max_starts = starts;
        }
        if let Some(secs) = env.parse::<u64>("RATE_LIMIT_WINDOW_SECS")? {
            config.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(attempts) = env.parse::<u32>("JOB_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(Error::config("JOB_MAX_ATTEMPTS must be at least 1"));
            }
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = env.parse::<u64>("RETRY_INITIAL_DELAY_MS")? {
            config.retry.initial_delay_ms = ms;
        }
        if let Some(days) = env.parse::<u32>("QUEUE_RETENTION_DAYS")? {
            config.purge.retention_days = days;
        }

        let mut poll = config.pipeline.lipsync_poll;
        if let Some(secs) = env.parse::<u64>("LIPSYNC_POLL_INTERVAL_SECS")? {
            poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("LIPSYNC_MAX_WAIT_SECS")? {
            poll.max_wait = Duration::from_secs(secs);
        }
        config.pipeline.lipsync_poll = PollPolicy::new(poll.interval, poll.max_wait);
        config.pipeline.default_voice_id = env.string("DEFAULT_VOICE_ID");

        config.providers = ProviderSettings {
            ffmpeg_path: env.string("FFMPEG_PATH"),
            elevenlabs_api_key: env.string("ELEVENLABS_API_KEY"),
            elevenlabs_base_url: env.string("ELEVENLABS_BASE_URL"),
            deepl_api_key: env.string("DEEPL_API_KEY"),
            deepl_base_url: env.string("DEEPL_BASE_URL"),
            sync_api_key: env.string("SYNC_API_KEY"),
            sync_base_url: env.string("SYNC_BASE_URL"),
        };

        Ok(config)
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::config(format!("invalid {key} '{raw}': {e}")))
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.string(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(None),
            Some("1" | "true" | "yes" | "on") => Ok(Some(true)),
            Some("0" | "false" | "no" | "off") => Ok(Some(false)),
            Some(other) => Err(Error::config(format!("invalid {key} '{other}'"))),
        }
    }
}
