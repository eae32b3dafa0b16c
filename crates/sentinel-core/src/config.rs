use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use crate::stream::BackoffPolicy;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_STREAM_RETRY_BASE_MS: u64 = 500;
const DEFAULT_STREAM_MAX_RETRIES: u32 = 5;
const DEFAULT_RESYNC_DELAY_MS: u64 = 3_000;
const DEFAULT_LOG_BUFFER_LINES: usize = 1_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppProfile {
    Dev,
    Prod,
}

impl AppProfile {
    pub fn from_env(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("prod") | Some("production") => Self::Prod,
            _ => Self::Dev,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub api_base_url: String,
    pub stream_base_url: Option<String>,
    pub auth_token: Option<String>,
    pub profile: AppProfile,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub stream_retry_base: Duration,
    pub stream_max_retries: u32,
    /// Settle time between a `notification` push and the re-pull it triggers.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub resync_delay: Duration,
    pub log_buffer_lines: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            stream_base_url: None,
            auth_token: None,
            profile: AppProfile::Dev,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            stream_retry_base: Duration::from_millis(DEFAULT_STREAM_RETRY_BASE_MS),
            stream_max_retries: DEFAULT_STREAM_MAX_RETRIES,
            resync_delay: Duration::from_millis(DEFAULT_RESYNC_DELAY_MS),
            log_buffer_lines: DEFAULT_LOG_BUFFER_LINES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        #[cfg(not(target_arch = "wasm32"))]
        crate::config::load_dotenv();

        let mut config = Self::default();

        if let Some(url) = read_env("SENTINEL_API_BASE_URL") {
            config.api_base_url = url;
        }

        if let Some(stream_url) = read_env("SENTINEL_STREAM_BASE_URL") {
            config.stream_base_url = Some(stream_url);
        }

        if let Some(token) = read_env("SENTINEL_AUTH_TOKEN") {
            config.auth_token = Some(token);
        }

        let profile_raw = read_env("SENTINEL_PROFILE");
        config.profile = AppProfile::from_env(profile_raw);

        if let Some(secs) =
            read_env("SENTINEL_REQUEST_TIMEOUT_SECS").and_then(|value| value.parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(ms) =
            read_env("SENTINEL_STREAM_RETRY_BASE_MS").and_then(|value| value.parse::<u64>().ok())
        {
            config.stream_retry_base = Duration::from_millis(ms.max(50));
        }

        if let Some(retries) =
            read_env("SENTINEL_STREAM_MAX_RETRIES").and_then(|value| value.parse::<u32>().ok())
        {
            config.stream_max_retries = retries;
        }

        if let Some(ms) =
            read_env("SENTINEL_RESYNC_DELAY_MS").and_then(|value| value.parse::<u64>().ok())
        {
            config.resync_delay = Duration::from_millis(ms);
        }

        if let Some(lines) =
            read_env("SENTINEL_LOG_BUFFER_LINES").and_then(|value| value.parse::<usize>().ok())
        {
            config.log_buffer_lines = lines.max(1);
        }

        config
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.auth_token
            .as_ref()
            .map(|token| token.trim())
            .filter(|token| !token.is_empty())
            .map(|token| format!("Bearer {token}"))
    }

    pub fn stream_endpoint(&self) -> String {
        self.stream_base_url
            .clone()
            .unwrap_or_else(|| self.api_base_url.clone())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.stream_retry_base,
            max_attempts: self.stream_max_retries,
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .or_else(|| option_env_from_build(key).map(|s| s.to_string()))
        .filter(|value| !value.trim().is_empty())
}

fn option_env_from_build(key: &str) -> Option<&'static str> {
    match key {
        "SENTINEL_API_BASE_URL" => option_env!("SENTINEL_API_BASE_URL"),
        "SENTINEL_STREAM_BASE_URL" => option_env!("SENTINEL_STREAM_BASE_URL"),
        "SENTINEL_AUTH_TOKEN" => option_env!("SENTINEL_AUTH_TOKEN"),
        "SENTINEL_PROFILE" => option_env!("SENTINEL_PROFILE"),
        "SENTINEL_REQUEST_TIMEOUT_SECS" => option_env!("SENTINEL_REQUEST_TIMEOUT_SECS"),
        "SENTINEL_STREAM_RETRY_BASE_MS" => option_env!("SENTINEL_STREAM_RETRY_BASE_MS"),
        "SENTINEL_STREAM_MAX_RETRIES" => option_env!("SENTINEL_STREAM_MAX_RETRIES"),
        "SENTINEL_RESYNC_DELAY_MS" => option_env!("SENTINEL_RESYNC_DELAY_MS"),
        "SENTINEL_LOG_BUFFER_LINES" => option_env!("SENTINEL_LOG_BUFFER_LINES"),
        _ => None,
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            tracing::warn!("failed to load .env: {err}");
        }
    }
}

#[cfg(target_arch = "wasm32")]
#[inline]
pub fn load_dotenv() {}
