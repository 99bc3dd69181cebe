//! Application configuration
//!
//! Loaded with the `config` crate: built-in defaults, then optional
//! `config/default` and `config/{RUN_MODE}` files, then `ROLLCALL__SECTION__KEY`
//! environment variables.

use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub followup: FollowUpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Externally reachable base URL, used for IVR callback URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_public_base_url() -> String {
    "http://localhost:9000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            public_base_url: default_public_base_url(),
        }
    }
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Without one the in-memory store is used.
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Redis configuration for the job queue
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL. Without one the in-memory queue is used.
    pub url: Option<String>,

    /// Prefix for every queue key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "rollcall:calls".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

/// Africa's Talking voice API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelephonyConfig {
    #[serde(default = "default_telephony_base_url")]
    pub base_url: String,

    #[serde(default = "default_telephony_username")]
    pub username: String,

    pub api_key: Option<String>,

    /// Virtual number calls are placed from
    pub caller_id: Option<String>,

    #[serde(default = "default_country_code")]
    pub default_country_code: String,

    #[serde(default = "default_telephony_timeout")]
    pub timeout_secs: u64,
}

fn default_telephony_base_url() -> String {
    "https://voice.africastalking.com".to_string()
}

fn default_telephony_username() -> String {
    "sandbox".to_string()
}

fn default_country_code() -> String {
    "233".to_string()
}

fn default_telephony_timeout() -> u64 {
    15
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            base_url: default_telephony_base_url(),
            username: default_telephony_username(),
            api_key: None,
            caller_id: None,
            default_country_code: default_country_code(),
            timeout_secs: default_telephony_timeout(),
        }
    }
}

impl TelephonyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// AI provider configuration (OpenAI-compatible API)
#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,

    /// Without a key every pipeline stage reports itself unavailable
    pub api_key: Option<String>,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    #[serde(default = "default_speech_timeout")]
    pub timeout_secs: u64,
}

fn default_speech_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_speech_timeout() -> u64 {
    30
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: default_speech_base_url(),
            api_key: None,
            transcription_model: default_transcription_model(),
            chat_model: default_chat_model(),
            tts_model: default_tts_model(),
            timeout_secs: default_speech_timeout(),
        }
    }
}

impl SpeechConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Job queue and worker pool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Maximum jobs processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Worker-level attempts per job
    #[serde(default = "default_queue_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,

    #[serde(default = "default_keep_failed")]
    pub keep_failed: usize,
}

fn default_concurrency() -> usize {
    5
}

fn default_queue_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    500
}

fn default_keep_completed() -> usize {
    100
}

fn default_keep_failed() -> usize {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_queue_attempts(),
            backoff_base_secs: default_backoff_base(),
            poll_interval_ms: default_poll_interval(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
        }
    }
}

impl QueueConfig {
    /// Worker-level retry policy
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_secs(self.backoff_base_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Follow-up sweep and call-outcome retry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FollowUpConfig {
    /// Pause between successive enqueues of one sweep
    #[serde(default = "default_inter_call_delay")]
    pub inter_call_delay_ms: u64,

    /// Call attempts per absence
    #[serde(default = "default_call_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_hours")]
    pub retry_delay_hours: u64,
}

fn default_inter_call_delay() -> u64 {
    2000
}

fn default_call_attempts() -> u32 {
    3
}

fn default_retry_delay_hours() -> u64 {
    6
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            inter_call_delay_ms: default_inter_call_delay(),
            max_attempts: default_call_attempts(),
            retry_delay_hours: default_retry_delay_hours(),
        }
    }
}

impl FollowUpConfig {
    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    /// Call-outcome retry policy
    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy::fixed(Duration::from_secs(self.retry_delay_hours * 3600))
    }
}

/// Time-based trigger configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Local time of the end-of-day sweep, `HH:MM`
    #[serde(default = "default_end_of_day")]
    pub end_of_day: String,

    #[serde(default = "default_retry_window_start")]
    pub retry_window_start_hour: u32,

    /// Last hour (inclusive) in which the retry sweep fires
    #[serde(default = "default_retry_window_end")]
    pub retry_window_end_hour: u32,

    #[serde(default = "default_retry_interval")]
    pub retry_interval_minutes: u32,

    #[serde(default = "default_true")]
    pub weekdays_only: bool,
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "Africa/Accra".to_string()
}

fn default_end_of_day() -> String {
    "16:00".to_string()
}

fn default_retry_window_start() -> u32 {
    8
}

fn default_retry_window_end() -> u32 {
    18
}

fn default_retry_interval() -> u32 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: default_timezone(),
            end_of_day: default_end_of_day(),
            retry_window_start_hour: default_retry_window_start(),
            retry_window_end_hour: default_retry_window_end(),
            retry_interval_minutes: default_retry_interval(),
            weekdays_only: true,
        }
    }
}

impl SchedulerConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Message(format!("invalid scheduler.timezone: {}", e)))
    }

    pub fn end_of_day_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.end_of_day, "%H:%M").map_err(|e| {
            ConfigError::Message(format!(
                "invalid scheduler.end_of_day '{}': {}",
                self.end_of_day, e
            ))
        })
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9000)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("queue.concurrency", 5)?
            .set_default("queue.max_attempts", 3)?
            .set_default("queue.backoff_base_secs", 60)?
            .set_default("followup.inter_call_delay_ms", 2000)?
            .set_default("followup.max_attempts", 3)?
            .set_default("followup.retry_delay_hours", 6)?
            .set_default("scheduler.timezone", "Africa/Accra")?
            .set_default("scheduler.end_of_day", "16:00")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("ROLLCALL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("ROLLCALL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later at run time
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.concurrency == 0 {
            return Err(ConfigError::Message(
                "queue.concurrency must be at least 1".to_string(),
            ));
        }
        if self.followup.max_attempts == 0 {
            return Err(ConfigError::Message(
                "followup.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.scheduler.retry_interval_minutes == 0 {
            return Err(ConfigError::Message(
                "scheduler.retry_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.scheduler.retry_window_start_hour > self.scheduler.retry_window_end_hour
            || self.scheduler.retry_window_end_hour > 23
        {
            return Err(ConfigError::Message(format!(
                "invalid retry window {}..={}",
                self.scheduler.retry_window_start_hour, self.scheduler.retry_window_end_hour
            )));
        }
        self.scheduler.tz()?;
        self.scheduler.end_of_day_time()?;
        Ok(())
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.queue.concurrency, 5);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.followup.max_attempts, 3);
        assert_eq!(config.followup.inter_call_delay(), Duration::from_secs(2));
        assert!(config.database.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policies_from_config() {
        let config = AppConfig::default();
        assert_eq!(config.queue.backoff().delay_for(2), Duration::from_secs(120));
        assert_eq!(
            config.followup.retry_policy().delay_for(1),
            Duration::from_secs(6 * 3600)
        );
    }

    #[test]
    fn test_scheduler_parsing() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.tz().unwrap(), chrono_tz::Africa::Accra);
        assert_eq!(
            scheduler.end_of_day_time().unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap()
        );

        let bad = SchedulerConfig {
            end_of_day: "4pm".to_string(),
            ..SchedulerConfig::default()
        };
        assert!(bad.end_of_day_time().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_window() {
        let mut config = AppConfig::default();
        config.scheduler.retry_window_start_hour = 19;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.queue.concurrency = 0;
        assert!(config.validate().is_err());
    }
}
