use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::providers::youtube;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub host: IpAddr,
    pub port: u16,
    pub max_body_size: usize,
    pub api_token: Option<String>,
    pub log_level: String,
    pub asset_dir: PathBuf,
    pub schedule: ScheduleConfig,
    pub groq: Option<GroqConfig>,
    pub youtube: Option<YoutubeConfig>,
}

/// Knobs of the daily scheduler.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub max_uploads_per_day: u32,
    pub tick_interval: Duration,
    pub retry_ceiling: i32,
    pub utc_offset: FixedOffset,
    /// Ceiling for one metadata generation call.
    pub metadata_timeout: Duration,
    /// Ceiling for one publish call. Never below the publisher's HTTP timeout.
    pub publish_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_uploads_per_day: 6,
            tick_interval: Duration::from_secs(30 * 60),
            retry_ceiling: 3,
            utc_offset: FixedOffset::east_opt(7 * 3600).unwrap_or(Utc.fix()),
            metadata_timeout: Duration::from_secs(300),
            publish_timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct YoutubeConfig {
    pub access_token: String,
    pub category: String,
    pub privacy: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let host: IpAddr = env_or("VIDQUEUE_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid VIDQUEUE_HOST: {e}"))?;

        let port: u16 = env_or("VIDQUEUE_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid VIDQUEUE_PORT: {e}"))?;

        let max_body_size: usize = env_or("VIDQUEUE_MAX_BODY_SIZE", "2147483648")
            .parse()
            .map_err(|e| format!("Invalid VIDQUEUE_MAX_BODY_SIZE: {e}"))?;

        let api_token = std::env::var("VIDQUEUE_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());

        let log_level = env_or("VIDQUEUE_LOG_LEVEL", "info");
        let asset_dir = PathBuf::from(env_or("VIDQUEUE_ASSET_DIR", "./assets"));

        let max_uploads_per_day: u32 = env_or("MAX_UPLOADS_PER_DAY", "6")
            .parse()
            .map_err(|e| format!("Invalid MAX_UPLOADS_PER_DAY: {e}"))?;

        let tick_minutes: u64 = env_or("TICK_INTERVAL_MINUTES", "30")
            .parse()
            .map_err(|e| format!("Invalid TICK_INTERVAL_MINUTES: {e}"))?;
        if tick_minutes == 0 {
            return Err("TICK_INTERVAL_MINUTES must be at least 1".to_string());
        }

        let retry_ceiling: i32 = env_or("RETRY_CEILING", "3")
            .parse()
            .map_err(|e| format!("Invalid RETRY_CEILING: {e}"))?;
        if retry_ceiling < 1 {
            return Err("RETRY_CEILING must be at least 1".to_string());
        }

        let offset_hours: i32 = env_or("SCHEDULE_UTC_OFFSET_HOURS", "7")
            .parse()
            .map_err(|e| format!("Invalid SCHEDULE_UTC_OFFSET_HOURS: {e}"))?;
        let utc_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| format!("SCHEDULE_UTC_OFFSET_HOURS out of range: {offset_hours}"))?;

        let metadata_secs: u64 = env_or("METADATA_TIMEOUT_SECS", "300")
            .parse()
            .map_err(|e| format!("Invalid METADATA_TIMEOUT_SECS: {e}"))?;

        let publish_secs: u64 = env_or("PUBLISH_TIMEOUT_SECS", "3600")
            .parse()
            .map_err(|e| format!("Invalid PUBLISH_TIMEOUT_SECS: {e}"))?;
        let publish_timeout = Duration::from_secs(publish_secs);
        if publish_timeout < youtube::CLIENT_TIMEOUT {
            return Err(format!(
                "PUBLISH_TIMEOUT_SECS must be at least {}",
                youtube::CLIENT_TIMEOUT.as_secs()
            ));
        }

        let groq = std::env::var("GROQ_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|api_key| GroqConfig {
                api_key,
                model: env_or("GROQ_MODEL", "llama-3.3-70b-versatile"),
                base_url: env_or("GROQ_BASE_URL", "https://api.groq.com/openai/v1"),
            });

        let youtube = std::env::var("YOUTUBE_ACCESS_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|access_token| YoutubeConfig {
                access_token,
                category: env_or("YOUTUBE_CATEGORY", "22"),
                privacy: env_or("YOUTUBE_PRIVACY", "public"),
            });

        Ok(Config {
            database_url,
            host,
            port,
            max_body_size,
            api_token,
            log_level,
            asset_dir,
            schedule: ScheduleConfig {
                max_uploads_per_day,
                tick_interval: Duration::from_secs(tick_minutes * 60),
                retry_ceiling,
                utc_offset,
                metadata_timeout: Duration::from_secs(metadata_secs),
                publish_timeout,
            },
            groq,
            youtube,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
