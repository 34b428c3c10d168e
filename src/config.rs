//! Runtime configuration loaded from the environment.
//!
//! Every knob has a default so a bare `vodvault` invocation works against a
//! local SQLite file. `.env` files are honored via dotenvy in `main`.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL.
    pub database_url: String,
    /// Final archive root; completed VODs are moved here.
    pub archive_root: PathBuf,
    /// Scratch area for in-progress downloads and renders.
    pub temp_root: PathBuf,
    /// Base URL of the external catalog/platform API.
    pub platform_api_url: String,
    /// Dispatcher scan interval.
    pub scan_interval: Duration,
    /// check_live polling interval.
    pub live_check_interval: Duration,
    /// check_vod polling interval.
    pub vod_check_interval: Duration,
    /// queue_hold_check interval.
    pub hold_check_interval: Duration,
    /// Worker pool size capping simultaneous downloads/renders.
    pub max_workers: usize,
    /// Per-stage execution timeout.
    pub stage_timeout: Duration,
    /// Minimum free space on the archive volume before held items are
    /// released.
    pub min_free_bytes: u64,
    /// Video downloader command template ({url}, {output}).
    pub video_download_cmd: String,
    /// Chat downloader command template ({url}, {output}).
    pub chat_download_cmd: String,
    /// Chat renderer command template ({input}, {output}).
    pub chat_render_cmd: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::config(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: env_or("DATABASE_URL", "sqlite:vodvault.db?mode=rwc"),
            archive_root: PathBuf::from(env_or("ARCHIVE_ROOT", "/data/archive")),
            temp_root: PathBuf::from(env_or("TEMP_ROOT", "/data/tmp")),
            platform_api_url: env_or("PLATFORM_API_URL", "http://localhost:4000"),
            scan_interval: Duration::from_secs(env_parse("SCAN_INTERVAL_SECS", 10u64)?),
            live_check_interval: Duration::from_secs(env_parse("LIVE_CHECK_INTERVAL_SECS", 60u64)?),
            vod_check_interval: Duration::from_secs(env_parse("VOD_CHECK_INTERVAL_SECS", 300u64)?),
            hold_check_interval: Duration::from_secs(
                env_parse("HOLD_CHECK_INTERVAL_SECS", 300u64)?,
            ),
            max_workers: env_parse("MAX_WORKERS", 4usize)?,
            stage_timeout: Duration::from_secs(env_parse("STAGE_TIMEOUT_SECS", 6 * 3600u64)?),
            min_free_bytes: env_parse("MIN_FREE_BYTES", 10u64 * 1024 * 1024 * 1024)?,
            video_download_cmd: env_or(
                "VIDEO_DOWNLOAD_CMD",
                "yt-dlp --continue --no-part -o {output} {url}",
            ),
            chat_download_cmd: env_or(
                "CHAT_DOWNLOAD_CMD",
                "chat-downloader --output {output} {url}",
            ),
            chat_render_cmd: env_or("CHAT_RENDER_CMD", "chat-render -i {input} -o {output}"),
        };

        if config.max_workers == 0 {
            return Err(Error::config("MAX_WORKERS must be at least 1"));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Only assert values no test environment overrides.
        let config = Config::from_env().unwrap();
        assert!(config.max_workers >= 1);
        assert!(config.video_download_cmd.contains("{output}"));
        assert!(config.chat_render_cmd.contains("{input}"));
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        // SAFETY: test-local env mutation, no concurrent readers of this key.
        unsafe { std::env::set_var("VODVAULT_TEST_BAD_NUMBER", "not-a-number") };
        let result: Result<u64> = env_parse("VODVAULT_TEST_BAD_NUMBER", 1);
        assert!(result.is_err());
        unsafe { std::env::remove_var("VODVAULT_TEST_BAD_NUMBER") };
    }
}
