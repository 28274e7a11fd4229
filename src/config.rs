//! Configuration loading from environment.
//!
//! Reads the token and operational settings from environment variables and
//! supports overriding the raid keyword list from a file or a variable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::DEFAULT_BACKUP_INTERVAL;
use crate::detectors::{DetectionConfig, DEFAULT_RAID_KEYWORDS};
use crate::error::{RaidGuardError, Result};
use crate::fanout::DEFAULT_CONCURRENCY;
use crate::recovery::RecoveryDelays;

pub const DEFAULT_COMMAND_PREFIX: &str = "!";
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_BACKUP_DIR: &str = "backups";

/// Main configuration for the bot.
#[derive(Debug, Clone)]
pub struct RaidGuardConfig {
    /// Discord bot token.
    pub discord_token: String,
    /// Prefix for admin commands.
    pub command_prefix: String,
    /// Port for the health endpoint.
    pub health_port: u16,
    /// Directory holding backup snapshots.
    pub backup_dir: PathBuf,
    /// Auto-backup period.
    pub backup_interval: Duration,
    /// Channel-name keywords that trigger lockdown.
    pub raid_keywords: Vec<String>,
    /// Platform calls in flight per fan-out.
    pub fanout_concurrency: usize,
    pub detection: DetectionConfig,
    pub recovery: RecoveryDelays,
}

impl RaidGuardConfig {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `DISCORD_TOKEN`: Discord bot token
    ///
    /// Optional environment variables:
    /// - `COMMAND_PREFIX`: Admin command prefix (default: `!`)
    /// - `HEALTH_PORT`: Health endpoint port (default: 8080)
    /// - `BACKUP_DIR`: Snapshot directory (default: `backups`)
    /// - `BACKUP_INTERVAL_DAYS`: Auto-backup period (default: 21)
    /// - `RAID_KEYWORDS_PATH`: Path to a JSON list of keywords
    /// - `RAID_KEYWORDS`: Comma-separated keywords
    /// - `FANOUT_CONCURRENCY`: Concurrent bans/deletions (default: 16)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| RaidGuardError::Config("DISCORD_TOKEN not set".to_string()))?;

        let command_prefix = lookup("COMMAND_PREFIX")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COMMAND_PREFIX.to_string());

        let health_port = lookup("HEALTH_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HEALTH_PORT);

        let backup_dir = lookup("BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));

        let backup_interval = lookup("BACKUP_INTERVAL_DAYS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|days| *days > 0)
            .map(|days| Duration::from_secs(days * 24 * 60 * 60))
            .unwrap_or(DEFAULT_BACKUP_INTERVAL);

        let fanout_concurrency = lookup("FANOUT_CONCURRENCY")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_CONCURRENCY);

        let raid_keywords = load_raid_keywords(&lookup)?;

        Ok(Self {
            discord_token,
            command_prefix,
            health_port,
            backup_dir,
            backup_interval,
            raid_keywords,
            fanout_concurrency,
            detection: DetectionConfig::default(),
            recovery: RecoveryDelays::default(),
        })
    }
}

/// Load raid keywords from file or environment, falling back to defaults.
fn load_raid_keywords(lookup: &impl Fn(&str) -> Option<String>) -> Result<Vec<String>> {
    if let Some(path) = lookup("RAID_KEYWORDS_PATH") {
        return load_keywords_from_file(Path::new(&path));
    }

    if let Some(list) = lookup("RAID_KEYWORDS") {
        let keywords = parse_keyword_list(&list);
        if keywords.is_empty() {
            return Err(RaidGuardError::Config(
                "RAID_KEYWORDS is set but empty".to_string(),
            ));
        }
        return Ok(keywords);
    }

    Ok(DEFAULT_RAID_KEYWORDS.iter().map(|k| k.to_string()).collect())
}

/// Load keywords from a JSON array of strings.
fn load_keywords_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| RaidGuardError::Config(format!("Failed to read keywords file: {}", e)))?;

    let keywords: Vec<String> = serde_json::from_str(&content)
        .map_err(|e| RaidGuardError::Config(format!("Failed to parse keywords file: {}", e)))?;

    let keywords: Vec<String> = keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Err(RaidGuardError::Config("Keywords file is empty".to_string()));
    }
    Ok(keywords)
}

/// Parse a comma-separated keyword list.
fn parse_keyword_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_keyword_list_parsing(keywords in prop::collection::vec("[a-z.]{1,12}", 1..10)) {
            let parsed = parse_keyword_list(&keywords.join(","));
            prop_assert_eq!(parsed, keywords);
        }
    }
}
