//! Guild backup and restore.
//!
//! A snapshot is the guild's structure (name, roles, channel layout, emojis)
//! written as one JSON document per snapshot. Restore recreates that
//! structure on a live guild and counts what it managed to create.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{RaidGuardError, Result};
use crate::models::ChannelKind;
use crate::platform::Platform;

/// Default auto-backup period.
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(21 * 24 * 60 * 60);

/// A role as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub id: u64,
    pub name: String,
    pub color: u32,
    pub permissions: u64,
    pub hoist: bool,
    pub mentionable: bool,
}

/// Who a permission overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OverwriteTarget {
    Role(u64),
    Member(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteSnapshot {
    pub target: OverwriteTarget,
    pub allow: u64,
    pub deny: u64,
}

/// A channel as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub id: u64,
    pub name: String,
    pub kind: ChannelKind,
    pub position: u16,
    pub overwrites: Vec<OverwriteSnapshot>,
    pub parent_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiSnapshot {
    pub name: String,
    pub url: String,
}

/// Point-in-time structure of one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub guild_id: u64,
    pub guild_name: String,
    pub taken_at: DateTime<Utc>,
    pub roles: Vec<RoleSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
    pub emojis: Vec<EmojiSnapshot>,
}

impl BackupSnapshot {
    /// `backup_<guild>_<YYYYmmdd_HHMMSS>.json`
    pub fn file_name(&self) -> String {
        format!(
            "backup_{}_{}.json",
            self.guild_id,
            self.taken_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Capture the current structure of a guild.
pub async fn take_snapshot(platform: &dyn Platform, guild_id: GuildId) -> Result<BackupSnapshot> {
    let guild_name = platform.guild_name(guild_id).await?;
    let roles = platform.list_roles(guild_id).await?;
    let channels = platform.list_channel_layout(guild_id).await?;
    let emojis = platform.list_emojis(guild_id).await?;

    Ok(BackupSnapshot {
        guild_id: guild_id.get(),
        guild_name,
        taken_at: Utc::now(),
        roles,
        channels,
        emojis,
    })
}

/// Metadata for a written snapshot.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub sha256: String,
    pub taken_at: DateTime<Utc>,
}

/// Reads and writes snapshot files under one directory.
#[derive(Debug, Clone)]
pub struct BackupService {
    backup_dir: PathBuf,
}

impl BackupService {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Write a snapshot, then read it back and verify it before reporting
    /// success. Existing files are never overwritten.
    pub async fn write(&self, snapshot: &BackupSnapshot) -> Result<BackupRecord> {
        fs::create_dir_all(&self.backup_dir).await.map_err(|e| {
            RaidGuardError::Backup(format!("Failed to create backup directory: {}", e))
        })?;

        let file_name = snapshot.file_name();
        let path = self.backup_dir.join(&file_name);
        let body = serde_json::to_vec_pretty(snapshot)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                RaidGuardError::Backup(format!("Failed to create {}: {}", path.display(), e))
            })?;
        file.write_all(&body)
            .await
            .map_err(|e| RaidGuardError::Io(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| RaidGuardError::Io(e.to_string()))?;

        let sha256 = self.verify(&path, snapshot).await?;

        tracing::info!(
            guild_id = snapshot.guild_id,
            file = %file_name,
            bytes = body.len(),
            sha256 = %sha256,
            "Backup written"
        );

        Ok(BackupRecord {
            path,
            file_name,
            file_size: body.len() as u64,
            sha256,
            taken_at: snapshot.taken_at,
        })
    }

    /// Re-read a written file, check it parses back to the same snapshot and
    /// return its SHA-256 digest.
    async fn verify(&self, path: &Path, expected: &BackupSnapshot) -> Result<String> {
        let bytes = fs::read(path).await.map_err(|e| {
            RaidGuardError::Backup(format!("Failed to read back {}: {}", path.display(), e))
        })?;

        let parsed: BackupSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
            RaidGuardError::Backup(format!("Backup verification failed: {}", e))
        })?;
        if &parsed != expected {
            return Err(RaidGuardError::Backup(format!(
                "Backup verification failed: {} does not match the snapshot",
                path.display()
            )));
        }

        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    pub async fn load(&self, path: &Path) -> Result<BackupSnapshot> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| RaidGuardError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The newest snapshot for a guild, if any.
    pub async fn latest(&self, guild_id: GuildId) -> Result<Option<BackupSnapshot>> {
        let prefix = format!("backup_{}_", guild_id.get());

        let mut entries = match fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RaidGuardError::Io(e.to_string())),
        };

        // The timestamp format sorts lexicographically.
        let mut newest: Option<String> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RaidGuardError::Io(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix)
                && name.ends_with(".json")
                && newest.as_ref().map_or(true, |n| name > *n)
            {
                newest = Some(name);
            }
        }

        match newest {
            Some(name) => Ok(Some(self.load(&self.backup_dir.join(name)).await?)),
            None => Ok(None),
        }
    }
}

/// Counts of what a restore created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub renamed: bool,
    pub roles_created: usize,
    pub roles_failed: usize,
    pub channels_created: usize,
    pub channels_failed: usize,
    pub emojis_created: usize,
    pub emojis_failed: usize,
}

impl RestoreReport {
    pub fn failures(&self) -> usize {
        self.roles_failed + self.channels_failed + self.emojis_failed
    }
}

/// Recreate a snapshot's structure on a live guild.
///
/// Roles first, then categories, then the remaining channels with parents
/// and role overwrites remapped to the new ids, then emojis. Every item is
/// attempted once; failures are counted.
pub async fn restore_snapshot(
    platform: &dyn Platform,
    guild_id: GuildId,
    snapshot: &BackupSnapshot,
) -> RestoreReport {
    let mut report = RestoreReport::default();

    match platform.set_guild_name(guild_id, &snapshot.guild_name).await {
        Ok(()) => report.renamed = true,
        Err(e) => tracing::warn!(guild_id = %guild_id, error = %e, "Failed to restore guild name"),
    }

    // The default role's id is the guild id.
    let mut role_map: HashMap<u64, u64> = HashMap::new();
    role_map.insert(snapshot.guild_id, guild_id.get());

    for role in &snapshot.roles {
        match platform.create_role(guild_id, role).await {
            Ok(new_id) => {
                role_map.insert(role.id, new_id.get());
                report.roles_created += 1;
            }
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, role = %role.name, error = %e, "Failed to restore role");
                report.roles_failed += 1;
            }
        }
    }

    let (mut categories, mut others): (Vec<&ChannelSnapshot>, Vec<&ChannelSnapshot>) = snapshot
        .channels
        .iter()
        .partition(|c| c.kind == ChannelKind::Category);
    categories.sort_by_key(|c| c.position);
    others.sort_by_key(|c| c.position);

    let mut category_map: HashMap<u64, ChannelId> = HashMap::new();
    for channel in categories.into_iter().chain(others) {
        let parent = channel
            .parent_id
            .and_then(|old| category_map.get(&old).copied());
        let remapped = remap_overwrites(channel, &role_map);

        match platform.create_channel(guild_id, &remapped, parent).await {
            Ok(new_id) => {
                if channel.kind == ChannelKind::Category {
                    category_map.insert(channel.id, new_id);
                }
                report.channels_created += 1;
            }
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, channel = %channel.name, error = %e, "Failed to restore channel");
                report.channels_failed += 1;
            }
        }
    }

    for emoji in &snapshot.emojis {
        match platform.create_emoji(guild_id, emoji).await {
            Ok(()) => report.emojis_created += 1,
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, emoji = %emoji.name, error = %e, "Failed to restore emoji");
                report.emojis_failed += 1;
            }
        }
    }

    tracing::info!(
        guild_id = %guild_id,
        roles = report.roles_created,
        channels = report.channels_created,
        emojis = report.emojis_created,
        failures = report.failures(),
        "Restore finished"
    );

    report
}

/// Role overwrites pointing at roles that were not recreated are dropped.
fn remap_overwrites(channel: &ChannelSnapshot, role_map: &HashMap<u64, u64>) -> ChannelSnapshot {
    let overwrites = channel
        .overwrites
        .iter()
        .filter_map(|o| match o.target {
            OverwriteTarget::Role(old) => role_map.get(&old).map(|new| OverwriteSnapshot {
                target: OverwriteTarget::Role(*new),
                ..o.clone()
            }),
            OverwriteTarget::Member(_) => Some(o.clone()),
        })
        .collect();

    ChannelSnapshot {
        overwrites,
        ..channel.clone()
    }
}

/// Snapshot every connected guild. Per-guild failures are logged.
pub async fn backup_all_guilds(platform: &dyn Platform, service: &BackupService) -> usize {
    let guilds = match platform.list_guilds().await {
        Ok(guilds) => guilds,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list guilds for auto-backup");
            return 0;
        }
    };

    let mut written = 0;
    for guild_id in guilds {
        let result = match take_snapshot(platform, guild_id).await {
            Ok(snapshot) => service.write(&snapshot).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => written += 1,
            Err(e) => tracing::error!(guild_id = %guild_id, error = %e, "Auto-backup failed"),
        }
    }
    written
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic backup of every connected guild, started when the gateway is
/// ready and stopped on shutdown.
pub struct AutoBackup {
    platform: Arc<dyn Platform>,
    service: BackupService,
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl AutoBackup {
    pub fn new(platform: Arc<dyn Platform>, service: BackupService, period: Duration) -> Self {
        Self {
            platform,
            service,
            period,
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop. A no-op if it is already running, so reconnects do
    /// not stack loops. The first pass runs immediately.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let platform = self.platform.clone();
        let service = self.service.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let written = backup_all_guilds(platform.as_ref(), &service).await;
                        tracing::info!(written, "Auto-backup pass complete");
                    }
                    // Any change, or a dropped sender, means stop.
                    _ = rx.changed() => break,
                }
            }
            tracing::info!("Auto-backup stopped");
        });

        tracing::info!(period_days = period.as_secs() / 86_400, "Auto-backup started");
        *running = Some(Running {
            shutdown: tx,
            handle,
        });
    }

    /// Signal the loop to stop and wait for it.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Auto-backup task failed");
        }
    }

    #[cfg(test)]
    async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{Call, MockPlatform};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn guild() -> GuildId {
        GuildId::new(42)
    }

    fn sample_snapshot(at: DateTime<Utc>) -> BackupSnapshot {
        BackupSnapshot {
            guild_id: 42,
            guild_name: "Guild".to_string(),
            taken_at: at,
            roles: vec![RoleSnapshot {
                id: 500,
                name: "Mods".to_string(),
                color: 0xff0000,
                permissions: 8,
                hoist: true,
                mentionable: false,
            }],
            channels: vec![
                ChannelSnapshot {
                    id: 2,
                    name: "general".to_string(),
                    kind: ChannelKind::Text,
                    position: 0,
                    overwrites: vec![
                        OverwriteSnapshot {
                            target: OverwriteTarget::Role(500),
                            allow: 1024,
                            deny: 0,
                        },
                        OverwriteSnapshot {
                            target: OverwriteTarget::Role(777),
                            allow: 0,
                            deny: 2048,
                        },
                    ],
                    parent_id: Some(1),
                },
                ChannelSnapshot {
                    id: 1,
                    name: "Text".to_string(),
                    kind: ChannelKind::Category,
                    position: 0,
                    overwrites: Vec::new(),
                    parent_id: None,
                },
            ],
            emojis: vec![EmojiSnapshot {
                name: "wave".to_string(),
                url: "https://cdn.example/emojis/1.png".to_string(),
            }],
        }
    }

    #[test]
    fn file_name_embeds_guild_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            sample_snapshot(at).file_name(),
            "backup_42_20240309_140507.json"
        );
    }

    #[tokio::test]
    async fn write_verifies_and_digests() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());
        let snapshot = sample_snapshot(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let record = service.write(&snapshot).await.unwrap();

        assert_eq!(record.file_name, "backup_42_20240101_000000.json");
        assert_eq!(record.sha256.len(), 64);
        let on_disk = std::fs::read(&record.path).unwrap();
        assert_eq!(record.file_size, on_disk.len() as u64);
        assert_eq!(hex::encode(Sha256::digest(&on_disk)), record.sha256);
    }

    #[tokio::test]
    async fn write_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());
        let snapshot = sample_snapshot(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        service.write(&snapshot).await.unwrap();
        let second = service.write(&snapshot).await;

        assert!(matches!(second, Err(RaidGuardError::Backup(_))));
    }

    #[tokio::test]
    async fn latest_picks_newest_for_guild() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());
        let older = sample_snapshot(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut newer = sample_snapshot(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        newer.guild_name = "Renamed".to_string();
        let mut other = sample_snapshot(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        other.guild_id = 43;

        service.write(&older).await.unwrap();
        service.write(&newer).await.unwrap();
        service.write(&other).await.unwrap();

        let latest = service.latest(guild()).await.unwrap().unwrap();
        assert_eq!(latest.guild_name, "Renamed");
    }

    #[tokio::test]
    async fn latest_without_backups_is_none() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path().join("missing"));
        assert!(service.latest(guild()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_reads_platform_structure() {
        let platform = MockPlatform::new();
        let expected = sample_snapshot(Utc::now());
        *platform.roles.lock().unwrap() = expected.roles.clone();
        *platform.layout.lock().unwrap() = expected.channels.clone();
        *platform.emojis.lock().unwrap() = expected.emojis.clone();

        let snapshot = take_snapshot(&platform, guild()).await.unwrap();

        assert_eq!(snapshot.guild_id, 42);
        assert_eq!(snapshot.guild_name, "Test Guild");
        assert_eq!(snapshot.roles, expected.roles);
        assert_eq!(snapshot.channels.len(), 2);
        assert_eq!(snapshot.emojis.len(), 1);
    }

    #[tokio::test]
    async fn restore_creates_categories_before_children() {
        let platform = MockPlatform::new();
        let snapshot = sample_snapshot(Utc::now());

        let report = restore_snapshot(&platform, guild(), &snapshot).await;

        assert!(report.renamed);
        assert_eq!(report.roles_created, 1);
        assert_eq!(report.channels_created, 2);
        assert_eq!(report.emojis_created, 1);
        assert_eq!(report.failures(), 0);

        let calls = platform.calls();
        let category_at = calls
            .iter()
            .position(|c| matches!(c, Call::CreateChannel(n, None) if n == "Text"))
            .unwrap();
        let child_at = calls
            .iter()
            .position(|c| matches!(c, Call::CreateChannel(n, Some(_)) if n == "general"))
            .unwrap();
        assert!(category_at < child_at);
        assert_eq!(calls[0], Call::SetGuildName("Guild".to_string()));
        assert_eq!(calls[1], Call::CreateRole("Mods".to_string()));
    }

    #[test]
    fn overwrites_follow_new_role_ids() {
        let snapshot = sample_snapshot(Utc::now());
        let mut role_map = HashMap::new();
        role_map.insert(500, 9_000);

        let remapped = remap_overwrites(&snapshot.channels[0], &role_map);

        assert_eq!(remapped.overwrites.len(), 1);
        assert_eq!(remapped.overwrites[0].target, OverwriteTarget::Role(9_000));
        assert_eq!(remapped.overwrites[0].allow, 1024);
    }

    #[test]
    fn overwrite_target_serializes_tagged() {
        let json = serde_json::to_string(&OverwriteTarget::Member(7)).unwrap();
        assert_eq!(json, r#"{"type":"member","id":7}"#);
    }

    #[tokio::test]
    async fn backs_up_every_connected_guild() {
        let dir = TempDir::new().unwrap();
        let service = BackupService::new(dir.path());
        let platform = MockPlatform::new();
        *platform.guilds.lock().unwrap() = vec![GuildId::new(1), GuildId::new(2)];

        let written = backup_all_guilds(&platform, &service).await;

        assert_eq!(written, 2);
        assert!(service.latest(GuildId::new(1)).await.unwrap().is_some());
        assert!(service.latest(GuildId::new(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn auto_backup_starts_once_and_stops() {
        let dir = TempDir::new().unwrap();
        let platform = Arc::new(MockPlatform::new());
        let auto = AutoBackup::new(
            platform,
            BackupService::new(dir.path()),
            Duration::from_secs(3600),
        );

        auto.start().await;
        auto.start().await;
        assert!(auto.is_running().await);

        auto.stop().await;
        assert!(!auto.is_running().await);
        // Stopping twice is harmless.
        auto.stop().await;
    }
}
