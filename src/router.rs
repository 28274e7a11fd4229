//! Event routing.
//!
//! The router owns every guild's [`GuildContext`], runs inbound events
//! through the detectors, carries out the single-actor remediations a verdict
//! asks for and then, if asked, enters lockdown. Admin commands land here
//! too.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};

use crate::backup::{restore_snapshot, take_snapshot, BackupService};
use crate::commands::is_confirmation;
use crate::detectors::{Detectors, Remediation, Verdict};
use crate::error::{ActionResult, ErrorContext, RaidGuardError, Result};
use crate::guild::GuildContext;
use crate::lockdown::{LockdownEngine, LockdownOutcome};
use crate::models::{CommandKind, Event, LockdownReason};
use crate::platform::Platform;

/// How long a restore waits for the admin's confirmation.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EventRouter {
    platform: Arc<dyn Platform>,
    detectors: Detectors,
    lockdown: LockdownEngine,
    backups: BackupService,
    guilds: DashMap<GuildId, Arc<GuildContext>>,
    confirm_timeout: Duration,
}

impl EventRouter {
    pub fn new(detectors: Detectors, lockdown: LockdownEngine, backups: BackupService) -> Self {
        Self {
            platform: lockdown.platform().clone(),
            detectors,
            lockdown,
            backups,
            guilds: DashMap::new(),
            confirm_timeout: CONFIRM_TIMEOUT,
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// The context for a guild, created on first use.
    pub fn guild(&self, guild_id: GuildId) -> Arc<GuildContext> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(GuildContext::new(
                    guild_id,
                    self.detectors.config().windows.clone(),
                ))
            })
            .clone()
    }

    /// Route one event. Returns the detector verdict for detection events,
    /// `None` for commands and intercepted confirmations.
    pub async fn route(&self, event: Event) -> Option<Verdict> {
        let guild = self.guild(event.guild_id());

        match event {
            Event::ChannelCreated {
                id,
                name,
                timestamp,
                ..
            } => {
                let verdict = self.detectors.channel_created(
                    &guild.windows,
                    &guild.emergency,
                    guild.guild_id,
                    id,
                    &name,
                    timestamp,
                );
                if verdict != Verdict::Allow {
                    tracing::warn!(guild_id = %guild.guild_id, channel_id = %id, name = %name, "Suspicious channel creation");
                }
                self.apply(&guild, &verdict).await;
                Some(verdict)
            }
            Event::MemberJoined {
                id,
                is_automated,
                joined_at,
                ..
            } => {
                let verdict = self.detectors.member_joined(
                    &guild.windows,
                    guild.guild_id,
                    id,
                    is_automated,
                    joined_at,
                );
                self.apply(&guild, &verdict).await;
                Some(verdict)
            }
            Event::MessagePosted {
                author_id,
                is_automated,
                channel_id,
                message_id,
                content,
                author_can_mention_everyone,
                timestamp,
                ..
            } => {
                if !is_automated
                    && guild.has_pending_confirmation(author_id)
                    && is_confirmation(&content)
                {
                    guild.confirm(author_id);
                    return None;
                }

                let verdict = self.detectors.message_posted(
                    &guild.windows,
                    self.platform.current_user_id(),
                    author_id,
                    is_automated,
                    channel_id,
                    message_id,
                    &content,
                    author_can_mention_everyone,
                    timestamp,
                );
                self.apply(&guild, &verdict).await;
                Some(verdict)
            }
            Event::ManualCommand {
                kind,
                actor_id,
                channel_id,
                ..
            } => {
                let context = ErrorContext::new(kind.name())
                    .with_user_id(actor_id.get())
                    .with_guild_id(guild.guild_id.get());
                if let Err(e) = self.handle_command(&guild, kind, actor_id, channel_id).await {
                    e.log_with_context(&context);
                }
                None
            }
        }
    }

    /// Remediation first, then lockdown. Remediations run even while locked.
    async fn apply(&self, guild: &GuildContext, verdict: &Verdict) -> Option<LockdownOutcome> {
        match verdict {
            Verdict::Allow => None,
            Verdict::Remediate(remediations) => {
                for remediation in remediations {
                    self.remediate(guild.guild_id, remediation).await;
                }
                None
            }
            Verdict::Lockdown {
                reason,
                remediation,
            } => {
                self.remediate(guild.guild_id, remediation).await;
                Some(self.lockdown.enter(guild, *reason).await)
            }
        }
    }

    async fn remediate(&self, guild_id: GuildId, remediation: &Remediation) {
        match self.execute(guild_id, remediation).await {
            Ok(()) => {
                tracing::info!(guild_id = %guild_id, remediation = ?remediation, "Remediation applied");
            }
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, remediation = ?remediation, error = %e, "Remediation failed");
            }
        }
    }

    async fn execute(&self, guild_id: GuildId, remediation: &Remediation) -> ActionResult<()> {
        match remediation {
            Remediation::DeleteChannel { channel_id } => {
                self.platform.delete_channel(*channel_id).await
            }
            Remediation::Ban { user_id, reason } => {
                self.platform.ban(guild_id, *user_id, reason).await
            }
            Remediation::Timeout {
                user_id,
                duration,
                reason,
            } => {
                self.platform
                    .timeout(guild_id, *user_id, *duration, reason)
                    .await
            }
            Remediation::DeleteMessage {
                channel_id,
                message_id,
            } => self.platform.delete_message(*channel_id, *message_id).await,
        }
    }

    async fn handle_command(
        &self,
        guild: &GuildContext,
        kind: CommandKind,
        actor_id: UserId,
        channel_id: ChannelId,
    ) -> Result<()> {
        tracing::info!(guild_id = %guild.guild_id, user_id = %actor_id, command = kind.name(), "Admin command");

        match kind {
            CommandKind::Lockdown => {
                if let LockdownOutcome::AlreadyLocked =
                    self.lockdown.enter(guild, LockdownReason::Manual).await
                {
                    self.reply(channel_id, "⚠️ Raid mode is already active.")
                        .await;
                }
            }
            CommandKind::Unlock => {
                self.lockdown.exit(guild);
                self.reply(
                    channel_id,
                    "🔓 Raid mode deactivated. You can now restore your server manually.",
                )
                .await;
            }
            CommandKind::EmergencyChannels => {
                self.reply(channel_id, "🚨 Creating emergency channels...")
                    .await;
                self.lockdown.create_emergency_channels(guild).await;
            }
            CommandKind::BanAllBots => {
                let report = self.lockdown.ban_all_bots(guild.guild_id).await;
                self.reply(
                    channel_id,
                    &format!("✅ Banned {} bots!", report.succeeded()),
                )
                .await;
            }
            CommandKind::Backup => {
                let record = match take_snapshot(self.platform.as_ref(), guild.guild_id).await {
                    Ok(snapshot) => self.backups.write(&snapshot).await,
                    Err(e) => Err(e),
                };
                match record {
                    Ok(record) => {
                        self.reply(
                            channel_id,
                            &format!("✅ Backup saved: `{}`", record.file_name),
                        )
                        .await;
                    }
                    Err(e) => {
                        self.reply(
                            channel_id,
                            &format!("❌ Backup failed: {}", e.user_message()),
                        )
                        .await;
                        return Err(e);
                    }
                }
            }
            CommandKind::Restore => self.restore(guild, actor_id, channel_id).await?,
        }
        Ok(())
    }

    async fn restore(
        &self,
        guild: &GuildContext,
        actor_id: UserId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let Some(snapshot) = self.backups.latest(guild.guild_id).await? else {
            self.reply(channel_id, "❌ No backup found for this server.")
                .await;
            return Ok(());
        };

        let confirmation = guild.await_confirmation(actor_id);
        self.reply(
            channel_id,
            &format!(
                "⚠️ Restore **{}** from the backup taken {}? Reply `confirm` within {} seconds.",
                snapshot.guild_name,
                snapshot.taken_at.format("%Y-%m-%d %H:%M UTC"),
                self.confirm_timeout.as_secs()
            ),
        )
        .await;

        match tokio::time::timeout(self.confirm_timeout, confirmation).await {
            Ok(Ok(())) => {}
            _ => {
                guild.drop_confirmation(actor_id);
                self.reply(channel_id, "❌ Restore cancelled.").await;
                return Err(RaidGuardError::RestoreCancelled(
                    "no confirmation received".to_string(),
                ));
            }
        }

        self.reply(channel_id, "♻️ Restoring server from backup...")
            .await;
        let report = restore_snapshot(self.platform.as_ref(), guild.guild_id, &snapshot).await;
        guild.emergency.clear();

        self.reply(
            channel_id,
            &format!(
                "✅ Restored {} roles, {} channels and {} emojis ({} failed).",
                report.roles_created,
                report.channels_created,
                report.emojis_created,
                report.failures()
            ),
        )
        .await;
        Ok(())
    }

    /// Post a plain acknowledgment. The channel may be gone by now.
    pub async fn reply(&self, channel_id: ChannelId, content: &str) {
        if let Err(e) = self.platform.send_message(channel_id, content, None).await {
            tracing::debug!(channel_id = %channel_id, error = %e, "Failed to send reply");
        }
    }
}
