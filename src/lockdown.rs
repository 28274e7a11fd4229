//! Guild lockdown.
//!
//! Entering lockdown is guarded by the guild's [`LockdownFlag`]: only the
//! first trigger runs the sequence (recent-bot ban, webhook purge, recovery);
//! every later trigger is a no-op until an admin resets the flag.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serenity::model::id::{GuildId, UserId, WebhookId};
use uuid::Uuid;

use crate::fanout::{fan_out, BatchReport, DEFAULT_CONCURRENCY};
use crate::guild::GuildContext;
use crate::models::LockdownReason;
use crate::platform::Platform;
use crate::recovery::{RecoveryReport, RecoverySequencer};

/// Bots that joined more recently than this are banned on lockdown.
pub const RECENT_BOT_WINDOW: Duration = Duration::from_secs(600);

/// Everything a completed lockdown sequence did.
#[derive(Debug, Clone)]
pub struct LockdownReport {
    pub incident_id: Uuid,
    pub reason: LockdownReason,
    pub bans: BatchReport<UserId>,
    pub webhooks: BatchReport<WebhookId>,
    pub recovery: RecoveryReport,
}

/// Result of a lockdown request.
#[derive(Debug, Clone)]
pub enum LockdownOutcome {
    /// The guild was already locked; nothing ran.
    AlreadyLocked,
    /// Sequence ran and both emergency channels exist.
    Completed(LockdownReport),
    /// Sequence ran but recovery could not stand up the emergency channels.
    /// The guild stays locked.
    RecoveryFailed(LockdownReport),
}

impl LockdownOutcome {
    pub fn report(&self) -> Option<&LockdownReport> {
        match self {
            LockdownOutcome::AlreadyLocked => None,
            LockdownOutcome::Completed(r) | LockdownOutcome::RecoveryFailed(r) => Some(r),
        }
    }
}

/// Drives lockdown sequences against a platform.
pub struct LockdownEngine {
    platform: Arc<dyn Platform>,
    sequencer: RecoverySequencer,
    concurrency: usize,
    recent_bot_window: Duration,
}

impl LockdownEngine {
    pub fn new(platform: Arc<dyn Platform>, sequencer: RecoverySequencer) -> Self {
        Self {
            platform,
            sequencer,
            concurrency: DEFAULT_CONCURRENCY,
            recent_bot_window: RECENT_BOT_WINDOW,
        }
    }

    /// Set the fan-out concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Normal → Locked, then run the full sequence. A no-op if the guild is
    /// already locked.
    pub async fn enter(&self, guild: &GuildContext, reason: LockdownReason) -> LockdownOutcome {
        let Some(sequence) = guild.lockdown.try_enter(reason) else {
            tracing::debug!(
                guild_id = %guild.guild_id,
                reason = %reason,
                sequence_running = guild.lockdown.is_sequence_running(),
                "Already locked down"
            );
            return LockdownOutcome::AlreadyLocked;
        };

        let incident_id = sequence.status().incident_id;
        tracing::warn!(
            guild_id = %guild.guild_id,
            incident_id = %incident_id,
            reason = %reason,
            "Raid mode activated"
        );

        let bans = self.ban_recent_bots(guild.guild_id).await;
        tracing::info!(
            guild_id = %guild.guild_id,
            incident_id = %incident_id,
            banned = bans.succeeded(),
            failed = bans.failed(),
            "Raid bots banned"
        );

        let webhooks = self.purge_webhooks(guild.guild_id).await;
        tracing::info!(
            guild_id = %guild.guild_id,
            incident_id = %incident_id,
            deleted = webhooks.succeeded(),
            failed = webhooks.failed(),
            "Webhooks deleted"
        );

        let recovery = self.create_emergency_channels(guild).await;

        let report = LockdownReport {
            incident_id,
            reason,
            bans,
            webhooks,
            recovery,
        };

        if let Some((announcement, chat)) = report.recovery.channels() {
            tracing::info!(
                guild_id = %guild.guild_id,
                incident_id = %incident_id,
                announcement = %announcement.name,
                chat = %chat.name,
                "Lockdown complete"
            );
            LockdownOutcome::Completed(report)
        } else {
            tracing::error!(
                guild_id = %guild.guild_id,
                incident_id = %incident_id,
                "Failed to create emergency channels, manual intervention required"
            );
            LockdownOutcome::RecoveryFailed(report)
        }
    }

    /// Locked → Normal. Only the flag changes; the guild is restored by hand.
    pub fn exit(&self, guild: &GuildContext) -> bool {
        let was_locked = guild.lockdown.reset();
        tracing::info!(guild_id = %guild.guild_id, was_locked, "Raid mode deactivated");
        was_locked
    }

    /// Run only the recovery sequencer.
    pub async fn create_emergency_channels(&self, guild: &GuildContext) -> RecoveryReport {
        self.sequencer
            .run(self.platform.as_ref(), guild.guild_id, &guild.emergency)
            .await
    }

    /// Ban every automated account (not ours) that joined recently.
    pub async fn ban_recent_bots(&self, guild_id: GuildId) -> BatchReport<UserId> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.recent_bot_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(10));
        self.ban_bots_where(guild_id, "Anti-raid: Suspicious bot", |joined_at| {
            joined_at.is_some_and(|t| t > cutoff)
        })
        .await
    }

    /// Ban every automated account except ours, regardless of join time.
    pub async fn ban_all_bots(&self, guild_id: GuildId) -> BatchReport<UserId> {
        self.ban_bots_where(guild_id, "Manual bot purge", |_| true).await
    }

    async fn ban_bots_where(
        &self,
        guild_id: GuildId,
        reason: &'static str,
        joined_filter: impl Fn(Option<chrono::DateTime<Utc>>) -> bool,
    ) -> BatchReport<UserId> {
        let members = match self.platform.list_members(guild_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::error!(guild_id = %guild_id, error = %e, "Failed to list members");
                return BatchReport::empty();
            }
        };

        let own_id = self.platform.current_user_id();
        let targets: Vec<UserId> = members
            .into_iter()
            .filter(|m| m.is_automated && m.id != own_id && joined_filter(m.joined_at))
            .map(|m| m.id)
            .collect();

        let platform = &self.platform;
        let report = fan_out(targets, self.concurrency, |user_id| async move {
            platform.ban(guild_id, user_id, reason).await
        })
        .await;

        for (user_id, error) in report.failures() {
            tracing::debug!(guild_id = %guild_id, user_id = %user_id, error = %error, "Ban failed");
        }
        report
    }

    /// Delete every webhook on every text channel.
    pub async fn purge_webhooks(&self, guild_id: GuildId) -> BatchReport<WebhookId> {
        let channels = match self.platform.list_text_channels(guild_id).await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!(guild_id = %guild_id, error = %e, "Failed to list text channels");
                return BatchReport::empty();
            }
        };

        let mut webhooks = Vec::new();
        for channel in &channels {
            match self.platform.list_webhooks(channel.id).await {
                Ok(found) => webhooks.extend(found.into_iter().map(|w| w.id)),
                Err(e) => {
                    tracing::debug!(channel_id = %channel.id, error = %e, "Failed to list webhooks");
                }
            }
        }

        let platform = &self.platform;
        let report = fan_out(webhooks, self.concurrency, |webhook_id| async move {
            platform.delete_webhook(webhook_id).await
        })
        .await;

        for (webhook_id, error) in report.failures() {
            tracing::debug!(webhook_id = %webhook_id, error = %error, "Webhook deletion failed");
        }
        report
    }
}
