//! Staged guild recovery.
//!
//! Tears down every channel one at a time, waits for the platform to settle,
//! then stands up the two emergency channels and posts the notices. Each step
//! is isolated: a failed deletion or notice is logged and the sequence moves
//! on.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use serenity::model::id::{ChannelId, GuildId};

use crate::error::ActionError;
use crate::models::{ChannelInfo, ChannelPermissions, Notice, NoticeColour};
use crate::platform::Platform;

/// Read-only announcement channel.
pub const ANNOUNCEMENT_CHANNEL: &str = "being-fixed";

/// Temporary chat channel.
pub const CHAT_CHANNEL: &str = "only-temporary";

/// Delays between recovery stages.
#[derive(Debug, Clone)]
pub struct RecoveryDelays {
    /// After teardown, before the first creation (default: 10s).
    pub settle: Duration,
    /// Between the two creations (default: 3s).
    pub between_channels: Duration,
    /// After the second creation, before notices (default: 2s).
    pub before_notices: Duration,
}

impl Default for RecoveryDelays {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(10),
            between_channels: Duration::from_secs(3),
            before_notices: Duration::from_secs(2),
        }
    }
}

impl RecoveryDelays {
    /// No waiting at all.
    pub fn none() -> Self {
        Self {
            settle: Duration::ZERO,
            between_channels: Duration::ZERO,
            before_notices: Duration::ZERO,
        }
    }
}

/// Channels created by the current recovery run.
///
/// Membership exempts a channel from detection. Names are reserved while a
/// creation request is in flight, because the gateway's creation event can
/// arrive before the HTTP response hands us the id. A reservation exempts
/// only the first creation event carrying that name.
#[derive(Debug, Default)]
pub struct EmergencyChannelSet {
    ids: DashSet<ChannelId>,
    pending: DashSet<String>,
}

impl EmergencyChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.ids.clear();
        self.pending.clear();
    }

    pub fn reserve(&self, name: &str) {
        self.pending.insert(name.to_string());
    }

    pub fn release(&self, name: &str) {
        self.pending.remove(name);
    }

    pub fn register(&self, id: ChannelId) {
        self.ids.insert(id);
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.ids.contains(&id)
    }

    /// Whether a creation event should skip detection. Consumes a matching
    /// name reservation.
    pub fn take_exemption(&self, id: ChannelId, name: &str) -> bool {
        self.ids.contains(&id) || self.pending.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// What a recovery run did.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub deleted: usize,
    pub failed_deletions: Vec<(ChannelId, ActionError)>,
    pub announcement: Option<ChannelInfo>,
    pub chat: Option<ChannelInfo>,
    pub notices_sent: usize,
}

impl RecoveryReport {
    /// Both emergency channels, if both exist.
    pub fn channels(&self) -> Option<(&ChannelInfo, &ChannelInfo)> {
        match (&self.announcement, &self.chat) {
            (Some(a), Some(c)) => Some((a, c)),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.channels().is_some()
    }
}

/// Runs the teardown and re-creation protocol against a [`Platform`].
pub struct RecoverySequencer {
    delays: RecoveryDelays,
}

impl RecoverySequencer {
    pub fn new(delays: RecoveryDelays) -> Self {
        Self { delays }
    }

    /// Run the full sequence for a guild.
    pub async fn run(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        emergency: &EmergencyChannelSet,
    ) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        emergency.clear();

        tracing::info!(guild_id = %guild_id, "Starting emergency recovery");

        self.teardown(platform, guild_id, &mut report).await;

        tracing::info!(
            guild_id = %guild_id,
            settle_secs = self.delays.settle.as_secs(),
            "Waiting for channel deletions to settle"
        );
        tokio::time::sleep(self.delays.settle).await;

        report.announcement = create_emergency_channel(
            platform,
            guild_id,
            emergency,
            ANNOUNCEMENT_CHANNEL,
            ChannelPermissions::READ_ONLY,
        )
        .await;

        tokio::time::sleep(self.delays.between_channels).await;

        report.chat = create_emergency_channel(
            platform,
            guild_id,
            emergency,
            CHAT_CHANNEL,
            ChannelPermissions::OPEN,
        )
        .await;

        tokio::time::sleep(self.delays.before_notices).await;

        let guild_name = match platform.guild_name(guild_id).await {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(guild_id = %guild_id, error = %e, "Could not fetch guild name");
                String::from("this server")
            }
        };

        if let Some(channel) = &report.announcement {
            let notice = explanation_notice(&guild_name);
            if post_notice(platform, channel, "@everyone **PLEASE READ**", &notice).await {
                report.notices_sent += 1;
            }
        }

        if let Some(channel) = &report.chat {
            let notice = welcome_notice();
            if post_notice(platform, channel, "@everyone", &notice).await {
                report.notices_sent += 1;
            }
        }

        if report.is_complete() {
            tracing::info!(
                guild_id = %guild_id,
                deleted = report.deleted,
                failed = report.failed_deletions.len(),
                "Emergency channels created"
            );
        } else {
            tracing::error!(
                guild_id = %guild_id,
                announcement = report.announcement.is_some(),
                chat = report.chat.is_some(),
                "Emergency channel creation incomplete"
            );
        }

        report
    }

    /// Delete every channel, strictly one after another.
    async fn teardown(
        &self,
        platform: &dyn Platform,
        guild_id: GuildId,
        report: &mut RecoveryReport,
    ) {
        let channels = match platform.list_channels(guild_id).await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!(guild_id = %guild_id, error = %e, "Failed to list channels");
                return;
            }
        };

        tracing::info!(guild_id = %guild_id, count = channels.len(), "Deleting channels");

        for channel in channels {
            match platform.delete_channel(channel.id).await {
                Ok(()) => {
                    report.deleted += 1;
                    tracing::debug!(channel_id = %channel.id, name = %channel.name, "Deleted channel");
                }
                Err(ActionError::NotFound) => {
                    tracing::debug!(channel_id = %channel.id, "Channel already gone");
                    report.failed_deletions.push((channel.id, ActionError::NotFound));
                }
                Err(e) => {
                    tracing::warn!(
                        channel_id = %channel.id,
                        name = %channel.name,
                        error = %e,
                        kind = e.kind(),
                        "Failed to delete channel"
                    );
                    report.failed_deletions.push((channel.id, e));
                }
            }
        }
    }
}

impl Default for RecoverySequencer {
    fn default() -> Self {
        Self::new(RecoveryDelays::default())
    }
}

/// Create one emergency channel and register it. A failed overwrite is
/// logged; the channel still counts as created.
async fn create_emergency_channel(
    platform: &dyn Platform,
    guild_id: GuildId,
    emergency: &EmergencyChannelSet,
    name: &str,
    permissions: ChannelPermissions,
) -> Option<ChannelInfo> {
    emergency.reserve(name);
    let created = platform.create_text_channel(guild_id, name).await;

    let channel = match created {
        Ok(channel) => channel,
        Err(e) => {
            emergency.release(name);
            if e == ActionError::Forbidden {
                tracing::error!(
                    guild_id = %guild_id,
                    name,
                    "Missing MANAGE_CHANNELS permission, cannot create emergency channel"
                );
            } else {
                tracing::error!(guild_id = %guild_id, name, error = %e, "Failed to create emergency channel");
            }
            return None;
        }
    };

    // An emergency channel without its overwrite is not usable.
    if let Err(e) = platform
        .set_default_role_permissions(guild_id, channel.id, permissions)
        .await
    {
        emergency.release(name);
        tracing::error!(
            guild_id = %guild_id,
            channel_id = %channel.id,
            name,
            error = %e,
            "Failed to secure emergency channel"
        );
        return None;
    }

    emergency.register(channel.id);
    emergency.release(name);
    tracing::info!(channel_id = %channel.id, name, "Created emergency channel");
    Some(channel)
}

async fn post_notice(
    platform: &dyn Platform,
    channel: &ChannelInfo,
    content: &str,
    notice: &Notice,
) -> bool {
    match platform.send_message(channel.id, content, Some(notice)).await {
        Ok(()) => true,
        Err(ActionError::NotFound) => {
            tracing::warn!(channel_id = %channel.id, name = %channel.name, "Channel vanished before notice");
            false
        }
        Err(e) => {
            tracing::warn!(channel_id = %channel.id, error = %e, "Failed to post notice");
            false
        }
    }
}

/// Posted to the announcement channel.
pub fn explanation_notice(guild_name: &str) -> Notice {
    Notice::new(
        "🛡️ RAID ATTACK STOPPED",
        "Our security system detected and stopped a raid attack on this server.",
        NoticeColour::Red,
    )
    .field(
        "⚠️ What Happened:",
        "• Malicious bots joined the server\n• They attempted to spam channels\n• They tried to create hundreds of fake channels\n• Our anti-raid system detected this instantly",
    )
    .field(
        "✅ How We Fixed It:",
        "• **Banned all raid bots** within seconds\n• **Deleted all compromised channels**\n• **Removed all malicious webhooks**\n• **Created these temporary channels** for communication\n• **Protected your data** - nothing was lost",
    )
    .field(
        "📢 What's Next:",
        "• Admins will restore the server shortly\n• Use #only-temporary to chat in the meantime\n• **Please don't leave!** Everything is under control\n• Your roles and permissions are safe",
    )
    .field(
        "💙 Thank You!",
        "Thank you for your patience and for staying with us. We take server security seriously and will have everything back to normal very soon!",
    )
    .footer(format!("Security Team • {}", guild_name))
    .timestamp(Utc::now())
}

/// Posted to the temporary chat channel.
pub fn welcome_notice() -> Notice {
    Notice::new(
        "💬 Temporary Chat Room",
        "Welcome! You can chat here while we restore the server.",
        NoticeColour::Green,
    )
    .field(
        "ℹ️ About This Channel:",
        "This is a temporary channel for everyone to communicate while admins restore the server. Check #being-fixed for updates on what happened and the fix progress!",
    )
    .field(
        "📋 Rules:",
        "• Be respectful\n• No spam\n• Stay calm - everything is under control\n• Ask questions if you need clarification",
    )
}
