//! Core data models for the raidguard bot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId, WebhookId};

/// An inbound platform event, consumed once by the router.
#[derive(Debug, Clone)]
pub enum Event {
    ChannelCreated {
        id: ChannelId,
        name: String,
        guild_id: GuildId,
        timestamp: DateTime<Utc>,
    },
    MemberJoined {
        id: UserId,
        is_automated: bool,
        guild_id: GuildId,
        joined_at: DateTime<Utc>,
    },
    MessagePosted {
        author_id: UserId,
        is_automated: bool,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
        /// Only meaningful when the content carries a broadcast mention.
        author_can_mention_everyone: bool,
        timestamp: DateTime<Utc>,
    },
    ManualCommand {
        kind: CommandKind,
        actor_id: UserId,
        guild_id: GuildId,
        channel_id: ChannelId,
    },
}

impl Event {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Event::ChannelCreated { guild_id, .. }
            | Event::MemberJoined { guild_id, .. }
            | Event::MessagePosted { guild_id, .. }
            | Event::ManualCommand { guild_id, .. } => *guild_id,
        }
    }
}

/// Administrative entry points. The administrator check happens before an
/// event carrying one of these is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Lockdown,
    Unlock,
    EmergencyChannels,
    BanAllBots,
    Backup,
    Restore,
}

/// Why a guild entered lockdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockdownReason {
    SuspiciousChannelName,
    MassChannelCreation,
    MultipleBotsJoining,
    BotSpam,
    Manual,
}

impl LockdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockdownReason::SuspiciousChannelName => "suspicious channel name",
            LockdownReason::MassChannelCreation => "mass channel creation",
            LockdownReason::MultipleBotsJoining => "multiple bots joining",
            LockdownReason::BotSpam => "bot spam detected",
            LockdownReason::Manual => "manual lockdown by admin",
        }
    }
}

impl fmt::Display for LockdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel type as far as the bot cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    News,
    Stage,
    Forum,
    Other,
}

/// A guild channel as returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
}

/// A guild member as returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: UserId,
    pub is_automated: bool,
    pub joined_at: Option<DateTime<Utc>>,
}

/// A channel webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookInfo {
    pub id: WebhookId,
    pub channel_id: ChannelId,
}

/// Permission bits applied to the default role on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPermissions {
    pub view: bool,
    pub send: bool,
    pub read: bool,
}

impl ChannelPermissions {
    /// Everyone can see and read, nobody can post.
    pub const READ_ONLY: Self = Self {
        view: true,
        send: false,
        read: true,
    };

    /// Everyone can see, read and post.
    pub const OPEN: Self = Self {
        view: true,
        send: true,
        read: true,
    };
}

/// Notice colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeColour {
    Red,
    Green,
}

impl NoticeColour {
    pub fn rgb(&self) -> u32 {
        match self {
            NoticeColour::Red => 0xE7_4C_3C,
            NoticeColour::Green => 0x2E_CC_71,
        }
    }
}

/// A structured notice (rendered as an embed by the platform adapter).
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub colour: NoticeColour,
    pub fields: Vec<(String, String)>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Notice {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        colour: NoticeColour,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            colour,
            fields: Vec::new(),
            footer: None,
            timestamp: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }
}
