//! Gateway event handler.
//!
//! Translates serenity gateway events into [`Event`]s for the router and
//! ties the auto-backup task to the connection lifecycle. Events are stamped
//! on receipt; the platform's own timestamps only carry whole seconds.

use std::sync::Arc;

use chrono::Utc;
use serenity::all::{
    ConnectionStage, Context, EventHandler, GuildChannel, Member, Message, Ready,
    ShardStageUpdateEvent,
};
use serenity::model::id::{GuildId, UserId};

use crate::backup::AutoBackup;
use crate::commands::{is_authorized, parse_command};
use crate::detectors::mentions_broadcast;
use crate::models::Event;
use crate::platform::Platform;
use crate::router::EventRouter;

pub struct GatewayHandler {
    router: Arc<EventRouter>,
    platform: Arc<dyn Platform>,
    auto_backup: Arc<AutoBackup>,
    command_prefix: String,
}

impl GatewayHandler {
    pub fn new(
        router: Arc<EventRouter>,
        platform: Arc<dyn Platform>,
        auto_backup: Arc<AutoBackup>,
        command_prefix: impl Into<String>,
    ) -> Self {
        Self {
            router,
            platform,
            auto_backup,
            command_prefix: command_prefix.into(),
        }
    }

    /// Only looked up when the content actually pings everyone. A failed
    /// lookup is treated as permitted so an API hiccup never bans a member.
    async fn can_mention_everyone(&self, guild_id: GuildId, user_id: UserId, content: &str) -> bool {
        if !mentions_broadcast(content) {
            return true;
        }
        match self.platform.member_permissions(guild_id, user_id).await {
            Ok(permissions) => permissions.mention_everyone(),
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, user_id = %user_id, error = %e, "Permission lookup failed");
                true
            }
        }
    }

    async fn handle_command(&self, guild_id: GuildId, msg: &Message) {
        let Some(kind) = parse_command(&self.command_prefix, &msg.content) else {
            return;
        };

        let authorized = match self.platform.member_permissions(guild_id, msg.author.id).await {
            Ok(permissions) => is_authorized(permissions),
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, user_id = %msg.author.id, error = %e, "Permission lookup failed");
                false
            }
        };

        if !authorized {
            tracing::info!(guild_id = %guild_id, user_id = %msg.author.id, command = kind.name(), "Refused admin command");
            self.router
                .reply(
                    msg.channel_id,
                    "❌ You need the Administrator permission to use this command.",
                )
                .await;
            return;
        }

        self.router
            .route(Event::ManualCommand {
                kind,
                actor_id: msg.author.id,
                guild_id,
                channel_id: msg.channel_id,
            })
            .await;
    }
}

#[serenity::async_trait]
impl EventHandler for GatewayHandler {
    async fn channel_create(&self, _ctx: Context, channel: GuildChannel) {
        self.router
            .route(Event::ChannelCreated {
                id: channel.id,
                name: channel.name,
                guild_id: channel.guild_id,
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        self.router
            .route(Event::MemberJoined {
                id: new_member.user.id,
                is_automated: new_member.user.bot,
                guild_id: new_member.guild_id,
                joined_at: Utc::now(),
            })
            .await;
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let can_mention = if msg.author.bot {
            false
        } else {
            self.can_mention_everyone(guild_id, msg.author.id, &msg.content)
                .await
        };

        self.router
            .route(Event::MessagePosted {
                author_id: msg.author.id,
                is_automated: msg.author.bot,
                guild_id,
                channel_id: msg.channel_id,
                message_id: msg.id,
                content: msg.content.clone(),
                author_can_mention_everyone: can_mention,
                timestamp: Utc::now(),
            })
            .await;

        if !msg.author.bot {
            self.handle_command(guild_id, &msg).await;
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "Connected to gateway"
        );
        self.auto_backup.start().await;
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        match event.new {
            ConnectionStage::Connected => self.auto_backup.start().await,
            ConnectionStage::Disconnected => {
                tracing::warn!(shard = ?event.shard_id, "Gateway disconnected");
                self.auto_backup.stop().await;
            }
            _ => {}
        }
    }
}
