//! The platform seam.
//!
//! Everything the core asks of the chat platform goes through [`Platform`].
//! Each call is attempted once; failures come back as [`ActionError`] and the
//! caller decides whether to log and move on.

use std::time::Duration;

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId, WebhookId};
use serenity::model::Permissions;

use crate::backup::{ChannelSnapshot, EmojiSnapshot, RoleSnapshot};
use crate::error::ActionResult;
use crate::models::{ChannelInfo, ChannelPermissions, MemberInfo, Notice, WebhookInfo};

#[async_trait]
pub trait Platform: Send + Sync {
    /// Our own account, excluded from every automated-account rule.
    fn current_user_id(&self) -> UserId;

    async fn delete_channel(&self, channel_id: ChannelId) -> ActionResult<()>;

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId)
        -> ActionResult<()>;

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionResult<()>;

    async fn timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        duration: Duration,
        reason: &str,
    ) -> ActionResult<()>;

    async fn create_text_channel(&self, guild_id: GuildId, name: &str)
        -> ActionResult<ChannelInfo>;

    /// Apply an overwrite for the guild's default role.
    async fn set_default_role_permissions(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        permissions: ChannelPermissions,
    ) -> ActionResult<()>;

    async fn list_webhooks(&self, channel_id: ChannelId) -> ActionResult<Vec<WebhookInfo>>;

    async fn delete_webhook(&self, webhook_id: WebhookId) -> ActionResult<()>;

    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: &str,
        notice: Option<&Notice>,
    ) -> ActionResult<()>;

    async fn list_members(&self, guild_id: GuildId) -> ActionResult<Vec<MemberInfo>>;

    async fn list_channels(&self, guild_id: GuildId) -> ActionResult<Vec<ChannelInfo>>;

    async fn list_text_channels(&self, guild_id: GuildId) -> ActionResult<Vec<ChannelInfo>>;

    async fn member_permissions(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ActionResult<Permissions>;

    /// Guilds the bot is currently connected to.
    async fn list_guilds(&self) -> ActionResult<Vec<GuildId>>;

    async fn guild_name(&self, guild_id: GuildId) -> ActionResult<String>;

    async fn set_guild_name(&self, guild_id: GuildId, name: &str) -> ActionResult<()>;

    /// Roles other than the default role and integration-managed roles.
    async fn list_roles(&self, guild_id: GuildId) -> ActionResult<Vec<RoleSnapshot>>;

    /// Full channel layout, including overwrites and parent categories.
    async fn list_channel_layout(&self, guild_id: GuildId)
        -> ActionResult<Vec<ChannelSnapshot>>;

    async fn list_emojis(&self, guild_id: GuildId) -> ActionResult<Vec<EmojiSnapshot>>;

    async fn create_role(&self, guild_id: GuildId, role: &RoleSnapshot) -> ActionResult<RoleId>;

    /// Create a channel from a snapshot. `parent` and the overwrites are
    /// already remapped to ids valid in the live guild.
    async fn create_channel(
        &self,
        guild_id: GuildId,
        channel: &ChannelSnapshot,
        parent: Option<ChannelId>,
    ) -> ActionResult<ChannelId>;

    async fn create_emoji(&self, guild_id: GuildId, emoji: &EmojiSnapshot) -> ActionResult<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory platform used across the crate's tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::error::ActionError;
    use crate::models::ChannelKind;

    /// Every call the core made, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        DeleteChannel(ChannelId),
        DeleteMessage(ChannelId, MessageId),
        Ban(UserId, String),
        Timeout(UserId, Duration),
        CreateTextChannel(String),
        SetPermissions(ChannelId, ChannelPermissions),
        ListWebhooks(ChannelId),
        DeleteWebhook(WebhookId),
        SendMessage(ChannelId, String),
        ListMembers,
        ListChannels,
        CreateRole(String),
        CreateChannel(String, Option<ChannelId>),
        CreateEmoji(String),
        SetGuildName(String),
    }

    pub struct MockPlatform {
        pub bot_id: UserId,
        pub calls: Mutex<Vec<Call>>,
        pub channels: Mutex<Vec<ChannelInfo>>,
        pub members: Mutex<Vec<MemberInfo>>,
        pub webhooks: Mutex<HashMap<ChannelId, Vec<WebhookInfo>>>,
        pub roles: Mutex<Vec<RoleSnapshot>>,
        pub layout: Mutex<Vec<ChannelSnapshot>>,
        pub emojis: Mutex<Vec<EmojiSnapshot>>,
        pub guild_name: Mutex<String>,
        pub guilds: Mutex<Vec<GuildId>>,
        pub permissions: Mutex<HashMap<UserId, Permissions>>,
        /// Channel names whose creation fails with Forbidden.
        pub fail_create: Mutex<Vec<String>>,
        /// Channels whose deletion fails with this error.
        pub fail_delete: Mutex<HashMap<ChannelId, ActionError>>,
        /// Users whose ban fails with Forbidden.
        pub fail_ban: Mutex<Vec<UserId>>,
        /// Error returned by every permission overwrite, if set.
        pub fail_permissions: Mutex<Option<ActionError>>,
        /// Channels whose sends fail with NotFound.
        pub vanished: Mutex<Vec<ChannelId>>,
        /// Wall-clock instants at which each deletion was started and finished.
        pub delete_spans: Mutex<Vec<(tokio::time::Instant, tokio::time::Instant)>>,
        /// Simulated latency per deletion.
        pub delete_latency: Duration,
        next_id: AtomicU64,
    }

    impl MockPlatform {
        pub fn new() -> Self {
            Self {
                bot_id: UserId::new(999),
                calls: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
                members: Mutex::new(Vec::new()),
                webhooks: Mutex::new(HashMap::new()),
                roles: Mutex::new(Vec::new()),
                layout: Mutex::new(Vec::new()),
                emojis: Mutex::new(Vec::new()),
                guild_name: Mutex::new("Test Guild".to_string()),
                guilds: Mutex::new(Vec::new()),
                permissions: Mutex::new(HashMap::new()),
                fail_create: Mutex::new(Vec::new()),
                fail_delete: Mutex::new(HashMap::new()),
                fail_ban: Mutex::new(Vec::new()),
                fail_permissions: Mutex::new(None),
                vanished: Mutex::new(Vec::new()),
                delete_spans: Mutex::new(Vec::new()),
                delete_latency: Duration::ZERO,
                next_id: AtomicU64::new(10_000),
            }
        }

        pub fn with_text_channels(self, count: u64) -> Self {
            {
                let mut channels = self.channels.lock().unwrap();
                for i in 1..=count {
                    channels.push(ChannelInfo {
                        id: ChannelId::new(i),
                        name: format!("channel-{}", i),
                        kind: ChannelKind::Text,
                    });
                }
            }
            self
        }

        pub fn with_member(self, id: u64, is_automated: bool, joined_at: DateTime<Utc>) -> Self {
            self.members.lock().unwrap().push(MemberInfo {
                id: UserId::new(id),
                is_automated,
                joined_at: Some(joined_at),
            });
            self
        }

        pub fn with_webhooks(self, channel: u64, ids: &[u64]) -> Self {
            self.webhooks.lock().unwrap().insert(
                ChannelId::new(channel),
                ids.iter()
                    .map(|id| WebhookInfo {
                        id: WebhookId::new(*id),
                        channel_id: ChannelId::new(channel),
                    })
                    .collect(),
            );
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn fresh_id(&self) -> u64 {
            self.next_id.fetch_add(1, Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Platform for MockPlatform {
        fn current_user_id(&self) -> UserId {
            self.bot_id
        }

        async fn delete_channel(&self, channel_id: ChannelId) -> ActionResult<()> {
            let started = tokio::time::Instant::now();
            self.push(Call::DeleteChannel(channel_id));
            if !self.delete_latency.is_zero() {
                tokio::time::sleep(self.delete_latency).await;
            }
            self.delete_spans
                .lock()
                .unwrap()
                .push((started, tokio::time::Instant::now()));
            if let Some(err) = self.fail_delete.lock().unwrap().get(&channel_id) {
                return Err(err.clone());
            }
            let mut channels = self.channels.lock().unwrap();
            let before = channels.len();
            channels.retain(|c| c.id != channel_id);
            if channels.len() == before {
                return Err(ActionError::NotFound);
            }
            Ok(())
        }

        async fn delete_message(
            &self,
            channel_id: ChannelId,
            message_id: MessageId,
        ) -> ActionResult<()> {
            self.push(Call::DeleteMessage(channel_id, message_id));
            Ok(())
        }

        async fn ban(&self, _guild_id: GuildId, user_id: UserId, reason: &str) -> ActionResult<()> {
            self.push(Call::Ban(user_id, reason.to_string()));
            if self.fail_ban.lock().unwrap().contains(&user_id) {
                return Err(ActionError::Forbidden);
            }
            Ok(())
        }

        async fn timeout(
            &self,
            _guild_id: GuildId,
            user_id: UserId,
            duration: Duration,
            _reason: &str,
        ) -> ActionResult<()> {
            self.push(Call::Timeout(user_id, duration));
            Ok(())
        }

        async fn create_text_channel(
            &self,
            _guild_id: GuildId,
            name: &str,
        ) -> ActionResult<ChannelInfo> {
            self.push(Call::CreateTextChannel(name.to_string()));
            if self.fail_create.lock().unwrap().iter().any(|n| n == name) {
                return Err(ActionError::Forbidden);
            }
            let channel = ChannelInfo {
                id: ChannelId::new(self.fresh_id()),
                name: name.to_string(),
                kind: ChannelKind::Text,
            };
            self.channels.lock().unwrap().push(channel.clone());
            Ok(channel)
        }

        async fn set_default_role_permissions(
            &self,
            _guild_id: GuildId,
            channel_id: ChannelId,
            permissions: ChannelPermissions,
        ) -> ActionResult<()> {
            self.push(Call::SetPermissions(channel_id, permissions));
            match self.fail_permissions.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn list_webhooks(&self, channel_id: ChannelId) -> ActionResult<Vec<WebhookInfo>> {
            self.push(Call::ListWebhooks(channel_id));
            Ok(self
                .webhooks
                .lock()
                .unwrap()
                .get(&channel_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn delete_webhook(&self, webhook_id: WebhookId) -> ActionResult<()> {
            self.push(Call::DeleteWebhook(webhook_id));
            Ok(())
        }

        async fn send_message(
            &self,
            channel_id: ChannelId,
            content: &str,
            _notice: Option<&Notice>,
        ) -> ActionResult<()> {
            self.push(Call::SendMessage(channel_id, content.to_string()));
            if self.vanished.lock().unwrap().contains(&channel_id) {
                return Err(ActionError::NotFound);
            }
            Ok(())
        }

        async fn list_members(&self, _guild_id: GuildId) -> ActionResult<Vec<MemberInfo>> {
            self.push(Call::ListMembers);
            Ok(self.members.lock().unwrap().clone())
        }

        async fn list_channels(&self, _guild_id: GuildId) -> ActionResult<Vec<ChannelInfo>> {
            self.push(Call::ListChannels);
            Ok(self.channels.lock().unwrap().clone())
        }

        async fn list_text_channels(&self, _guild_id: GuildId) -> ActionResult<Vec<ChannelInfo>> {
            Ok(self
                .channels
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.kind == ChannelKind::Text)
                .cloned()
                .collect())
        }

        async fn member_permissions(
            &self,
            _guild_id: GuildId,
            user_id: UserId,
        ) -> ActionResult<Permissions> {
            Ok(self
                .permissions
                .lock()
                .unwrap()
                .get(&user_id)
                .copied()
                .unwrap_or_else(Permissions::empty))
        }

        async fn list_guilds(&self) -> ActionResult<Vec<GuildId>> {
            Ok(self.guilds.lock().unwrap().clone())
        }

        async fn guild_name(&self, _guild_id: GuildId) -> ActionResult<String> {
            Ok(self.guild_name.lock().unwrap().clone())
        }

        async fn set_guild_name(&self, _guild_id: GuildId, name: &str) -> ActionResult<()> {
            self.push(Call::SetGuildName(name.to_string()));
            *self.guild_name.lock().unwrap() = name.to_string();
            Ok(())
        }

        async fn list_roles(&self, _guild_id: GuildId) -> ActionResult<Vec<RoleSnapshot>> {
            Ok(self.roles.lock().unwrap().clone())
        }

        async fn list_channel_layout(
            &self,
            _guild_id: GuildId,
        ) -> ActionResult<Vec<ChannelSnapshot>> {
            Ok(self.layout.lock().unwrap().clone())
        }

        async fn list_emojis(&self, _guild_id: GuildId) -> ActionResult<Vec<EmojiSnapshot>> {
            Ok(self.emojis.lock().unwrap().clone())
        }

        async fn create_role(
            &self,
            _guild_id: GuildId,
            role: &RoleSnapshot,
        ) -> ActionResult<RoleId> {
            self.push(Call::CreateRole(role.name.clone()));
            Ok(RoleId::new(self.fresh_id()))
        }

        async fn create_channel(
            &self,
            _guild_id: GuildId,
            channel: &ChannelSnapshot,
            parent: Option<ChannelId>,
        ) -> ActionResult<ChannelId> {
            self.push(Call::CreateChannel(channel.name.clone(), parent));
            Ok(ChannelId::new(self.fresh_id()))
        }

        async fn create_emoji(
            &self,
            _guild_id: GuildId,
            emoji: &EmojiSnapshot,
        ) -> ActionResult<()> {
            self.push(Call::CreateEmoji(emoji.name.clone()));
            Ok(())
        }
    }
}
