//! Discord implementation of [`Platform`] over serenity's HTTP client.
//!
//! Every call is made once and its error classified into [`ActionError`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serenity::all::{
    ChannelType, Colour, CreateAttachment, CreateChannel, CreateEmbed, CreateEmbedFooter,
    CreateMessage, EditGuild, EditMember, EditRole, GuildPagination, PermissionOverwrite,
    PermissionOverwriteType, Timestamp,
};
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId, WebhookId};
use serenity::model::Permissions;

use crate::backup::{
    ChannelSnapshot, EmojiSnapshot, OverwriteSnapshot, OverwriteTarget, RoleSnapshot,
};
use crate::error::{ActionError, ActionResult};
use crate::models::{
    ChannelInfo, ChannelKind, ChannelPermissions, MemberInfo, Notice, WebhookInfo,
};
use crate::platform::Platform;

/// Members per page when listing a guild.
const MEMBER_PAGE: u64 = 1000;
/// Guilds per page when listing our guilds.
const GUILD_PAGE: u64 = 200;

pub struct SerenityPlatform {
    http: Arc<Http>,
    own_id: UserId,
    permissions: Cache<(GuildId, UserId), Permissions>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>, own_id: UserId) -> Self {
        Self {
            http,
            own_id,
            permissions: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(60))
                .build(),
        }
    }

    async fn fetch_permissions(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ActionResult<Permissions> {
        let guild = guild_id.to_partial_guild(self.http.as_ref()).await?;
        let member = guild_id.member(self.http.as_ref(), user_id).await?;

        let everyone = guild
            .roles
            .get(&guild_id.everyone_role())
            .map(|r| r.permissions)
            .unwrap_or_else(Permissions::empty);
        let role_permissions = member
            .roles
            .iter()
            .filter_map(|id| guild.roles.get(id))
            .map(|r| r.permissions);

        Ok(compute_permissions(
            guild.owner_id == user_id,
            everyone,
            role_permissions,
        ))
    }
}

#[async_trait]
impl Platform for SerenityPlatform {
    fn current_user_id(&self) -> UserId {
        self.own_id
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> ActionResult<()> {
        channel_id.delete(self.http.as_ref()).await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ActionResult<()> {
        channel_id
            .delete_message(self.http.as_ref(), message_id)
            .await?;
        Ok(())
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionResult<()> {
        guild_id
            .ban_with_reason(self.http.as_ref(), user_id, 0, reason)
            .await?;
        tracing::info!(guild_id = %guild_id, user_id = %user_id, reason, "User banned");
        Ok(())
    }

    async fn timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        duration: Duration,
        reason: &str,
    ) -> ActionResult<()> {
        let until = Timestamp::from_unix_timestamp(Utc::now().timestamp() + duration.as_secs() as i64)
            .map_err(|e| ActionError::Unknown(format!("Invalid timestamp: {}", e)))?;

        let edit = EditMember::new()
            .disable_communication_until(until.to_string())
            .audit_log_reason(reason);
        guild_id
            .edit_member(self.http.as_ref(), user_id, edit)
            .await?;

        tracing::info!(
            guild_id = %guild_id,
            user_id = %user_id,
            duration_secs = duration.as_secs(),
            "User timed out"
        );
        Ok(())
    }

    async fn create_text_channel(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> ActionResult<ChannelInfo> {
        let channel = guild_id
            .create_channel(
                self.http.as_ref(),
                CreateChannel::new(name).kind(ChannelType::Text),
            )
            .await?;
        Ok(ChannelInfo {
            id: channel.id,
            name: channel.name,
            kind: ChannelKind::Text,
        })
    }

    async fn set_default_role_permissions(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        permissions: ChannelPermissions,
    ) -> ActionResult<()> {
        let (allow, deny) = overwrite_bits(permissions);
        channel_id
            .create_permission(
                self.http.as_ref(),
                PermissionOverwrite {
                    allow,
                    deny,
                    kind: PermissionOverwriteType::Role(guild_id.everyone_role()),
                },
            )
            .await?;
        Ok(())
    }

    async fn list_webhooks(&self, channel_id: ChannelId) -> ActionResult<Vec<WebhookInfo>> {
        let webhooks = channel_id.webhooks(self.http.as_ref()).await?;
        Ok(webhooks
            .into_iter()
            .map(|w| WebhookInfo {
                id: w.id,
                channel_id: w.channel_id.unwrap_or(channel_id),
            })
            .collect())
    }

    async fn delete_webhook(&self, webhook_id: WebhookId) -> ActionResult<()> {
        self.http
            .delete_webhook(webhook_id, Some("Anti-raid: webhook purge"))
            .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: &str,
        notice: Option<&Notice>,
    ) -> ActionResult<()> {
        let mut message = CreateMessage::new().content(content);
        if let Some(notice) = notice {
            message = message.embed(build_embed(notice));
        }
        channel_id
            .send_message(self.http.as_ref(), message)
            .await?;
        Ok(())
    }

    async fn list_members(&self, guild_id: GuildId) -> ActionResult<Vec<MemberInfo>> {
        let mut members = Vec::new();
        let mut after: Option<UserId> = None;

        loop {
            let page = guild_id
                .members(self.http.as_ref(), Some(MEMBER_PAGE), after)
                .await?;
            let full = page.len() as u64 == MEMBER_PAGE;
            after = page.last().map(|m| m.user.id);

            members.extend(page.into_iter().map(|m| MemberInfo {
                id: m.user.id,
                is_automated: m.user.bot,
                joined_at: m.joined_at.and_then(to_chrono),
            }));

            if !full {
                break;
            }
        }

        Ok(members)
    }

    async fn list_channels(&self, guild_id: GuildId) -> ActionResult<Vec<ChannelInfo>> {
        let channels = guild_id.channels(self.http.as_ref()).await?;
        Ok(channels
            .into_values()
            .map(|c| ChannelInfo {
                id: c.id,
                name: c.name,
                kind: channel_kind(c.kind),
            })
            .collect())
    }

    async fn list_text_channels(&self, guild_id: GuildId) -> ActionResult<Vec<ChannelInfo>> {
        Ok(self
            .list_channels(guild_id)
            .await?
            .into_iter()
            .filter(|c| c.kind == ChannelKind::Text)
            .collect())
    }

    async fn member_permissions(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ActionResult<Permissions> {
        self.permissions
            .try_get_with((guild_id, user_id), self.fetch_permissions(guild_id, user_id))
            .await
            .map_err(|e: Arc<ActionError>| (*e).clone())
    }

    async fn list_guilds(&self) -> ActionResult<Vec<GuildId>> {
        let mut guilds = Vec::new();
        let mut after: Option<GuildId> = None;

        loop {
            let page = self
                .http
                .get_guilds(after.map(GuildPagination::After), Some(GUILD_PAGE))
                .await?;
            let full = page.len() as u64 == GUILD_PAGE;
            after = page.last().map(|g| g.id);
            guilds.extend(page.into_iter().map(|g| g.id));
            if !full {
                break;
            }
        }

        Ok(guilds)
    }

    async fn guild_name(&self, guild_id: GuildId) -> ActionResult<String> {
        Ok(guild_id.to_partial_guild(self.http.as_ref()).await?.name)
    }

    async fn set_guild_name(&self, guild_id: GuildId, name: &str) -> ActionResult<()> {
        guild_id
            .edit(self.http.as_ref(), EditGuild::new().name(name))
            .await?;
        Ok(())
    }

    async fn list_roles(&self, guild_id: GuildId) -> ActionResult<Vec<RoleSnapshot>> {
        let mut roles: Vec<_> = guild_id
            .roles(self.http.as_ref())
            .await?
            .into_values()
            .filter(|r| r.id != guild_id.everyone_role() && !r.managed)
            .collect();
        roles.sort_by_key(|r| r.position);

        Ok(roles
            .into_iter()
            .map(|r| RoleSnapshot {
                id: r.id.get(),
                name: r.name,
                color: r.colour.0,
                permissions: r.permissions.bits(),
                hoist: r.hoist,
                mentionable: r.mentionable,
            })
            .collect())
    }

    async fn list_channel_layout(
        &self,
        guild_id: GuildId,
    ) -> ActionResult<Vec<ChannelSnapshot>> {
        let mut channels: Vec<_> = guild_id
            .channels(self.http.as_ref())
            .await?
            .into_values()
            .collect();
        channels.sort_by_key(|c| c.position);

        Ok(channels
            .into_iter()
            .map(|c| ChannelSnapshot {
                id: c.id.get(),
                name: c.name,
                kind: channel_kind(c.kind),
                position: c.position,
                overwrites: c
                    .permission_overwrites
                    .iter()
                    .filter_map(snapshot_overwrite)
                    .collect(),
                parent_id: c.parent_id.map(|p| p.get()),
            })
            .collect())
    }

    async fn list_emojis(&self, guild_id: GuildId) -> ActionResult<Vec<EmojiSnapshot>> {
        Ok(guild_id
            .emojis(self.http.as_ref())
            .await?
            .into_iter()
            .map(|e| EmojiSnapshot {
                url: e.url(),
                name: e.name,
            })
            .collect())
    }

    async fn create_role(&self, guild_id: GuildId, role: &RoleSnapshot) -> ActionResult<RoleId> {
        let edit = EditRole::new()
            .name(&role.name)
            .colour(role.color)
            .permissions(Permissions::from_bits_truncate(role.permissions))
            .hoist(role.hoist)
            .mentionable(role.mentionable);
        Ok(guild_id.create_role(self.http.as_ref(), edit).await?.id)
    }

    async fn create_channel(
        &self,
        guild_id: GuildId,
        channel: &ChannelSnapshot,
        parent: Option<ChannelId>,
    ) -> ActionResult<ChannelId> {
        let mut builder = CreateChannel::new(&channel.name)
            .kind(channel_type(channel.kind))
            .position(channel.position)
            .permissions(channel.overwrites.iter().map(to_overwrite));
        if let Some(parent) = parent {
            builder = builder.category(parent);
        }
        Ok(guild_id
            .create_channel(self.http.as_ref(), builder)
            .await?
            .id)
    }

    async fn create_emoji(&self, guild_id: GuildId, emoji: &EmojiSnapshot) -> ActionResult<()> {
        let image = CreateAttachment::url(self.http.as_ref(), &emoji.url).await?;
        guild_id
            .create_emoji(self.http.as_ref(), &emoji.name, &image.to_base64())
            .await?;
        Ok(())
    }
}

fn build_embed(notice: &Notice) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&notice.title)
        .description(&notice.description)
        .colour(Colour::new(notice.colour.rgb()));
    for (name, value) in &notice.fields {
        embed = embed.field(name, value, false);
    }
    if let Some(footer) = &notice.footer {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }
    if let Some(ts) = notice
        .timestamp
        .and_then(|t| Timestamp::from_unix_timestamp(t.timestamp()).ok())
    {
        embed = embed.timestamp(ts);
    }
    embed
}

fn to_chrono(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.unix_timestamp(), 0)
}

/// Guild owners and administrators hold every permission.
fn compute_permissions(
    is_owner: bool,
    everyone: Permissions,
    roles: impl IntoIterator<Item = Permissions>,
) -> Permissions {
    if is_owner {
        return Permissions::all();
    }
    let permissions = roles.into_iter().fold(everyone, |acc, p| acc | p);
    if permissions.administrator() {
        Permissions::all()
    } else {
        permissions
    }
}

fn overwrite_bits(permissions: ChannelPermissions) -> (Permissions, Permissions) {
    let mut allow = Permissions::empty();
    let mut deny = Permissions::empty();
    for (enabled, bit) in [
        (permissions.view, Permissions::VIEW_CHANNEL),
        (permissions.send, Permissions::SEND_MESSAGES),
        (permissions.read, Permissions::READ_MESSAGE_HISTORY),
    ] {
        if enabled {
            allow |= bit;
        } else {
            deny |= bit;
        }
    }
    (allow, deny)
}

fn channel_kind(kind: ChannelType) -> ChannelKind {
    match kind {
        ChannelType::Text => ChannelKind::Text,
        ChannelType::Voice => ChannelKind::Voice,
        ChannelType::Category => ChannelKind::Category,
        ChannelType::News => ChannelKind::News,
        ChannelType::Stage => ChannelKind::Stage,
        ChannelType::Forum => ChannelKind::Forum,
        _ => ChannelKind::Other,
    }
}

fn channel_type(kind: ChannelKind) -> ChannelType {
    match kind {
        ChannelKind::Voice => ChannelType::Voice,
        ChannelKind::Category => ChannelType::Category,
        ChannelKind::News => ChannelType::News,
        ChannelKind::Stage => ChannelType::Stage,
        ChannelKind::Forum => ChannelType::Forum,
        ChannelKind::Text | ChannelKind::Other => ChannelType::Text,
    }
}

fn snapshot_overwrite(overwrite: &PermissionOverwrite) -> Option<OverwriteSnapshot> {
    let target = match overwrite.kind {
        PermissionOverwriteType::Role(id) => OverwriteTarget::Role(id.get()),
        PermissionOverwriteType::Member(id) => OverwriteTarget::Member(id.get()),
        _ => return None,
    };
    Some(OverwriteSnapshot {
        target,
        allow: overwrite.allow.bits(),
        deny: overwrite.deny.bits(),
    })
}

fn to_overwrite(overwrite: &OverwriteSnapshot) -> PermissionOverwrite {
    let kind = match overwrite.target {
        OverwriteTarget::Role(id) => PermissionOverwriteType::Role(RoleId::new(id)),
        OverwriteTarget::Member(id) => PermissionOverwriteType::Member(UserId::new(id)),
    };
    PermissionOverwrite {
        allow: Permissions::from_bits_truncate(overwrite.allow),
        deny: Permissions::from_bits_truncate(overwrite.deny),
        kind,
    }
}
