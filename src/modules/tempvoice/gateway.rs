use async_trait::async_trait;
use poise::serenity_prelude::{
    self as serenity, Cache, ChannelId, ChannelType, CreateChannel, EditChannel, GuildChannel,
    GuildId, Http, HttpError, PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId,
    UserId,
};
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::Config;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("resource not found")]
    NotFound,
    /// Refused before Discord acted on it, so sending it again is safe.
    #[error("request not applied: {0}")]
    NotApplied(String),
    /// The outcome is unknown.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("discord api error: {0}")]
    Api(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    fn from_serenity(err: serenity::Error) -> Self {
        if let serenity::Error::Http(http) = &err {
            match http {
                HttpError::UnsuccessfulRequest(response) => match response.status_code.as_u16() {
                    404 => return Self::NotFound,
                    429 => return Self::NotApplied(err.to_string()),
                    500..=599 => return Self::Transient(err.to_string()),
                    _ => {}
                },
                HttpError::Request(e) if e.is_connect() => {
                    return Self::NotApplied(err.to_string())
                }
                HttpError::Request(_) => return Self::Transient(err.to_string()),
                _ => {}
            }
        }
        Self::Api(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteTarget {
    Role(u64),
    Member(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite {
    pub target: OverwriteTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl Overwrite {
    fn from_serenity(overwrite: &PermissionOverwrite) -> Option<Self> {
        let target = match overwrite.kind {
            PermissionOverwriteType::Role(id) => OverwriteTarget::Role(id.get()),
            PermissionOverwriteType::Member(id) => OverwriteTarget::Member(id.get()),
            _ => return None,
        };
        Some(Self {
            target,
            allow: overwrite.allow,
            deny: overwrite.deny,
        })
    }

    fn to_serenity(self) -> PermissionOverwrite {
        let kind = match self.target {
            OverwriteTarget::Role(id) => PermissionOverwriteType::Role(RoleId::new(id)),
            OverwriteTarget::Member(id) => PermissionOverwriteType::Member(UserId::new(id)),
        };
        PermissionOverwrite {
            allow: self.allow,
            deny: self.deny,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceChannelInfo {
    pub id: u64,
    pub guild_id: u64,
    pub name: String,
    pub category_id: Option<u64>,
    pub user_limit: Option<u32>,
    pub bitrate: Option<u32>,
    pub overwrites: Vec<Overwrite>,
}

impl VoiceChannelInfo {
    fn from_guild_channel(channel: &GuildChannel) -> Self {
        Self {
            id: channel.id.get(),
            guild_id: channel.guild_id.get(),
            name: channel.name.clone(),
            category_id: channel.parent_id.map(|c| c.get()),
            user_limit: channel.user_limit,
            bitrate: channel.bitrate,
            overwrites: channel
                .permission_overwrites
                .iter()
                .filter_map(Overwrite::from_serenity)
                .collect(),
        }
    }

    pub fn overwrite_for(&self, target: OverwriteTarget) -> Option<&Overwrite> {
        self.overwrites.iter().find(|o| o.target == target)
    }
}

/// Everything needed to create a voice channel.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVoiceChannel {
    pub name: String,
    pub category_id: Option<u64>,
    pub user_limit: Option<u32>,
    pub bitrate: Option<u32>,
    pub overwrites: Vec<Overwrite>,
}

impl NewVoiceChannel {
    /// Copies the hub's placement, capacity, bitrate and overwrites.
    pub fn cloned_from(hub: &VoiceChannelInfo, name: String) -> Self {
        Self {
            name,
            category_id: hub.category_id,
            user_limit: hub.user_limit,
            bitrate: hub.bitrate,
            overwrites: hub.overwrites.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelEdit {
    pub name: Option<String>,
    pub user_limit: Option<u32>,
}

/// The Discord operations the temp voice subsystem depends on.
///
/// Cache lookups are synchronous and return `None` when the guild is not
/// cached, so callers can tell "nobody is here" from "we do not know".
#[async_trait]
pub trait ChannelGateway: Send + Sync + Debug {
    async fn fetch_channel(&self, channel_id: u64) -> Result<VoiceChannelInfo, GatewayError>;
    async fn guild_voice_channels(
        &self,
        guild_id: u64,
    ) -> Result<Vec<VoiceChannelInfo>, GatewayError>;
    async fn create_voice_channel(
        &self,
        guild_id: u64,
        channel: NewVoiceChannel,
    ) -> Result<u64, GatewayError>;
    async fn delete_channel(&self, channel_id: u64) -> Result<(), GatewayError>;
    async fn edit_channel(&self, channel_id: u64, edit: ChannelEdit) -> Result<(), GatewayError>;
    async fn put_overwrite(&self, channel_id: u64, overwrite: Overwrite)
        -> Result<(), GatewayError>;
    async fn move_member(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
    ) -> Result<(), GatewayError>;

    fn member_count(&self, guild_id: u64, channel_id: u64) -> Option<usize>;
    fn voice_channel_of(&self, guild_id: u64, user_id: u64) -> Option<u64>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.api_retries,
            base_delay: Duration::from_millis(config.api_backoff_ms),
            attempt_timeout: Duration::from_secs(config.api_timeout_secs.max(1)),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.min(6));
        let jitter_ms = self.base_delay.as_millis() as u64 / 2;
        exp + Duration::from_millis(fastrand::u64(0..=jitter_ms))
    }

    /// Runs an idempotent call, retrying transient and unapplied failures
    /// with exponential backoff. Each attempt is bounded by
    /// `attempt_timeout`; a timeout is transient.
    pub async fn run<T, F, Fut>(&self, op: &str, f: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.run_with(op, true, f).await
    }

    /// Like [`run`](Self::run) for calls that must not happen twice. Only
    /// failures Discord never acted on are retried.
    pub async fn run_once<T, F, Fut>(&self, op: &str, f: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.run_with(op, false, f).await
    }

    async fn run_with<T, F, Fut>(
        &self,
        op: &str,
        retry_unknown: bool,
        mut f: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match timeout(self.attempt_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Transient(format!("{} timed out", op))),
            };

            let reason = match &result {
                Err(GatewayError::NotApplied(reason)) => Some(reason.clone()),
                Err(GatewayError::Transient(reason)) if retry_unknown => Some(reason.clone()),
                _ => None,
            };
            match reason {
                Some(reason) if attempt < self.retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed ({}), retrying in {:?} ({}/{})",
                        op,
                        reason,
                        delay,
                        attempt + 1,
                        self.retries
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                _ => return result,
            }
        }
    }
}

pub struct SerenityGateway {
    http: Arc<Http>,
    cache: Arc<Cache>,
    retry: RetryPolicy,
}

impl SerenityGateway {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, retry: RetryPolicy) -> Self {
        Self { http, cache, retry }
    }
}

impl Debug for SerenityGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerenityGateway")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChannelGateway for SerenityGateway {
    async fn fetch_channel(&self, channel_id: u64) -> Result<VoiceChannelInfo, GatewayError> {
        let channel = self
            .retry
            .run("fetch_channel", || async {
                ChannelId::new(channel_id)
                    .to_channel(&self.http)
                    .await
                    .map_err(GatewayError::from_serenity)
            })
            .await?;

        match channel.guild() {
            Some(c) if c.kind == ChannelType::Voice => Ok(VoiceChannelInfo::from_guild_channel(&c)),
            _ => Err(GatewayError::NotFound),
        }
    }

    async fn guild_voice_channels(
        &self,
        guild_id: u64,
    ) -> Result<Vec<VoiceChannelInfo>, GatewayError> {
        let channels = self
            .retry
            .run("guild_channels", || async {
                GuildId::new(guild_id)
                    .channels(&self.http)
                    .await
                    .map_err(GatewayError::from_serenity)
            })
            .await?;

        Ok(channels
            .values()
            .filter(|c| c.kind == ChannelType::Voice)
            .map(VoiceChannelInfo::from_guild_channel)
            .collect())
    }

    async fn create_voice_channel(
        &self,
        guild_id: u64,
        channel: NewVoiceChannel,
    ) -> Result<u64, GatewayError> {
        let created = self
            .retry
            .run_once("create_channel", || async {
                let mut builder = CreateChannel::new(channel.name.clone())
                    .kind(ChannelType::Voice)
                    .permissions(channel.overwrites.iter().map(|o| o.to_serenity()));
                if let Some(category) = channel.category_id {
                    builder = builder.category(ChannelId::new(category));
                }
                if let Some(limit) = channel.user_limit {
                    builder = builder.user_limit(limit);
                }
                if let Some(bitrate) = channel.bitrate {
                    builder = builder.bitrate(bitrate);
                }
                GuildId::new(guild_id)
                    .create_channel(&self.http, builder)
                    .await
                    .map_err(GatewayError::from_serenity)
            })
            .await?;

        Ok(created.id.get())
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<(), GatewayError> {
        self.retry
            .run("delete_channel", || async {
                ChannelId::new(channel_id)
                    .delete(&self.http)
                    .await
                    .map(|_| ())
                    .map_err(GatewayError::from_serenity)
            })
            .await
    }

    async fn edit_channel(&self, channel_id: u64, edit: ChannelEdit) -> Result<(), GatewayError> {
        self.retry
            .run("edit_channel", || async {
                let mut builder = EditChannel::new();
                if let Some(name) = &edit.name {
                    builder = builder.name(name.clone());
                }
                if let Some(limit) = edit.user_limit {
                    builder = builder.user_limit(limit);
                }
                ChannelId::new(channel_id)
                    .edit(&self.http, builder)
                    .await
                    .map(|_| ())
                    .map_err(GatewayError::from_serenity)
            })
            .await
    }

    async fn put_overwrite(
        &self,
        channel_id: u64,
        overwrite: Overwrite,
    ) -> Result<(), GatewayError> {
        self.retry
            .run("put_overwrite", || async {
                ChannelId::new(channel_id)
                    .create_permission(&self.http, overwrite.to_serenity())
                    .await
                    .map_err(GatewayError::from_serenity)
            })
            .await
    }

    async fn move_member(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
    ) -> Result<(), GatewayError> {
        self.retry
            .run("move_member", || async {
                GuildId::new(guild_id)
                    .move_member(&self.http, UserId::new(user_id), ChannelId::new(channel_id))
                    .await
                    .map(|_| ())
                    .map_err(GatewayError::from_serenity)
            })
            .await
    }

    fn member_count(&self, guild_id: u64, channel_id: u64) -> Option<usize> {
        let guild = self.cache.guild(GuildId::new(guild_id))?;
        let channel = ChannelId::new(channel_id);
        let count = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel))
            .count();
        debug!("channel {} has {} members", channel_id, count);
        Some(count)
    }

    fn voice_channel_of(&self, guild_id: u64, user_id: u64) -> Option<u64> {
        let guild = self.cache.guild(GuildId::new(guild_id))?;
        guild
            .voice_states
            .get(&UserId::new(user_id))
            .and_then(|state| state.channel_id)
            .map(|c| c.get())
    }
}
