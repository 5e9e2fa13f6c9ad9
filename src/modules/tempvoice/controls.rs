use poise::serenity_prelude::Permissions;
use thiserror::Error;
use tracing::{debug, info};

use super::database::{OwnedChannel, MAX_CHANNEL_NAME};
use super::gateway::{ChannelEdit, GatewayError, Overwrite, OverwriteTarget};
use super::lifecycle::TempVoice;
use crate::database::DbError;

pub const MAX_USER_LIMIT: i64 = 99;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Lock,
    Unlock,
    Hide,
    Show,
    Rename(String),
    SetLimit(i64),
}

impl ControlAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Hide => "hide",
            Self::Show => "show",
            Self::Rename(_) => "rename",
            Self::SetLimit(_) => "limit",
        }
    }
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("not in a voice channel")]
    NotInVoice,
    #[error("not the channel owner")]
    NotOwner,
    #[error("user limit {0} out of range")]
    LimitOutOfRange(i64),
    #[error("invalid channel name")]
    InvalidName,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] DbError),
}

impl ControlError {
    pub fn user_message(&self) -> String {
        match self {
            Self::NotInVoice => "❌ You need to be in your voice channel to do that.".into(),
            Self::NotOwner => "❌ You don't own this voice channel.".into(),
            Self::LimitOutOfRange(_) => {
                format!("❌ The user limit must be between 0 and {}.", MAX_USER_LIMIT)
            }
            Self::InvalidName => format!(
                "❌ Channel names must be between 1 and {} characters.",
                MAX_CHANNEL_NAME
            ),
            Self::Gateway(GatewayError::NotFound) => {
                "❌ That channel no longer exists.".into()
            }
            Self::Gateway(_) | Self::Store(_) => {
                "❌ Something went wrong, please try again later.".into()
            }
        }
    }

    /// Rejections the user caused, as opposed to failures worth logging.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotInVoice | Self::NotOwner | Self::LimitOutOfRange(_) | Self::InvalidName
        )
    }
}

impl ControlAction {
    /// Checks arguments before anything touches Discord or the store.
    fn validate(self) -> Result<Self, ControlError> {
        match self {
            Self::Rename(name) => {
                let name = name.trim();
                let len = name.chars().count();
                if len == 0 || len > MAX_CHANNEL_NAME {
                    return Err(ControlError::InvalidName);
                }
                Ok(Self::Rename(name.to_string()))
            }
            Self::SetLimit(limit) if !(0..=MAX_USER_LIMIT).contains(&limit) => {
                Err(ControlError::LimitOutOfRange(limit))
            }
            other => Ok(other),
        }
    }

    /// `(allow, deny)` for the everyone role; empty for metadata edits.
    fn everyone_permissions(&self) -> (Permissions, Permissions) {
        match self {
            Self::Lock => (Permissions::empty(), Permissions::CONNECT),
            Self::Unlock => (Permissions::CONNECT, Permissions::empty()),
            Self::Hide => (Permissions::empty(), Permissions::VIEW_CHANNEL),
            Self::Show => (Permissions::VIEW_CHANNEL, Permissions::empty()),
            Self::Rename(_) | Self::SetLimit(_) => (Permissions::empty(), Permissions::empty()),
        }
    }

    pub fn success_message(&self) -> String {
        match self {
            Self::Lock => "🔒 Your channel is now locked.".into(),
            Self::Unlock => "🔓 Your channel is now unlocked.".into(),
            Self::Hide => "🙈 Your channel is now hidden.".into(),
            Self::Show => "👀 Your channel is now visible.".into(),
            Self::Rename(name) => format!("✏️ Your channel is now called **{}**.", name),
            Self::SetLimit(0) => "👥 Your channel no longer has a user limit.".into(),
            Self::SetLimit(n) => format!("👥 Your channel now allows up to {} users.", n),
        }
    }
}

/// Sets `allow` and clears it from the deny side, or the reverse, leaving
/// every other bit of the target's overwrite intact.
fn merge_overwrite(
    existing: Option<&Overwrite>,
    target: OverwriteTarget,
    allow: Permissions,
    deny: Permissions,
) -> Overwrite {
    let (mut cur_allow, mut cur_deny) = existing
        .map(|o| (o.allow, o.deny))
        .unwrap_or((Permissions::empty(), Permissions::empty()));
    cur_allow.remove(deny);
    cur_deny.remove(allow);
    Overwrite {
        target,
        allow: cur_allow | allow,
        deny: cur_deny | deny,
    }
}

impl TempVoice {
    /// Looks up the channel `user_id` is in and confirms they own it. The
    /// store is queried on every call.
    pub async fn owned_channel_of(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<OwnedChannel, ControlError> {
        let channel_id = self
            .gateway
            .voice_channel_of(guild_id, user_id)
            .ok_or(ControlError::NotInVoice)?;

        match self.db.get_owned(channel_id).await {
            Some(record) if record.guild_id == guild_id && record.owner_user_id == user_id => {
                Ok(record)
            }
            _ => Err(ControlError::NotOwner),
        }
    }

    pub async fn control(
        &self,
        guild_id: u64,
        user_id: u64,
        action: ControlAction,
    ) -> Result<ControlAction, ControlError> {
        let action = action.validate()?;
        let record = match self.owned_channel_of(guild_id, user_id).await {
            Ok(record) => record,
            Err(e) => {
                debug!("Rejected {} from {}: {}", action.name(), user_id, e);
                return Err(e);
            }
        };
        let channel_id = record.channel_id;
        let everyone = OverwriteTarget::Role(guild_id);

        match &action {
            ControlAction::Rename(name) => {
                self.gateway
                    .edit_channel(
                        channel_id,
                        ChannelEdit {
                            name: Some(name.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            ControlAction::SetLimit(limit) => {
                self.gateway
                    .edit_channel(
                        channel_id,
                        ChannelEdit {
                            user_limit: Some(*limit as u32),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            toggle => {
                let (allow, deny) = toggle.everyone_permissions();
                let channel = self.gateway.fetch_channel(channel_id).await?;

                let overwrite =
                    merge_overwrite(channel.overwrite_for(everyone), everyone, allow, deny);
                self.gateway.put_overwrite(channel_id, overwrite).await?;

                if *toggle == ControlAction::Lock {
                    let owner = OverwriteTarget::Member(user_id);
                    let overwrite = merge_overwrite(
                        channel.overwrite_for(owner),
                        owner,
                        Permissions::CONNECT,
                        Permissions::empty(),
                    );
                    self.gateway.put_overwrite(channel_id, overwrite).await?;
                }
            }
        }

        info!(
            "{} applied {} to temp channel {}",
            user_id,
            action.name(),
            channel_id
        );
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tempvoice::database::HubConfig;
    use crate::modules::tempvoice::lifecycle::JoiningMember;
    use crate::modules::tempvoice::mock::{Call, MockGateway};
    use std::sync::Arc;

    const GUILD: u64 = 1;
    const HUB: u64 = 100;
    const OWNER: u64 = 10;
    const OTHER: u64 = 11;

    async fn setup() -> (tempfile::TempDir, Arc<MockGateway>, TempVoice, u64) {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::database::Database::new(
            dir.path().join("tempvoice.db").to_string_lossy().to_string(),
        )
        .await
        .unwrap();
        let gateway = Arc::new(MockGateway::new(GUILD));
        gateway.add_channel(HUB, "Join to create", None);
        let service = TempVoice::new(db, gateway.clone());
        service.db.set_hub(HubConfig::new(GUILD, HUB)).await.unwrap();

        let owner = JoiningMember {
            user_id: OWNER,
            display_name: "Ada".to_string(),
        };
        let channel = service.spawn(GUILD, &owner, HUB).await.unwrap();
        (dir, gateway, service, channel)
    }

    fn everyone(gateway: &MockGateway, channel: u64) -> Option<Overwrite> {
        gateway
            .channel(channel)
            .unwrap()
            .overwrite_for(OverwriteTarget::Role(GUILD))
            .copied()
    }

    fn mutations_after(gateway: &MockGateway, skip: usize) -> Vec<Call> {
        gateway.calls().into_iter().skip(skip).collect()
    }

    #[tokio::test]
    async fn test_owner_can_lock() {
        let (_dir, gateway, service, channel) = setup().await;

        service.control(GUILD, OWNER, ControlAction::Lock).await.unwrap();

        let info = gateway.channel(channel).unwrap();
        let everyone = info.overwrite_for(OverwriteTarget::Role(GUILD)).unwrap();
        assert!(everyone.deny.contains(Permissions::CONNECT));
        let owner = info.overwrite_for(OverwriteTarget::Member(OWNER)).unwrap();
        assert!(owner.allow.contains(Permissions::CONNECT));
    }

    #[tokio::test]
    async fn test_non_owner_is_rejected_without_mutation() {
        let (_dir, gateway, service, channel) = setup().await;
        gateway.place(OTHER, channel);
        let before = gateway.calls().len();

        for action in [
            ControlAction::Lock,
            ControlAction::Unlock,
            ControlAction::Hide,
            ControlAction::Show,
            ControlAction::Rename("mine now".into()),
            ControlAction::SetLimit(2),
        ] {
            let err = service.control(GUILD, OTHER, action).await.unwrap_err();
            assert!(matches!(err, ControlError::NotOwner));
            assert!(err.is_rejection());
        }

        assert!(mutations_after(&gateway, before).is_empty());
        assert!(everyone(&gateway, channel).is_none());
    }

    #[tokio::test]
    async fn test_owner_outside_their_channel_is_rejected() {
        let (_dir, gateway, service, _channel) = setup().await;

        gateway.remove_member(OWNER);
        assert!(matches!(
            service.control(GUILD, OWNER, ControlAction::Hide).await,
            Err(ControlError::NotInVoice)
        ));

        gateway.place(OWNER, HUB);
        assert!(matches!(
            service.control(GUILD, OWNER, ControlAction::Hide).await,
            Err(ControlError::NotOwner)
        ));
    }

    #[tokio::test]
    async fn test_limit_out_of_range_rejected_before_any_call() {
        let (_dir, gateway, service, channel) = setup().await;
        let before = gateway.calls().len();

        for limit in [150, 100, -1] {
            let err = service
                .control(GUILD, OWNER, ControlAction::SetLimit(limit))
                .await
                .unwrap_err();
            assert!(matches!(err, ControlError::LimitOutOfRange(l) if l == limit));
        }

        assert!(mutations_after(&gateway, before).is_empty());
        assert_eq!(gateway.channel(channel).unwrap().user_limit, None);
    }

    #[tokio::test]
    async fn test_limit_then_lock_then_unlock() {
        let (_dir, gateway, service, channel) = setup().await;

        service
            .control(GUILD, OWNER, ControlAction::SetLimit(10))
            .await
            .unwrap();
        service.control(GUILD, OWNER, ControlAction::Lock).await.unwrap();
        service.control(GUILD, OWNER, ControlAction::Unlock).await.unwrap();

        let overwrite = everyone(&gateway, channel).unwrap();
        assert!(overwrite.allow.contains(Permissions::CONNECT));
        assert!(!overwrite.deny.contains(Permissions::CONNECT));
        assert_eq!(gateway.channel(channel).unwrap().user_limit, Some(10));
    }

    #[tokio::test]
    async fn test_hide_and_lock_compose() {
        let (_dir, gateway, service, channel) = setup().await;

        service.control(GUILD, OWNER, ControlAction::Hide).await.unwrap();
        service.control(GUILD, OWNER, ControlAction::Lock).await.unwrap();

        let overwrite = everyone(&gateway, channel).unwrap();
        assert!(overwrite.deny.contains(Permissions::VIEW_CHANNEL | Permissions::CONNECT));

        service.control(GUILD, OWNER, ControlAction::Show).await.unwrap();
        let overwrite = everyone(&gateway, channel).unwrap();
        assert!(overwrite.allow.contains(Permissions::VIEW_CHANNEL));
        assert!(overwrite.deny.contains(Permissions::CONNECT));
    }

    #[tokio::test]
    async fn test_rename_trims_and_bounds_length() {
        let (_dir, gateway, service, channel) = setup().await;
        let before = gateway.calls().len();

        assert!(matches!(
            service
                .control(GUILD, OWNER, ControlAction::Rename("   ".into()))
                .await,
            Err(ControlError::InvalidName)
        ));
        assert!(matches!(
            service
                .control(GUILD, OWNER, ControlAction::Rename("x".repeat(101)))
                .await,
            Err(ControlError::InvalidName)
        ));
        assert!(mutations_after(&gateway, before).is_empty());

        let applied = service
            .control(GUILD, OWNER, ControlAction::Rename("  study room ".into()))
            .await
            .unwrap();
        assert_eq!(applied, ControlAction::Rename("study room".into()));
        assert_eq!(gateway.channel(channel).unwrap().name, "study room");
    }

    #[tokio::test]
    async fn test_ownership_survives_service_restart() {
        let (dir, gateway, service, channel) = setup().await;
        drop(service);

        let db = crate::database::Database::new(
            dir.path().join("tempvoice.db").to_string_lossy().to_string(),
        )
        .await
        .unwrap();
        let restarted = TempVoice::new(db, gateway.clone());

        restarted
            .control(GUILD, OWNER, ControlAction::SetLimit(3))
            .await
            .unwrap();
        assert_eq!(gateway.channel(channel).unwrap().user_limit, Some(3));
    }

    #[test]
    fn test_merge_overwrite_flips_only_requested_bits() {
        let existing = Overwrite {
            target: OverwriteTarget::Role(GUILD),
            allow: Permissions::SPEAK,
            deny: Permissions::CONNECT | Permissions::VIEW_CHANNEL,
        };
        let merged = merge_overwrite(
            Some(&existing),
            existing.target,
            Permissions::CONNECT,
            Permissions::empty(),
        );
        assert_eq!(merged.allow, Permissions::SPEAK | Permissions::CONNECT);
        assert_eq!(merged.deny, Permissions::VIEW_CHANNEL);
    }
}
