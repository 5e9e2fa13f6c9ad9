use crate::database::{Database, DbError};
use crate::utils::truncate_chars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_NAME_TEMPLATE: &str = "{user}'s channel";
pub const MAX_CHANNEL_NAME: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    pub guild_id: u64,
    pub hub_channel_id: u64,
    pub name_template: String,
}

impl HubConfig {
    pub fn new(guild_id: u64, hub_channel_id: u64) -> Self {
        Self {
            guild_id,
            hub_channel_id,
            name_template: DEFAULT_NAME_TEMPLATE.to_string(),
        }
    }

    pub fn channel_name_for(&self, display_name: &str) -> String {
        let name = self.name_template.replace("{user}", display_name.trim());
        let name = truncate_chars(name.trim(), MAX_CHANNEL_NAME);
        if name.is_empty() {
            "voice".to_string()
        } else {
            name.to_string()
        }
    }

    /// Whether `name` looks like it came from this hub's template. A
    /// template with no fixed text matches nothing.
    pub fn matches_channel_name(&self, name: &str) -> bool {
        let template = self.name_template.trim();
        let Some((prefix, rest)) = template.split_once("{user}") else {
            return !template.is_empty() && name == template;
        };
        let suffix = rest.rsplit("{user}").next().unwrap_or(rest);
        if prefix.is_empty() && suffix.is_empty() {
            return false;
        }
        name.len() > prefix.len() + suffix.len()
            && name.starts_with(prefix)
            && name.ends_with(suffix)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnedChannel {
    pub guild_id: u64,
    pub owner_user_id: u64,
    pub channel_id: u64,
    pub created_at: DateTime<Utc>,
}

impl OwnedChannel {
    pub fn new(guild_id: u64, owner_user_id: u64, channel_id: u64) -> Self {
        Self {
            guild_id,
            owner_user_id,
            channel_id,
            created_at: Utc::now(),
        }
    }
}

/// Hub configuration keyed by guild id, ownership records keyed by channel
/// id. Keying `owned` by channel id makes a second record for the same
/// channel unrepresentable.
#[derive(Default, Serialize, Deserialize, Clone, Debug)]
pub struct TempVoiceDatabase {
    pub hubs: HashMap<u64, HubConfig>,
    pub owned: HashMap<u64, OwnedChannel>,
}

pub type TempVoiceStore = Database<TempVoiceDatabase>;

impl TempVoiceStore {
    pub async fn get_hub(&self, guild_id: u64) -> Option<HubConfig> {
        self.read(|db| db.hubs.get(&guild_id).cloned()).await
    }

    pub async fn hub_guild_ids(&self) -> Vec<u64> {
        self.read(|db| db.hubs.keys().copied().collect()).await
    }

    /// Stores `hub`, returning the configuration it replaced.
    pub async fn set_hub(&self, hub: HubConfig) -> Result<Option<HubConfig>, DbError> {
        self.transaction(|db| {
            if db.owned.contains_key(&hub.hub_channel_id) {
                return Err(format!(
                    "channel {} is a temporary channel and cannot be a hub",
                    hub.hub_channel_id
                ));
            }
            Ok(db.hubs.insert(hub.guild_id, hub))
        })
        .await
    }

    pub async fn remove_hub(&self, guild_id: u64) -> Result<Option<HubConfig>, DbError> {
        self.transaction(|db| Ok(db.hubs.remove(&guild_id))).await
    }

    pub async fn get_owned(&self, channel_id: u64) -> Option<OwnedChannel> {
        self.read(|db| db.owned.get(&channel_id).cloned()).await
    }

    pub async fn owned_in_guild(&self, guild_id: u64) -> Vec<OwnedChannel> {
        self.read(|db| {
            db.owned
                .values()
                .filter(|c| c.guild_id == guild_id)
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn insert_owned(&self, record: OwnedChannel) -> Result<(), DbError> {
        self.transaction(|db| {
            if db
                .hubs
                .get(&record.guild_id)
                .is_some_and(|hub| hub.hub_channel_id == record.channel_id)
            {
                return Err(format!(
                    "channel {} is the hub of guild {}",
                    record.channel_id, record.guild_id
                ));
            }
            if db.owned.contains_key(&record.channel_id) {
                return Err(format!("channel {} already has an owner", record.channel_id));
            }
            db.owned.insert(record.channel_id, record);
            Ok(())
        })
        .await
    }

    pub async fn remove_owned(&self, channel_id: u64) -> Result<Option<OwnedChannel>, DbError> {
        if self.get_owned(channel_id).await.is_none() {
            return Ok(None);
        }
        self.transaction(|db| Ok(db.owned.remove(&channel_id))).await
    }
}
