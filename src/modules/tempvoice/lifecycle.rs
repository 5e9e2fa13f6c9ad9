use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::database::{OwnedChannel, TempVoiceStore};
use super::gateway::{ChannelGateway, GatewayError, NewVoiceChannel};
use crate::database::DbError;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Reaped,
    NotOwned,
    Occupied,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stale_records: usize,
    pub reaped: usize,
    pub pruned: usize,
}

/// Async mutexes keyed by channel id. Entries are removed once nobody
/// holds or waits on them.
#[derive(Debug, Default)]
pub struct ChannelLocks {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

pub struct ChannelGuard<'a> {
    locks: &'a ChannelLocks,
    channel_id: u64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ChannelLocks {
    pub async fn lock(&self, channel_id: u64) -> ChannelGuard<'_> {
        let mutex = self.locks.entry(channel_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        ChannelGuard {
            locks: self,
            channel_id,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds one reference; anything more is a waiter.
        self.locks
            .locks
            .remove_if(&self.channel_id, |_, m| Arc::strong_count(m) == 1);
    }
}

/// Spawns in progress per guild. Reconcile leaves unrecorded channels alone
/// while any are in flight.
#[derive(Debug, Default)]
pub struct SpawnTracker {
    guilds: DashMap<u64, usize>,
}

pub struct SpawnTicket<'a> {
    tracker: &'a SpawnTracker,
    guild_id: u64,
}

impl SpawnTracker {
    pub fn begin(&self, guild_id: u64) -> SpawnTicket<'_> {
        *self.guilds.entry(guild_id).or_default() += 1;
        SpawnTicket {
            tracker: self,
            guild_id,
        }
    }

    pub fn in_flight(&self, guild_id: u64) -> bool {
        self.guilds.get(&guild_id).is_some_and(|n| *n > 0)
    }
}

impl Drop for SpawnTicket<'_> {
    fn drop(&mut self) {
        if let Some(mut count) = self.tracker.guilds.get_mut(&self.guild_id) {
            *count = count.saturating_sub(1);
        }
        self.tracker.guilds.remove_if(&self.guild_id, |_, n| *n == 0);
    }
}

/// How long reconcile leaves a new channel alone, so the cache can catch up
/// with the owner being moved in.
pub const RECONCILE_GRACE_SECS: i64 = 30;

/// A member joining a hub.
#[derive(Debug, Clone)]
pub struct JoiningMember {
    pub user_id: u64,
    pub display_name: String,
}

/// The temporary voice channel lifecycle controller and the owner control
/// surface share this service. The store is the only record of which
/// channels are temporary; nothing is cached in memory.
#[derive(Debug)]
pub struct TempVoice {
    pub(super) db: TempVoiceStore,
    pub(super) gateway: Arc<dyn ChannelGateway>,
    pub(super) locks: ChannelLocks,
    pub(super) spawns: SpawnTracker,
    pub(super) reap_grace: Duration,
}

impl TempVoice {
    pub fn new(db: TempVoiceStore, gateway: Arc<dyn ChannelGateway>) -> Self {
        Self {
            db,
            gateway,
            locks: ChannelLocks::default(),
            spawns: SpawnTracker::default(),
            reap_grace: Duration::seconds(RECONCILE_GRACE_SECS),
        }
    }

    /// Creates a channel for `member` cloned from the hub, records the
    /// ownership and moves the member in. Returns the new channel id.
    pub async fn spawn(
        &self,
        guild_id: u64,
        member: &JoiningMember,
        hub_channel_id: u64,
    ) -> Result<u64, LifecycleError> {
        let _spawning = self.spawns.begin(guild_id);
        let hub_config = self.db.get_hub(guild_id).await;
        let hub = self.gateway.fetch_channel(hub_channel_id).await?;
        let name = match &hub_config {
            Some(config) => config.channel_name_for(&member.display_name),
            None => member.display_name.clone(),
        };

        let channel_id = self
            .gateway
            .create_voice_channel(guild_id, NewVoiceChannel::cloned_from(&hub, name))
            .await?;
        let _guard = self.locks.lock(channel_id).await;

        let record = OwnedChannel::new(guild_id, member.user_id, channel_id);
        if let Err(e) = self.db.insert_owned(record).await {
            error!(
                "Failed to record ownership of {} for {}: {}",
                channel_id, member.user_id, e
            );
            if let Err(del) = self.gateway.delete_channel(channel_id).await {
                if !del.is_not_found() {
                    error!("Failed to remove unrecorded channel {}: {}", channel_id, del);
                }
            }
            return Err(e.into());
        }

        info!(
            "Created temp channel {} for {} in guild {}",
            channel_id, member.user_id, guild_id
        );

        if let Err(e) = self
            .gateway
            .move_member(guild_id, member.user_id, channel_id)
            .await
        {
            warn!(
                "Failed to move {} into {}: {}; it will be reaped once empty",
                member.user_id, channel_id, e
            );
        }

        Ok(channel_id)
    }

    /// Deletes the live channel, then its record. A channel that is already
    /// gone counts as deleted. Any other failure keeps the record so the
    /// channel is never left without an owner.
    pub async fn reap(&self, channel_id: u64) -> Result<ReapOutcome, LifecycleError> {
        let _guard = self.locks.lock(channel_id).await;
        self.reap_locked(channel_id).await
    }

    /// Like [`reap`](Self::reap), but only if the channel is still empty once
    /// the channel lock is held.
    pub async fn reap_if_empty(&self, channel_id: u64) -> Result<ReapOutcome, LifecycleError> {
        let _guard = self.locks.lock(channel_id).await;
        let Some(record) = self.db.get_owned(channel_id).await else {
            return Ok(ReapOutcome::NotOwned);
        };
        if self
            .gateway
            .member_count(record.guild_id, channel_id)
            .is_some_and(|n| n > 0)
        {
            debug!("Skipping reap of {}: members rejoined", channel_id);
            return Ok(ReapOutcome::Occupied);
        }
        self.reap_locked(channel_id).await
    }

    async fn reap_locked(&self, channel_id: u64) -> Result<ReapOutcome, LifecycleError> {
        if self.db.get_owned(channel_id).await.is_none() {
            return Ok(ReapOutcome::NotOwned);
        }

        match self.gateway.delete_channel(channel_id).await {
            Ok(()) => {}
            Err(GatewayError::NotFound) => {
                debug!("Temp channel {} was already deleted", channel_id);
            }
            Err(e) => return Err(e.into()),
        }

        self.db.remove_owned(channel_id).await?;
        info!("Reaped temp channel {}", channel_id);
        Ok(ReapOutcome::Reaped)
    }

    /// Removes the guild's hub and every channel created under it. Returns
    /// the number of channels reaped.
    pub async fn teardown(&self, guild_id: u64) -> Result<usize, LifecycleError> {
        self.db.remove_hub(guild_id).await?;

        let mut reaped = 0;
        let mut last_error = None;
        for record in self.db.owned_in_guild(guild_id).await {
            match self.reap(record.channel_id).await {
                Ok(ReapOutcome::Reaped) => reaped += 1,
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to reap {} during teardown: {}", record.channel_id, e);
                    last_error = Some(e);
                }
            }
        }

        info!("Tore down temp voice for guild {} ({} channels)", guild_id, reaped);
        match last_error {
            Some(e) => Err(e),
            None => Ok(reaped),
        }
    }

    /// Brings the store back in line with the live guild: drops records for
    /// channels that no longer exist, reaps empty owned channels and prunes
    /// empty, unrecorded voice channels in the hub's category that carry the
    /// hub's naming. Every decision is re-checked under the channel lock,
    /// since spawns keep running while the listing is in hand.
    ///
    /// Skipped while the guild is missing from the cache, since member
    /// counts would read as zero.
    pub async fn reconcile_guild(&self, guild_id: u64) -> Result<ReconcileReport, LifecycleError> {
        let mut report = ReconcileReport::default();
        let Some(hub) = self.db.get_hub(guild_id).await else {
            return Ok(report);
        };
        if self.gateway.member_count(guild_id, hub.hub_channel_id).is_none() {
            debug!("Guild {} not cached yet, skipping reconcile", guild_id);
            return Ok(report);
        }

        let live = self.gateway.guild_voice_channels(guild_id).await?;
        let live_ids: HashSet<u64> = live.iter().map(|c| c.id).collect();

        for record in self.db.owned_in_guild(guild_id).await {
            let channel_id = record.channel_id;
            let _guard = self.locks.lock(channel_id).await;
            let Some(record) = self.db.get_owned(channel_id).await else {
                continue;
            };

            if !live_ids.contains(&channel_id) {
                // The listing may predate the channel.
                match self.gateway.fetch_channel(channel_id).await {
                    Err(GatewayError::NotFound) => {
                        self.db.remove_owned(channel_id).await?;
                        report.stale_records += 1;
                    }
                    Ok(_) => debug!("Channel {} appeared after listing", channel_id),
                    Err(e) => warn!("Failed to check channel {}: {}", channel_id, e),
                }
                continue;
            }

            if Utc::now() - record.created_at < self.reap_grace {
                continue;
            }
            if self.gateway.member_count(guild_id, channel_id) == Some(0) {
                match self.reap_locked(channel_id).await {
                    Ok(ReapOutcome::Reaped) => report.reaped += 1,
                    Ok(_) => {}
                    Err(e) => warn!("Failed to reap {}: {}", channel_id, e),
                }
            }
        }

        let hub_category = live
            .iter()
            .find(|c| c.id == hub.hub_channel_id)
            .and_then(|c| c.category_id);
        if let Some(category) = hub_category {
            for channel in live.iter().filter(|c| {
                c.category_id == Some(category)
                    && c.id != hub.hub_channel_id
                    && hub.matches_channel_name(&c.name)
            }) {
                if self.spawns.in_flight(guild_id) {
                    debug!("Spawn in flight in guild {}, skipping prune", guild_id);
                    break;
                }
                let _guard = self.locks.lock(channel.id).await;
                if self.db.get_owned(channel.id).await.is_some()
                    || self.gateway.member_count(guild_id, channel.id) != Some(0)
                {
                    continue;
                }
                match self.gateway.delete_channel(channel.id).await {
                    Ok(()) | Err(GatewayError::NotFound) => report.pruned += 1,
                    Err(e) => warn!("Failed to prune orphaned channel {}: {}", channel.id, e),
                }
            }
        }

        if report != ReconcileReport::default() {
            info!("Reconciled guild {}: {:?}", guild_id, report);
        }
        Ok(report)
    }

    pub async fn reconcile_all(&self) {
        let mut total = ReconcileReport::default();
        for guild_id in self.db.hub_guild_ids().await {
            match self.reconcile_guild(guild_id).await {
                Ok(report) => {
                    total.stale_records += report.stale_records;
                    total.reaped += report.reaped;
                    total.pruned += report.pruned;
                }
                Err(e) => error!("Failed to reconcile guild {}: {}", guild_id, e),
            }
        }
        debug!(
            "Reconcile pass: {} stale records, {} reaped, {} pruned",
            total.stale_records, total.reaped, total.pruned
        );
    }
}
