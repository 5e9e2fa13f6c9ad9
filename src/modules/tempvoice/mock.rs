use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::gateway::{
    ChannelEdit, ChannelGateway, GatewayError, NewVoiceChannel, Overwrite, VoiceChannelInfo,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(u64),
    Delete(u64),
    Edit(u64, ChannelEdit),
    Overwrite(u64, Overwrite),
    Move { user_id: u64, channel_id: u64 },
}

#[derive(Debug)]
struct State {
    channels: HashMap<u64, VoiceChannelInfo>,
    voice: HashMap<u64, u64>,
    calls: Vec<Call>,
    next_id: u64,
    cached: bool,
    fail_creates: bool,
    fail_deletes: bool,
    fail_moves: bool,
}

/// In-memory guild used by the temp voice tests. Mutating calls are
/// recorded in order; reads are not.
#[derive(Debug)]
pub struct MockGateway {
    guild_id: u64,
    state: Mutex<State>,
}

impl MockGateway {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            state: Mutex::new(State {
                channels: HashMap::new(),
                voice: HashMap::new(),
                calls: Vec::new(),
                next_id: 1000,
                cached: true,
                fail_creates: false,
                fail_deletes: false,
                fail_moves: false,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_channel(&self, id: u64, name: &str, category_id: Option<u64>) {
        let info = VoiceChannelInfo {
            id,
            guild_id: self.guild_id,
            name: name.to_string(),
            category_id,
            user_limit: None,
            bitrate: Some(64000),
            overwrites: Vec::new(),
        };
        self.state().channels.insert(id, info);
    }

    pub fn channel(&self, id: u64) -> Option<VoiceChannelInfo> {
        self.state().channels.get(&id).cloned()
    }

    pub fn place(&self, user_id: u64, channel_id: u64) {
        self.state().voice.insert(user_id, channel_id);
    }

    pub fn remove_member(&self, user_id: u64) {
        self.state().voice.remove(&user_id);
    }

    /// Deletes a channel behind the bot's back.
    pub fn vanish(&self, channel_id: u64) {
        let mut state = self.state();
        state.channels.remove(&channel_id);
        state.voice.retain(|_, c| *c != channel_id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn created_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    pub fn set_cached(&self, cached: bool) {
        self.state().cached = cached;
    }

    pub fn fail_creates(&self) {
        self.state().fail_creates = true;
    }

    pub fn fail_deletes(&self) {
        self.state().fail_deletes = true;
    }

    pub fn fail_moves(&self) {
        self.state().fail_moves = true;
    }
}

#[async_trait]
impl ChannelGateway for MockGateway {
    async fn fetch_channel(&self, channel_id: u64) -> Result<VoiceChannelInfo, GatewayError> {
        self.channel(channel_id).ok_or(GatewayError::NotFound)
    }

    async fn guild_voice_channels(
        &self,
        guild_id: u64,
    ) -> Result<Vec<VoiceChannelInfo>, GatewayError> {
        Ok(self
            .state()
            .channels
            .values()
            .filter(|c| c.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn create_voice_channel(
        &self,
        guild_id: u64,
        channel: NewVoiceChannel,
    ) -> Result<u64, GatewayError> {
        let mut state = self.state();
        if state.fail_creates {
            return Err(GatewayError::Transient("gateway unavailable".into()));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.channels.insert(
            id,
            VoiceChannelInfo {
                id,
                guild_id,
                name: channel.name,
                category_id: channel.category_id,
                user_limit: channel.user_limit,
                bitrate: channel.bitrate,
                overwrites: channel.overwrites,
            },
        );
        state.calls.push(Call::Create(id));
        Ok(id)
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<(), GatewayError> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(GatewayError::Api("missing permissions".into()));
        }
        state.calls.push(Call::Delete(channel_id));
        if state.channels.remove(&channel_id).is_none() {
            return Err(GatewayError::NotFound);
        }
        state.voice.retain(|_, c| *c != channel_id);
        Ok(())
    }

    async fn edit_channel(&self, channel_id: u64, edit: ChannelEdit) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(Call::Edit(channel_id, edit.clone()));
        let channel = state
            .channels
            .get_mut(&channel_id)
            .ok_or(GatewayError::NotFound)?;
        if let Some(name) = edit.name {
            channel.name = name;
        }
        if let Some(limit) = edit.user_limit {
            channel.user_limit = Some(limit);
        }
        Ok(())
    }

    async fn put_overwrite(
        &self,
        channel_id: u64,
        overwrite: Overwrite,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(Call::Overwrite(channel_id, overwrite));
        let channel = state
            .channels
            .get_mut(&channel_id)
            .ok_or(GatewayError::NotFound)?;
        channel.overwrites.retain(|o| o.target != overwrite.target);
        channel.overwrites.push(overwrite);
        Ok(())
    }

    async fn move_member(
        &self,
        _guild_id: u64,
        user_id: u64,
        channel_id: u64,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.calls.push(Call::Move {
            user_id,
            channel_id,
        });
        if state.fail_moves {
            return Err(GatewayError::Api("target user is not connected to voice".into()));
        }
        state.voice.insert(user_id, channel_id);
        Ok(())
    }

    fn member_count(&self, _guild_id: u64, channel_id: u64) -> Option<usize> {
        let state = self.state();
        if !state.cached {
            return None;
        }
        Some(state.voice.values().filter(|c| **c == channel_id).count())
    }

    fn voice_channel_of(&self, _guild_id: u64, user_id: u64) -> Option<u64> {
        let state = self.state();
        if !state.cached {
            return None;
        }
        state.voice.get(&user_id).copied()
    }
}

/// Wraps a [`MockGateway`] and stalls chosen calls so tests can interleave
/// work that would otherwise finish without yielding.
#[derive(Debug)]
pub struct SlowGateway {
    pub inner: Arc<MockGateway>,
    /// Applied after the listing is taken.
    pub list_delay: Duration,
    /// Applied after the channel exists, before its id is returned.
    pub create_delay: Duration,
    /// Applied before the member is moved.
    pub move_delay: Duration,
}

impl SlowGateway {
    pub fn new(inner: Arc<MockGateway>) -> Self {
        Self {
            inner,
            list_delay: Duration::ZERO,
            create_delay: Duration::ZERO,
            move_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl ChannelGateway for SlowGateway {
    async fn fetch_channel(&self, channel_id: u64) -> Result<VoiceChannelInfo, GatewayError> {
        self.inner.fetch_channel(channel_id).await
    }

    async fn guild_voice_channels(
        &self,
        guild_id: u64,
    ) -> Result<Vec<VoiceChannelInfo>, GatewayError> {
        let channels = self.inner.guild_voice_channels(guild_id).await;
        sleep(self.list_delay).await;
        channels
    }

    async fn create_voice_channel(
        &self,
        guild_id: u64,
        channel: NewVoiceChannel,
    ) -> Result<u64, GatewayError> {
        let id = self.inner.create_voice_channel(guild_id, channel).await;
        sleep(self.create_delay).await;
        id
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<(), GatewayError> {
        self.inner.delete_channel(channel_id).await
    }

    async fn edit_channel(&self, channel_id: u64, edit: ChannelEdit) -> Result<(), GatewayError> {
        self.inner.edit_channel(channel_id, edit).await
    }

    async fn put_overwrite(
        &self,
        channel_id: u64,
        overwrite: Overwrite,
    ) -> Result<(), GatewayError> {
        self.inner.put_overwrite(channel_id, overwrite).await
    }

    async fn move_member(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
    ) -> Result<(), GatewayError> {
        sleep(self.move_delay).await;
        self.inner.move_member(guild_id, user_id, channel_id).await
    }

    fn member_count(&self, guild_id: u64, channel_id: u64) -> Option<usize> {
        self.inner.member_count(guild_id, channel_id)
    }

    fn voice_channel_of(&self, guild_id: u64, user_id: u64) -> Option<u64> {
        self.inner.voice_channel_of(guild_id, user_id)
    }
}
