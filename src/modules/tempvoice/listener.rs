use tracing::{debug, error};

use super::lifecycle::{JoiningMember, ReapOutcome, TempVoice};

/// One member's move between voice channels in a guild.
#[derive(Debug, Clone)]
pub struct VoiceTransition {
    pub guild_id: u64,
    pub user_id: u64,
    pub display_name: String,
    pub previous: Option<u64>,
    pub current: Option<u64>,
}

/// What a transition caused.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransitionEffects {
    pub reaped: Option<u64>,
    pub spawned: Option<u64>,
}

impl TempVoice {
    /// Reaps the channel the member left if it is now an empty temp
    /// channel, then spawns a channel if they joined the hub. The two halves
    /// are independent; a failure in one is logged and does not skip the
    /// other.
    pub async fn on_voice_transition(&self, transition: VoiceTransition) -> TransitionEffects {
        let mut effects = TransitionEffects::default();
        if transition.previous == transition.current {
            return effects;
        }

        if let Some(left) = transition.previous {
            let empty = self.gateway.member_count(transition.guild_id, left) == Some(0);
            if empty && self.db.get_owned(left).await.is_some() {
                match self.reap_if_empty(left).await {
                    Ok(ReapOutcome::Reaped) => effects.reaped = Some(left),
                    Ok(outcome) => debug!("Reap of {} skipped: {:?}", left, outcome),
                    Err(e) => error!("Failed to reap temp channel {}: {}", left, e),
                }
            }
        }

        if let Some(joined) = transition.current {
            let is_hub = self
                .db
                .get_hub(transition.guild_id)
                .await
                .is_some_and(|hub| hub.hub_channel_id == joined);
            if is_hub {
                let member = JoiningMember {
                    user_id: transition.user_id,
                    display_name: transition.display_name.clone(),
                };
                match self.spawn(transition.guild_id, &member, joined).await {
                    Ok(channel) => effects.spawned = Some(channel),
                    Err(e) => error!(
                        "Failed to create temp channel for {} in guild {}: {}",
                        transition.user_id, transition.guild_id, e
                    ),
                }
            }
        }

        effects
    }
}
