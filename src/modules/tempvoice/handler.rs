use async_trait::async_trait;
use poise::serenity_prelude::{
    ComponentInteraction, Context, CreateInteractionResponse, CreateInteractionResponseMessage,
    FullEvent, Interaction, ModalInteraction, VoiceState,
};
use poise::Modal;
use std::sync::Arc;
use tracing::{debug, error};

use super::controls::ControlAction;
use super::lifecycle::TempVoice;
use super::listener::VoiceTransition;
use super::panel::{LimitForm, PanelButton, RenameForm, LIMIT_FORM_ID, RENAME_FORM_ID};
use crate::events::EventHandler;

/// Runs a control action and turns the outcome into the single ephemeral
/// reply the invoking user sees.
pub async fn control_reply(
    service: &TempVoice,
    guild_id: u64,
    user_id: u64,
    action: ControlAction,
) -> String {
    let name = action.name();
    match service.control(guild_id, user_id, action).await {
        Ok(applied) => applied.success_message(),
        Err(e) => {
            if !e.is_rejection() {
                error!("Voice {} by {} in {} failed: {}", name, user_id, guild_id, e);
            }
            e.user_message()
        }
    }
}

fn ephemeral(content: impl Into<String>) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    )
}

pub fn transition_from(old: Option<&VoiceState>, new: &VoiceState) -> Option<VoiceTransition> {
    let guild_id = new.guild_id?;
    let display_name = new
        .member
        .as_ref()
        .map(|m| m.display_name().to_string())
        .unwrap_or_else(|| new.user_id.to_string());

    Some(VoiceTransition {
        guild_id: guild_id.get(),
        user_id: new.user_id.get(),
        display_name,
        previous: old.and_then(|s| s.channel_id).map(|c| c.get()),
        current: new.channel_id.map(|c| c.get()),
    })
}

#[derive(Debug, Clone)]
pub struct TempVoiceHandler {
    service: Arc<TempVoice>,
}

impl TempVoiceHandler {
    pub fn new(service: Arc<TempVoice>) -> Self {
        Self { service }
    }

    async fn handle_button(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(button) = PanelButton::from_custom_id(&interaction.data.custom_id) else {
            return Ok(());
        };
        let Some(guild_id) = interaction.guild_id else {
            interaction
                .create_response(&ctx.http, ephemeral("❌ This only works in a server."))
                .await?;
            return Ok(());
        };

        let response = match button.action() {
            Some(action) => ephemeral(
                control_reply(&self.service, guild_id.get(), interaction.user.id.get(), action)
                    .await,
            ),
            None if button == PanelButton::Rename => {
                RenameForm::create(None, RENAME_FORM_ID.to_string())
            }
            None => LimitForm::create(None, LIMIT_FORM_ID.to_string()),
        };

        interaction.create_response(&ctx.http, response).await?;
        Ok(())
    }

    async fn handle_form(
        &self,
        ctx: &Context,
        interaction: &ModalInteraction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let action = match interaction.data.custom_id.as_str() {
            RENAME_FORM_ID => RenameForm::parse(interaction.data.clone())
                .map(|form| ControlAction::Rename(form.name)),
            LIMIT_FORM_ID => LimitForm::parse(interaction.data.clone()).map(|form| form.action()),
            _ => return Ok(()),
        };

        let content = match (interaction.guild_id, action) {
            (Some(guild_id), Ok(action)) => {
                control_reply(&self.service, guild_id.get(), interaction.user.id.get(), action)
                    .await
            }
            (None, _) => "❌ This only works in a server.".to_string(),
            (_, Err(e)) => {
                error!("Malformed form submission {}: {}", interaction.data.custom_id, e);
                "❌ That form could not be read, please try again.".to_string()
            }
        };

        interaction
            .create_response(&ctx.http, ephemeral(content))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for TempVoiceHandler {
    fn name(&self) -> &str {
        "TempVoice"
    }

    async fn handle(
        &self,
        ctx: &Context,
        event: &FullEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match event {
            FullEvent::VoiceStateUpdate { old, new } => {
                if let Some(transition) = transition_from(old.as_ref(), new) {
                    let effects = self.service.on_voice_transition(transition).await;
                    if effects.reaped.is_some() || effects.spawned.is_some() {
                        debug!(
                            "Voice update handled: reaped {:?}, spawned {:?}",
                            effects.reaped, effects.spawned
                        );
                    }
                }
            }
            FullEvent::GuildCreate { guild, .. } => {
                self.service.reconcile_guild(guild.id.get()).await?;
            }
            FullEvent::InteractionCreate { interaction } => match interaction {
                Interaction::Component(component) => self.handle_button(ctx, component).await?,
                Interaction::Modal(modal) => self.handle_form(ctx, modal).await?,
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn EventHandler> {
        Box::new(self.clone())
    }
}
