use crate::{Context, Error};
use poise::serenity_prelude::{self as serenity, ChannelType};
use poise::{command, CreateReply};
use tracing::error;

use super::controls::ControlAction;
use super::database::{HubConfig, DEFAULT_NAME_TEMPLATE};
use super::handler::control_reply;
use super::panel::panel_components;

async fn run_control(ctx: Context<'_>, action: ControlAction) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("guild only")?.get();
    let reply = control_reply(&ctx.data().tempvoice, guild_id, ctx.author().id.get(), action).await;
    ctx.send(CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}

/// Stop anyone else from joining your channel
#[command(slash_command, guild_only, ephemeral)]
pub async fn lock(ctx: Context<'_>) -> Result<(), Error> {
    run_control(ctx, ControlAction::Lock).await
}

/// Let everyone join your channel again
#[command(slash_command, guild_only, ephemeral)]
pub async fn unlock(ctx: Context<'_>) -> Result<(), Error> {
    run_control(ctx, ControlAction::Unlock).await
}

/// Hide your channel from the channel list
#[command(slash_command, guild_only, ephemeral)]
pub async fn hide(ctx: Context<'_>) -> Result<(), Error> {
    run_control(ctx, ControlAction::Hide).await
}

/// Make your channel visible again
#[command(slash_command, guild_only, ephemeral)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    run_control(ctx, ControlAction::Show).await
}

/// Rename your channel
#[command(slash_command, guild_only, ephemeral)]
pub async fn rename(
    ctx: Context<'_>,
    #[description = "New channel name"]
    #[max_length = 100]
    name: String,
) -> Result<(), Error> {
    run_control(ctx, ControlAction::Rename(name)).await
}

/// Limit how many people can join your channel
#[command(slash_command, guild_only, ephemeral)]
pub async fn limit(
    ctx: Context<'_>,
    #[description = "Maximum users (0 removes the limit)"]
    #[min = 0]
    #[max = 99]
    limit: i64,
) -> Result<(), Error> {
    run_control(ctx, ControlAction::SetLimit(limit)).await
}

/// Show buttons for managing your channel
#[command(slash_command, guild_only, ephemeral)]
pub async fn panel(ctx: Context<'_>) -> Result<(), Error> {
    ctx.send(
        CreateReply::default()
            .content("🎛️ **Voice channel controls**\nThese only work on a channel you own.")
            .components(panel_components())
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Set the join-to-create hub channel
#[command(slash_command, guild_only, required_permissions = "MANAGE_CHANNELS", ephemeral)]
pub async fn setup(
    ctx: Context<'_>,
    #[description = "Voice channel members join to get their own channel"]
    #[channel_types("Voice")]
    hub: serenity::GuildChannel,
    #[description = "Name for new channels, {user} is replaced by the member's name"]
    #[max_length = 100]
    name_template: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("guild only")?.get();

    if hub.kind != ChannelType::Voice {
        ctx.say("❌ Please select a voice channel.").await?;
        return Ok(());
    }

    let mut config = HubConfig::new(guild_id, hub.id.get());
    if let Some(template) = name_template.filter(|t| !t.trim().is_empty()) {
        config.name_template = template;
    }

    match ctx.data().dbs.tempvoice.set_hub(config).await {
        Ok(previous) => {
            let mut msg = format!("✅ Joining <#{}> now creates a personal channel.", hub.id);
            if let Some(previous) = previous.filter(|p| p.hub_channel_id != hub.id.get()) {
                msg.push_str(&format!(
                    "\nℹ️ <#{}> is no longer the hub.",
                    previous.hub_channel_id
                ));
            }
            ctx.say(msg).await?;
        }
        Err(e) => {
            error!("Failed to set hub for guild {}: {}", guild_id, e);
            ctx.say("❌ That channel can't be used as the hub.").await?;
        }
    }
    Ok(())
}

/// Remove the hub and delete every temporary channel
#[command(slash_command, guild_only, required_permissions = "MANAGE_CHANNELS", ephemeral)]
pub async fn teardown(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("guild only")?.get();
    ctx.defer_ephemeral().await?;

    if ctx.data().dbs.tempvoice.get_hub(guild_id).await.is_none() {
        ctx.say("❌ No hub is configured.").await?;
        return Ok(());
    }

    match ctx.data().tempvoice.teardown(guild_id).await {
        Ok(count) => {
            ctx.say(format!("🧹 Hub removed and {} channels deleted.", count))
                .await?;
        }
        Err(e) => {
            error!("Teardown failed for guild {}: {}", guild_id, e);
            ctx.say("⚠️ Hub removed, but some channels could not be deleted. They will be cleaned up later.")
                .await?;
        }
    }
    Ok(())
}

/// View the temporary voice setup
#[command(slash_command, guild_only, required_permissions = "MANAGE_CHANNELS", ephemeral)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("guild only")?.get();
    let db = &ctx.data().dbs.tempvoice;

    let Some(hub) = db.get_hub(guild_id).await else {
        ctx.say("No hub configured. Use `/tempvoice setup` to add one.")
            .await?;
        return Ok(());
    };
    let owned = db.owned_in_guild(guild_id).await;

    let mut msg = format!(
        "🔊 **Temp Voice**\n\
        🚪 **Hub:** <#{}>\n\
        🏷️ **Name template:** `{}`{}\n\
        📁 **Active channels:** {}",
        hub.hub_channel_id,
        hub.name_template,
        if hub.name_template == DEFAULT_NAME_TEMPLATE {
            " (default)"
        } else {
            ""
        },
        owned.len()
    );
    for record in owned.iter().take(20) {
        msg.push_str(&format!(
            "\n• <#{}> owned by <@{}> since <t:{}:R>",
            record.channel_id,
            record.owner_user_id,
            record.created_at.timestamp()
        ));
    }

    ctx.say(msg).await?;
    Ok(())
}
