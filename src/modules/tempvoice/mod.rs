pub mod commands;
pub mod controls;
pub mod database;
pub mod gateway;
pub mod handler;
pub mod lifecycle;
pub mod listener;
pub mod panel;
pub mod task;

#[cfg(test)]
mod mock;

use commands::*;
use poise::command;

/// 🔊 Configure join-to-create voice channels
#[command(
    slash_command,
    subcommands("setup", "teardown", "status"),
    guild_only,
    required_permissions = "MANAGE_CHANNELS"
)]
pub async fn tempvoice(_ctx: crate::Context<'_>) -> Result<(), crate::Error> {
    Ok(())
}

/// 🎙️ Manage your own voice channel
#[command(
    slash_command,
    subcommands("lock", "unlock", "hide", "show", "rename", "limit", "panel"),
    guild_only
)]
pub async fn voice(_ctx: crate::Context<'_>) -> Result<(), crate::Error> {
    Ok(())
}
