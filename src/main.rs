use config::Config;
use databases::Databases;
use modules::{
    system::events::ReadyHandler,
    tempvoice::{
        gateway::{RetryPolicy, SerenityGateway},
        handler::TempVoiceHandler,
        lifecycle::TempVoice,
        task::ReconcileTask,
        tempvoice, voice,
    },
};
use poise::serenity_prelude::{self as serenity, CreateAllowedMentions};
use std::sync::Arc;
use tasks::TaskManager;
use tracing::{error, info, trace};
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod databases;
mod events;
mod modules;
mod tasks;
mod utils;

use crate::events::EventManager;

#[derive(Clone, Debug)]
pub struct Data {
    pub config: Arc<Config>,
    pub dbs: Arc<Databases>,
    pub task_manager: Arc<TaskManager>,
    pub event_manager: Arc<EventManager>,
    pub tempvoice: Arc<TempVoice>,
}

impl Data {
    pub async fn init_tasks(&self, ctx: &serenity::Context) {
        let reconcile = ReconcileTask::new(self.tempvoice.clone(), self.config.reconcile_interval());
        self.task_manager.add_task(reconcile).await;

        self.task_manager.start_tasks(ctx.clone()).await;
    }
}

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("starting astra");

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let token = config.discord_token.clone();
    let intents = serenity::GatewayIntents::non_privileged();
    let task_manager = Arc::new(TaskManager::new());
    let setup_tasks = task_manager.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions::<Data, Error> {
            allowed_mentions: Some(CreateAllowedMentions::new().empty_roles().empty_users()),
            commands: vec![register(), tempvoice(), voice()],
            pre_command: |ctx| {
                Box::pin(async move {
                    trace!(
                        "Command {} used by {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        ctx.guild_id()
                            .map_or_else(|| "DM".to_string(), |id| id.to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command {} completed for {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        ctx.guild_id()
                            .map_or_else(|| "DM".to_string(), |id| id.to_string())
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!(
                                "Command {} failed for {} in {}: {:?}",
                                ctx.command().qualified_name,
                                ctx.author().tag(),
                                ctx.guild_id()
                                    .map_or_else(|| "DM".to_string(), |id| id.to_string()),
                                error
                            );
                            let _ = ctx
                                .send(
                                    poise::CreateReply::default()
                                        .content("❌ Something went wrong, please try again later.")
                                        .ephemeral(true),
                                )
                                .await;
                        }
                        err => {
                            if let Err(e) = poise::builtins::on_error(err).await {
                                error!("Error while handling error: {}", e);
                            }
                        }
                    }
                })
            },
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    data.event_manager.handle_event(ctx, event).await;
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                info!("registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let dbs = Arc::new(Databases::open(&config).await?);
                let gateway = Arc::new(SerenityGateway::new(
                    ctx.http.clone(),
                    ctx.cache.clone(),
                    RetryPolicy::from_config(&config),
                ));
                let tempvoice = Arc::new(TempVoice::new(dbs.tempvoice.clone(), gateway));

                let event_manager = Arc::new(EventManager::new());
                event_manager.add_handler(ReadyHandler).await;
                event_manager
                    .add_handler(TempVoiceHandler::new(tempvoice.clone()))
                    .await;

                let data = Data {
                    config,
                    dbs,
                    task_manager: setup_tasks,
                    event_manager,
                    tempvoice,
                };
                data.init_tasks(ctx).await;

                Ok(data)
            })
        })
        .build();

    let mut client = match serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build client: {}", e);
            std::process::exit(1);
        }
    };

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            task_manager.shutdown().await;
            shard_manager.shutdown_all().await;
        }
    });

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }
}
