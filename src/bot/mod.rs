pub mod commands;
pub mod handler;
pub mod transport;

pub use transport::SerenityTransport;

use crate::context::AppContext;
use crate::sync::Ingestor;
use poise::serenity_prelude::{self as serenity, FullEvent, GatewayIntents};
use std::sync::Arc;
use tracing::{error, info};

/// Shared data accessible in all commands
pub struct Data {
    pub app: Arc<AppContext>,
    pub ingestor: Arc<Ingestor>,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data").finish_non_exhaustive()
    }
}

type Error = Box<dyn std::error::Error + Send + Sync>;

/// Event handler for Discord events
async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!("Bot is ready! Logged in as {}", data_about_bot.user.name);
        }
        FullEvent::Message { new_message } => {
            handler::handle_message(ctx, new_message, &data.ingestor).await;
        }
        FullEvent::GuildCreate { guild, is_new: _ } => {
            handler::handle_guild_create(guild, &data.app.pool).await;
        }
        FullEvent::GuildDelete { incomplete, full: _ } => {
            handler::handle_guild_delete(incomplete, &data.app.pool).await;
        }
        _ => {}
    }
    Ok(())
}

/// Create and configure the Discord bot framework
pub fn create_framework(app: Arc<AppContext>) -> poise::Framework<Data, Error> {
    poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all_commands(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Command error: {}", error);
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::Setup { error, .. } => {
                            error!("Setup error: {}", error);
                        }
                        err => {
                            error!("Framework error: {:?}", err);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Registered {} slash commands globally", framework.options().commands.len());
                let ingestor = Arc::new(app.ingestor());
                Ok(Data { app, ingestor })
            })
        })
        .build()
}

/// Build the gateway client. The caller starts it once the scheduler is wired
/// to the client's HTTP handle.
pub async fn create_client(app: Arc<AppContext>) -> Result<serenity::Client, Error> {
    let token = app.config.discord.token.clone();
    if token.is_empty() {
        return Err("Discord token is empty".into());
    }

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let framework = create_framework(app);
    let client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await?;

    Ok(client)
}
