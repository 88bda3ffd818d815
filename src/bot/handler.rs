use crate::chat::InboundMessage;
use crate::db::{DbPool, GuildRepo, NewGuild};
use crate::sync::{IngestOutcome, Ingestor};
use poise::serenity_prelude::{self as serenity, Context, Message};
use tracing::{debug, error, info, warn};

/// Pass a guild message to the link handler
pub async fn handle_message(ctx: &Context, msg: &Message, ingestor: &Ingestor) {
    // DMs not supported
    let Some(guild_id) = msg.guild_id else {
        return;
    };

    let from_self = msg.author.id == ctx.cache.current_user().id;
    if msg.author.bot && !from_self {
        return;
    }

    let inbound = InboundMessage {
        sender_id: msg.author.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        scope_id: guild_id.to_string(),
        text: msg.content.clone(),
        from_self,
    };

    match ingestor.handle_message(&inbound).await {
        Ok(IngestOutcome::Processed { failures, .. }) if failures > 0 => {
            warn!("Message {} in guild {} processed with {} failures", msg.id, guild_id, failures);
        }
        Ok(outcome) => debug!("Message {}: {:?}", msg.id, outcome),
        Err(e) => error!("Failed to process message {} in guild {}: {}", msg.id, guild_id, e),
    }
}

/// Handle guild join event
pub async fn handle_guild_create(guild: &serenity::Guild, pool: &DbPool) {
    info!("Joined guild: {} ({})", guild.name, guild.id);

    // Without the members intent the owner is usually missing from the list.
    let owner_name = guild
        .members
        .get(&guild.owner_id)
        .map(|m| m.user.name.clone());

    let new_guild = NewGuild {
        guild_id: guild.id.to_string(),
        name: guild.name.clone(),
        owner_id: guild.owner_id.to_string(),
        owner_name,
    };

    if let Err(e) = GuildRepo::upsert(pool, new_guild).await {
        error!("Failed to register guild: {}", e);
    }
}

/// Handle guild leave event. Outages also arrive as deletes and keep the data.
pub async fn handle_guild_delete(guild: &serenity::UnavailableGuild, pool: &DbPool) {
    if guild.unavailable {
        warn!("Guild {} became unavailable", guild.id);
        return;
    }

    info!("Left guild: {}", guild.id);
    if let Err(e) = GuildRepo::delete(pool, &guild.id.to_string()).await {
        error!("Failed to remove guild {}: {}", guild.id, e);
    }
}
