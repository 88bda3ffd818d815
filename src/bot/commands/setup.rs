use crate::bot::Data;
use crate::db::{ChannelFlags, ChannelRepo, GuildRepo, NewGuild, PlaylistSlots, UserRepo};
use crate::spotify::{playlist_id, playlist_url};
use poise::serenity_prelude as serenity;

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Configure playlist sharing for your server
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands("setup_playlists", "setup_channel", "setup_status")
)]
pub async fn setup(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Register the guild if the join event was missed
async fn ensure_guild(ctx: Context<'_>) -> Result<String, Error> {
    let new_guild = {
        let guild = ctx.guild().ok_or("Must be used in a guild")?;
        let owner_name = (guild.owner_id == ctx.author().id).then(|| ctx.author().name.clone());
        NewGuild {
            guild_id: guild.id.to_string(),
            name: guild.name.clone(),
            owner_id: guild.owner_id.to_string(),
            owner_name,
        }
    };

    let guild_id = new_guild.guild_id.clone();
    if GuildRepo::get_by_guild_id(&ctx.data().app.pool, &guild_id)
        .await?
        .is_none()
    {
        GuildRepo::upsert(&ctx.data().app.pool, new_guild).await?;
    }
    Ok(guild_id)
}

/// Set the all-time, recent and buffer playlists
#[poise::command(slash_command, guild_only, rename = "playlists")]
pub async fn setup_playlists(
    ctx: Context<'_>,
    #[description = "Playlist collecting every shared track"] all_time: String,
    #[description = "Playlist holding last period's tracks"] recent: String,
    #[description = "Playlist collecting this period's tracks"] buffer: String,
) -> Result<(), Error> {
    let guild_id = ensure_guild(ctx).await?;

    let parse = |input: &str| {
        playlist_id(input).ok_or_else(|| format!("`{}` is not a Spotify playlist link or id", input))
    };
    let slots = PlaylistSlots {
        all_time: parse(&all_time)?,
        recent: parse(&recent)?,
        buffer: parse(&buffer)?,
    };

    if slots.all_time == slots.recent || slots.all_time == slots.buffer || slots.recent == slots.buffer {
        ctx.say("The three playlists must be different.").await?;
        return Ok(());
    }

    GuildRepo::set_playlists(&ctx.data().app.pool, &guild_id, &slots).await?;
    ctx.say(format!(
        "Playlists saved.\nAll time: {}\nRecent: {}\nBuffer: {}",
        playlist_url(&slots.all_time),
        playlist_url(&slots.recent),
        playlist_url(&slots.buffer)
    ))
    .await?;

    Ok(())
}

/// Choose what the bot does in a channel
#[poise::command(slash_command, guild_only, rename = "channel")]
pub async fn setup_channel(
    ctx: Context<'_>,
    #[description = "Channel to configure"] channel: serenity::GuildChannel,
    #[description = "Collect links posted here"] monitor: bool,
    #[description = "Post the weekly digest here"] notify: bool,
    #[description = "Run connection self-tests here"] test: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ensure_guild(ctx).await?;
    let flags = ChannelFlags {
        monitor,
        notify,
        test: test.unwrap_or(false),
    };

    ChannelRepo::set_flags(&ctx.data().app.pool, &guild_id, &channel.id.to_string(), flags).await?;

    let mut roles = Vec::new();
    if flags.monitor {
        roles.push("monitored");
    }
    if flags.notify {
        roles.push("digest");
    }
    if flags.test {
        roles.push("self-test");
    }

    if roles.is_empty() {
        ctx.say(format!("<#{}> is no longer used by the bot", channel.id)).await?;
    } else {
        ctx.say(format!("<#{}>: {}", channel.id, roles.join(", "))).await?;
    }
    Ok(())
}

/// Show the current configuration
#[poise::command(slash_command, guild_only, rename = "status")]
pub async fn setup_status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a guild")?.to_string();

    let Some(scope) = ctx.data().app.registry.scope(&guild_id).await? else {
        ctx.say("This server is not registered yet. Run `/setup playlists` to get started.")
            .await?;
        return Ok(());
    };

    let authorized = UserRepo::get(&ctx.data().app.pool, &scope.owner.id)
        .await?
        .map(|u| u.has_credentials())
        .unwrap_or(false);

    let channels = |ids: &[String]| {
        if ids.is_empty() {
            "None".to_string()
        } else {
            ids.iter()
                .map(|c| format!("<#{}>", c))
                .collect::<Vec<_>>()
                .join(", ")
        }
    };

    let playlists = match &scope.playlists {
        Some(slots) => format!(
            "All time: {}\nRecent: {}\nBuffer: {}",
            playlist_url(&slots.all_time),
            playlist_url(&slots.recent),
            playlist_url(&slots.buffer)
        ),
        None => "Not configured".to_string(),
    };

    let embed = serenity::CreateEmbed::default()
        .title("Playlist Configuration")
        .field("Owner", scope.owner.display_name.clone(), true)
        .field("Spotify authorized", if authorized { "Yes" } else { "No" }, true)
        .field("Playlists", playlists, false)
        .field("Monitored Channels", channels(&scope.monitor_channels), false)
        .field("Digest Channels", channels(&scope.notify_channels), false)
        .field("Self-test Channels", channels(&scope.test_channels), false)
        .color(0x1DB954);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
