use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage,
    },
    model::{
        application::{CommandDataOptionValue, CommandInteraction, ComponentInteraction},
        channel::Message,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::{
    events::{Announcer, NowPlayingCard},
    SisyphusBot,
};
use crate::{
    audio::{controller::PlayOutcome, session::VOLUME_STEP, track::Track},
    error::MusicError,
    ui::{buttons::button_ids, embeds},
};

/// Something a user asked for, from a slash command or a card button
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Play(String),
    Pause,
    Skip,
    Previous,
    Shuffle,
    Loop,
    VolumeUp,
    VolumeDown,
    Stop,
}

impl Intent {
    /// `option` looks up a string option of the command by name
    pub fn from_command<'a>(name: &str, option: impl Fn(&str) -> Option<&'a str>) -> Option<Self> {
        Some(match name {
            "play" => Intent::Play(option("search")?.trim().to_string()),
            "pause" => Intent::Pause,
            "skip" => Intent::Skip,
            "previous" => Intent::Previous,
            "shuffle" => Intent::Shuffle,
            "loop" => Intent::Loop,
            "volume" => match option("direction")? {
                "up" => Intent::VolumeUp,
                "down" => Intent::VolumeDown,
                _ => return None,
            },
            "stop" => Intent::Stop,
            _ => return None,
        })
    }

    pub fn from_button(custom_id: &str) -> Option<Self> {
        Some(match custom_id {
            button_ids::PAUSE => Intent::Pause,
            button_ids::SKIP => Intent::Skip,
            button_ids::PREVIOUS => Intent::Previous,
            button_ids::SHUFFLE => Intent::Shuffle,
            button_ids::LOOP => Intent::Loop,
            button_ids::VOLUME_UP => Intent::VolumeUp,
            button_ids::VOLUME_DOWN => Intent::VolumeDown,
            button_ids::STOP => Intent::Stop,
            _ => return None,
        })
    }
}

/// What the user gets back for an intent
enum Reply {
    NowPlaying { track: Track, queued: usize },
    Text(String),
}

/// Where an intent came from, so the reply goes back to it
enum Origin<'a> {
    Command(&'a CommandInteraction),
    Component(&'a ComponentInteraction),
}

impl Origin<'_> {
    async fn followup(
        &self,
        ctx: &Context,
        builder: CreateInteractionResponseFollowup,
    ) -> serenity::Result<Message> {
        match self {
            Origin::Command(command) => command.create_followup(&ctx.http, builder).await,
            Origin::Component(component) => component.create_followup(&ctx.http, builder).await,
        }
    }
}

/// Handles slash commands
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SisyphusBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside of a guild"))?;

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    let intent = Intent::from_command(&command.data.name, |name| {
        command
            .data
            .options
            .iter()
            .find(|opt| opt.name == name)
            .and_then(|opt| match &opt.value {
                CommandDataOptionValue::String(value) => Some(value.as_str()),
                _ => None,
            })
    });

    let Some(intent) = intent else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Unknown command")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    // Searching can take longer than the 3s response window
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let reply = execute(ctx, bot, guild_id, command.user.id, intent).await;
    respond(ctx, bot, guild_id, Origin::Command(&command), reply).await
}

/// Handles now-playing card buttons
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &SisyphusBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Component used outside of a guild"))?;

    info!(
        "🔘 Button {} pressed by {} in guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let Some(intent) = Intent::from_button(&component.data.custom_id) else {
        component
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Unknown action")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    component
        .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
        .await?;

    let reply = execute(ctx, bot, guild_id, component.user.id, intent).await;
    respond(ctx, bot, guild_id, Origin::Component(&component), reply).await
}

/// Dispatch table: intent → playback operation
async fn execute(
    ctx: &Context,
    bot: &SisyphusBot,
    guild_id: GuildId,
    user_id: UserId,
    intent: Intent,
) -> std::result::Result<Reply, MusicError> {
    let controller = &bot.controller;

    let reply = match intent {
        Intent::Play(query) => {
            let voice_channel = get_user_voice_channel(ctx, guild_id, user_id);
            if voice_channel.is_none() {
                return Err(MusicError::NotInVoiceChannel);
            }

            let result = match bot.lavalink.search(&query).await {
                Ok(result) => result.requested_by(user_id),
                Err(e) => {
                    warn!("🔍 Search for '{}' failed: {:?}", query, e);
                    return Err(MusicError::NoResults);
                }
            };

            match controller
                .play_resolved(guild_id, voice_channel, result)
                .await?
            {
                PlayOutcome::Started { track, queued } => Reply::NowPlaying { track, queued },
                PlayOutcome::Queued {
                    first,
                    count,
                    playlist,
                } => Reply::Text(embeds::queued_content(&first, count, playlist.as_deref())),
            }
        }
        Intent::Pause => {
            if controller.toggle_pause(guild_id).await? {
                Reply::Text("⏸️ Paused".into())
            } else {
                Reply::Text("▶️ Resumed".into())
            }
        }
        Intent::Skip => match controller.advance(guild_id).await? {
            Some(track) => Reply::NowPlaying { track, queued: 0 },
            None => Reply::Text("⏭️ The queue is empty.".into()),
        },
        Intent::Previous => match controller.rewind(guild_id).await? {
            Some(track) => Reply::NowPlaying { track, queued: 0 },
            None => Reply::Text("⏮️ Nothing was played before this.".into()),
        },
        Intent::Shuffle => {
            if controller.toggle_shuffle(guild_id).await? {
                Reply::Text("🔀 Queue shuffled".into())
            } else {
                Reply::Text("🔀 Not enough tracks to shuffle.".into())
            }
        }
        Intent::Loop => {
            if controller.toggle_loop(guild_id).await? {
                Reply::Text("🔁 Loop on".into())
            } else {
                Reply::Text("🔁 Loop off".into())
            }
        }
        Intent::VolumeUp => {
            let volume = controller.set_volume(guild_id, VOLUME_STEP).await?;
            Reply::Text(format!("🔊 Volume: {}%", volume))
        }
        Intent::VolumeDown => {
            let volume = controller.set_volume(guild_id, -VOLUME_STEP).await?;
            Reply::Text(format!("🔉 Volume: {}%", volume))
        }
        Intent::Stop => {
            controller.stop(guild_id).await?;
            Reply::Text("⏹️ Stopped and disconnected".into())
        }
    };

    Ok(reply)
}

/// Answers the interaction; a now-playing card that cannot be delivered there
/// goes to the guild's default channel
async fn respond(
    ctx: &Context,
    bot: &SisyphusBot,
    guild_id: GuildId,
    origin: Origin<'_>,
    reply: std::result::Result<Reply, MusicError>,
) -> Result<()> {
    match reply {
        Ok(Reply::NowPlaying { track, queued }) => {
            let mut card = NowPlayingCard::build(&bot.controller, guild_id, &track).await;
            if queued > 0 {
                card.content = format!("{}\n➕ {} more queued", card.content, queued);
            }

            let builder = CreateInteractionResponseFollowup::new()
                .content(card.content.clone())
                .embed(card.embed.clone())
                .components(card.components.clone());
            if let Err(e) = origin.followup(ctx, builder).await {
                warn!("⚠️ Interaction reply failed, using default channel: {:?}", e);
                Announcer::new(ctx.http.clone(), ctx.cache.clone())
                    .announce(guild_id, card)
                    .await?;
            }
        }
        Ok(Reply::Text(text)) => {
            origin
                .followup(
                    ctx,
                    CreateInteractionResponseFollowup::new()
                        .embed(embeds::create_success_embed(&text))
                        .ephemeral(matches!(origin, Origin::Component(_))),
                )
                .await?;
        }
        Err(e) => {
            if let MusicError::Engine(inner) = &e {
                warn!("⚠️ Playback failed in guild {}: {:?}", guild_id, inner);
            }
            origin
                .followup(
                    ctx,
                    CreateInteractionResponseFollowup::new()
                        .embed(embeds::create_error_embed(&e.to_string()))
                        .ephemeral(true),
                )
                .await?;
        }
    }

    Ok(())
}

/// Voice channel the user is currently in, from the guild cache
pub fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
