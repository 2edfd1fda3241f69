use anyhow::{Context as _, Result};
use serenity::{
    builder::{CreateActionRow, CreateEmbed, CreateMessage},
    cache::Cache,
    http::Http,
    model::{
        channel::ChannelType,
        id::{ChannelId, GuildId},
    },
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::{
    audio::{controller::PlaybackController, engine::EngineEvent, track::Track},
    ui::{buttons::MusicControls, embeds},
};

/// The now-playing card: content line, embed and control buttons
pub struct NowPlayingCard {
    pub content: String,
    pub embed: CreateEmbed,
    pub components: Vec<CreateActionRow>,
}

impl NowPlayingCard {
    pub async fn build(controller: &PlaybackController, guild_id: GuildId, track: &Track) -> Self {
        let snapshot = controller.snapshot(guild_id).await;
        let looping = snapshot.as_ref().is_some_and(|s| s.looping);
        Self {
            content: embeds::now_playing_content(track),
            embed: embeds::create_now_playing_embed(track, snapshot.as_ref()),
            components: MusicControls::create_player_controls(looping),
        }
    }
}

/// Posts now-playing cards when there is no interaction to answer
#[derive(Clone)]
pub struct Announcer {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl Announcer {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    /// Sends the card to the guild's first text channel the bot can write in
    pub async fn announce(&self, guild_id: GuildId, card: NowPlayingCard) -> Result<()> {
        let channel_id = self
            .default_channel(guild_id)
            .with_context(|| format!("No writable text channel in guild {}", guild_id))?;

        channel_id
            .send_message(
                &self.http,
                CreateMessage::new()
                    .content(card.content)
                    .embed(card.embed)
                    .components(card.components),
            )
            .await?;
        debug!("📣 Now playing posted in channel {}", channel_id);
        Ok(())
    }

    fn default_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let guild = self.cache.guild(guild_id)?;
        let bot_id = self.cache.current_user().id;
        let member = guild.members.get(&bot_id)?;

        let mut channels: Vec<_> = guild
            .channels
            .values()
            .filter(|channel| channel.kind == ChannelType::Text)
            .filter(|channel| {
                guild
                    .user_permissions_in(channel, member)
                    .send_messages()
            })
            .collect();
        channels.sort_by_key(|channel| (channel.position, channel.id));
        channels.first().map(|channel| channel.id)
    }
}

/// Consumes engine events until the sender side closes: advances the
/// guild's playback on track end and announces the next track.
///
/// Each event runs on its own task; events of one guild are still applied in
/// lock order by the session mutex.
pub async fn run_engine_events(
    mut events: UnboundedReceiver<EngineEvent>,
    controller: PlaybackController,
    announcer: Announcer,
) {
    while let Some(event) = events.recv().await {
        let controller = controller.clone();
        let announcer = announcer.clone();
        tokio::spawn(async move {
            handle_engine_event(event, &controller, &announcer).await;
        });
    }
    info!("🛑 Engine event consumer stopped");
}

async fn handle_engine_event(
    event: EngineEvent,
    controller: &PlaybackController,
    announcer: &Announcer,
) {
    match event {
        EngineEvent::TrackEnd {
            guild_id,
            track_id,
            reason,
        } => {
            let Some(track) = controller.on_track_end(guild_id, &track_id, reason).await else {
                return;
            };
            let card = NowPlayingCard::build(controller, guild_id, &track).await;
            if let Err(e) = announcer.announce(guild_id, card).await {
                warn!("⚠️ Could not announce next track in guild {}: {:?}", guild_id, e);
            }
        }
    }
}
