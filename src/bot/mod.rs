//! # Bot Module
//!
//! Discord gateway side of Sisyphus.
//!
//! This module contains:
//! - Slash command registration ([`commands`])
//! - The intent dispatch table for commands and card buttons ([`handlers`])
//! - Now-playing announcements and the engine event consumer ([`events`])
//! - The link-or-file rule for moderated text channels ([`moderation`])
//!
//! ## Architecture
//!
//! [`SisyphusBot`] implements Serenity's [`EventHandler`]. It holds no playback
//! state of its own: every intent goes through the shared
//! [`PlaybackController`], which serializes work per guild.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Message, Ready, VoiceState},
    async_trait,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;
pub mod moderation;

use crate::{
    audio::{controller::PlaybackController, lavalink::LavalinkEngine},
    config::Config,
};

/// Main Discord event handler.
///
/// ## Fields
///
/// - `config`: bot configuration
/// - `controller`: playback operations over the per-guild sessions
/// - `lavalink`: track search
/// - `moderated_channels`: channels where text-only messages are removed
pub struct SisyphusBot {
    config: Arc<Config>,
    pub controller: PlaybackController,
    pub lavalink: Arc<LavalinkEngine>,
    moderated_channels: HashSet<ChannelId>,
}

impl SisyphusBot {
    pub fn new(
        config: Arc<Config>,
        controller: PlaybackController,
        lavalink: Arc<LavalinkEngine>,
    ) -> Self {
        let moderated_channels = config
            .moderated_channels
            .iter()
            .map(|id| ChannelId::new(*id))
            .collect();

        Self {
            config,
            controller,
            lavalink,
            moderated_channels,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Guild commands (when `GUILD_ID` is set) show up immediately; global
    /// commands can take up to an hour to propagate.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    fn is_moderated(&self, channel_id: ChannelId) -> bool {
        self.moderated_channels.contains(&channel_id)
    }
}

#[async_trait]
impl EventHandler for SisyphusBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guild(s)", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Failed to register commands: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error handling command: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await
                {
                    error!("Error handling component: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || !self.is_moderated(msg.channel_id) {
            return;
        }

        if let Err(e) = moderation::enforce(&ctx.http, &msg).await {
            warn!("⚠️ Could not moderate message {}: {:?}", msg.id, e);
        }
    }

    /// Drops the guild's session when someone else disconnects the bot
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };
        // a late leave must not drop a session that already rejoined
        let rejoined = ctx.cache.guild(guild_id).is_some_and(|guild| {
            guild
                .voice_states
                .get(&current_user_id)
                .is_some_and(|state| state.channel_id.is_some())
        });
        if rejoined {
            debug!("Stale voice leave in guild {}, bot is connected again", guild_id);
            return;
        }

        let left_channel = old.and_then(|state| state.channel_id);
        if self.controller.forget(guild_id, left_channel).await {
            info!("🔌 Disconnected from voice in guild {}", guild_id);
        }
    }
}
