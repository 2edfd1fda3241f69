use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serenity::model::id::{ChannelId, GuildId};

use super::track::Track;

/// Commands the playback core sends to the external audio engine.
///
/// Every command is fire-and-forget: it returns once the engine accepted it,
/// not once audio actually changed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Joins `channel_id` and prepares a player for the guild
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()>;

    /// Starts `track`, replacing whatever is loaded, unpaused
    async fn play(&self, guild_id: GuildId, track: Track) -> Result<()>;

    async fn pause(&self, guild_id: GuildId, paused: bool) -> Result<()>;

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<()>;

    async fn stop(&self, guild_id: GuildId) -> Result<()>;

    /// Destroys the player and leaves the voice channel
    async fn disconnect(&self, guild_id: GuildId) -> Result<()>;
}

/// Why the engine stopped rendering a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// `Stopped`, `Replaced` and `Cleanup` are the echo of our own commands
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }

    /// Only a track that actually played through is looped; a load failure
    /// would fail again
    pub fn may_replay(self) -> bool {
        self == TrackEndReason::Finished
    }
}

/// Events raised by the audio engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    TrackEnd {
        guild_id: GuildId,
        /// Engine id of the track that ended
        track_id: String,
        reason: TrackEndReason,
    },
}
