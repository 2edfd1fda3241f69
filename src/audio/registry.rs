use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::session::{PlaybackSession, DEFAULT_MAX_HISTORY, DEFAULT_VOLUME};
use crate::error::{MusicError, Result};

/// A session behind its per-guild lock. Every mutation of one guild's
/// playback goes through this mutex, so commands coming from slash commands,
/// buttons, engine events and timers are applied one at a time.
pub type SessionHandle = Arc<Mutex<PlaybackSession>>;

/// Guild id → playback session
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    default_volume: u16,
    max_history: usize,
}

impl SessionRegistry {
    pub fn new(default_volume: u16, max_history: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            default_volume,
            max_history,
        }
    }

    /// Returns the guild's session, creating it on first use.
    ///
    /// The boolean is `true` when the session was just created, in which case
    /// the caller still has to connect the engine to `voice_channel`.
    pub fn get_or_create(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
    ) -> Result<(SessionHandle, bool)> {
        let channel_id = voice_channel.ok_or(MusicError::NotInVoiceChannel)?;

        match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                let session = PlaybackSession::new(guild_id, channel_id)
                    .with_volume(self.default_volume)
                    .with_max_history(self.max_history);
                let handle = Arc::new(Mutex::new(session));
                entry.insert(handle.clone());
                info!("🆕 Session created for guild {} in channel {}", guild_id, channel_id);
                Ok((handle, true))
            }
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Removes the guild's session. The engine must already be disconnected.
    #[allow(dead_code)]
    pub fn destroy(&self, guild_id: GuildId) -> Option<SessionHandle> {
        let removed = self.sessions.remove(&guild_id).map(|(_, handle)| handle);
        if removed.is_some() {
            info!("🗑️ Session destroyed for guild {}", guild_id);
        }
        removed
    }

    /// Removes the guild's session only if it is still `handle`
    pub fn destroy_if_same(&self, guild_id: GuildId, handle: &SessionHandle) -> bool {
        let removed = self
            .sessions
            .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some();
        if removed {
            info!("🗑️ Session destroyed for guild {}", guild_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME, DEFAULT_MAX_HISTORY)
    }
}
