//! Error types for the playback core.
//!
//! Glue code (gateway handlers, HTTP server, Lavalink transport) keeps using
//! `anyhow::Result`; the variants below are the ones callers branch on.

use thiserror::Error;

/// Errors surfaced by the session registry and the playback controller
#[derive(Error, Debug)]
pub enum MusicError {
    /// The requesting user is not connected to a voice channel
    #[error("You must be in a voice channel.")]
    NotInVoiceChannel,

    /// The search collaborator resolved nothing for the query
    #[error("No results.")]
    NoResults,

    /// No playback session exists for the guild
    #[error("Nothing is playing.")]
    SessionNotFound,

    /// The audio engine refused a command that the operation cannot continue without
    #[error("Audio engine error: {0}")]
    Engine(#[from] anyhow::Error),
}

/// Convenience Result type for playback operations
pub type Result<T> = std::result::Result<T, MusicError>;
