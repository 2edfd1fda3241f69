use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{controller::SessionSnapshot, session::PlaybackState, track::Track};

/// Standard colour palette
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

const STANDARD_FOOTER: &str = "🎵 Sisyphus";

/// Text line of the now-playing announcement
pub fn now_playing_content(track: &Track) -> String {
    format!("▶️ Now playing: *{}* — {}", track.title, track.author)
}

/// Embed attached to the now-playing card
pub fn create_now_playing_embed(track: &Track, session: Option<&SessionSnapshot>) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Now Playing")
        .description(format!("**{}**", track.title))
        .color(colors::MUSIC_PURPLE)
        .field("🎤 Artist", &track.author, true);

    embed = match track.duration {
        Some(duration) => embed.field("⏱️ Duration", format_duration(duration), true),
        None => embed.field("⏱️ Duration", "🔴 Live", true),
    };

    if let Some(user_id) = track.requested_by {
        embed = embed.field("👤 Requested by", format!("<@{}>", user_id), true);
    }

    if let Some(session) = session {
        let status = match session.state {
            PlaybackState::Playing => "▶️ Playing",
            PlaybackState::Paused => "⏸️ Paused",
            PlaybackState::Idle => "⏹️ Idle",
        };
        embed = embed
            .field("📶 Status", status, true)
            .field("📋 Up next", session.queued.to_string(), true)
            .field("🔊 Volume", format!("{}%", session.volume), true)
            .field("🔁 Loop", if session.looping { "On" } else { "Off" }, true);
    }

    if let Some(artwork_url) = &track.artwork_url {
        embed = embed.thumbnail(artwork_url);
    }
    if let Some(uri) = &track.uri {
        embed = embed.url(uri);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Reply for tracks that went to the queue
pub fn queued_content(first: &Track, count: usize, playlist: Option<&str>) -> String {
    match (playlist, count) {
        (Some(name), _) => format!("➕ Queued {} tracks from **{}**", count, name),
        (None, 1) => format!("➕ Queued: *{}* — {}", first.title, first.author),
        (None, _) => format!("➕ Queued {} tracks", count),
    }
}

pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(format!("❌ {}", description))
        .color(colors::ERROR_RED)
}

pub fn create_success_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(description)
        .color(colors::SUCCESS_GREEN)
}

/// Formats a duration as `m:ss` or `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
