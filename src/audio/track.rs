use serenity::model::id::UserId;
use std::time::Duration;

/// A playable item as resolved by the audio engine.
///
/// `id` is the engine's opaque handle (the Lavalink `encoded` string); the rest
/// is display metadata. Tracks move between the current slot, the queue and the
/// history; they are cloned only when handed to the engine or to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub author: String,
    pub uri: Option<String>,
    pub duration: Option<Duration>,
    pub artwork_url: Option<String>,
    pub requested_by: Option<UserId>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: author.into(),
            uri: None,
            duration: None,
            artwork_url: None,
            requested_by: None,
        }
    }

    pub fn with_uri(mut self, uri: String) -> Self {
        self.uri = Some(uri);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_artwork_url(mut self, artwork_url: String) -> Self {
        self.artwork_url = Some(artwork_url);
        self
    }

    pub fn requested_by(mut self, user_id: UserId) -> Self {
        self.requested_by = Some(user_id);
        self
    }
}

/// What the search collaborator resolved a `/play` query into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    /// A direct link to one track
    Track(Track),
    /// Search hits, best match first
    Search(Vec<Track>),
    /// A playlist link, in playlist order
    Playlist { name: String, tracks: Vec<Track> },
}

impl SearchResult {
    /// Tracks that a `/play` should act on: the whole playlist, or only the top hit
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            SearchResult::Track(track) => vec![track],
            SearchResult::Search(tracks) => tracks.into_iter().take(1).collect(),
            SearchResult::Playlist { tracks, .. } => tracks,
        }
    }

    pub fn playlist_name(&self) -> Option<&str> {
        match self {
            SearchResult::Playlist { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SearchResult::Track(_) => false,
            SearchResult::Search(tracks) => tracks.is_empty(),
            SearchResult::Playlist { tracks, .. } => tracks.is_empty(),
        }
    }

    /// Stamps the requesting user on every track
    pub fn requested_by(self, user_id: UserId) -> Self {
        let stamp = |tracks: Vec<Track>| -> Vec<Track> {
            tracks.into_iter().map(|t| t.requested_by(user_id)).collect()
        };
        match self {
            SearchResult::Track(track) => SearchResult::Track(track.requested_by(user_id)),
            SearchResult::Search(tracks) => SearchResult::Search(stamp(tracks)),
            SearchResult::Playlist { name, tracks } => SearchResult::Playlist {
                name,
                tracks: stamp(tracks),
            },
        }
    }
}
