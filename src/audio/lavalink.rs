use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::Songbird;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, http::HeaderValue, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    engine::{AudioEngine, EngineEvent, TrackEndReason},
    track::{SearchResult, Track},
};
use crate::config::Config;

const CLIENT_NAME: &str = concat!("sisyphus/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_MAX_EXPONENT: u32 = 5;

/// Lavalink v4 node: REST for player commands and track loading, websocket
/// for the session id and player events. Voice is joined through songbird's
/// gateway-only join and handed over to Lavalink.
pub struct LavalinkEngine {
    http: Client,
    base_url: Url,
    ws_url: String,
    password: String,
    session_id: RwLock<Option<String>>,
    songbird: Arc<Songbird>,
}

impl LavalinkEngine {
    pub fn new(config: &Config, songbird: Arc<Songbird>) -> Result<Self> {
        let base_url =
            Url::parse(&config.lavalink_http_url()).context("Invalid Lavalink address")?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build the Lavalink HTTP client")?;

        info!("🎼 Lavalink node at {}", base_url);

        Ok(Self {
            http,
            base_url,
            ws_url: config.lavalink_ws_url(),
            password: config.lavalink_password.clone(),
            session_id: RwLock::new(None),
            songbird,
        })
    }

    /// Resolves a `/play` query: URLs load directly, anything else is a YouTube search
    pub async fn search(&self, query: &str) -> Result<SearchResult> {
        let identifier = search_identifier(query);
        let mut url = self.base_url.join("/v4/loadtracks")?;
        url.query_pairs_mut().append_pair("identifier", &identifier);

        debug!("🔍 Loading '{}'", identifier);
        let result: LoadResult = self
            .http
            .get(url)
            .header("Authorization", &self.password)
            .send()
            .await
            .context("Lavalink loadtracks request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Invalid loadtracks response")?;

        result.into_search_result()
    }

    /// Keeps the event websocket open until `shutdown`, reconnecting with
    /// exponential backoff. Track-end events are forwarded on `events`.
    pub async fn run(
        self: Arc<Self>,
        user_id: UserId,
        events: UnboundedSender<EngineEvent>,
        shutdown: CancellationToken,
    ) {
        let mut backoff = Backoff::new();

        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return,
                outcome = self.listen(user_id, &events, &mut backoff) => outcome,
            };
            self.session_id.write().take();

            match outcome {
                Ok(()) => warn!("🔌 Lavalink websocket closed"),
                Err(e) => warn!("🔌 Lavalink websocket error: {:?}", e),
            }

            let delay = backoff.next();
            info!("🔄 Reconnecting to Lavalink in {:?}", delay);
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn listen(
        &self,
        user_id: UserId,
        events: &UnboundedSender<EngineEvent>,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let mut request = self.ws_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", HeaderValue::from_str(&self.password)?);
        headers.insert("User-Id", HeaderValue::from_str(&user_id.to_string())?);
        headers.insert("Client-Name", HeaderValue::from_static(CLIENT_NAME));

        let (mut stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("Lavalink websocket handshake failed")?;
        debug!("Connected to {}", self.ws_url);

        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(text) => {
                    if self.handle_message(text.as_str(), events) {
                        backoff.reset();
                    }
                }
                Message::Close(frame) => {
                    debug!("Lavalink closed the websocket: {:?}", frame);
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Returns `true` once the node reported ready
    fn handle_message(&self, text: &str, events: &UnboundedSender<EngineEvent>) -> bool {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Unrecognised Lavalink message: {}", e);
                return false;
            }
        };

        match message {
            IncomingMessage::Ready {
                session_id,
                resumed,
            } => {
                info!(
                    "✅ Lavalink ready (session {}, resumed: {})",
                    session_id, resumed
                );
                *self.session_id.write() = Some(session_id);
                true
            }
            IncomingMessage::Event(event) => {
                if let Some(event) = event.into_engine_event() {
                    if events.send(event).is_err() {
                        warn!("Engine event dropped: no consumer");
                    }
                }
                false
            }
            IncomingMessage::Other => false,
        }
    }

    fn player_url(&self, guild_id: GuildId) -> Result<Url> {
        let session_id = self
            .session_id
            .read()
            .clone()
            .context("Lavalink session is not ready")?;
        Ok(self
            .base_url
            .join(&format!("/v4/sessions/{}/players/{}", session_id, guild_id))?)
    }

    async fn update_player(&self, guild_id: GuildId, body: Value) -> Result<()> {
        let url = self.player_url(guild_id)?;
        self.http
            .patch(url)
            .header("Authorization", &self.password)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Player update for guild {} failed", guild_id))?
            .error_for_status()?;
        Ok(())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<()> {
        let url = self.player_url(guild_id)?;
        self.http
            .delete(url)
            .header("Authorization", &self.password)
            .send()
            .await
            .with_context(|| format!("Player destroy for guild {} failed", guild_id))?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl AudioEngine for LavalinkEngine {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let (connection, _call) = self
            .songbird
            .join_gateway(guild_id, channel_id)
            .await
            .context("Could not join the voice channel")?;

        self.update_player(
            guild_id,
            json!({
                "voice": {
                    "token": connection.token,
                    "endpoint": connection.endpoint,
                    "sessionId": connection.session_id,
                }
            }),
        )
        .await?;

        info!("🔊 Joined voice channel {} in guild {}", channel_id, guild_id);
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, track: Track) -> Result<()> {
        debug!("▶️ {} in guild {}", track.title, guild_id);
        self.update_player(
            guild_id,
            json!({ "track": { "encoded": track.id }, "paused": false }),
        )
        .await
    }

    async fn pause(&self, guild_id: GuildId, paused: bool) -> Result<()> {
        self.update_player(guild_id, json!({ "paused": paused }))
            .await
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<()> {
        self.update_player(guild_id, json!({ "volume": volume }))
            .await
    }

    async fn stop(&self, guild_id: GuildId) -> Result<()> {
        self.update_player(guild_id, json!({ "track": { "encoded": null } }))
            .await
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<()> {
        let destroyed = self.destroy_player(guild_id).await;
        if let Err(e) = self.songbird.remove(guild_id).await {
            debug!("Voice leave for guild {}: {:?}", guild_id, e);
        }
        info!("👋 Left voice in guild {}", guild_id);
        destroyed
    }
}

/// Lavalink identifier for a user query
pub fn search_identifier(query: &str) -> String {
    let query = query.trim();
    if query.starts_with("http://") || query.starts_with("https://") {
        query.to_string()
    } else {
        format!("ytsearch:{}", query)
    }
}

struct Backoff {
    attempt: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { attempt: 0 }
    }

    fn next(&mut self) -> Duration {
        self.attempt += 1;
        let delay = BACKOFF_BASE_MS * 2u64.pow((self.attempt - 1).min(BACKOFF_MAX_EXPONENT));
        Duration::from_millis(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
enum LoadResult {
    Track(LavalinkTrack),
    Playlist(LavalinkPlaylist),
    Search(Vec<LavalinkTrack>),
    Empty {},
    Error(LavalinkException),
}

impl LoadResult {
    fn into_search_result(self) -> Result<SearchResult> {
        Ok(match self {
            LoadResult::Track(track) => SearchResult::Track(track.into()),
            LoadResult::Search(tracks) => {
                SearchResult::Search(tracks.into_iter().map(Track::from).collect())
            }
            LoadResult::Playlist(playlist) => SearchResult::Playlist {
                name: playlist.info.name,
                tracks: playlist.tracks.into_iter().map(Track::from).collect(),
            },
            LoadResult::Empty {} => SearchResult::Search(Vec::new()),
            LoadResult::Error(exception) => bail!(
                "Lavalink could not load the track ({}): {}",
                exception.severity,
                exception.message.unwrap_or_default()
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LavalinkTrack {
    encoded: String,
    info: LavalinkTrackInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LavalinkTrackInfo {
    title: String,
    author: String,
    length: u64,
    is_stream: bool,
    uri: Option<String>,
    artwork_url: Option<String>,
}

impl From<LavalinkTrack> for Track {
    fn from(track: LavalinkTrack) -> Self {
        let info = track.info;
        let mut result = Track::new(track.encoded, info.title, info.author);
        if let Some(uri) = info.uri {
            result = result.with_uri(uri);
        }
        if !info.is_stream {
            result = result.with_duration(Duration::from_millis(info.length));
        }
        if let Some(artwork_url) = info.artwork_url {
            result = result.with_artwork_url(artwork_url);
        }
        result
    }
}

#[derive(Debug, Deserialize)]
struct LavalinkPlaylist {
    info: LavalinkPlaylistInfo,
    tracks: Vec<LavalinkTrack>,
}

#[derive(Debug, Deserialize)]
struct LavalinkPlaylistInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LavalinkException {
    message: Option<String>,
    severity: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum IncomingMessage {
    #[serde(rename_all = "camelCase")]
    Ready {
        session_id: String,
        #[serde(default)]
        resumed: bool,
    },
    Event(LavalinkEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum LavalinkEvent {
    #[serde(rename_all = "camelCase")]
    TrackEndEvent {
        guild_id: String,
        track: LavalinkTrack,
        reason: TrackEndReason,
    },
    #[serde(rename_all = "camelCase")]
    TrackExceptionEvent {
        guild_id: String,
        exception: LavalinkException,
    },
    #[serde(rename_all = "camelCase")]
    TrackStuckEvent { guild_id: String, threshold_ms: u64 },
    #[serde(rename_all = "camelCase")]
    WebSocketClosedEvent {
        guild_id: String,
        code: u16,
        reason: String,
    },
    #[serde(other)]
    Other,
}

impl LavalinkEvent {
    fn into_engine_event(self) -> Option<EngineEvent> {
        match self {
            LavalinkEvent::TrackEndEvent {
                guild_id,
                track,
                reason,
            } => Some(EngineEvent::TrackEnd {
                guild_id: parse_guild_id(&guild_id)?,
                track_id: track.encoded,
                reason,
            }),
            LavalinkEvent::TrackExceptionEvent {
                guild_id,
                exception,
            } => {
                warn!(
                    "⚠️ Track exception in guild {}: {}",
                    guild_id,
                    exception.message.unwrap_or(exception.severity)
                );
                None
            }
            LavalinkEvent::TrackStuckEvent {
                guild_id,
                threshold_ms,
            } => {
                warn!("⚠️ Track stuck in guild {} for {}ms", guild_id, threshold_ms);
                None
            }
            LavalinkEvent::WebSocketClosedEvent {
                guild_id,
                code,
                reason,
            } => {
                warn!(
                    "🔇 Discord voice socket closed in guild {} ({}: {})",
                    guild_id, code, reason
                );
                None
            }
            LavalinkEvent::Other => None,
        }
    }
}

fn parse_guild_id(raw: &str) -> Option<GuildId> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(GuildId::new)
}
