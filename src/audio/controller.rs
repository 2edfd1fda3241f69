use serenity::model::id::{ChannelId, GuildId};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    engine::{AudioEngine, TrackEndReason},
    registry::{SessionHandle, SessionRegistry},
    session::{PlaybackSession, PlaybackState, TrackEndAction},
    track::{SearchResult, Track},
};
use crate::error::{MusicError, Result};

/// Result of dispatching a resolved `/play` query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Nothing was playing: `track` started and `queued` more followed it
    Started { track: Track, queued: usize },
    /// Something was playing: every track went to the queue
    Queued {
        first: Track,
        count: usize,
        playlist: Option<String>,
    },
}

/// Read-only view of a session for replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    #[allow(dead_code)]
    pub current: Option<Track>,
    pub queued: usize,
    #[allow(dead_code)]
    pub history: usize,
    pub looping: bool,
    pub volume: u16,
}

impl From<&PlaybackSession> for SessionSnapshot {
    fn from(session: &PlaybackSession) -> Self {
        Self {
            state: session.state(),
            current: session.current().cloned(),
            queued: session.queue().len(),
            history: session.history().len(),
            looping: session.is_looping(),
            volume: session.volume(),
        }
    }
}

/// A locked session that can outlive the registry entry it came from
pub type SessionGuard = OwnedMutexGuard<PlaybackSession>;

/// Applies playback operations to sessions and drives the audio engine.
///
/// Each operation locks the guild's session for its whole duration, mutates
/// it, and issues at most one `play` to the engine. Engine failures are logged
/// and never undo a state change that already happened.
///
/// A session destroyed while an operation was waiting for its lock is closed
/// first, so the waiting operation sees it as gone instead of acting on it.
#[derive(Clone)]
pub struct PlaybackController {
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn AudioEngine>,
    idle_timeout: Duration,
}

impl PlaybackController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn AudioEngine>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            engine,
            idle_timeout,
        }
    }

    #[allow(dead_code)]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the guild's locked session, creating it and connecting the
    /// engine to `voice_channel` on first use
    pub async fn join(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
    ) -> Result<SessionGuard> {
        loop {
            let (handle, created) = self.registry.get_or_create(guild_id, voice_channel)?;
            let mut session = handle.lock_owned().await;
            if session.is_closed() {
                // destroyed while we waited; the registry no longer holds it
                debug!("Session in guild {} closed under us, retrying", guild_id);
                continue;
            }
            if !created {
                return Ok(session);
            }

            if let Err(e) = self.engine.connect(guild_id, session.voice_channel()).await {
                self.close(guild_id, &mut session);
                return Err(MusicError::Engine(e));
            }
            self.send(guild_id, "volume", self.engine.set_volume(guild_id, session.volume()))
                .await;
            return Ok(session);
        }
    }

    /// Dispatches a search result: start it when idle, queue it otherwise
    pub async fn play_resolved(
        &self,
        guild_id: GuildId,
        voice_channel: Option<ChannelId>,
        result: SearchResult,
    ) -> Result<PlayOutcome> {
        if result.is_empty() {
            return Err(MusicError::NoResults);
        }
        let playlist = result.playlist_name().map(str::to_owned);
        let tracks = result.into_tracks();

        let mut session = self.join(guild_id, voice_channel).await?;

        if session.is_playing() {
            let first = tracks.first().cloned().ok_or(MusicError::NoResults)?;
            session.cancel_idle_timer();
            let count = session.bulk_enqueue(tracks);
            return Ok(PlayOutcome::Queued {
                first,
                count,
                playlist,
            });
        }

        let mut tracks = tracks.into_iter();
        let first = tracks.next().ok_or(MusicError::NoResults)?;
        let track = self.start(&mut session, first).await;
        let queued = session.bulk_enqueue(tracks);
        Ok(PlayOutcome::Started { track, queued })
    }

    /// Starts `track` immediately, leaving queue and history alone
    #[allow(dead_code)]
    pub async fn play_now(&self, guild_id: GuildId, track: Track) -> Result<Track> {
        let mut session = self.lock(guild_id).await?;
        Ok(self.start(&mut session, track).await)
    }

    /// Appends a track; returns the queue length
    #[allow(dead_code)]
    pub async fn enqueue(&self, guild_id: GuildId, track: Track) -> Result<usize> {
        let mut session = self.lock(guild_id).await?;
        session.cancel_idle_timer();
        session.enqueue(track);
        let len = session.queue().len();
        Ok(len)
    }

    /// Appends tracks in order; returns the queue length
    #[allow(dead_code)]
    pub async fn bulk_enqueue(&self, guild_id: GuildId, tracks: Vec<Track>) -> Result<usize> {
        let mut session = self.lock(guild_id).await?;
        session.cancel_idle_timer();
        session.bulk_enqueue(tracks);
        let len = session.queue().len();
        Ok(len)
    }

    /// Skip: plays the next queued track, if any.
    ///
    /// A skip with nothing queued changes nothing, so an idle session keeps
    /// its disconnect timer.
    pub async fn advance(&self, guild_id: GuildId) -> Result<Option<Track>> {
        let mut session = self.lock(guild_id).await?;
        let Some(next) = session.advance() else {
            debug!("⏭️ Nothing queued in guild {}", guild_id);
            return Ok(None);
        };
        session.cancel_idle_timer();
        self.send(guild_id, "play", self.engine.play(guild_id, next.clone()))
            .await;
        Ok(Some(next))
    }

    /// Previous: plays the last played track, if any
    pub async fn rewind(&self, guild_id: GuildId) -> Result<Option<Track>> {
        let mut session = self.lock(guild_id).await?;
        let Some(previous) = session.rewind() else {
            debug!("⏮️ No history in guild {}", guild_id);
            return Ok(None);
        };
        session.cancel_idle_timer();
        self.send(guild_id, "play", self.engine.play(guild_id, previous.clone()))
            .await;
        Ok(Some(previous))
    }

    /// Handles the engine's track-end event for `track_id`.
    ///
    /// Ends of anything but the current track are stale (a skip already
    /// moved on) and are ignored. Returns the track that is now playing when
    /// one was started, so the caller can announce it.
    pub async fn on_track_end(
        &self,
        guild_id: GuildId,
        track_id: &str,
        reason: TrackEndReason,
    ) -> Option<Track> {
        if !reason.may_start_next() {
            debug!("Ignoring track end ({:?}) in guild {}", reason, guild_id);
            return None;
        }
        let handle = self.registry.get(guild_id)?;
        let mut session = handle.lock_owned().await;
        if session.is_closed() {
            return None;
        }
        if session.current().map(|track| track.id.as_str()) != Some(track_id) {
            debug!("Ignoring stale track end in guild {}", guild_id);
            return None;
        }

        match session.finish_track(reason) {
            TrackEndAction::Replay(track) => {
                self.send(guild_id, "play", self.engine.play(guild_id, track.clone()))
                    .await;
                Some(track)
            }
            TrackEndAction::Next(track) => {
                session.cancel_idle_timer();
                self.send(guild_id, "play", self.engine.play(guild_id, track.clone()))
                    .await;
                Some(track)
            }
            TrackEndAction::Idle => {
                self.arm_idle_timer(&mut session);
                None
            }
        }
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> Result<bool> {
        let mut session = self.lock(guild_id).await?;
        Ok(session.toggle_loop())
    }

    /// Shuffles the queue; `false` when it had fewer than two tracks
    pub async fn toggle_shuffle(&self, guild_id: GuildId) -> Result<bool> {
        let mut session = self.lock(guild_id).await?;
        Ok(session.shuffle_queue())
    }

    /// Changes the volume by `delta` within [10, 150] and always resends it
    pub async fn set_volume(&self, guild_id: GuildId, delta: i32) -> Result<u16> {
        let mut session = self.lock(guild_id).await?;
        let volume = session.adjust_volume(delta);
        self.send(guild_id, "volume", self.engine.set_volume(guild_id, volume))
            .await;
        Ok(volume)
    }

    /// Flips pause; returns whether playback is now paused
    pub async fn toggle_pause(&self, guild_id: GuildId) -> Result<bool> {
        let mut session = self.lock(guild_id).await?;
        let paused = session.toggle_pause();
        self.send(guild_id, "pause", self.engine.pause(guild_id, paused))
            .await;
        Ok(paused)
    }

    /// Stops playback, leaves voice and destroys the session
    pub async fn stop(&self, guild_id: GuildId) -> Result<()> {
        let mut session = self.lock(guild_id).await?;
        session.cancel_idle_timer();
        self.send(guild_id, "stop", self.engine.stop(guild_id)).await;
        self.send(guild_id, "disconnect", self.engine.disconnect(guild_id))
            .await;
        self.close(guild_id, &mut session);
        info!("⏹️ Playback stopped in guild {}", guild_id);
        Ok(())
    }

    /// Drops the session without talking to the engine (the bot was
    /// disconnected from voice by someone else).
    ///
    /// `left_channel` is the channel the bot left, when known; a session
    /// living in another channel is kept. Returns whether a session was
    /// dropped.
    pub async fn forget(&self, guild_id: GuildId, left_channel: Option<ChannelId>) -> bool {
        let Some(handle) = self.registry.get(guild_id) else {
            return false;
        };
        let mut session = handle.lock_owned().await;
        if session.is_closed() {
            return false;
        }
        if left_channel.is_some_and(|channel_id| channel_id != session.voice_channel()) {
            debug!(
                "Voice leave in guild {} is not about the current session",
                guild_id
            );
            return false;
        }
        self.close(guild_id, &mut session);
        true
    }

    pub async fn snapshot(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        let handle = self.registry.get(guild_id)?;
        let session = handle.lock().await;
        if session.is_closed() {
            return None;
        }
        Some(SessionSnapshot::from(&*session))
    }

    /// Locks the guild's session, treating a closed one as missing
    async fn lock(&self, guild_id: GuildId) -> Result<SessionGuard> {
        let handle = self
            .registry
            .get(guild_id)
            .ok_or(MusicError::SessionNotFound)?;
        let session = handle.lock_owned().await;
        if session.is_closed() {
            return Err(MusicError::SessionNotFound);
        }
        Ok(session)
    }

    /// Closes the session and removes it from the registry, unless a newer
    /// session already replaced it there
    fn close(&self, guild_id: GuildId, session: &mut SessionGuard) {
        session.close();
        self.registry
            .destroy_if_same(guild_id, OwnedMutexGuard::mutex(session));
    }

    async fn start(&self, session: &mut PlaybackSession, track: Track) -> Track {
        let guild_id = session.guild_id();
        session.cancel_idle_timer();
        let track = session.play_now(track);
        self.send(guild_id, "play", self.engine.play(guild_id, track.clone()))
            .await;
        track
    }

    fn arm_idle_timer(&self, session: &mut SessionGuard) {
        let guild_id = session.guild_id();
        let token = CancellationToken::new();
        session.arm_idle_timer(token.clone());
        debug!(
            "⏲️ Idle timer armed for guild {} ({:?})",
            guild_id, self.idle_timeout
        );

        let controller = self.clone();
        let handle = OwnedMutexGuard::mutex(session).clone();
        let timeout = self.idle_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    controller.expire_idle(guild_id, handle, token).await;
                }
            }
        });
    }

    async fn expire_idle(&self, guild_id: GuildId, handle: SessionHandle, token: CancellationToken) {
        let mut session = handle.lock_owned().await;
        // a mutation may have landed while we waited for the lock
        if token.is_cancelled() || session.is_closed() || session.is_playing() {
            return;
        }
        info!("💤 Guild {} idle for {:?}, disconnecting", guild_id, self.idle_timeout);
        self.send(guild_id, "disconnect", self.engine.disconnect(guild_id))
            .await;
        self.close(guild_id, &mut session);
    }

    async fn send(
        &self,
        guild_id: GuildId,
        command: &'static str,
        request: impl Future<Output = anyhow::Result<()>>,
    ) {
        if let Err(e) = request.await {
            warn!(
                "⚠️ Audio engine rejected '{}' for guild {}: {:?}",
                command, guild_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::MockAudioEngine;
    use mockall::{predicate::eq, Sequence};
    use pretty_assertions::assert_eq;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn voice() -> Option<ChannelId> {
        Some(ChannelId::new(2))
    }

    fn track(id: &str) -> Track {
        Track::new(id, format!("Title {id}"), format!("Author {id}"))
    }

    /// Engine that accepts the connect + initial volume of a new session
    fn engine() -> MockAudioEngine {
        let mut engine = MockAudioEngine::new();
        engine.expect_connect().returning(|_, _| Ok(()));
        engine
            .expect_set_volume()
            .with(eq(guild()), eq(100))
            .times(1)
            .returning(|_, _| Ok(()));
        engine
    }

    fn controller(engine: MockAudioEngine) -> PlaybackController {
        PlaybackController::new(
            Arc::new(SessionRegistry::default()),
            Arc::new(engine),
            Duration::from_secs(300),
        )
    }

    fn expect_play(engine: &mut MockAudioEngine, id: &'static str, seq: &mut Sequence) {
        engine
            .expect_play()
            .withf(move |g, t| *g == GuildId::new(1) && t.id == id)
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(()));
    }

    async fn queue_ids(controller: &PlaybackController) -> Vec<String> {
        let handle = controller.registry().get(guild()).unwrap();
        let session = handle.lock().await;
        let ids: Vec<String> = session.queue().map(|t| t.id.clone()).collect();
        ids
    }

    async fn history_ids(controller: &PlaybackController) -> Vec<String> {
        let handle = controller.registry().get(guild()).unwrap();
        let session = handle.lock().await;
        let ids: Vec<String> = session.history().iter().map(|t| t.id.clone()).collect();
        ids
    }

    #[tokio::test]
    async fn play_enqueue_advance_rewind() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        expect_play(&mut engine, "T2", &mut seq);
        expect_play(&mut engine, "T1", &mut seq);
        let controller = controller(engine);

        let outcome = controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PlayOutcome::Started {
                track: track("T1"),
                queued: 0
            }
        );

        controller.enqueue(guild(), track("T2")).await.unwrap();
        controller.enqueue(guild(), track("T3")).await.unwrap();
        assert_eq!(queue_ids(&controller).await, vec!["T2", "T3"]);

        let next = controller.advance(guild()).await.unwrap();
        assert_eq!(next, Some(track("T2")));
        assert_eq!(queue_ids(&controller).await, vec!["T3"]);
        assert_eq!(history_ids(&controller).await, vec!["T1"]);

        let previous = controller.rewind(guild()).await.unwrap();
        assert_eq!(previous, Some(track("T1")));
        assert_eq!(queue_ids(&controller).await, vec!["T2", "T3"]);
        assert!(history_ids(&controller).await.is_empty());
    }

    #[tokio::test]
    async fn playlist_while_idle_starts_first_and_queues_rest() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "a", &mut seq);
        let controller = controller(engine);

        let playlist = SearchResult::Playlist {
            name: "Mix".into(),
            tracks: vec![track("a"), track("b"), track("c")],
        };
        let outcome = controller
            .play_resolved(guild(), voice(), playlist)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PlayOutcome::Started {
                track: track("a"),
                queued: 2
            }
        );
        assert_eq!(queue_ids(&controller).await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn playlist_while_playing_queues_everything() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "now", &mut seq);
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("now")))
            .await
            .unwrap();
        let outcome = controller
            .play_resolved(
                guild(),
                voice(),
                SearchResult::Playlist {
                    name: "Mix".into(),
                    tracks: vec![track("a"), track("b")],
                },
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PlayOutcome::Queued {
                first: track("a"),
                count: 2,
                playlist: Some("Mix".into())
            }
        );
        assert_eq!(queue_ids(&controller).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_results_create_no_session() {
        let controller = controller(MockAudioEngine::new());
        let err = controller
            .play_resolved(guild(), voice(), SearchResult::Search(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, MusicError::NoResults));
        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn users_outside_voice_are_rejected() {
        let controller = controller(MockAudioEngine::new());
        let err = controller
            .play_resolved(guild(), None, SearchResult::Track(track("a")))
            .await
            .unwrap_err();
        assert!(matches!(err, MusicError::NotInVoiceChannel));
        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn failed_connect_rolls_the_session_back() {
        let mut engine = MockAudioEngine::new();
        engine
            .expect_connect()
            .returning(|_, _| Err(anyhow::anyhow!("node offline")));
        let controller = controller(engine);

        let err = controller.join(guild(), voice()).await.unwrap_err();
        assert!(matches!(err, MusicError::Engine(_)));
        assert!(controller.registry().get(guild()).is_none());
    }

    #[tokio::test]
    async fn engine_failures_keep_the_new_state() {
        let mut engine = engine();
        engine
            .expect_play()
            .returning(|_, _| Err(anyhow::anyhow!("token expired")));
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        let snapshot = controller.snapshot(guild()).await.unwrap();
        assert_eq!(snapshot.current, Some(track("T1")));
    }

    #[tokio::test]
    async fn controls_without_session_report_not_found() {
        let controller = controller(MockAudioEngine::new());
        assert!(matches!(
            controller.advance(guild()).await,
            Err(MusicError::SessionNotFound)
        ));
        assert!(matches!(
            controller.toggle_pause(guild()).await,
            Err(MusicError::SessionNotFound)
        ));
        assert!(matches!(
            controller.stop(guild()).await,
            Err(MusicError::SessionNotFound)
        ));
        assert!(controller
            .on_track_end(guild(), "T1", TrackEndReason::Finished)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn loop_replays_current_on_track_end() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        expect_play(&mut engine, "T1", &mut seq);
        engine.expect_disconnect().never();
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        assert!(controller.toggle_loop(guild()).await.unwrap());

        let replayed = controller
            .on_track_end(guild(), "T1", TrackEndReason::Finished)
            .await;
        assert_eq!(replayed, Some(track("T1")));

        let snapshot = controller.snapshot(guild()).await.unwrap();
        assert_eq!(snapshot.current, Some(track("T1")));
        assert_eq!(snapshot.history, 0);
    }

    #[tokio::test]
    async fn track_end_moves_to_the_next_track() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        expect_play(&mut engine, "T2", &mut seq);
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        controller.enqueue(guild(), track("T2")).await.unwrap();

        let next = controller
            .on_track_end(guild(), "T1", TrackEndReason::Finished)
            .await;
        assert_eq!(next, Some(track("T2")));
        assert_eq!(history_ids(&controller).await, vec!["T1"]);
    }

    #[tokio::test]
    async fn replaced_tracks_do_not_advance() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        controller.enqueue(guild(), track("T2")).await.unwrap();

        assert!(controller
            .on_track_end(guild(), "T1", TrackEndReason::Replaced)
            .await
            .is_none());
        assert_eq!(queue_ids(&controller).await, vec!["T2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_disconnects_after_timeout() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        engine
            .expect_disconnect()
            .with(eq(guild()))
            .times(1)
            .returning(|_| Ok(()));
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        assert!(controller
            .on_track_end(guild(), "T1", TrackEndReason::Finished)
            .await
            .is_none());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(controller.registry().get(guild()).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(controller.registry().get(guild()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn playing_again_cancels_the_idle_timer() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        expect_play(&mut engine, "T2", &mut seq);
        engine.expect_disconnect().never();
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        controller
            .on_track_end(guild(), "T1", TrackEndReason::Finished)
            .await;

        tokio::time::sleep(Duration::from_secs(100)).await;
        let outcome = controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T2")))
            .await
            .unwrap();
        assert!(matches!(outcome, PlayOutcome::Started { .. }));

        tokio::time::sleep(Duration::from_secs(400)).await;
        let snapshot = controller.snapshot(guild()).await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn volume_steps_are_always_sent() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        for volume in [110u16, 120, 130, 140, 150, 150] {
            engine
                .expect_set_volume()
                .with(eq(guild()), eq(volume))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }
        let controller = controller(engine);
        controller.join(guild(), voice()).await.unwrap();

        let mut volumes = Vec::new();
        for _ in 0..6 {
            volumes.push(controller.set_volume(guild(), 10).await.unwrap());
        }
        assert_eq!(volumes, vec![110, 120, 130, 140, 150, 150]);
    }

    #[tokio::test]
    async fn pause_is_forwarded() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        for paused in [true, false] {
            engine
                .expect_pause()
                .with(eq(guild()), eq(paused))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }
        let controller = controller(engine);
        controller.join(guild(), voice()).await.unwrap();

        assert!(controller.toggle_pause(guild()).await.unwrap());
        assert!(!controller.toggle_pause(guild()).await.unwrap());
    }

    #[tokio::test]
    async fn stop_stops_then_disconnects_and_destroys() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        engine
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_disconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        controller.stop(guild()).await.unwrap();
        assert!(controller.registry().get(guild()).is_none());
    }

    #[tokio::test]
    async fn shuffle_needs_two_tracks() {
        let controller = controller(engine());
        controller.join(guild(), voice()).await.unwrap();

        controller.enqueue(guild(), track("a")).await.unwrap();
        assert!(!controller.toggle_shuffle(guild()).await.unwrap());

        controller.enqueue(guild(), track("b")).await.unwrap();
        assert!(controller.toggle_shuffle(guild()).await.unwrap());
        let mut ids = queue_ids(&controller).await;
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn forget_drops_the_session_silently() {
        let controller = controller(engine());
        controller.join(guild(), voice()).await.unwrap();

        assert!(!controller.forget(guild(), Some(ChannelId::new(99))).await);
        assert!(controller.snapshot(guild()).await.is_some());

        assert!(controller.forget(guild(), voice()).await);
        assert!(controller.snapshot(guild()).await.is_none());
    }

    /// Lets spawned tasks run until they block
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn skip_waiting_behind_stop_finds_no_session() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        engine
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        engine
            .expect_disconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        controller.enqueue(guild(), track("T2")).await.unwrap();

        let handle = controller.registry().get(guild()).unwrap();
        let guard = handle.lock().await;
        let stop = tokio::spawn({
            let controller = controller.clone();
            async move { controller.stop(guild()).await }
        });
        settle().await;
        let skip = tokio::spawn({
            let controller = controller.clone();
            async move { controller.advance(guild()).await }
        });
        settle().await;
        drop(guard);

        stop.await.unwrap().unwrap();
        assert!(matches!(
            skip.await.unwrap(),
            Err(MusicError::SessionNotFound)
        ));
        assert!(controller.registry().get(guild()).is_none());
    }

    #[tokio::test]
    async fn play_waiting_behind_teardown_opens_a_new_session() {
        let mut engine = MockAudioEngine::new();
        engine.expect_connect().times(2).returning(|_, _| Ok(()));
        engine.expect_set_volume().times(2).returning(|_, _| Ok(()));
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        let controller = controller(engine);

        drop(controller.join(guild(), voice()).await.unwrap());
        let old = controller.registry().get(guild()).unwrap();
        let mut guard = old.clone().lock_owned().await;
        let play = tokio::spawn({
            let controller = controller.clone();
            async move {
                controller
                    .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
                    .await
            }
        });
        settle().await;
        controller.close(guild(), &mut guard);
        drop(guard);

        let outcome = play.await.unwrap().unwrap();
        assert!(matches!(outcome, PlayOutcome::Started { .. }));
        let new = controller.registry().get(guild()).unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(
            controller.snapshot(guild()).await.unwrap().current,
            Some(track("T1"))
        );
    }

    #[tokio::test]
    async fn end_of_a_skipped_track_is_ignored() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        expect_play(&mut engine, "T2", &mut seq);
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        controller
            .bulk_enqueue(guild(), vec![track("T2"), track("T3")])
            .await
            .unwrap();
        controller.advance(guild()).await.unwrap();

        assert!(controller
            .on_track_end(guild(), "T1", TrackEndReason::Finished)
            .await
            .is_none());
        let snapshot = controller.snapshot(guild()).await.unwrap();
        assert_eq!(snapshot.current, Some(track("T2")));
        assert_eq!(queue_ids(&controller).await, vec!["T3"]);
        assert_eq!(history_ids(&controller).await, vec!["T1"]);
    }

    #[tokio::test]
    async fn failed_load_is_not_looped() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "broken", &mut seq);
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("broken")))
            .await
            .unwrap();
        assert!(controller.toggle_loop(guild()).await.unwrap());

        for _ in 0..3 {
            assert!(controller
                .on_track_end(guild(), "broken", TrackEndReason::LoadFailed)
                .await
                .is_none());
        }
        let snapshot = controller.snapshot(guild()).await.unwrap();
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(history_ids(&controller).await, vec!["broken"]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_skip_keeps_the_idle_timer_running() {
        let mut engine = engine();
        let mut seq = Sequence::new();
        expect_play(&mut engine, "T1", &mut seq);
        engine
            .expect_disconnect()
            .times(1)
            .returning(|_| Ok(()));
        let controller = controller(engine);

        controller
            .play_resolved(guild(), voice(), SearchResult::Track(track("T1")))
            .await
            .unwrap();
        controller
            .on_track_end(guild(), "T1", TrackEndReason::Finished)
            .await;

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(controller.advance(guild()).await.unwrap(), None);

        tokio::time::sleep(Duration::from_secs(201)).await;
        assert!(controller.registry().get(guild()).is_none());
    }
}
