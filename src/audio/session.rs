use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{engine::TrackEndReason, track::Track};

pub const MIN_VOLUME: u16 = 10;
pub const MAX_VOLUME: u16 = 150;
pub const VOLUME_STEP: i32 = 10;
pub const DEFAULT_VOLUME: u16 = 100;
pub const DEFAULT_MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// What the engine should do after the current track finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEndAction {
    /// Loop is on: play the same track again
    Replay(Track),
    /// The next queued track became current
    Next(Track),
    /// Nothing left; the session went idle
    Idle,
}

/// Per-guild playback state.
///
/// `current` is held apart from `queue`: the queue only ever contains tracks
/// that have not started yet, and `history` is a stack whose tail is the most
/// recently played track. Every transition returns the track the engine has to
/// start, if any, and leaves issuing that command to the caller.
#[derive(Debug)]
pub struct PlaybackSession {
    guild_id: GuildId,
    voice_channel: ChannelId,
    current: Option<Track>,
    queue: VecDeque<Track>,
    history: VecDeque<Track>,
    looping: bool,
    volume: u16,
    paused: bool,
    max_history: usize,
    idle_timer: Option<CancellationToken>,
    closed: bool,
}

impl PlaybackSession {
    pub fn new(guild_id: GuildId, voice_channel: ChannelId) -> Self {
        Self {
            guild_id,
            voice_channel,
            current: None,
            queue: VecDeque::new(),
            history: VecDeque::new(),
            looping: false,
            volume: DEFAULT_VOLUME,
            paused: false,
            max_history: DEFAULT_MAX_HISTORY,
            idle_timer: None,
            closed: false,
        }
    }

    pub fn with_volume(mut self, volume: u16) -> Self {
        self.volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Starts `track` right away without touching queue or history
    pub fn play_now(&mut self, track: Track) -> Track {
        info!("▶️ Playing now in guild {}: {}", self.guild_id, track.title);
        self.paused = false;
        self.current = Some(track.clone());
        track
    }

    pub fn enqueue(&mut self, track: Track) {
        info!("➕ Queued in guild {}: {}", self.guild_id, track.title);
        self.queue.push_back(track);
    }

    /// Appends many tracks, preserving their order
    pub fn bulk_enqueue(&mut self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let before = self.queue.len();
        self.queue.extend(tracks);
        let added = self.queue.len() - before;
        info!("➕ Queued {} tracks in guild {}", added, self.guild_id);
        added
    }

    /// Moves to the next queued track (skip). No-op on an empty queue.
    pub fn advance(&mut self) -> Option<Track> {
        let next = self.queue.pop_front()?;
        if let Some(current) = self.current.take() {
            self.push_history(current);
        }
        info!("⏭️ Next in guild {}: {}", self.guild_id, next.title);
        self.paused = false;
        self.current = Some(next.clone());
        Some(next)
    }

    /// Goes back to the last played track (previous). No-op on an empty history.
    ///
    /// The interrupted track goes to the front of the queue so a later
    /// `advance` resumes it.
    pub fn rewind(&mut self) -> Option<Track> {
        let previous = self.history.pop_back()?;
        if let Some(current) = self.current.take() {
            self.queue.push_front(current);
        }
        info!("⏮️ Previous in guild {}: {}", self.guild_id, previous.title);
        self.paused = false;
        self.current = Some(previous.clone());
        Some(previous)
    }

    /// Applies the end of the current track. A track that failed to load is
    /// never replayed, even with loop on.
    pub fn finish_track(&mut self, reason: TrackEndReason) -> TrackEndAction {
        if self.looping && reason.may_replay() {
            if let Some(current) = &self.current {
                debug!("🔂 Looping in guild {}: {}", self.guild_id, current.title);
                return TrackEndAction::Replay(current.clone());
            }
        }

        if let Some(next) = self.advance() {
            return TrackEndAction::Next(next);
        }

        if let Some(finished) = self.current.take() {
            self.push_history(finished);
        }
        self.paused = false;
        info!("📭 Queue empty in guild {}, going idle", self.guild_id);
        TrackEndAction::Idle
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        info!(
            "🔁 Loop {} in guild {}",
            if self.looping { "enabled" } else { "disabled" },
            self.guild_id
        );
        self.looping
    }

    /// Shuffles the pending tracks; returns whether anything was reordered
    pub fn shuffle_queue(&mut self) -> bool {
        if self.queue.len() <= 1 {
            return false;
        }
        let mut rng = rand::thread_rng();
        self.queue.make_contiguous().shuffle(&mut rng);
        info!("🔀 Queue shuffled in guild {}", self.guild_id);
        true
    }

    /// Adds `delta` to the volume, clamped to [10, 150]
    pub fn adjust_volume(&mut self, delta: i32) -> u16 {
        let target = i32::from(self.volume) + delta;
        self.volume = target.clamp(i32::from(MIN_VOLUME), i32::from(MAX_VOLUME)) as u16;
        info!("🔊 Volume {}% in guild {}", self.volume, self.guild_id);
        self.volume
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        info!(
            "{} in guild {}",
            if self.paused { "⏸️ Paused" } else { "▶️ Resumed" },
            self.guild_id
        );
        self.paused
    }

    /// Replaces the idle timer; the previous one, if any, is cancelled
    pub fn arm_idle_timer(&mut self, token: CancellationToken) {
        self.cancel_idle_timer();
        self.idle_timer = Some(token);
    }

    pub fn cancel_idle_timer(&mut self) {
        if let Some(token) = self.idle_timer.take() {
            debug!("⏲️ Idle timer cancelled in guild {}", self.guild_id);
            token.cancel();
        }
    }

    /// Marks the session as destroyed. Operations that were waiting for the
    /// lock must treat a closed session as gone.
    pub fn close(&mut self) {
        self.cancel_idle_timer();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[allow(dead_code)]
    pub fn idle_timer(&self) -> Option<&CancellationToken> {
        self.idle_timer.as_ref()
    }

    pub fn state(&self) -> PlaybackState {
        match (&self.current, self.paused) {
            (None, _) => PlaybackState::Idle,
            (Some(_), true) => PlaybackState::Paused,
            (Some(_), false) => PlaybackState::Playing,
        }
    }

    /// Whether a track is loaded in the engine (playing or paused)
    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn voice_channel(&self) -> ChannelId {
        self.voice_channel
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> impl ExactSizeIterator<Item = &Track> {
        self.queue.iter()
    }

    pub fn history(&self) -> &VecDeque<Track> {
        &self.history
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn volume(&self) -> u16 {
        self.volume
    }

    fn push_history(&mut self, track: Track) {
        self.history.push_back(track);
        if self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(id: &str) -> Track {
        Track::new(id, format!("Title {id}"), format!("Author {id}"))
    }

    fn session() -> PlaybackSession {
        PlaybackSession::new(GuildId::new(1), ChannelId::new(2))
    }

    fn ids<'a>(tracks: impl Iterator<Item = &'a Track>) -> Vec<String> {
        tracks.map(|t| t.id.clone()).collect()
    }

    fn current_id(session: &PlaybackSession) -> Option<String> {
        session.current().map(|t| t.id.clone())
    }

    #[test]
    fn new_session_defaults() {
        let s = session();
        assert_eq!(s.state(), PlaybackState::Idle);
        assert_eq!(s.volume(), 100);
        assert!(!s.is_looping());
        assert!(!s.is_paused());
        assert_eq!(s.queue().len(), 0);
        assert!(s.history().is_empty());
    }

    #[test]
    fn enqueue_preserves_call_order() {
        let mut s = session();
        s.enqueue(track("1"));
        s.bulk_enqueue(vec![track("2"), track("3")]);
        s.enqueue(track("4"));
        assert_eq!(ids(s.queue()), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn play_advance_then_rewind() {
        let mut s = session();
        let started = s.play_now(track("T1"));
        assert_eq!(started.id, "T1");
        assert_eq!(s.queue().len(), 0);

        s.enqueue(track("T2"));
        s.enqueue(track("T3"));
        assert_eq!(ids(s.queue()), vec!["T2", "T3"]);

        let next = s.advance().expect("queue has tracks");
        assert_eq!(next.id, "T2");
        assert_eq!(current_id(&s), Some("T2".to_string()));
        assert_eq!(ids(s.queue()), vec!["T3"]);
        assert_eq!(ids(s.history().iter()), vec!["T1"]);

        let previous = s.rewind().expect("history has tracks");
        assert_eq!(previous.id, "T1");
        assert_eq!(current_id(&s), Some("T1".to_string()));
        assert_eq!(ids(s.queue()), vec!["T2", "T3"]);
        assert!(s.history().is_empty());
    }

    #[test]
    fn advance_on_empty_queue_is_noop() {
        let mut s = session();
        s.play_now(track("T1"));
        assert!(s.advance().is_none());
        assert_eq!(current_id(&s), Some("T1".to_string()));
        assert!(s.history().is_empty());
    }

    #[test]
    fn rewind_on_empty_history_is_noop() {
        let mut s = session();
        s.play_now(track("T1"));
        s.enqueue(track("T2"));
        assert!(s.rewind().is_none());
        assert_eq!(current_id(&s), Some("T1".to_string()));
        assert_eq!(ids(s.queue()), vec!["T2"]);
    }

    #[test]
    fn a_track_is_never_in_queue_and_history_at_once() {
        let mut s = session();
        s.play_now(track("1"));
        s.bulk_enqueue(vec![track("2"), track("3"), track("4")]);
        s.advance();
        s.advance();
        s.rewind();
        s.advance();
        s.rewind();
        s.rewind();

        let queued = ids(s.queue());
        for played in s.history() {
            assert!(!queued.contains(&played.id), "{} duplicated", played.id);
        }
        let mut all = queued;
        all.extend(ids(s.history().iter()));
        all.extend(current_id(&s));
        all.sort();
        assert_eq!(all, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn finish_with_loop_replays_current() {
        let mut s = session();
        s.play_now(track("T1"));
        s.toggle_loop();
        assert_eq!(
            s.finish_track(TrackEndReason::Finished),
            TrackEndAction::Replay(track("T1"))
        );
        assert_eq!(current_id(&s), Some("T1".to_string()));
        assert!(s.history().is_empty());
    }

    #[test]
    fn failed_load_with_loop_moves_on() {
        let mut s = session();
        s.play_now(track("broken"));
        s.enqueue(track("T2"));
        s.toggle_loop();
        assert_eq!(
            s.finish_track(TrackEndReason::LoadFailed),
            TrackEndAction::Next(track("T2"))
        );
        assert_eq!(
            s.finish_track(TrackEndReason::LoadFailed),
            TrackEndAction::Idle
        );
        assert_eq!(ids(s.history().iter()), vec!["broken", "T2"]);
    }

    #[test]
    fn closing_cancels_the_idle_timer() {
        let mut s = session();
        let token = CancellationToken::new();
        s.arm_idle_timer(token.clone());
        assert!(!s.is_closed());
        s.close();
        assert!(s.is_closed());
        assert!(token.is_cancelled());
    }

    #[test]
    fn finish_advances_to_next_queued_track() {
        let mut s = session();
        s.play_now(track("T1"));
        s.enqueue(track("T2"));
        assert_eq!(
            s.finish_track(TrackEndReason::Finished),
            TrackEndAction::Next(track("T2"))
        );
        assert_eq!(ids(s.history().iter()), vec!["T1"]);
    }

    #[test]
    fn finish_on_empty_queue_goes_idle() {
        let mut s = session();
        s.play_now(track("T1"));
        assert_eq!(
            s.finish_track(TrackEndReason::Finished),
            TrackEndAction::Idle
        );
        assert_eq!(s.state(), PlaybackState::Idle);
        assert_eq!(ids(s.history().iter()), vec!["T1"]);

        // the finished track can still be brought back
        assert_eq!(s.rewind().map(|t| t.id), Some("T1".to_string()));
    }

    #[test]
    fn shuffle_small_queue_is_noop() {
        let mut s = session();
        assert!(!s.shuffle_queue());
        s.enqueue(track("1"));
        assert!(!s.shuffle_queue());
        assert_eq!(ids(s.queue()), vec!["1"]);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut s = session();
        s.play_now(track("now"));
        s.bulk_enqueue((0..20).map(|i| track(&i.to_string())));
        assert!(s.shuffle_queue());

        let mut shuffled = ids(s.queue());
        shuffled.sort();
        let mut expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        expected.sort();
        assert_eq!(shuffled, expected);
        assert_eq!(current_id(&s), Some("now".to_string()));
    }

    #[test]
    fn volume_steps_and_clamps() {
        let mut s = session();
        let steps: Vec<u16> = (0..6).map(|_| s.adjust_volume(VOLUME_STEP)).collect();
        assert_eq!(steps, vec![110, 120, 130, 140, 150, 150]);

        let mut s = session().with_volume(20);
        assert_eq!(s.adjust_volume(-VOLUME_STEP), 10);
        assert_eq!(s.adjust_volume(-VOLUME_STEP), 10);
    }

    #[test]
    fn initial_volume_is_clamped() {
        assert_eq!(session().with_volume(500).volume(), 150);
        assert_eq!(session().with_volume(0).volume(), 10);
    }

    #[test]
    fn pause_toggles_state() {
        let mut s = session();
        s.play_now(track("T1"));
        assert_eq!(s.state(), PlaybackState::Playing);
        assert!(s.toggle_pause());
        assert_eq!(s.state(), PlaybackState::Paused);
        assert!(!s.toggle_pause());
        assert_eq!(s.state(), PlaybackState::Playing);
    }

    #[test]
    fn starting_a_track_clears_pause() {
        let mut s = session();
        s.play_now(track("T1"));
        s.enqueue(track("T2"));
        s.toggle_pause();
        s.advance();
        assert_eq!(s.state(), PlaybackState::Playing);
    }

    #[test]
    fn history_is_bounded() {
        let mut s = session().with_max_history(3);
        s.play_now(track("0"));
        s.bulk_enqueue((1..6).map(|i| track(&i.to_string())));
        while s.advance().is_some() {}
        assert_eq!(ids(s.history().iter()), vec!["2", "3", "4"]);
    }

    #[test]
    fn arming_a_timer_cancels_the_previous_one() {
        let mut s = session();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        s.arm_idle_timer(first.clone());
        s.arm_idle_timer(second.clone());
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        s.cancel_idle_timer();
        assert!(second.is_cancelled());
        assert!(s.idle_timer().is_none());
    }
}
