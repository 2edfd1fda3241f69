//! # Audio Module
//!
//! Per-guild playback queue and session state machine for Sisyphus.
//!
//! Audio itself is decoded and streamed by an external Lavalink node; this
//! module decides *what* plays and tells the node about it.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - Current track, upcoming queue, bounded history
//! - Loop flag, volume in [10, 150], pause flag
//! - Pure state transitions, no I/O
//!
//! ### [`registry`] - Session Registry
//! - Guild id → session, each behind its own async mutex
//! - Sessions are created on first use and destroyed on stop or idle timeout
//!
//! ### [`controller`] - Playback Controller
//! - Applies operations under the guild lock and issues engine commands
//! - Arms and cancels the idle-disconnect timer
//!
//! ### [`engine`] / [`lavalink`] - Audio Engine
//! - [`engine::AudioEngine`] is the command seam (mocked in tests)
//! - [`lavalink::LavalinkEngine`] speaks Lavalink v4 REST + websocket
//!
//! ## State Machine
//!
//! ```text
//! Idle ──play/skip/previous──▶ Playing ◀──pause──▶ Paused
//!   ▲                            │
//!   └──── track end, queue empty ┘   (idle timeout ⇒ disconnect + destroy)
//! ```

pub mod controller;
pub mod engine;
pub mod lavalink;
pub mod registry;
pub mod session;
pub mod track;
