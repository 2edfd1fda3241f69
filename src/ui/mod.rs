//! # UI Module
//!
//! Discord-facing presentation: the now-playing card and its control buttons.

pub mod buttons;
pub mod embeds;
