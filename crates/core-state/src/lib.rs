//! Playback state machine: transport status, rate, position math.
//!
//! Animation time is derived, never stored per tick: while playing it is
//! `position + (now - resumed_at) * rate`, re-anchored on every
//! transition (pause, seek, rate change) so rate changes never warp the
//! current position. All instants come from the host [`Clock`].
//!
//! Invariants:
//! * `current_time` is non-decreasing between transitions while playing.
//! * Seeks clamp to `[0, duration]`; a paused seek round-trips exactly.
//! * `Ended` is a distinct status: position clamps at the end and a
//!   subsequent `play` restarts from zero.

use std::time::Instant;

pub mod clock;
pub mod freeze;

pub use clock::{Clock, ManualClock, SystemClock};
pub use freeze::{
    FREEZE_FATAL_THRESHOLD, FREEZE_WARN_THRESHOLD, FreezeVerdict, FreezeWatchdog,
};

/// Playback rate bounds enforced by both the parser and the state.
pub const RATE_MIN: f64 = 0.1;
pub const RATE_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    /// A finite timeline ran out; position stays clamped at the end.
    Ended,
}

#[derive(Debug)]
pub struct PlaybackState {
    status: PlaybackStatus,
    rate: f64,
    /// Animation time at the last transition.
    position: f64,
    /// Wall instant of the last transition while playing.
    resumed_at: Option<Instant>,
    /// Canonical document duration (zero for static documents).
    duration: f64,
    frame_count: usize,
}

impl PlaybackState {
    pub fn new(now: Instant) -> Self {
        Self {
            status: PlaybackStatus::Playing,
            rate: 1.0,
            position: 0.0,
            resumed_at: Some(now),
            duration: 0.0,
            frame_count: 1,
        }
    }

    /// Install a freshly loaded document's canonical timing. Position is
    /// rewound; the transport status is preserved.
    pub fn set_timing(&mut self, now: Instant, duration: f64, frame_count: usize) {
        self.duration = duration.max(0.0);
        self.frame_count = frame_count.max(1);
        self.position = 0.0;
        if self.status == PlaybackStatus::Ended {
            self.status = PlaybackStatus::Paused;
        }
        if self.is_playing() {
            self.resumed_at = Some(now);
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Current animation time.
    pub fn current_time(&self, now: Instant) -> f64 {
        match (self.status, self.resumed_at) {
            (PlaybackStatus::Playing, Some(at)) => {
                self.position + now.duration_since(at).as_secs_f64() * self.rate
            }
            _ => self.position,
        }
    }

    pub fn play(&mut self, now: Instant) {
        if self.status == PlaybackStatus::Ended {
            self.position = 0.0;
        }
        if self.status != PlaybackStatus::Playing {
            self.status = PlaybackStatus::Playing;
            self.resumed_at = Some(now);
            tracing::debug!(target: "state.playback", position = self.position, "play");
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.status == PlaybackStatus::Playing {
            self.position = self.current_time(now);
            self.status = PlaybackStatus::Paused;
            self.resumed_at = None;
            tracing::debug!(target: "state.playback", position = self.position, "pause");
        }
    }

    pub fn toggle(&mut self, now: Instant) {
        if self.is_playing() {
            self.pause(now);
        } else {
            self.play(now);
        }
    }

    /// Rewind to zero and pause.
    pub fn stop(&mut self) {
        self.position = 0.0;
        self.status = PlaybackStatus::Paused;
        self.resumed_at = None;
    }

    /// Jump to `t`, clamped to the canonical timeline. Status is kept
    /// except that `Ended` becomes `Paused` (the timeline is live again).
    pub fn seek(&mut self, now: Instant, t: f64) {
        self.position = t.clamp(0.0, self.duration.max(0.0));
        if self.status == PlaybackStatus::Ended {
            self.status = PlaybackStatus::Paused;
        }
        if self.is_playing() {
            self.resumed_at = Some(now);
        }
    }

    pub fn seek_to_frame(&mut self, now: Instant, frame: usize) {
        let period = self.frame_period();
        if period <= 0.0 {
            return;
        }
        let frame = frame.min(self.frame_count - 1);
        // Mid-frame timestamp so float noise cannot flip the index.
        self.seek(now, (frame as f64 + 0.5) * period);
    }

    pub fn seek_to_progress(&mut self, now: Instant, progress: f64) {
        self.seek(now, progress.clamp(0.0, 1.0) * self.duration);
    }

    /// Pause and move `n` frames (negative steps back), clamped to the
    /// timeline ends.
    pub fn step(&mut self, now: Instant, n: i64) {
        self.pause(now);
        let period = self.frame_period();
        if period <= 0.0 {
            return;
        }
        let current = ((self.position / period).floor() as i64).min(self.frame_count as i64 - 1);
        let target = (current + n).clamp(0, self.frame_count as i64 - 1) as usize;
        self.seek_to_frame(now, target);
    }

    pub fn set_rate(&mut self, now: Instant, rate: f64) {
        // Re-anchor so the rate change applies from this instant only.
        if self.is_playing() {
            self.position = self.current_time(now);
            self.resumed_at = Some(now);
        }
        self.rate = rate.clamp(RATE_MIN, RATE_MAX);
    }

    /// Clamp at a finite end of the timeline.
    pub fn mark_ended(&mut self, end_time: f64) {
        self.position = end_time.clamp(0.0, self.duration.max(end_time));
        self.status = PlaybackStatus::Ended;
        self.resumed_at = None;
        tracing::debug!(target: "state.playback", position = self.position, "ended");
    }

    fn frame_period(&self) -> f64 {
        if self.frame_count == 0 {
            0.0
        } else {
            self.duration / self.frame_count as f64
        }
    }
}
