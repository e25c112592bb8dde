//! Discrete animation timing math.
//!
//! These functions are the single source of truth for the time -> frame
//! mapping. Every consumer (frontend tick, render thread, pre-buffer
//! workers) calls into this module with the same inputs so the paths stay
//! bit-identical; nothing may re-derive the formulas locally.
//!
//! Invariants:
//! * `frame_index(..) < frame_count` for every `t >= 0`.
//! * `local_time` output lies in `[0, duration]`.
//! * A pre-buffered frame scheduled at `(i / N) * D` evaluates back to
//!   frame `i` for every repeat mode, because `(i / N) * D < D`.

use crate::RepeatMode;

/// Fold absolute animation time `t` into the local `[0, duration]` window
/// according to the repeat mode. Negative inputs clamp to zero.
pub fn local_time(mode: RepeatMode, duration: f64, t: f64) -> f64 {
    debug_assert!(duration > 0.0, "duration invariant violated");
    let t = t.max(0.0);
    match mode {
        RepeatMode::Once => t.min(duration),
        RepeatMode::Loop => t.rem_euclid(duration),
        RepeatMode::PingPong => {
            let cycle = 2.0 * duration;
            let u = t.rem_euclid(cycle);
            if u <= duration { u } else { cycle - u }
        }
        RepeatMode::Count(k) => {
            if t < f64::from(k) * duration {
                t.rem_euclid(duration)
            } else {
                duration
            }
        }
    }
}

/// Map absolute time `t` to a frame index in `[0, frame_count - 1]`.
pub fn frame_index(mode: RepeatMode, duration: f64, frame_count: usize, t: f64) -> usize {
    debug_assert!(frame_count >= 1, "frame count invariant violated");
    if frame_count <= 1 || duration <= 0.0 {
        return 0;
    }
    let local = local_time(mode, duration, t);
    let raw = ((local / duration) * frame_count as f64).floor();
    (raw as usize).min(frame_count - 1)
}

/// Frame timestamp used by pre-buffer workers: the exact instant frame `i`
/// becomes current in the first cycle.
pub fn frame_timestamp(frame: usize, frame_count: usize, duration: f64) -> f64 {
    if frame_count == 0 {
        return 0.0;
    }
    (frame as f64 / frame_count as f64) * duration
}

/// Wall-clock span of a single frame. Returns `0` for static documents.
pub fn frame_period(duration: f64, frame_count: usize) -> f64 {
    if frame_count == 0 { 0.0 } else { duration / frame_count as f64 }
}

/// Absolute time at which a finite mode stops advancing, `None` when the
/// mode repeats forever.
pub fn end_time(mode: RepeatMode, duration: f64) -> Option<f64> {
    match mode {
        RepeatMode::Once => Some(duration),
        RepeatMode::Count(k) => Some(f64::from(k) * duration),
        RepeatMode::Loop | RepeatMode::PingPong => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_four_values_one_second() {
        // values = 4, duration = 1.0, Loop: indices 0,1,2,3,0.
        let idx = |t| frame_index(RepeatMode::Loop, 1.0, 4, t);
        assert_eq!(idx(0.0), 0);
        assert_eq!(idx(0.25), 1);
        assert_eq!(idx(0.5), 2);
        assert_eq!(idx(0.75), 3);
        assert_eq!(idx(1.0), 0);
    }

    #[test]
    fn pingpong_three_values_one_second() {
        let idx = |t| frame_index(RepeatMode::PingPong, 1.0, 3, t);
        assert_eq!(idx(0.0), 0);
        assert_eq!(idx(0.5), 1);
        assert_eq!(idx(1.0), 2);
        assert_eq!(idx(1.5), 1);
        assert_eq!(idx(2.0), 0);
    }

    #[test]
    fn count_two_clamps_at_end() {
        let idx = |t| frame_index(RepeatMode::Count(2), 0.5, 2, t);
        assert_eq!(idx(0.0), 0);
        assert_eq!(idx(0.25), 1);
        assert_eq!(idx(0.5), 0);
        assert_eq!(idx(0.75), 1);
        assert_eq!(idx(1.0), 1);
        assert_eq!(idx(1.5), 1);
    }

    #[test]
    fn once_clamps_to_last_frame() {
        let idx = |t| frame_index(RepeatMode::Once, 2.0, 8, t);
        assert_eq!(idx(0.0), 0);
        assert_eq!(idx(1.99), 7);
        assert_eq!(idx(2.0), 7);
        assert_eq!(idx(100.0), 7);
    }

    #[test]
    fn negative_time_clamps_to_zero() {
        assert_eq!(frame_index(RepeatMode::Loop, 1.0, 4, -3.5), 0);
        assert_eq!(local_time(RepeatMode::Once, 1.0, -0.1), 0.0);
    }

    #[test]
    fn single_frame_always_zero() {
        for t in [0.0, 0.3, 7.0, 1e6] {
            assert_eq!(frame_index(RepeatMode::Loop, 1.0, 1, t), 0);
        }
    }

    #[test]
    fn frame_timestamp_round_trips_through_index() {
        // Cross-path determinism: a worker scheduled for frame i evaluates
        // back to frame i under every repeat mode.
        for mode in [
            RepeatMode::Once,
            RepeatMode::Loop,
            RepeatMode::PingPong,
            RepeatMode::Count(3),
        ] {
            for n in [1usize, 2, 3, 4, 12, 60] {
                for i in 0..n {
                    let ts = frame_timestamp(i, n, 2.5);
                    assert_eq!(frame_index(mode, 2.5, n, ts), i, "mode={mode:?} n={n} i={i}");
                }
            }
        }
    }

    #[test]
    fn end_time_finite_modes_only() {
        assert_eq!(end_time(RepeatMode::Once, 1.5), Some(1.5));
        assert_eq!(end_time(RepeatMode::Count(4), 0.5), Some(2.0));
        assert_eq!(end_time(RepeatMode::Loop, 1.0), None);
        assert_eq!(end_time(RepeatMode::PingPong, 1.0), None);
    }
}
