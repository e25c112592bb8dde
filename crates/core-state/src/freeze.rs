//! Freeze watchdog: detects a pipeline that stopped advancing.
//!
//! The frontend reports the observed frame index every iteration while
//! playback is running on a multi-frame document. No index movement for
//! the soft threshold produces one warning; the hard threshold is a
//! fatal verdict the frontend turns into a diagnostic exit.

use std::time::{Duration, Instant};

pub const FREEZE_WARN_THRESHOLD: Duration = Duration::from_secs(3);
pub const FREEZE_FATAL_THRESHOLD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeVerdict {
    Healthy,
    /// Soft threshold crossed; reported once per stall.
    Warned { stalled_for: Duration },
    Fatal { stalled_for: Duration },
}

#[derive(Debug, Default)]
pub struct FreezeWatchdog {
    last_index: Option<usize>,
    unchanged_since: Option<Instant>,
    warned: bool,
}

impl FreezeWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear stall tracking (pause, seek, reload).
    pub fn reset(&mut self) {
        self.last_index = None;
        self.unchanged_since = None;
        self.warned = false;
    }

    pub fn observe(&mut self, index: usize, now: Instant) -> FreezeVerdict {
        if self.last_index != Some(index) {
            self.last_index = Some(index);
            self.unchanged_since = Some(now);
            self.warned = false;
            return FreezeVerdict::Healthy;
        }
        let since = *self.unchanged_since.get_or_insert(now);
        let stalled_for = now.duration_since(since);
        if stalled_for >= FREEZE_FATAL_THRESHOLD {
            return FreezeVerdict::Fatal { stalled_for };
        }
        if stalled_for >= FREEZE_WARN_THRESHOLD && !self.warned {
            self.warned = true;
            return FreezeVerdict::Warned { stalled_for };
        }
        FreezeVerdict::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_index_stays_healthy() {
        let mut w = FreezeWatchdog::new();
        let t0 = Instant::now();
        for i in 0..100 {
            let verdict = w.observe(i % 4, t0 + Duration::from_millis(i as u64 * 100));
            assert_eq!(verdict, FreezeVerdict::Healthy);
        }
    }

    #[test]
    fn stall_warns_once_then_goes_fatal() {
        let mut w = FreezeWatchdog::new();
        let t0 = Instant::now();
        assert_eq!(w.observe(2, t0), FreezeVerdict::Healthy);
        assert_eq!(w.observe(2, t0 + Duration::from_secs(1)), FreezeVerdict::Healthy);
        assert!(matches!(
            w.observe(2, t0 + Duration::from_secs(4)),
            FreezeVerdict::Warned { .. }
        ));
        // The warning does not repeat.
        assert_eq!(
            w.observe(2, t0 + Duration::from_secs(5)),
            FreezeVerdict::Healthy
        );
        assert!(matches!(
            w.observe(2, t0 + Duration::from_secs(11)),
            FreezeVerdict::Fatal { .. }
        ));
    }

    #[test]
    fn reset_clears_stall() {
        let mut w = FreezeWatchdog::new();
        let t0 = Instant::now();
        w.observe(1, t0);
        w.reset();
        assert_eq!(
            w.observe(1, t0 + Duration::from_secs(9)),
            FreezeVerdict::Healthy
        );
    }
}
