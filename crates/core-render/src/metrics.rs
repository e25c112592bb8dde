//! Render path counters and timing.
//!
//! Volume: `frames_rendered`, split into pre-buffer copies and direct
//! full/partial paths. Failure funnel: `frames_dropped` with its causes
//! (`render_timeouts`, `surface_failures`). `skipped_ticks` counts the
//! frame-reuse optimization (no change between ticks). Point-sample
//! timing only; moving averages are the readout's job.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

#[derive(Debug, Default)]
pub struct RenderMetrics {
    frames_rendered: AtomicU64,
    prebuffer_copies: AtomicU64,
    direct_full: AtomicU64,
    direct_partial: AtomicU64,
    frames_dropped: AtomicU64,
    render_timeouts: AtomicU64,
    surface_failures: AtomicU64,
    skipped_ticks: AtomicU64,
    document_rebuilds: AtomicU64,
    last_render_ns: AtomicU64,
    last_build_ns: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderMetricsSnapshot {
    pub frames_rendered: u64,
    pub prebuffer_copies: u64,
    pub direct_full: u64,
    pub direct_partial: u64,
    pub frames_dropped: u64,
    pub render_timeouts: u64,
    pub surface_failures: u64,
    pub skipped_ticks: u64,
    pub document_rebuilds: u64,
    pub last_render_ns: u64,
    pub last_build_ns: u64,
}

impl RenderMetrics {
    pub fn snapshot(&self) -> RenderMetricsSnapshot {
        RenderMetricsSnapshot {
            frames_rendered: self.frames_rendered.load(Relaxed),
            prebuffer_copies: self.prebuffer_copies.load(Relaxed),
            direct_full: self.direct_full.load(Relaxed),
            direct_partial: self.direct_partial.load(Relaxed),
            frames_dropped: self.frames_dropped.load(Relaxed),
            render_timeouts: self.render_timeouts.load(Relaxed),
            surface_failures: self.surface_failures.load(Relaxed),
            skipped_ticks: self.skipped_ticks.load(Relaxed),
            document_rebuilds: self.document_rebuilds.load(Relaxed),
            last_render_ns: self.last_render_ns.load(Relaxed),
            last_build_ns: self.last_build_ns.load(Relaxed),
        }
    }

    pub(crate) fn frame_rendered(&self) {
        self.frames_rendered.fetch_add(1, Relaxed);
    }
    pub(crate) fn prebuffer_copy(&self) {
        self.prebuffer_copies.fetch_add(1, Relaxed);
    }
    pub(crate) fn direct_full(&self) {
        self.direct_full.fetch_add(1, Relaxed);
    }
    pub(crate) fn direct_partial(&self) {
        self.direct_partial.fetch_add(1, Relaxed);
    }
    pub(crate) fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Relaxed);
    }
    pub(crate) fn render_timeout(&self) {
        self.render_timeouts.fetch_add(1, Relaxed);
    }
    pub(crate) fn surface_failure(&self) {
        self.surface_failures.fetch_add(1, Relaxed);
    }
    pub(crate) fn tick_skipped(&self) {
        self.skipped_ticks.fetch_add(1, Relaxed);
    }
    pub(crate) fn document_rebuilt(&self) {
        self.document_rebuilds.fetch_add(1, Relaxed);
    }
    pub(crate) fn record_render_ns(&self, ns: u64) {
        self.last_render_ns.store(ns, Relaxed);
    }
    pub(crate) fn record_build_ns(&self, ns: u64) {
        self.last_build_ns.store(ns, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let m = RenderMetrics::default();
        m.frame_rendered();
        m.frame_rendered();
        m.render_timeout();
        m.record_render_ns(42);
        let s = m.snapshot();
        assert_eq!(s.frames_rendered, 2);
        assert_eq!(s.render_timeouts, 1);
        assert_eq!(s.last_render_ns, 42);
    }
}
