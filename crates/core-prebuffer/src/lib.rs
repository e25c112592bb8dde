//! Pre-buffer scheduler: bounded worker pool plus an indexed frame-slot
//! cache rendered ahead of the consumer.
//!
//! Slot lifecycle: created empty by `request_frame`, populated by a
//! worker, read-only once `ready` flips, evicted when it falls behind
//! the consumer's lookahead window or the map hits capacity. The
//! consumer never waits: `get_frame` either copies a ready slot or
//! reports a miss and the caller renders directly.
//!
//! Invariants:
//! * A slot's timestamp is `(i / N) * D`; workers therefore produce
//!   pixels bit-identical to a direct render at that time.
//! * `cycle_mode` joins the whole pool before any cache is cleared; a
//!   worker can never observe a cache mid-teardown (it also checks the
//!   `mode_changing` flag before touching one).
//! * Map membership and parameter swaps happen under one mutex; workers
//!   validate the parameter revision before publishing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use core_anim::{Animation, timing};
use core_svg::RasterBackend;

mod metrics;
pub(crate) mod worker;

pub use metrics::{PreBufferMetrics, PreBufferMetricsSnapshot};

use worker::{Job, WorkerPool, WorkerShared};

/// Absolute cap on stored slots.
pub const MAX_BUFFER_SIZE: usize = 30;
/// How far ahead of the consumer frames are scheduled (and how far
/// behind it they survive).
pub const LOOKAHEAD_FRAMES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Off,
    PreBuffer,
}

#[derive(Debug, Clone, Copy)]
pub struct PreBufferConfig {
    pub max_slots: usize,
    pub lookahead: usize,
    pub workers: usize,
}

impl Default for PreBufferConfig {
    fn default() -> Self {
        Self {
            max_slots: MAX_BUFFER_SIZE,
            lookahead: LOOKAHEAD_FRAMES,
            workers: default_worker_count(),
        }
    }
}

/// Hardware parallelism minus one (the render thread), floor of one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Immutable parameters shared by all jobs of one configuration.
pub(crate) struct SharedParams {
    pub source: Arc<str>,
    pub width: u32,
    pub height: u32,
    pub animations: Arc<Vec<Animation>>,
    pub duration: f64,
    pub frame_count: usize,
    pub revision: u64,
}

/// One cached frame. `pixels` is row-major BGRA sized `width * height * 4`
/// once `ready` is set.
pub struct FrameSlot {
    pub frame_index: usize,
    pub elapsed_seconds: f64,
    pub(crate) ready: AtomicBool,
    pub(crate) pixels: Mutex<Vec<u8>>,
}

struct SchedulerState {
    slots: HashMap<usize, Arc<FrameSlot>>,
    params: Option<Arc<SharedParams>>,
    mode: BufferMode,
    next_revision: u64,
}

pub struct PreBufferScheduler<B: RasterBackend> {
    config: PreBufferConfig,
    state: Mutex<SchedulerState>,
    pool: Mutex<Option<WorkerPool>>,
    shared: Arc<WorkerShared<B>>,
    metrics: Arc<PreBufferMetrics>,
}

impl<B: RasterBackend> PreBufferScheduler<B> {
    pub fn new(backend: Arc<B>, config: PreBufferConfig) -> Self {
        let metrics = Arc::new(PreBufferMetrics::default());
        Self {
            config,
            state: Mutex::new(SchedulerState {
                slots: HashMap::new(),
                params: None,
                mode: BufferMode::Off,
                next_revision: 0,
            }),
            pool: Mutex::new(None),
            shared: Arc::new(WorkerShared::new(backend, metrics.clone())),
            metrics,
        }
    }

    pub fn metrics(&self) -> PreBufferMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn mode(&self) -> BufferMode {
        self.state.lock().expect("scheduler state poisoned").mode
    }

    /// Install a new parameter set. All cached frames are invalidated;
    /// in-flight jobs detect the revision bump and never publish.
    pub fn configure(
        &self,
        source: Arc<str>,
        width: u32,
        height: u32,
        animations: Arc<Vec<Animation>>,
        duration: f64,
        frame_count: usize,
    ) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        state.next_revision += 1;
        let revision = state.next_revision;
        self.shared.revision.store(revision, Ordering::Release);
        state.params = Some(Arc::new(SharedParams {
            source,
            width,
            height,
            animations,
            duration,
            frame_count,
            revision,
        }));
        let invalidated = state.slots.len();
        state.slots.clear();
        tracing::debug!(
            target: "prebuffer.scheduler",
            revision,
            invalidated,
            width,
            height,
            frame_count,
            "configured"
        );
    }

    /// Drop every slot; new dimensions apply to subsequent requests.
    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        let Some(params) = &state.params else {
            return;
        };
        let (source, animations, duration, frame_count) = (
            params.source.clone(),
            params.animations.clone(),
            params.duration,
            params.frame_count,
        );
        state.next_revision += 1;
        let revision = state.next_revision;
        self.shared.revision.store(revision, Ordering::Release);
        state.params = Some(Arc::new(SharedParams {
            source,
            width,
            height,
            animations,
            duration,
            frame_count,
            revision,
        }));
        state.slots.clear();
    }

    /// Schedule frame `i` if there is room and no slot exists. Silently
    /// drops the request at capacity; the consumer has a direct-render
    /// fallback.
    pub fn request_frame(&self, frame: usize) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        self.request_frame_locked(&mut state, frame);
    }

    fn request_frame_locked(&self, state: &mut SchedulerState, frame: usize) {
        if state.mode != BufferMode::PreBuffer {
            return;
        }
        let Some(params) = &state.params else {
            return;
        };
        if state.slots.contains_key(&frame) {
            return;
        }
        if state.slots.len() >= self.config.max_slots {
            self.metrics.incr_dropped();
            return;
        }
        let slot = Arc::new(FrameSlot {
            frame_index: frame,
            elapsed_seconds: timing::frame_timestamp(frame, params.frame_count, params.duration),
            ready: AtomicBool::new(false),
            pixels: Mutex::new(Vec::new()),
        });
        state.slots.insert(frame, slot.clone());
        self.metrics.incr_scheduled();
        let job = Job {
            slot,
            params: params.clone(),
        };
        if let Some(pool) = &*self.pool.lock().expect("pool handle poisoned") {
            pool.submit(job);
        }
    }

    /// Evict slots outside the lookahead window around `current`, then
    /// request the next `lookahead` frames modulo `n_total`.
    pub fn request_frames_ahead(&self, current: usize, n_total: usize) {
        if n_total == 0 {
            return;
        }
        let mut state = self.state.lock().expect("scheduler state poisoned");
        if state.mode != BufferMode::PreBuffer {
            return;
        }
        let lookahead = self.config.lookahead;
        let before = state.slots.len();
        state.slots.retain(|&i, _| {
            let ahead = (i + n_total - (current % n_total)) % n_total;
            ahead <= lookahead
        });
        let evicted = before - state.slots.len();
        if evicted > 0 {
            self.metrics.add_evicted(evicted as u64);
        }
        for d in 1..=lookahead.min(n_total.saturating_sub(1)) {
            self.request_frame_locked(&mut state, (current + d) % n_total);
        }
    }

    /// Copy of a ready slot's pixels, `None` otherwise. Never waits.
    pub fn get_frame(&self, frame: usize) -> Option<Vec<u8>> {
        let state = self.state.lock().expect("scheduler state poisoned");
        match state.slots.get(&frame) {
            Some(slot) if slot.ready.load(Ordering::Acquire) => {
                self.metrics.incr_hit();
                Some(slot.pixels.lock().expect("slot pixels poisoned").clone())
            }
            _ => {
                self.metrics.incr_miss();
                None
            }
        }
    }

    /// Toggle Off <-> PreBuffer. Transition order on teardown: raise
    /// `mode_changing`, drop the job queue, join every worker, clear the
    /// caches, lower the flag. Jobs queued just before the toggle either
    /// see the flag or are cut off by the closed queue.
    pub fn cycle_mode(&self) -> BufferMode {
        self.shared.mode_changing.store(true, Ordering::Release);
        let new_mode = {
            let mut state = self.state.lock().expect("scheduler state poisoned");
            state.mode = match state.mode {
                BufferMode::Off => BufferMode::PreBuffer,
                BufferMode::PreBuffer => BufferMode::Off,
            };
            state.slots.clear();
            state.mode
        };
        match new_mode {
            BufferMode::PreBuffer => {
                let mut pool = self.pool.lock().expect("pool handle poisoned");
                if pool.is_none() {
                    *pool = Some(WorkerPool::spawn(self.config.workers, self.shared.clone()));
                }
            }
            BufferMode::Off => {
                let pool = self.pool.lock().expect("pool handle poisoned").take();
                if let Some(pool) = pool {
                    pool.shutdown();
                }
                self.shared.clear_caches();
            }
        }
        self.shared.mode_changing.store(false, Ordering::Release);
        tracing::info!(target: "prebuffer.scheduler", ?new_mode, "mode_cycled");
        new_mode
    }

    /// Join workers and drop caches. Called once at process shutdown.
    pub fn shutdown(&self) {
        self.shared.mode_changing.store(true, Ordering::Release);
        {
            let mut state = self.state.lock().expect("scheduler state poisoned");
            state.mode = BufferMode::Off;
            state.slots.clear();
        }
        let pool = self.pool.lock().expect("pool handle poisoned").take();
        if let Some(pool) = pool {
            pool.shutdown();
        }
        self.shared.clear_caches();
        self.shared.mode_changing.store(false, Ordering::Release);
    }

    /// Number of live slots (diagnostics and tests).
    pub fn slot_count(&self) -> usize {
        self.state.lock().expect("scheduler state poisoned").slots.len()
    }
}

impl<B: RasterBackend> Drop for PreBufferScheduler<B> {
    fn drop(&mut self) {
        let pool = self.pool.lock().expect("pool handle poisoned").take();
        if let Some(pool) = pool {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_svg::testing::MockBackend;
    use core_anim::RepeatMode;
    use std::time::{Duration, Instant};

    const DOC: &str = r#"<svg width="10" height="10"><g id="stage"/></svg>"#;

    fn animations() -> Arc<Vec<Animation>> {
        Arc::new(vec![Animation {
            target_id: "stage".into(),
            attribute_name: "href".into(),
            values: (0..4).map(|i| format!("#f{i}")).collect(),
            duration: 1.0,
            repeat: RepeatMode::Loop,
        }])
    }

    fn scheduler(workers: usize, max_slots: usize) -> PreBufferScheduler<MockBackend> {
        PreBufferScheduler::new(
            Arc::new(MockBackend),
            PreBufferConfig {
                max_slots,
                lookahead: 2,
                workers,
            },
        )
    }

    fn wait_for_frame(s: &PreBufferScheduler<MockBackend>, frame: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(px) = s.get_frame(frame) {
                return px;
            }
            assert!(Instant::now() < deadline, "frame {frame} never became ready");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn off_mode_ignores_requests() {
        let s = scheduler(1, 8);
        s.configure(Arc::from(DOC), 4, 4, animations(), 1.0, 4);
        s.request_frame(1);
        assert_eq!(s.slot_count(), 0);
        assert!(s.get_frame(1).is_none());
    }

    #[test]
    fn request_then_get_round_trips() {
        let s = scheduler(2, 8);
        s.configure(Arc::from(DOC), 4, 4, animations(), 1.0, 4);
        assert_eq!(s.cycle_mode(), BufferMode::PreBuffer);
        s.request_frame(1);
        let px = wait_for_frame(&s, 1);
        assert_eq!(px.len(), 4 * 4 * 4);

        // Determinism: the same state rendered directly yields the same
        // pixels.
        use core_svg::{Canvas, RasterBackend, SvgDocument, SvgNode};
        let backend = MockBackend;
        let mut doc = backend.parse(DOC).unwrap();
        doc.find_by_id("stage").unwrap().set_attribute("href", "#f1");
        let mut canvas = backend.create_canvas(4, 4).unwrap();
        doc.render(&mut canvas).unwrap();
        let mut direct = Vec::new();
        canvas.read_bgra(&mut direct);
        assert_eq!(px, direct);
        s.shutdown();
    }

    #[test]
    fn capacity_overflow_drops_silently() {
        let s = scheduler(1, 2);
        s.configure(Arc::from(DOC), 2, 2, animations(), 1.0, 4);
        s.cycle_mode();
        s.request_frame(0);
        s.request_frame(1);
        s.request_frame(2);
        assert_eq!(s.slot_count(), 2);
        assert!(s.metrics().dropped_requests >= 1);
        s.shutdown();
    }

    #[test]
    fn frames_ahead_schedules_window_and_evicts() {
        let s = scheduler(1, 30);
        s.configure(Arc::from(DOC), 2, 2, animations(), 1.0, 12);
        s.cycle_mode();
        // Stale slot far behind the consumer.
        s.request_frame(0);
        s.request_frames_ahead(6, 12);
        let state = s.state.lock().unwrap();
        assert!(!state.slots.contains_key(&0), "behind-window slot evicted");
        assert!(state.slots.contains_key(&7));
        assert!(state.slots.contains_key(&8));
        drop(state);
        s.shutdown();
    }

    #[test]
    fn frames_ahead_wraps_modulo() {
        let s = scheduler(1, 30);
        s.configure(Arc::from(DOC), 2, 2, animations(), 1.0, 4);
        s.cycle_mode();
        s.request_frames_ahead(3, 4);
        let state = s.state.lock().unwrap();
        assert!(state.slots.contains_key(&0), "wraps to frame 0");
        drop(state);
        s.shutdown();
    }

    #[test]
    fn resize_drops_all_slots() {
        let s = scheduler(1, 8);
        s.configure(Arc::from(DOC), 4, 4, animations(), 1.0, 4);
        s.cycle_mode();
        s.request_frame(1);
        wait_for_frame(&s, 1);
        s.resize(8, 8);
        assert_eq!(s.slot_count(), 0);
        assert!(s.get_frame(1).is_none());
        s.request_frame(1);
        let px = wait_for_frame(&s, 1);
        assert_eq!(px.len(), 8 * 8 * 4, "new dimensions take effect");
        s.shutdown();
    }

    #[test]
    fn configure_invalidates_cached_frames() {
        let s = scheduler(1, 8);
        s.configure(Arc::from(DOC), 4, 4, animations(), 1.0, 4);
        s.cycle_mode();
        s.request_frame(2);
        wait_for_frame(&s, 2);
        s.configure(Arc::from(DOC), 4, 4, animations(), 2.0, 4);
        assert!(s.get_frame(2).is_none(), "configure dropped the slot");
        s.shutdown();
    }

    #[test]
    fn cycle_mode_twice_survives_inflight_work() {
        let s = scheduler(3, 30);
        s.configure(Arc::from(DOC), 16, 16, animations(), 1.0, 4);
        s.cycle_mode();
        for i in 0..4 {
            s.request_frame(i);
        }
        // Toggle off while jobs may be in flight: join-then-clear must
        // not race the workers.
        assert_eq!(s.cycle_mode(), BufferMode::Off);
        assert_eq!(s.slot_count(), 0);
        assert_eq!(s.cycle_mode(), BufferMode::PreBuffer);
        s.request_frame(1);
        wait_for_frame(&s, 1);
        s.shutdown();
    }

    #[test]
    fn slot_timestamp_matches_canonical_formula() {
        let s = scheduler(1, 8);
        s.configure(Arc::from(DOC), 2, 2, animations(), 2.0, 4);
        s.cycle_mode();
        s.request_frame(3);
        let state = s.state.lock().unwrap();
        let slot = state.slots.get(&3).unwrap();
        assert_eq!(slot.elapsed_seconds, (3.0 / 4.0) * 2.0);
        drop(state);
        s.shutdown();
    }
}
