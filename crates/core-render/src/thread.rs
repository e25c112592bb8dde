//! Render thread: owns one document, one surface, one back buffer.
//!
//! The loop waits on a condition variable for a tick, a shutdown, or a
//! 100 ms timeout (shutdown poll). Per tick it either copies a ready
//! pre-buffered frame or renders directly: rebuild the document when the
//! source hash moved, apply animation state, decide full vs partial via
//! the dirty tracker, draw under the aspect-fit transform, and publish
//! through the double buffer.
//!
//! Ordering guarantees:
//! * Animation state for frame `i` is snapshotted under the same mutex
//!   that carries the request, so the renderer observes it before
//!   producing frame `i`.
//! * A frame becomes visible to the consumer only via the double-buffer
//!   publish, after its pixels are fully written.
//!
//! Failure semantics: a draw exceeding the watchdog budget is discarded
//! (no publish) and counted; document build time is excluded from that
//! budget. Surface allocation failures drop the frame and retry next
//! tick with the document retained. Invalid parameters skip the tick.

use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasher, Hasher};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use core_anim::{FrameChange, TargetState};
use core_prebuffer::{BufferMode, PreBufferScheduler};
use core_svg::{CLEAR_BLACK_BGRA, Canvas, FitTransform, RasterBackend, RectF, SvgDocument, SvgNode};

use crate::buffer::DoubleBuffer;
use crate::dirty::DirtyRegionTracker;
use crate::metrics::RenderMetrics;

/// Watchdog budget for one draw, excluding document build.
pub const RENDER_TIMEOUT_MS: u64 = 500;
/// Upper bound per render-target axis.
pub const MAX_RENDER_DIM: u32 = 16384;
const WAKE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct RenderThreadOptions {
    pub render_timeout: Duration,
    pub max_dim: u32,
}

impl Default for RenderThreadOptions {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_millis(RENDER_TIMEOUT_MS),
            max_dim: MAX_RENDER_DIM,
        }
    }
}

/// Parameter snapshot for one tick, built by the frontend.
#[derive(Debug, Clone)]
pub struct RenderTick {
    pub source: Arc<str>,
    pub render_width: u32,
    pub render_height: u32,
    pub svg_width: f32,
    pub svg_height: f32,
    /// Document-level frame index (pre-buffer key).
    pub frame_index: usize,
    /// Canonical frame count, for scheduling ahead.
    pub frame_count: usize,
    pub states: Vec<TargetState>,
    pub changes: Vec<FrameChange>,
    /// Animation target ids and their bounds, re-seeded on document
    /// change.
    pub target_ids: Arc<HashSet<String>>,
    pub bounds: Arc<HashMap<String, RectF>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Rendering,
    ShuttingDown,
}

#[derive(Default)]
struct Pending {
    tick: Option<RenderTick>,
    shutdown: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    wakeup: Condvar,
}

/// Handle owned by the frontend.
pub struct RenderThread {
    shared: Arc<Shared>,
    buffers: Arc<DoubleBuffer>,
    metrics: Arc<RenderMetrics>,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    pub fn spawn<B: RasterBackend>(
        backend: Arc<B>,
        scheduler: Arc<PreBufferScheduler<B>>,
        options: RenderThreadOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            wakeup: Condvar::new(),
        });
        let buffers = Arc::new(DoubleBuffer::new());
        let metrics = Arc::new(RenderMetrics::default());

        let thread_shared = shared.clone();
        let thread_buffers = buffers.clone();
        let thread_metrics = metrics.clone();
        let handle = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                let mut renderer = Renderer {
                    backend,
                    scheduler,
                    options,
                    buffers: thread_buffers,
                    metrics: thread_metrics,
                    document: None,
                    canvas: None,
                    tracker: DirtyRegionTracker::default(),
                    source_hash: 0,
                    last_index: None,
                    surface_stale: false,
                    scratch: Vec::new(),
                };
                run_loop(&thread_shared, &mut renderer);
            })
            .expect("spawn render thread");

        Self {
            shared,
            buffers,
            metrics,
            handle: Some(handle),
        }
    }

    /// Replace the pending tick (latest parameters win) and wake the
    /// thread. Never blocks on rendering. Frame changes of an
    /// unconsumed tick are folded into the new one so damage reported
    /// between two consumed ticks is never dropped.
    pub fn submit(&self, tick: RenderTick) {
        let mut pending = self.shared.pending.lock().expect("render params poisoned");
        let tick = match pending.tick.take() {
            Some(stale) => coalesce(stale, tick),
            None => tick,
        };
        pending.tick = Some(tick);
        self.shared.wakeup.notify_one();
    }

    pub fn buffers(&self) -> Arc<DoubleBuffer> {
        self.buffers.clone()
    }

    pub fn metrics(&self) -> Arc<RenderMetrics> {
        self.metrics.clone()
    }

    pub fn shutdown(mut self) {
        self.signal_shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal_shutdown(&self) {
        let mut pending = self.shared.pending.lock().expect("render params poisoned");
        pending.shutdown = true;
        self.shared.wakeup.notify_one();
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.signal_shutdown();
            let _ = handle.join();
        }
    }
}

/// Fold the change list of a superseded tick into its replacement.
fn coalesce(stale: RenderTick, mut tick: RenderTick) -> RenderTick {
    if !stale.changes.is_empty() {
        let mut changes = stale.changes;
        changes.extend(tick.changes);
        tick.changes = changes;
    }
    tick
}

fn run_loop<B: RasterBackend>(shared: &Shared, renderer: &mut Renderer<B>) {
    let mut state = LoopState::Idle;
    tracing::debug!(target: "render.thread", "render_thread_started");
    loop {
        let tick = {
            let mut pending = shared.pending.lock().expect("render params poisoned");
            loop {
                if pending.shutdown {
                    state = LoopState::ShuttingDown;
                    break None;
                }
                if let Some(tick) = pending.tick.take() {
                    break Some(tick);
                }
                let (guard, _timeout) = shared
                    .wakeup
                    .wait_timeout(pending, WAKE_INTERVAL)
                    .expect("render params poisoned");
                pending = guard;
            }
        };
        let Some(tick) = tick else {
            break;
        };
        state = LoopState::Rendering;
        tracing::trace!(target: "render.thread", ?state, frame = tick.frame_index, "tick_begin");
        renderer.render_tick(tick);
        state = LoopState::Idle;
        tracing::trace!(target: "render.thread", ?state, "tick_end");
    }
    tracing::debug!(target: "render.thread", ?state, "render_thread_stopped");
}

struct Renderer<B: RasterBackend> {
    backend: Arc<B>,
    scheduler: Arc<PreBufferScheduler<B>>,
    options: RenderThreadOptions,
    buffers: Arc<DoubleBuffer>,
    metrics: Arc<RenderMetrics>,
    document: Option<B::Document>,
    canvas: Option<B::Canvas>,
    tracker: DirtyRegionTracker,
    source_hash: u64,
    last_index: Option<usize>,
    /// Set while pre-buffered frames are being served: the thread's own
    /// surface no longer matches the front buffer, so the next direct
    /// render may not reuse it partially.
    surface_stale: bool,
    scratch: Vec<u8>,
}

fn hash_source(source: &str) -> u64 {
    // Fixed seeds keep the hash stable across the process.
    let mut hasher = ahash::RandomState::with_seeds(7, 11, 13, 17).build_hasher();
    hasher.write(source.as_bytes());
    hasher.finish()
}

impl<B: RasterBackend> Renderer<B> {
    fn render_tick(&mut self, tick: RenderTick) {
        let (w, h) = (tick.render_width, tick.render_height);
        if w == 0 || h == 0 || w > self.options.max_dim || h > self.options.max_dim {
            tracing::debug!(target: "render.thread", w, h, "tick_skipped_bad_dims");
            self.metrics.tick_skipped();
            return;
        }
        if tick.source.is_empty() {
            self.metrics.tick_skipped();
            return;
        }

        // Pre-buffer fast path: a worker already produced these pixels.
        if let Some(pixels) = self.scheduler.get_frame(tick.frame_index)
            && pixels.len() == (w as usize) * (h as usize) * 4
        {
            self.buffers.publish(w, h, &pixels);
            self.metrics.prebuffer_copy();
            self.metrics.frame_rendered();
            self.last_index = Some(tick.frame_index);
            self.surface_stale = true;
            self.schedule_ahead(&tick);
            return;
        }

        if !self.direct_render(&tick) {
            return;
        }
        self.schedule_ahead(&tick);
    }

    fn direct_render(&mut self, tick: &RenderTick) -> bool {
        let (w, h) = (tick.render_width, tick.render_height);

        // Document rebuild on first tick or source change. Build time is
        // excluded from the watchdog budget.
        let incoming_hash = hash_source(&tick.source);
        let mut rebuilt = false;
        if self.document.is_none() || incoming_hash != self.source_hash {
            let build_started = Instant::now();
            match self.backend.parse(&tick.source) {
                Ok(document) => {
                    self.document = Some(document);
                    self.source_hash = incoming_hash;
                    self.tracker = DirtyRegionTracker::new(
                        tick.target_ids.as_ref().clone(),
                        tick.bounds.as_ref().clone(),
                    );
                    self.last_index = None;
                    rebuilt = true;
                    self.metrics.document_rebuilt();
                    self.metrics
                        .record_build_ns(build_started.elapsed().as_nanos() as u64);
                }
                Err(err) => {
                    tracing::error!(target: "render.thread", %err, "document_parse_failed");
                    self.metrics.frame_dropped();
                    return false;
                }
            }
        }

        // Frame reuse: nothing changed since the last published frame.
        if !rebuilt
            && tick.changes.is_empty()
            && self.last_index == Some(tick.frame_index)
            && self
                .canvas
                .as_ref()
                .is_some_and(|c| c.width() == w && c.height() == h)
        {
            self.metrics.tick_skipped();
            return true;
        }

        if self
            .canvas
            .as_ref()
            .is_none_or(|c| c.width() != w || c.height() != h)
        {
            match self.backend.create_canvas(w, h) {
                Ok(canvas) => {
                    self.canvas = Some(canvas);
                    // A fresh surface holds no previous frame to patch.
                    rebuilt = true;
                }
                Err(err) => {
                    tracing::error!(target: "render.thread", %err, "surface_recreate_failed");
                    self.metrics.surface_failure();
                    self.metrics.frame_dropped();
                    return false;
                }
            }
        }

        let document = self.document.as_mut().expect("document ensured above");
        document.set_container_size(w, h);

        for state in &tick.states {
            match document.find_by_id(&state.target_id) {
                Some(mut node) => node.set_attribute(&state.attribute_name, &state.value),
                None => tracing::trace!(
                    target: "render.thread",
                    id = state.target_id.as_str(),
                    "animation_target_missing"
                ),
            }
        }
        let build_started = Instant::now();
        if let Err(err) = document.prepare() {
            tracing::error!(target: "render.thread", %err, "document_prepare_failed");
            self.metrics.frame_dropped();
            return false;
        }
        self.metrics
            .record_build_ns(build_started.elapsed().as_nanos() as u64);

        for change in &tick.changes {
            self.tracker.mark_dirty(&change.target_id, change.current_frame);
        }

        let fit = FitTransform::fit(w, h, tick.svg_width, tick.svg_height);
        let full = rebuilt
            || self.surface_stale
            || self.tracker.use_full_render(tick.svg_width, tick.svg_height);

        let canvas = self.canvas.as_mut().expect("canvas ensured above");
        let draw_started = Instant::now();
        canvas.save();
        if full {
            canvas.clear(CLEAR_BLACK_BGRA);
        } else {
            let clip = fit.to_render_rect(&self.tracker.union_rect(), w, h);
            canvas.clip_rect(clip);
            canvas.clear(CLEAR_BLACK_BGRA);
        }
        canvas.translate(fit.offset_x, fit.offset_y);
        canvas.scale(fit.scale, fit.scale);
        let drawn = document.render(canvas);
        canvas.restore();

        if let Err(err) = drawn {
            tracing::error!(target: "render.thread", %err, "document_render_failed");
            self.metrics.frame_dropped();
            return false;
        }

        let draw_time = draw_started.elapsed();
        self.metrics.record_render_ns(draw_time.as_nanos() as u64);
        if draw_time > self.options.render_timeout {
            // Watchdog: discard the overlong frame, keep the dirty set so
            // the stale regions repaint on the next tick.
            tracing::warn!(
                target: "render.thread",
                frame = tick.frame_index,
                draw_ms = draw_time.as_millis() as u64,
                "render_watchdog_dropped_frame"
            );
            self.metrics.render_timeout();
            self.metrics.frame_dropped();
            return false;
        }

        canvas.read_bgra(&mut self.scratch);
        self.buffers.publish(w, h, &self.scratch);
        self.metrics.frame_rendered();
        if full {
            self.metrics.direct_full();
        } else {
            self.metrics.direct_partial();
        }
        self.last_index = Some(tick.frame_index);
        self.surface_stale = false;
        self.tracker.clear();
        true
    }

    fn schedule_ahead(&self, tick: &RenderTick) {
        if self.scheduler.mode() == BufferMode::PreBuffer && tick.frame_count > 1 {
            self.scheduler
                .request_frames_ahead(tick.frame_index, tick.frame_count);
        }
    }
}
