//! Worker pool and per-worker caches.
//!
//! Each worker owns (through its thread-keyed cache) one parsed document
//! and one pixel surface. Cache entries live in a map keyed by thread
//! identity; a worker locks its own entry for the full duration of a job
//! so a mode change can never tear a cache down underneath it. Teardown
//! order on shutdown: drop the job channel, join every worker, then
//! clear the map. The join is the happens-before edge that makes the
//! clear safe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use core_anim::timing;
use core_svg::{Canvas, FitTransform, RasterBackend, SvgDocument, SvgNode, CLEAR_BLACK_BGRA};

use crate::metrics::PreBufferMetrics;
use crate::{FrameSlot, SharedParams};

pub(crate) struct Job {
    pub slot: Arc<FrameSlot>,
    pub params: Arc<SharedParams>,
}

pub(crate) struct WorkerCache<B: RasterBackend> {
    source: Option<Arc<str>>,
    document: Option<B::Document>,
    canvas: Option<B::Canvas>,
    canvas_size: (u32, u32),
}

impl<B: RasterBackend> Default for WorkerCache<B> {
    fn default() -> Self {
        Self {
            source: None,
            document: None,
            canvas: None,
            canvas_size: (0, 0),
        }
    }
}

/// State shared between the scheduler handle and every worker.
pub(crate) struct WorkerShared<B: RasterBackend> {
    pub backend: Arc<B>,
    pub caches: Mutex<HashMap<ThreadId, Arc<Mutex<WorkerCache<B>>>>>,
    /// Raised for the whole duration of a mode transition; workers check
    /// it before touching any cache.
    pub mode_changing: AtomicBool,
    /// Current parameter revision; jobs carrying an older one are stale.
    pub revision: AtomicU64,
    pub metrics: Arc<PreBufferMetrics>,
}

impl<B: RasterBackend> WorkerShared<B> {
    pub fn new(backend: Arc<B>, metrics: Arc<PreBufferMetrics>) -> Self {
        Self {
            backend,
            caches: Mutex::new(HashMap::new()),
            mode_changing: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            metrics,
        }
    }

    /// Drop every per-worker cache. Callers must have joined the pool
    /// first; this is asserted by the scheduler's shutdown order, not
    /// re-checked here.
    pub fn clear_caches(&self) {
        let mut caches = self.caches.lock().expect("cache map poisoned");
        let dropped = caches.len();
        caches.clear();
        tracing::debug!(target: "prebuffer.cache", dropped, "worker_caches_cleared");
    }
}

pub(crate) struct WorkerPool {
    tx: Option<crossbeam_channel::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<B: RasterBackend>(workers: usize, shared: Arc<WorkerShared<B>>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("prebuffer-{i}"))
                .spawn(move || {
                    tracing::debug!(target: "prebuffer.pool", worker = i, "worker_started");
                    while let Ok(job) = rx.recv() {
                        run_job(&shared, job);
                    }
                    tracing::debug!(target: "prebuffer.pool", worker = i, "worker_stopped");
                })
                .expect("spawn prebuffer worker");
            handles.push(handle);
        }
        Self {
            tx: Some(tx),
            handles,
        }
    }

    pub fn submit(&self, job: Job) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(job);
        }
    }

    /// Close the queue and join every worker.
    pub fn shutdown(mut self) {
        self.tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_job<B: RasterBackend>(shared: &WorkerShared<B>, job: Job) {
    // A mode transition may have started after this job was queued; the
    // caches it would use are about to be destroyed.
    if shared.mode_changing.load(Ordering::Acquire) {
        shared.metrics.incr_stale();
        return;
    }
    if job.params.revision != shared.revision.load(Ordering::Acquire) {
        shared.metrics.incr_stale();
        return;
    }

    let cache_handle = {
        let mut caches = shared.caches.lock().expect("cache map poisoned");
        caches
            .entry(thread::current().id())
            .or_insert_with(|| Arc::new(Mutex::new(WorkerCache::default())))
            .clone()
    };
    // Held for the whole job: mode transitions cannot free this entry
    // while the render is in flight.
    let mut cache = cache_handle.lock().expect("worker cache poisoned");

    if let Err(err) = render_into_slot(shared, &mut cache, &job) {
        shared.metrics.incr_error();
        tracing::warn!(
            target: "prebuffer.worker",
            frame = job.slot.frame_index,
            %err,
            "prebuffer_render_failed"
        );
    }
}

fn render_into_slot<B: RasterBackend>(
    shared: &WorkerShared<B>,
    cache: &mut WorkerCache<B>,
    job: &Job,
) -> Result<(), core_svg::DocumentError> {
    let params = &job.params;

    let fresh_source = match &cache.source {
        Some(s) => Arc::ptr_eq(s, &params.source) || **s == *params.source,
        None => false,
    };
    if !fresh_source || cache.document.is_none() {
        cache.document = Some(shared.backend.parse(&params.source)?);
        cache.source = Some(params.source.clone());
    }
    if cache.canvas.is_none() || cache.canvas_size != (params.width, params.height) {
        cache.canvas = Some(shared.backend.create_canvas(params.width, params.height)?);
        cache.canvas_size = (params.width, params.height);
    }
    let document = cache.document.as_mut().expect("document just ensured");
    document.set_container_size(params.width, params.height);

    // The slot timestamp lies inside the first cycle, where every repeat
    // mode agrees, so workers apply exactly what the direct renderer
    // would apply at this time.
    let t = job.slot.elapsed_seconds;
    for anim in params.animations.iter() {
        let frame = timing::frame_index(anim.repeat, anim.duration, anim.values.len(), t);
        if let Some(mut node) = document.find_by_id(&anim.target_id) {
            node.set_attribute(&anim.attribute_name, &anim.values[frame]);
        }
    }
    document.prepare()?;

    let canvas = cache.canvas.as_mut().expect("canvas just ensured");
    let (svg_w, svg_h) = document.intrinsic_size();
    let fit = FitTransform::fit(params.width, params.height, svg_w, svg_h);
    canvas.save();
    canvas.clear(CLEAR_BLACK_BGRA);
    canvas.translate(fit.offset_x, fit.offset_y);
    canvas.scale(fit.scale, fit.scale);
    let rendered = document.render(canvas);
    canvas.restore();
    rendered?;

    {
        let mut pixels = job.slot.pixels.lock().expect("slot pixels poisoned");
        canvas.read_bgra(&mut pixels);
    }

    // Publish only if the parameters are still current; configure/resize
    // already dropped the slot from the map otherwise.
    if job.params.revision == shared.revision.load(Ordering::Acquire) {
        job.slot.ready.store(true, Ordering::Release);
        shared.metrics.incr_rendered();
    } else {
        shared.metrics.incr_stale();
    }
    Ok(())
}
