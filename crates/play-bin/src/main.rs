//! svgplay entrypoint: startup plumbing and the frontend loop.
//!
//! The host thread owns the clock, the event channel, the playback
//! state machine, and the presenter. Per iteration it drains events,
//! derives animation time, hands the parameter snapshot to the render
//! thread (never blocking on it), consumes a ready frame from the
//! double buffer, and services the watchdogs and the readout.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Once;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossterm::tty::IsTty;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use core_anim::{AnimationController, RepeatMode, timing};
use core_config::{PlayerOptions, WindowMode, load_from};
use core_events::{ControlCommand, Event, KeyIntent, send_event};
use core_input::{KeyInputHandle, RemoteServer, spawn_key_thread};
use core_prebuffer::{BufferMode, PreBufferConfig, PreBufferScheduler};
use core_render::buffer::DoubleBuffer;
use core_render::present::{CapturePresenter, Presenter};
use core_render::screenshot::write_ppm;
use core_render::thread::{MAX_RENDER_DIM, RenderThread, RenderThreadOptions, RenderTick};
use core_state::{
    Clock, FreezeVerdict, FreezeWatchdog, PlaybackState, RATE_MAX, RATE_MIN, SystemClock,
};
use core_svg::bounds::extract_geometry;
use core_svg::{RectF, ResvgBackend};

const READOUT_INTERVAL: Duration = Duration::from_millis(500);
const IDLE_SLEEP: Duration = Duration::from_millis(3);
const MAX_SOURCE_BYTES: u64 = 64 * 1024 * 1024;
/// Multiplicative stride for the +/- rate keys.
const RATE_NUDGE: f64 = 1.25;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "svgplay", version, about = "Realtime SMIL frame-by-frame SVG player")]
struct Args {
    /// SVG document to play.
    pub path: PathBuf,
    /// Configuration file path (overrides discovery of `svgplay.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Initial window mode hints, forwarded to the presenter.
    #[arg(long, conflicts_with_all = ["fullscreen", "maximize"])]
    pub windowed: bool,
    #[arg(long, conflicts_with = "maximize")]
    pub fullscreen: bool,
    #[arg(long)]
    pub maximize: bool,
    /// Initial window position `X,Y`.
    #[arg(long, value_name = "X,Y")]
    pub pos: Option<String>,
    /// Render target size `WxH`.
    #[arg(long, value_name = "WxH")]
    pub size: Option<String>,
    /// Drive frame indices from a monotonic counter instead of the
    /// wall clock (benchmark mode).
    #[arg(long)]
    pub sequential: bool,
    /// Exit after this many seconds of playback.
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,
    /// Suppress stdout commentary; emit one JSON statistics record on
    /// exit.
    #[arg(long)]
    pub json: bool,
    /// Capture frame #1 to this PPM path.
    #[arg(long, value_name = "PATH")]
    pub screenshot: Option<PathBuf>,
    /// Enable the remote-control socket (default port 7878).
    #[arg(
        long = "remote-control",
        value_name = "PORT",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "7878"
    )]
    pub remote_control: Option<u16>,
    /// Initial playback rate.
    #[arg(long)]
    pub rate: Option<f64>,
    /// Repeat override: once | loop | pingpong | count:<k>.
    #[arg(long)]
    pub repeat: Option<String>,
    /// Disable the pre-buffer scheduler.
    #[arg(long = "no-prebuffer")]
    pub no_prebuffer: bool,
}

fn parse_pair<T: std::str::FromStr>(raw: &str, sep: char) -> Option<(T, T)> {
    let (a, b) = raw.split_once(sep)?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

fn merge_cli(mut options: PlayerOptions, args: &Args) -> Result<PlayerOptions> {
    if args.fullscreen {
        options.window_mode = WindowMode::Fullscreen;
    } else if args.maximize {
        options.window_mode = WindowMode::Maximized;
    } else if args.windowed {
        options.window_mode = WindowMode::Windowed;
    }
    if let Some(raw) = &args.pos {
        options.position =
            Some(parse_pair(raw, ',').with_context(|| format!("invalid --pos `{raw}`"))?);
    }
    if let Some(raw) = &args.size {
        let (w, h): (u32, u32) =
            parse_pair(raw, 'x').with_context(|| format!("invalid --size `{raw}`"))?;
        if w == 0 || h == 0 || w > MAX_RENDER_DIM || h > MAX_RENDER_DIM {
            bail!("--size out of range: {w}x{h}");
        }
        options.size = (w, h);
    }
    if args.sequential {
        options.sequential = true;
    }
    if let Some(limit) = args.duration {
        options.duration_limit = Some(limit);
    }
    if args.json {
        options.json_stats = true;
    }
    if let Some(path) = &args.screenshot {
        options.screenshot = Some(path.clone());
    }
    if let Some(port) = args.remote_control {
        options.remote_port = Some(port);
    }
    if let Some(rate) = args.rate {
        if !(RATE_MIN..=RATE_MAX).contains(&rate) {
            bail!("--rate must lie in [{RATE_MIN}, {RATE_MAX}]");
        }
        options.rate = rate;
    }
    if let Some(raw) = &args.repeat {
        options.repeat =
            Some(raw.parse().with_context(|| format!("invalid --repeat `{raw}`"))?);
    }
    if args.no_prebuffer {
        options.prebuffer = false;
    }
    Ok(options)
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("svgplay.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }
        let file_appender = tracing_appender::rolling::never(log_dir, "svgplay.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global subscriber already installed; drop guard so the
                // writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Everything derived from one successfully loaded document.
struct LoadedDocument {
    path: PathBuf,
    canonical: Arc<str>,
    controller: AnimationController,
    svg_size: (f32, f32),
    target_ids: Arc<HashSet<String>>,
    bounds: Arc<HashMap<String, RectF>>,
}

fn load_document(path: &Path, backend: &ResvgBackend) -> Result<LoadedDocument> {
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.len() > MAX_SOURCE_BYTES {
        bail!(
            "{} is {} bytes, over the {} byte limit",
            path.display(),
            meta.len(),
            MAX_SOURCE_BYTES
        );
    }
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let loaded = AnimationController::load(&raw)
        .with_context(|| format!("parse {}", path.display()))?;
    let ids: Vec<&str> = loaded
        .controller
        .animations()
        .iter()
        .map(|a| a.target_id.as_str())
        .collect();
    let geometry = extract_geometry(&loaded.canonical_source, ids.iter().copied(), backend.fontdb())
        .with_context(|| format!("index bounds of {}", path.display()))?;
    let target_ids: HashSet<String> = ids.iter().map(|s| s.to_string()).collect();
    info!(
        target: "runtime.load",
        path = %path.display(),
        animations = loaded.controller.animations().len(),
        frames = loaded.controller.document_timing().frame_count,
        duration = loaded.controller.document_timing().duration,
        svg_w = geometry.width,
        svg_h = geometry.height,
        "document_loaded"
    );
    Ok(LoadedDocument {
        path: path.to_path_buf(),
        canonical: Arc::from(loaded.canonical_source.as_str()),
        controller: loaded.controller,
        svg_size: (geometry.width, geometry.height),
        target_ids: Arc::new(target_ids),
        bounds: Arc::new(geometry.bounds),
    })
}

/// Next repeat override for the cycle key: source modes -> loop ->
/// pingpong -> once -> back to source modes.
fn next_repeat(current: Option<RepeatMode>) -> Option<RepeatMode> {
    match current {
        None => Some(RepeatMode::Loop),
        Some(RepeatMode::Loop) => Some(RepeatMode::PingPong),
        Some(RepeatMode::PingPong) => Some(RepeatMode::Once),
        Some(RepeatMode::Once) | Some(RepeatMode::Count(_)) => None,
    }
}

#[derive(Debug, Default)]
struct SessionStats {
    presented: u64,
    load_failures: u64,
    screenshots: u64,
}

/// Restores cooked mode on exit when interactive keys enabled raw mode.
struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    fn enable() -> Self {
        let active = crossterm::terminal::enable_raw_mode().is_ok();
        Self { active }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

struct PlayerRuntime {
    options: PlayerOptions,
    clock: SystemClock,
    scheduler: Arc<PreBufferScheduler<ResvgBackend>>,
    render: RenderThread,
    buffers: Arc<DoubleBuffer>,
    presenter: CapturePresenter,
    playback: PlaybackState,
    document: LoadedDocument,
    backend: Arc<ResvgBackend>,
    freeze: FreezeWatchdog,
    stats: SessionStats,
    render_size: (u32, u32),
    prev_t: f64,
    seq_counter: u64,
    first_frame_screenshot: Option<PathBuf>,
    pending_screenshot: Option<PathBuf>,
    screenshot_serial: u64,
    last_readout: Instant,
    presented_at_readout: u64,
    quit: bool,
    exit_code: i32,
}

impl PlayerRuntime {
    fn configure_scheduler(&self) {
        let timing = self.document.controller.document_timing();
        self.scheduler.configure(
            self.document.canonical.clone(),
            self.render_size.0,
            self.render_size.1,
            Arc::new(self.document.controller.animations().to_vec()),
            timing.duration,
            timing.frame_count,
        );
    }

    fn run(mut self, rx: crossbeam_channel::Receiver<Event>) -> Result<i32> {
        self.configure_scheduler();
        if self.options.prebuffer && self.scheduler.mode() == BufferMode::Off {
            self.scheduler.cycle_mode();
        }
        let started = self.clock.now();

        while !self.quit {
            while let Ok(event) = rx.try_recv() {
                self.handle_event(event)?;
                if self.quit {
                    break;
                }
            }
            if self.quit {
                break;
            }

            let now = self.clock.now();
            let timing_info = self.document.controller.document_timing();
            let frame_count = timing_info.frame_count;

            if !self.options.sequential
                && self.playback.is_playing()
                && let Some(end) = self.document.controller.end_time()
                && end > 0.0
                && self.playback.current_time(now) >= end
            {
                self.playback.mark_ended(end);
                info!(target: "runtime.playback", end, "playback_ended");
            }

            let (t, frame_index) = if self.options.sequential {
                let frame = (self.seq_counter as usize) % frame_count.max(1);
                (
                    timing::frame_timestamp(frame, frame_count, timing_info.duration),
                    frame,
                )
            } else {
                let t = self.playback.current_time(now);
                (t, self.document.controller.document_frame_at(t))
            };

            self.render.submit(RenderTick {
                source: self.document.canonical.clone(),
                render_width: self.render_size.0,
                render_height: self.render_size.1,
                svg_width: self.document.svg_size.0,
                svg_height: self.document.svg_size.1,
                frame_index,
                frame_count,
                states: self.document.controller.target_states(t),
                changes: self.document.controller.frame_changes(self.prev_t, t),
                target_ids: self.document.target_ids.clone(),
                bounds: self.document.bounds.clone(),
            });
            self.prev_t = t;

            let presented = self.present_ready_frame()?;
            if presented && self.options.sequential {
                // Benchmark mode advances at the renderer's natural pace.
                self.seq_counter += 1;
            }
            self.service_screenshots()?;

            if !self.options.sequential && self.playback.is_playing() && frame_count > 1 {
                match self.freeze.observe(frame_index, now) {
                    FreezeVerdict::Healthy => {}
                    FreezeVerdict::Warned { stalled_for } => {
                        warn!(
                            target: "runtime.freeze",
                            stalled_ms = stalled_for.as_millis() as u64,
                            frame_index,
                            "frame_index_stalled"
                        );
                    }
                    FreezeVerdict::Fatal { stalled_for } => {
                        error!(
                            target: "runtime.freeze",
                            stalled_ms = stalled_for.as_millis() as u64,
                            frame_index,
                            "frame_index_frozen"
                        );
                        eprintln!(
                            "svgplay: frame index frozen at {frame_index} for {:.1} s; aborting",
                            stalled_for.as_secs_f64()
                        );
                        self.exit_code = 1;
                        self.quit = true;
                    }
                }
            }

            self.service_readout(now, frame_index, frame_count);

            if let Some(limit) = self.options.duration_limit
                && now.duration_since(started).as_secs_f64() >= limit
            {
                info!(target: "runtime", limit, "duration_limit_reached");
                self.quit = true;
            }

            if !presented {
                std::thread::sleep(IDLE_SLEEP);
            }
        }

        self.finish(started)
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Command(command) => self.apply_command(command)?,
            Event::Key(intent) => {
                if let Some(command) = self.resolve_key(intent) {
                    self.apply_command(command)?;
                }
            }
            Event::DocumentChanged(path) => {
                if path == self.document.path {
                    info!(target: "runtime.reload", path = %path.display(), "hot_reload");
                    self.reload(&path);
                }
            }
            Event::Shutdown => self.quit = true,
        }
        Ok(())
    }

    fn resolve_key(&mut self, intent: KeyIntent) -> Option<ControlCommand> {
        match intent {
            KeyIntent::Command(command) => Some(command),
            KeyIntent::RateUp => Some(ControlCommand::SetRate(
                (self.playback.rate() * RATE_NUDGE).clamp(RATE_MIN, RATE_MAX),
            )),
            KeyIntent::RateDown => Some(ControlCommand::SetRate(
                (self.playback.rate() / RATE_NUDGE).clamp(RATE_MIN, RATE_MAX),
            )),
            KeyIntent::CycleRepeat => {
                let next = next_repeat(self.document.controller.repeat_override());
                self.document.controller.set_repeat_override(next);
                info!(target: "runtime.playback", repeat = ?next, "repeat_cycled");
                None
            }
            KeyIntent::ScreenshotAuto => {
                self.screenshot_serial += 1;
                Some(ControlCommand::Screenshot(PathBuf::from(format!(
                    "svgplay-{:04}.ppm",
                    self.screenshot_serial
                ))))
            }
        }
    }

    fn apply_command(&mut self, command: ControlCommand) -> Result<()> {
        let now = self.clock.now();
        match command {
            ControlCommand::Play => {
                self.playback.play(now);
                self.freeze.reset();
            }
            ControlCommand::Pause => self.playback.pause(now),
            ControlCommand::Toggle => {
                self.playback.toggle(now);
                self.freeze.reset();
            }
            ControlCommand::Stop => self.playback.stop(),
            ControlCommand::Seek(t) => {
                self.playback.seek(now, t);
                self.freeze.reset();
            }
            ControlCommand::SeekToFrame(frame) => {
                self.playback.seek_to_frame(now, frame);
                self.freeze.reset();
            }
            ControlCommand::SeekToProgress(p) => {
                self.playback.seek_to_progress(now, p);
                self.freeze.reset();
            }
            ControlCommand::Step(n) => {
                if self.options.sequential {
                    self.seq_counter = self.seq_counter.saturating_add_signed(n);
                } else {
                    self.playback.step(now, n);
                }
            }
            ControlCommand::SetRate(rate) => self.playback.set_rate(now, rate),
            ControlCommand::SetRepeat(mode) => {
                self.document.controller.set_repeat_override(Some(mode));
            }
            ControlCommand::Resize(w, h) => {
                let w = w.clamp(1, MAX_RENDER_DIM);
                let h = h.clamp(1, MAX_RENDER_DIM);
                self.render_size = (w, h);
                self.scheduler.resize(w, h);
                info!(target: "runtime", w, h, "render_target_resized");
            }
            ControlCommand::Load(path) => self.reload(&path),
            ControlCommand::Reload => self.reload(&self.document.path.clone()),
            ControlCommand::CycleBufferMode => {
                let mode = self.scheduler.cycle_mode();
                info!(target: "runtime", ?mode, "buffer_mode_cycled");
            }
            ControlCommand::Screenshot(path) => self.pending_screenshot = Some(path),
            ControlCommand::Quit => self.quit = true,
        }
        Ok(())
    }

    /// Load or hot-reload a document. On failure the previous document
    /// keeps rendering.
    fn reload(&mut self, path: &Path) {
        match load_document(path, &self.backend) {
            Ok(mut document) => {
                document
                    .controller
                    .set_repeat_override(self.document.controller.repeat_override());
                self.document = document;
                let timing = self.document.controller.document_timing();
                self.playback
                    .set_timing(self.clock.now(), timing.duration, timing.frame_count);
                self.prev_t = 0.0;
                self.seq_counter = 0;
                self.freeze.reset();
                self.configure_scheduler();
            }
            Err(err) => {
                self.stats.load_failures += 1;
                error!(target: "runtime.load", %err, path = %path.display(), "load_failed");
                if !self.options.json_stats {
                    eprintln!("svgplay: load failed: {err:#}");
                }
            }
        }
    }

    fn present_ready_frame(&mut self) -> Result<bool> {
        let Some((width, height, pixels)) = self
            .buffers
            .consume_front(|f| (f.width, f.height, f.pixels.clone()))
        else {
            return Ok(false);
        };
        if width == 0 || height == 0 {
            return Ok(false);
        }
        let mut drawable = self.presenter.acquire_drawable(width, height)?;
        drawable.pixels.copy_from_slice(&pixels);
        // A commit rejection is an integrity violation (§ presenter
        // contract); it propagates as a fatal error.
        self.presenter
            .commit(drawable)
            .context("presenter rejected frame")?;
        self.stats.presented += 1;

        if self.stats.presented == 1
            && let Some(path) = self.first_frame_screenshot.take()
        {
            self.pending_screenshot = Some(path);
        }
        Ok(true)
    }

    fn service_screenshots(&mut self) -> Result<()> {
        let Some(path) = self.pending_screenshot.clone() else {
            return Ok(());
        };
        let Some(frame) = self.presenter.last_frame() else {
            return Ok(()); // nothing committed yet, retry next iteration
        };
        let (w, h) = (frame.width, frame.height);
        let pixels = self.presenter.read_pixels(0, 0, w, h)?;
        write_ppm(&path, w, h, &pixels)
            .with_context(|| format!("write screenshot {}", path.display()))?;
        self.stats.screenshots += 1;
        if !self.options.json_stats {
            println!("svgplay: wrote {}", path.display());
        }
        self.pending_screenshot = None;
        Ok(())
    }

    fn service_readout(&mut self, now: Instant, frame_index: usize, frame_count: usize) {
        let elapsed = now.duration_since(self.last_readout);
        if elapsed < READOUT_INTERVAL {
            return;
        }
        let frames = self.stats.presented - self.presented_at_readout;
        let fps = frames as f64 / elapsed.as_secs_f64();
        let prebuffer = self.scheduler.metrics();
        let title = format!(
            "svgplay - frame {}/{} - {:.1} fps - {}",
            frame_index + 1,
            frame_count,
            fps,
            match self.scheduler.mode() {
                BufferMode::Off => "direct",
                BufferMode::PreBuffer => "prebuffer",
            }
        );
        self.presenter.set_title(&title);
        info!(
            target: "runtime.readout",
            frame_index,
            fps,
            prebuffer_hits = prebuffer.hits,
            prebuffer_misses = prebuffer.misses,
            "readout"
        );
        self.last_readout = now;
        self.presented_at_readout = self.stats.presented;
    }

    fn finish(self, started: Instant) -> Result<i32> {
        let elapsed = self.clock.now().duration_since(started).as_secs_f64();
        let render = self.render.metrics().snapshot();
        let prebuffer = self.scheduler.metrics();

        self.render.shutdown();
        self.scheduler.shutdown();

        let average_fps = if elapsed > 0.0 {
            self.stats.presented as f64 / elapsed
        } else {
            0.0
        };
        if self.options.json_stats {
            let record = serde_json::json!({
                "elapsed_seconds": elapsed,
                "frames_presented": self.stats.presented,
                "average_fps": average_fps,
                "frames_rendered": render.frames_rendered,
                "frames_dropped": render.frames_dropped,
                "render_timeouts": render.render_timeouts,
                "skipped_ticks": render.skipped_ticks,
                "document_rebuilds": render.document_rebuilds,
                "load_failures": self.stats.load_failures,
                "screenshots": self.stats.screenshots,
                "prebuffer": {
                    "hits": prebuffer.hits,
                    "misses": prebuffer.misses,
                    "rendered": prebuffer.rendered,
                    "evicted": prebuffer.evicted,
                    "dropped_requests": prebuffer.dropped_requests,
                },
            });
            println!("{record}");
        } else {
            eprintln!(
                "svgplay: {} frames in {elapsed:.1} s ({average_fps:.1} fps), {} dropped, {} timeouts, prebuffer {}/{} hits",
                self.stats.presented,
                render.frames_dropped,
                render.render_timeouts,
                prebuffer.hits,
                prebuffer.hits + prebuffer.misses,
            );
        }
        info!(target: "runtime", elapsed, presented = self.stats.presented, "shutdown_complete");
        Ok(self.exit_code)
    }
}

fn spawn_watcher(
    document: &Path,
    tx: crossbeam_channel::Sender<Event>,
) -> Option<notify::RecommendedWatcher> {
    use notify::Watcher;
    let file_name = document.file_name()?.to_os_string();
    let watch_dir = document.parent().map(Path::to_path_buf)?;
    let document = document.to_path_buf();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| p.file_name().is_some_and(|n| n == file_name));
                if relevant {
                    send_event(&tx, Event::DocumentChanged(document.clone()));
                }
            }
            Err(e) => warn!(target: "runtime.watch", ?e, "watch_error"),
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(target: "runtime.watch", ?e, "watcher_unavailable");
            return None;
        }
    };
    if let Err(e) = watcher.watch(&watch_dir, notify::RecursiveMode::NonRecursive) {
        warn!(target: "runtime.watch", ?e, "watch_failed");
        return None;
    }
    info!(target: "runtime.watch", dir = %watch_dir.display(), "hot_reload_watching");
    Some(watcher)
}

fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();

    let args = Args::parse();
    let config = load_from(args.config.clone())?;
    let options = merge_cli(PlayerOptions::from_config(&config)?, &args)?;
    info!(target: "runtime.startup", ?options, path = %args.path.display(), "startup");

    let backend = Arc::new(ResvgBackend::new());
    let document = load_document(&args.path, &backend)?;

    let scheduler = Arc::new(PreBufferScheduler::new(
        backend.clone(),
        PreBufferConfig::default(),
    ));
    let render = RenderThread::spawn(
        backend.clone(),
        scheduler.clone(),
        RenderThreadOptions::default(),
    );
    let buffers = render.buffers();

    let (tx, rx) = core_events::channel();
    let _watcher = spawn_watcher(&document.path, tx.clone());
    let interactive = std::io::stdin().is_tty();
    let _raw_guard = interactive.then(RawModeGuard::enable);
    let keys: Option<KeyInputHandle> = interactive.then(|| spawn_key_thread(tx.clone()));
    let remote: Option<RemoteServer> = match options.remote_port {
        Some(port) => Some(RemoteServer::spawn(port, tx.clone()).context("remote control")?),
        None => None,
    };

    let clock = SystemClock;
    let now = clock.now();
    let mut playback = PlaybackState::new(now);
    let timing = document.controller.document_timing();
    playback.set_timing(now, timing.duration, timing.frame_count);
    playback.set_rate(now, options.rate);

    let mut document = document;
    if let Some(repeat) = options.repeat {
        document.controller.set_repeat_override(Some(repeat));
    }

    let runtime = PlayerRuntime {
        render_size: options.size,
        first_frame_screenshot: options.screenshot.clone(),
        options,
        clock,
        scheduler,
        render,
        buffers,
        presenter: CapturePresenter::new(),
        playback,
        document,
        backend,
        freeze: FreezeWatchdog::new(),
        stats: SessionStats::default(),
        prev_t: 0.0,
        seq_counter: 0,
        pending_screenshot: None,
        screenshot_serial: 0,
        last_readout: now,
        presented_at_readout: 0,
        quit: false,
        exit_code: 0,
    };

    let code = runtime.run(rx)?;

    if let Some(keys) = keys {
        keys.stop();
    }
    if let Some(remote) = remote {
        remote.stop();
    }
    drop(startup);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parsing() {
        assert_eq!(parse_pair::<i32>("10,20", ','), Some((10, 20)));
        assert_eq!(parse_pair::<u32>("800x600", 'x'), Some((800, 600)));
        assert_eq!(parse_pair::<u32>("800", 'x'), None);
        assert_eq!(parse_pair::<u32>("axb", 'x'), None);
    }

    #[test]
    fn repeat_cycle_covers_all_modes() {
        let mut mode = None;
        let mut seen = Vec::new();
        for _ in 0..4 {
            mode = next_repeat(mode);
            seen.push(mode);
        }
        assert_eq!(
            seen,
            vec![
                Some(RepeatMode::Loop),
                Some(RepeatMode::PingPong),
                Some(RepeatMode::Once),
                None
            ]
        );
    }

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from([
            "svgplay",
            "anim.svg",
            "--fullscreen",
            "--size",
            "1024x768",
            "--rate",
            "2",
            "--sequential",
            "--json",
            "--no-prebuffer",
        ]);
        let options = merge_cli(PlayerOptions::default(), &args).unwrap();
        assert_eq!(options.window_mode, WindowMode::Fullscreen);
        assert_eq!(options.size, (1024, 768));
        assert_eq!(options.rate, 2.0);
        assert!(options.sequential);
        assert!(options.json_stats);
        assert!(!options.prebuffer);
    }

    #[test]
    fn bad_cli_values_rejected() {
        let args = Args::parse_from(["svgplay", "anim.svg", "--size", "0x100"]);
        assert!(merge_cli(PlayerOptions::default(), &args).is_err());
        let args = Args::parse_from(["svgplay", "anim.svg", "--rate", "99"]);
        assert!(merge_cli(PlayerOptions::default(), &args).is_err());
    }

    #[test]
    fn remote_flag_defaults_port() {
        let args = Args::parse_from(["svgplay", "anim.svg", "--remote-control"]);
        assert_eq!(args.remote_control, Some(7878));
        let args = Args::parse_from(["svgplay", "anim.svg", "--remote-control=9000"]);
        assert_eq!(args.remote_control, Some(9000));
    }
}
