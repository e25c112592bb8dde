//! Event and control-command types for the frontend loop.
//!
//! Every control path (interactive keys, CLI options, remote socket)
//! converges on [`ControlCommand`]; the grammar parsed here is the one
//! documented for the remote protocol, so semantics cannot drift between
//! transports. Events are plumbed over a bounded crossbeam channel.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use core_anim::RepeatMode;
use thiserror::Error;

// -------------------------------------------------------------------------------------------------
// Channel Policy
// -------------------------------------------------------------------------------------------------
// Producers are the key thread, the remote-control connections, and the
// file watcher; the single consumer is the frontend loop. The channel is
// bounded for memory safety; producers use `send_timeout` and drop the
// event on a full channel (commands are user-paced, a sustained full
// channel means the loop is wedged and the freeze watchdog will fire).
// -------------------------------------------------------------------------------------------------
pub const EVENT_CHANNEL_CAP: usize = 1024;
const SEND_TIMEOUT: Duration = Duration::from_millis(50);

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Minimal relaxed atomic counters, inspectable from tests and logged at
// shutdown. No locking on the hot path.
// -------------------------------------------------------------------------------------------------
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static COMMANDS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
pub static COMMANDS_REJECTED: AtomicU64 = AtomicU64::new(0);

/// Top-level event consumed by the frontend loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(ControlCommand),
    Key(KeyIntent),
    /// The watched document file changed on disk (hot reload).
    DocumentChanged(PathBuf),
    Shutdown,
}

/// Decoded keyboard intent. Relative intents (rate nudges, repeat
/// cycling, unnamed screenshots) need frontend state to resolve into a
/// concrete [`ControlCommand`]; absolute ones carry it directly.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyIntent {
    Command(ControlCommand),
    RateUp,
    RateDown,
    CycleRepeat,
    ScreenshotAuto,
}

/// Imperative control surface. One enum for every transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Play,
    Pause,
    Toggle,
    Stop,
    Seek(f64),
    SeekToFrame(usize),
    SeekToProgress(f64),
    Step(i64),
    SetRate(f64),
    SetRepeat(RepeatMode),
    Resize(u32, u32),
    Load(PathBuf),
    Reload,
    CycleBufferMode,
    Screenshot(PathBuf),
    Quit,
}

pub use core_state::{RATE_MAX, RATE_MIN};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` expects {expected}")]
    BadArguments {
        command: &'static str,
        expected: &'static str,
    },
    #[error("rate must lie in [{RATE_MIN}, {RATE_MAX}]")]
    RateOutOfRange,
}

fn parse_repeat(token: &str) -> Option<RepeatMode> {
    token.parse().ok()
}

impl std::str::FromStr for ControlCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Err(CommandParseError::Empty);
        };
        let rest: Vec<&str> = parts.collect();
        let bad = |command, expected| CommandParseError::BadArguments { command, expected };

        let cmd = match (head, rest.as_slice()) {
            ("play", []) => ControlCommand::Play,
            ("pause", []) => ControlCommand::Pause,
            ("toggle", []) => ControlCommand::Toggle,
            ("stop", []) => ControlCommand::Stop,
            ("quit", []) => ControlCommand::Quit,
            ("reload", []) => ControlCommand::Reload,
            ("buffer-mode", []) => ControlCommand::CycleBufferMode,
            ("seek", [t]) => {
                ControlCommand::Seek(t.parse().map_err(|_| bad("seek", "a time in seconds"))?)
            }
            ("seek-frame", [i]) => ControlCommand::SeekToFrame(
                i.parse().map_err(|_| bad("seek-frame", "a frame index"))?,
            ),
            ("seek-progress", [p]) => {
                let p: f64 = p
                    .parse()
                    .map_err(|_| bad("seek-progress", "a value in [0, 1]"))?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(bad("seek-progress", "a value in [0, 1]"));
                }
                ControlCommand::SeekToProgress(p)
            }
            ("step", []) => ControlCommand::Step(1),
            ("step", [n]) => {
                ControlCommand::Step(n.parse().map_err(|_| bad("step", "a signed frame count"))?)
            }
            ("rate", [r]) => {
                let r: f64 = r.parse().map_err(|_| bad("rate", "a playback rate"))?;
                if !(RATE_MIN..=RATE_MAX).contains(&r) {
                    return Err(CommandParseError::RateOutOfRange);
                }
                ControlCommand::SetRate(r)
            }
            ("repeat", [m]) => ControlCommand::SetRepeat(
                parse_repeat(m).ok_or(bad("repeat", "once|loop|pingpong|count:<k>"))?,
            ),
            ("resize", [w, h]) => {
                let w = w.parse().map_err(|_| bad("resize", "two dimensions"))?;
                let h = h.parse().map_err(|_| bad("resize", "two dimensions"))?;
                ControlCommand::Resize(w, h)
            }
            ("load", [path]) => ControlCommand::Load(PathBuf::from(path)),
            ("screenshot", [path]) => ControlCommand::Screenshot(PathBuf::from(path)),
            ("seek", _) => return Err(bad("seek", "a time in seconds")),
            ("seek-frame", _) => return Err(bad("seek-frame", "a frame index")),
            ("seek-progress", _) => return Err(bad("seek-progress", "a value in [0, 1]")),
            ("step", _) => return Err(bad("step", "a signed frame count")),
            ("rate", _) => return Err(bad("rate", "a playback rate")),
            ("repeat", _) => return Err(bad("repeat", "once|loop|pingpong|count:<k>")),
            ("resize", _) => return Err(bad("resize", "two dimensions")),
            ("load", _) => return Err(bad("load", "a path")),
            ("screenshot", _) => return Err(bad("screenshot", "a path")),
            (other, _) => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}

/// Bounded event channel with the documented capacity.
pub fn channel() -> (
    crossbeam_channel::Sender<Event>,
    crossbeam_channel::Receiver<Event>,
) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAP)
}

/// Producer-side send with the drop-on-congestion policy.
pub fn send_event(tx: &crossbeam_channel::Sender<Event>, event: Event) {
    if let Err(e) = tx.send_timeout(event, SEND_TIMEOUT) {
        CHANNEL_SEND_FAILURES.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tracing::warn!(target: "events.channel", ?e, "event_dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn parse(s: &str) -> Result<ControlCommand, CommandParseError> {
        ControlCommand::from_str(s)
    }

    #[test]
    fn bare_commands() {
        assert_eq!(parse("play").unwrap(), ControlCommand::Play);
        assert_eq!(parse("pause").unwrap(), ControlCommand::Pause);
        assert_eq!(parse("toggle").unwrap(), ControlCommand::Toggle);
        assert_eq!(parse("stop").unwrap(), ControlCommand::Stop);
        assert_eq!(parse("quit").unwrap(), ControlCommand::Quit);
        assert_eq!(parse("reload").unwrap(), ControlCommand::Reload);
        assert_eq!(parse("buffer-mode").unwrap(), ControlCommand::CycleBufferMode);
    }

    #[test]
    fn seek_variants() {
        assert_eq!(parse("seek 1.5").unwrap(), ControlCommand::Seek(1.5));
        assert_eq!(parse("seek-frame 12").unwrap(), ControlCommand::SeekToFrame(12));
        assert_eq!(
            parse("seek-progress 0.25").unwrap(),
            ControlCommand::SeekToProgress(0.25)
        );
        assert!(parse("seek-progress 1.5").is_err());
    }

    #[test]
    fn step_defaults_to_one() {
        assert_eq!(parse("step").unwrap(), ControlCommand::Step(1));
        assert_eq!(parse("step -2").unwrap(), ControlCommand::Step(-2));
    }

    #[test]
    fn rate_is_range_checked() {
        assert_eq!(parse("rate 2.0").unwrap(), ControlCommand::SetRate(2.0));
        assert_eq!(parse("rate 0.05"), Err(CommandParseError::RateOutOfRange));
        assert_eq!(parse("rate 20"), Err(CommandParseError::RateOutOfRange));
    }

    #[test]
    fn repeat_modes() {
        use core_anim::RepeatMode::*;
        assert_eq!(parse("repeat once").unwrap(), ControlCommand::SetRepeat(Once));
        assert_eq!(parse("repeat loop").unwrap(), ControlCommand::SetRepeat(Loop));
        assert_eq!(
            parse("repeat pingpong").unwrap(),
            ControlCommand::SetRepeat(PingPong)
        );
        assert_eq!(
            parse("repeat count:3").unwrap(),
            ControlCommand::SetRepeat(Count(3))
        );
        assert_eq!(parse("repeat 3").unwrap(), ControlCommand::SetRepeat(Count(3)));
        assert!(parse("repeat count:0").is_err());
        assert!(parse("repeat sometimes").is_err());
    }

    #[test]
    fn resize_takes_two_dimensions() {
        assert_eq!(parse("resize 800 600").unwrap(), ControlCommand::Resize(800, 600));
        assert!(parse("resize 800").is_err());
    }

    #[test]
    fn unknown_and_empty_rejected() {
        assert!(matches!(parse("warp 9"), Err(CommandParseError::Unknown(_))));
        assert_eq!(parse("   "), Err(CommandParseError::Empty));
    }

    #[test]
    fn channel_respects_capacity_policy() {
        let (tx, rx) = channel();
        send_event(&tx, Event::Command(ControlCommand::Play));
        assert_eq!(rx.recv().unwrap(), Event::Command(ControlCommand::Play));
    }
}
