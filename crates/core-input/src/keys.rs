//! Terminal transport controls.
//!
//! When stdin is a TTY the player accepts single-key transport commands
//! while running. Translation is a pure function from key event to
//! [`KeyIntent`]; the blocking poll loop lives on its own thread and
//! observes a stop flag (cooperative shutdown, no thread killing).
//!
//! Bindings: space toggle, `s` stop, `.`/`,` step forward/back, left and
//! right arrows step a five-frame stride, `+`/`-` rate nudges, `r`
//! repeat cycle, `b` pre-buffer toggle, `p` screenshot, `q`/Esc quit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use crossterm::event::{Event as CEvent, KeyCode, KeyEvent, KeyEventKind};
use core_events::{ControlCommand, Event, KeyIntent, send_event};

/// Frames skipped by an arrow-key stride.
pub const ARROW_STEP_FRAMES: i64 = 5;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Map one key event onto an intent. Repeat and release events are
/// ignored.
pub fn translate_key(key: &KeyEvent) -> Option<KeyIntent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let command = |c: ControlCommand| Some(KeyIntent::Command(c));
    // Raw mode delivers Ctrl+C as a plain key event.
    if key.modifiers.contains(crossterm::event::KeyModifiers::CONTROL)
        && key.code == KeyCode::Char('c')
    {
        return command(ControlCommand::Quit);
    }
    match key.code {
        KeyCode::Char(' ') => command(ControlCommand::Toggle),
        KeyCode::Char('s') => command(ControlCommand::Stop),
        KeyCode::Char('.') => command(ControlCommand::Step(1)),
        KeyCode::Char(',') => command(ControlCommand::Step(-1)),
        KeyCode::Right => command(ControlCommand::Step(ARROW_STEP_FRAMES)),
        KeyCode::Left => command(ControlCommand::Step(-ARROW_STEP_FRAMES)),
        KeyCode::Char('b') => command(ControlCommand::CycleBufferMode),
        KeyCode::Char('q') | KeyCode::Esc => command(ControlCommand::Quit),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(KeyIntent::RateUp),
        KeyCode::Char('-') => Some(KeyIntent::RateDown),
        KeyCode::Char('r') => Some(KeyIntent::CycleRepeat),
        KeyCode::Char('p') => Some(KeyIntent::ScreenshotAuto),
        _ => None,
    }
}

pub struct KeyInputHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeyInputHandle {
    pub fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for KeyInputHandle {
    fn drop(&mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the key poll thread. The caller is responsible for raw mode;
/// this loop only reads events.
pub fn spawn_key_thread(tx: Sender<Event>) -> KeyInputHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let handle = std::thread::Builder::new()
        .name("key-input".to_string())
        .spawn(move || {
            tracing::debug!(target: "input.keys", "key_thread_started");
            while !thread_stop.load(Ordering::Acquire) {
                match crossterm::event::poll(POLL_INTERVAL) {
                    Ok(true) => match crossterm::event::read() {
                        Ok(CEvent::Key(key)) => {
                            if let Some(intent) = translate_key(&key) {
                                tracing::trace!(target: "input.keys", ?intent, "key_intent");
                                send_event(&tx, Event::Key(intent));
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(target: "input.keys", ?e, "key_read_failed");
                            break;
                        }
                    },
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(target: "input.keys", ?e, "key_poll_failed");
                        break;
                    }
                }
            }
            tracing::debug!(target: "input.keys", "key_thread_stopped");
        })
        .expect("spawn key input thread");
    KeyInputHandle {
        stop,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventState, KeyModifiers};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn transport_keys_map_to_commands() {
        assert_eq!(
            translate_key(&press(KeyCode::Char(' '))),
            Some(KeyIntent::Command(ControlCommand::Toggle))
        );
        assert_eq!(
            translate_key(&press(KeyCode::Char('.'))),
            Some(KeyIntent::Command(ControlCommand::Step(1)))
        );
        assert_eq!(
            translate_key(&press(KeyCode::Left)),
            Some(KeyIntent::Command(ControlCommand::Step(-ARROW_STEP_FRAMES)))
        );
        assert_eq!(
            translate_key(&press(KeyCode::Esc)),
            Some(KeyIntent::Command(ControlCommand::Quit))
        );
    }

    #[test]
    fn relative_keys_map_to_intents() {
        assert_eq!(translate_key(&press(KeyCode::Char('+'))), Some(KeyIntent::RateUp));
        assert_eq!(translate_key(&press(KeyCode::Char('-'))), Some(KeyIntent::RateDown));
        assert_eq!(
            translate_key(&press(KeyCode::Char('r'))),
            Some(KeyIntent::CycleRepeat)
        );
        assert_eq!(
            translate_key(&press(KeyCode::Char('p'))),
            Some(KeyIntent::ScreenshotAuto)
        );
    }

    #[test]
    fn ctrl_c_quits() {
        let mut key = press(KeyCode::Char('c'));
        key.modifiers = KeyModifiers::CONTROL;
        assert_eq!(
            translate_key(&key),
            Some(KeyIntent::Command(ControlCommand::Quit))
        );
    }

    #[test]
    fn release_and_unknown_keys_ignored() {
        let mut release = press(KeyCode::Char(' '));
        release.kind = KeyEventKind::Release;
        assert_eq!(translate_key(&release), None);
        assert_eq!(translate_key(&press(KeyCode::Char('z'))), None);
    }
}
