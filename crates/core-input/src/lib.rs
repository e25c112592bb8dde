//! Input transports: terminal keys and the remote-control socket.
//!
//! Both produce events on the shared bounded channel; neither owns any
//! playback semantics. Key translation and the remote line protocol are
//! pure functions over the grammar defined in `core-events`, so the
//! three control paths (keys, CLI, network) cannot diverge.

pub mod keys;
pub mod remote;

pub use keys::{ARROW_STEP_FRAMES, KeyInputHandle, spawn_key_thread, translate_key};
pub use remote::RemoteServer;
