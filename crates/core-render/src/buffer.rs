//! Double-buffer handoff between the render thread and the frontend.
//!
//! Two equally sized BGRA buffers rotate under one mutex; a producer
//! publish copies finished pixels into the back buffer, swaps, and sets
//! the `frame_ready` flag. The consumer observes the flag, takes the
//! lock, and reads the front buffer. One producer, one consumer, no
//! tearing: pixels are fully written before the swap is visible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Owned BGRA pixel buffer with its dimensions.
#[derive(Debug, Clone, Default)]
pub struct FramePixels {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FramePixels {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    fn ensure_size(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.pixels
                .resize((width as usize) * (height as usize) * 4, 0);
        }
    }
}

#[derive(Debug, Default)]
struct Buffers {
    front: FramePixels,
    back: FramePixels,
}

#[derive(Debug, Default)]
pub struct DoubleBuffer {
    inner: Mutex<Buffers>,
    frame_ready: AtomicBool,
}

impl DoubleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_ready(&self) -> bool {
        self.frame_ready.load(Ordering::Acquire)
    }

    /// Producer side: copy `pixels` (len `width * height * 4`) into the
    /// back buffer, swap, and mark the frame ready.
    pub fn publish(&self, width: u32, height: u32, pixels: &[u8]) {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize) * 4);
        let mut buffers = self.inner.lock().expect("double buffer poisoned");
        buffers.back.ensure_size(width, height);
        buffers.back.pixels.copy_from_slice(pixels);
        let Buffers { front, back } = &mut *buffers;
        std::mem::swap(front, back);
        self.frame_ready.store(true, Ordering::Release);
    }

    /// Consumer side: when a frame is ready, hand the front buffer to
    /// `consume` and lower the flag. Returns whether a frame was taken.
    pub fn consume_front<R>(&self, consume: impl FnOnce(&FramePixels) -> R) -> Option<R> {
        if !self.frame_ready.swap(false, Ordering::AcqRel) {
            return None;
        }
        let buffers = self.inner.lock().expect("double buffer poisoned");
        Some(consume(&buffers.front))
    }

    /// Read the most recently published frame regardless of the ready
    /// flag (screenshots, diagnostics).
    pub fn with_front<R>(&self, read: impl FnOnce(&FramePixels) -> R) -> R {
        let buffers = self.inner.lock().expect("double buffer poisoned");
        read(&buffers.front)
    }
}
