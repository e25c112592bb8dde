//! Presenter boundary: the window/surface provider contract.
//!
//! The frontend acquires a drawable of the frame's size, copies the
//! front buffer into it, and commits. Pixel format is premultiplied
//! BGRA little-endian. `read_pixels` serves screenshots.

use anyhow::{Result, bail};

/// One presentable pixel target, `width * height * 4` BGRA bytes.
#[derive(Debug, Clone, Default)]
pub struct Drawable {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Drawable {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width as usize) * (height as usize) * 4],
        }
    }
}

pub trait Presenter {
    fn acquire_drawable(&mut self, width: u32, height: u32) -> Result<Drawable>;
    fn commit(&mut self, drawable: Drawable) -> Result<()>;
    /// BGRA bytes of a committed region (row-major, tightly packed).
    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>>;
    /// Optional window-title hook; headless presenters ignore it.
    fn set_title(&mut self, _title: &str) {}
}

/// Presenter that retains the last committed frame in memory. Serves the
/// headless runner and the pipeline tests.
#[derive(Debug, Default)]
pub struct CapturePresenter {
    last: Option<Drawable>,
    commits: u64,
    title: String,
}

impl CapturePresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn last_frame(&self) -> Option<&Drawable> {
        self.last.as_ref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Presenter for CapturePresenter {
    fn acquire_drawable(&mut self, width: u32, height: u32) -> Result<Drawable> {
        Ok(Drawable::new(width, height))
    }

    fn commit(&mut self, drawable: Drawable) -> Result<()> {
        let expected = (drawable.width as usize) * (drawable.height as usize) * 4;
        if drawable.pixels.len() != expected {
            // Integrity violation: the caller handed back a resized or
            // truncated surface.
            bail!(
                "drawable size mismatch: {} bytes for {}x{}",
                drawable.pixels.len(),
                drawable.width,
                drawable.height
            );
        }
        self.commits += 1;
        self.last = Some(drawable);
        Ok(())
    }

    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>> {
        let Some(frame) = &self.last else {
            bail!("no committed frame to read");
        };
        if x + width > frame.width || y + height > frame.height {
            bail!(
                "read region {x},{y} {width}x{height} exceeds {}x{}",
                frame.width,
                frame.height
            );
        }
        let mut out = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for row in y..y + height {
            let start = ((row * frame.width + x) * 4) as usize;
            out.extend_from_slice(&frame.pixels[start..start + (width as usize) * 4]);
        }
        Ok(out)
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_and_read_region() {
        let mut p = CapturePresenter::new();
        let mut d = p.acquire_drawable(4, 2).unwrap();
        for (i, b) in d.pixels.iter_mut().enumerate() {
            *b = i as u8;
        }
        p.commit(d).unwrap();
        assert_eq!(p.commits(), 1);
        let region = p.read_pixels(1, 1, 2, 1).unwrap();
        // Row 1 starts at byte 16; x offset 1 adds 4.
        assert_eq!(region, (20u8..28).collect::<Vec<_>>());
    }

    #[test]
    fn size_mismatch_is_integrity_error() {
        let mut p = CapturePresenter::new();
        let mut d = p.acquire_drawable(2, 2).unwrap();
        d.pixels.truncate(3);
        assert!(p.commit(d).is_err());
    }

    #[test]
    fn out_of_bounds_read_rejected() {
        let mut p = CapturePresenter::new();
        let d = p.acquire_drawable(2, 2).unwrap();
        p.commit(d).unwrap();
        assert!(p.read_pixels(1, 1, 2, 2).is_err());
    }
}
