//! Deterministic in-memory raster backend for pipeline tests.
//!
//! Rendering fills the canvas (or its clip region) with a color derived
//! from a stable hash of the document's applied attributes. Two document
//! instances with the same attribute state produce identical pixels,
//! which is exactly the property cross-path determinism tests need,
//! without touching a real rasterizer.

use std::collections::{BTreeMap, HashSet};

use crate::geom::RectF;
use crate::{Canvas, DocumentError, RasterBackend, SvgDocument, SvgNode};

#[derive(Debug, Default, Clone)]
pub struct MockBackend;

impl RasterBackend for MockBackend {
    type Document = MockDocument;
    type Canvas = MockCanvas;

    fn parse(&self, source: &str) -> Result<MockDocument, DocumentError> {
        MockDocument::parse(source)
    }

    fn create_canvas(&self, width: u32, height: u32) -> Result<MockCanvas, DocumentError> {
        if width == 0 || height == 0 {
            return Err(DocumentError::Surface { width, height });
        }
        Ok(MockCanvas {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
            clip: None,
            stack: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct MockDocument {
    ids: HashSet<String>,
    attrs: BTreeMap<(String, String), String>,
    size: (f32, f32),
    pub prepare_calls: usize,
}

impl MockDocument {
    fn parse(source: &str) -> Result<Self, DocumentError> {
        let xml = roxmltree::Document::parse(source)
            .map_err(|e| DocumentError::Parse(e.to_string()))?;
        let root = xml.root_element();
        let dim = |name: &str| {
            root.attribute(name)
                .and_then(|v| v.trim_end_matches("px").parse::<f32>().ok())
                .unwrap_or(100.0)
        };
        let size = (dim("width"), dim("height"));
        let ids = xml
            .descendants()
            .filter_map(|n| n.attribute("id"))
            .map(str::to_string)
            .collect();
        Ok(Self {
            ids,
            attrs: BTreeMap::new(),
            size,
            prepare_calls: 0,
        })
    }

    /// Stable FNV-1a over the sorted attribute state.
    fn state_hash(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut eat = |bytes: &[u8]| {
            for &b in bytes {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(0x1000_0000_01b3);
            }
        };
        for ((id, name), value) in &self.attrs {
            eat(id.as_bytes());
            eat(b"/");
            eat(name.as_bytes());
            eat(b"=");
            eat(value.as_bytes());
            eat(b";");
        }
        hash
    }
}

impl SvgDocument for MockDocument {
    type Canvas = MockCanvas;
    type Node<'a>
        = MockNode<'a>
    where
        Self: 'a;

    fn find_by_id<'a>(&'a mut self, id: &str) -> Option<MockNode<'a>> {
        self.ids.contains(id).then(|| MockNode {
            doc: self,
            id: id.to_string(),
        })
    }

    fn set_container_size(&mut self, width: u32, height: u32) {
        if self.size == (0.0, 0.0) {
            self.size = (width as f32, height as f32);
        }
    }

    fn intrinsic_size(&self) -> (f32, f32) {
        self.size
    }

    fn prepare(&mut self) -> Result<(), DocumentError> {
        self.prepare_calls += 1;
        Ok(())
    }

    fn render(&mut self, canvas: &mut MockCanvas) -> Result<(), DocumentError> {
        let h = self.state_hash();
        let color = [
            (h & 0xff) as u8,
            ((h >> 8) & 0xff) as u8,
            ((h >> 16) & 0xff) as u8,
            255,
        ];
        canvas.fill_clip(color);
        Ok(())
    }
}

pub struct MockNode<'a> {
    doc: &'a mut MockDocument,
    id: String,
}

impl SvgNode for MockNode<'_> {
    fn set_attribute(&mut self, name: &str, value: &str) {
        self.doc
            .attrs
            .insert((self.id.clone(), name.to_string()), value.to_string());
    }
}

pub struct MockCanvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    clip: Option<RectF>,
    stack: Vec<Option<RectF>>,
}

impl MockCanvas {
    fn fill_clip(&mut self, color: [u8; 4]) {
        let (x0, y0, x1, y1) = match self.clip {
            None => (0, 0, self.width, self.height),
            Some(c) => (
                c.x.floor().clamp(0.0, self.width as f32) as u32,
                c.y.floor().clamp(0.0, self.height as f32) as u32,
                (c.x + c.w).ceil().clamp(0.0, self.width as f32) as u32,
                (c.y + c.h).ceil().clamp(0.0, self.height as f32) as u32,
            ),
        };
        for y in y0..y1 {
            for x in x0..x1 {
                let i = ((y * self.width + x) * 4) as usize;
                self.pixels[i..i + 4].copy_from_slice(&color);
            }
        }
    }
}

impl Canvas for MockCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn save(&mut self) {
        self.stack.push(self.clip);
    }

    fn restore(&mut self) {
        if let Some(clip) = self.stack.pop() {
            self.clip = clip;
        }
    }

    fn translate(&mut self, _dx: f32, _dy: f32) {}

    fn scale(&mut self, _sx: f32, _sy: f32) {}

    fn clip_rect(&mut self, rect: RectF) {
        self.clip = Some(rect);
    }

    fn clear(&mut self, color: [u8; 4]) {
        self.fill_clip(color);
    }

    fn read_bgra(&self, dst: &mut Vec<u8>) {
        dst.clear();
        dst.extend_from_slice(&self.pixels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<svg width="10" height="10"><g id="stage"/></svg>"#;

    #[test]
    fn identical_state_renders_identical_pixels() {
        let backend = MockBackend;
        let mut a = backend.parse(DOC).unwrap();
        let mut b = backend.parse(DOC).unwrap();
        for doc in [&mut a, &mut b] {
            doc.find_by_id("stage").unwrap().set_attribute("href", "#f3");
        }
        let mut ca = backend.create_canvas(4, 4).unwrap();
        let mut cb = backend.create_canvas(4, 4).unwrap();
        a.render(&mut ca).unwrap();
        b.render(&mut cb).unwrap();
        let (mut pa, mut pb) = (Vec::new(), Vec::new());
        ca.read_bgra(&mut pa);
        cb.read_bgra(&mut pb);
        assert_eq!(pa, pb);
    }

    #[test]
    fn different_state_renders_different_pixels() {
        let backend = MockBackend;
        let mut a = backend.parse(DOC).unwrap();
        let mut b = backend.parse(DOC).unwrap();
        a.find_by_id("stage").unwrap().set_attribute("href", "#f0");
        b.find_by_id("stage").unwrap().set_attribute("href", "#f1");
        let mut ca = backend.create_canvas(2, 2).unwrap();
        let mut cb = backend.create_canvas(2, 2).unwrap();
        a.render(&mut ca).unwrap();
        b.render(&mut cb).unwrap();
        let (mut pa, mut pb) = (Vec::new(), Vec::new());
        ca.read_bgra(&mut pa);
        cb.read_bgra(&mut pb);
        assert_ne!(pa, pb);
    }

    #[test]
    fn zero_sized_canvas_is_rejected() {
        assert!(MockBackend.create_canvas(0, 4).is_err());
    }
}
