//! resvg + tiny-skia implementation of the document boundary.
//!
//! usvg trees are immutable after parsing, so attribute mutation works on
//! the text layer: the document keeps its canonical source plus a map of
//! per-id attribute overrides, splices the overrides into the relevant
//! start tags, and reparses on [`ResvgDocument::prepare`]. Reparses only
//! happen when an override actually changed value; steady-state ticks
//! that reapply identical animation state keep the cached tree.
//!
//! Invariants:
//! * `canonical` is never modified; start-tag spans recorded at parse
//!   time stay valid for the lifetime of the document.
//! * `prepare` is the only place a tree is built; `render` never parses,
//!   so callers can keep document build time out of render deadlines.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::geom::RectF;
use crate::{Canvas, DocumentError, RasterBackend, SvgDocument, SvgNode, pixel};

pub struct ResvgBackend {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl ResvgBackend {
    pub fn new() -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(target: "svg.backend", fonts = db.len(), "fontdb_ready");
        Self {
            fontdb: Arc::new(db),
        }
    }

    /// Backend without system fonts, for text-free documents and tests.
    pub fn without_fonts() -> Self {
        Self {
            fontdb: Arc::new(usvg::fontdb::Database::new()),
        }
    }

    pub fn fontdb(&self) -> Arc<usvg::fontdb::Database> {
        self.fontdb.clone()
    }
}

impl Default for ResvgBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterBackend for ResvgBackend {
    type Document = ResvgDocument;
    type Canvas = PixmapCanvas;

    fn parse(&self, source: &str) -> Result<ResvgDocument, DocumentError> {
        ResvgDocument::parse(source, self.fontdb.clone())
    }

    fn create_canvas(&self, width: u32, height: u32) -> Result<PixmapCanvas, DocumentError> {
        PixmapCanvas::new(width, height)
    }
}

/// Byte range of one start tag (`<` through `>` inclusive).
#[derive(Debug, Clone, Copy)]
struct TagSpan {
    start: usize,
    end: usize,
}

pub struct ResvgDocument {
    canonical: String,
    fontdb: Arc<usvg::fontdb::Database>,
    spans: HashMap<String, TagSpan>,
    // BTreeMaps keep patch application order deterministic.
    overrides: BTreeMap<String, BTreeMap<String, String>>,
    tree: Option<usvg::Tree>,
    dirty: bool,
    container: Option<(u32, u32)>,
}

impl ResvgDocument {
    fn parse(source: &str, fontdb: Arc<usvg::fontdb::Database>) -> Result<Self, DocumentError> {
        let xml = roxmltree::Document::parse(source)
            .map_err(|e| DocumentError::Parse(e.to_string()))?;
        let mut spans = HashMap::new();
        for node in xml.descendants().filter(|n| n.is_element()) {
            if let Some(id) = node.attribute("id") {
                let start = node.range().start;
                let end = tag_end(source, start);
                spans.insert(id.to_string(), TagSpan { start, end });
            }
        }
        drop(xml);

        let mut doc = Self {
            canonical: source.to_string(),
            fontdb,
            spans,
            overrides: BTreeMap::new(),
            tree: None,
            dirty: true,
            container: None,
        };
        doc.prepare()?;
        Ok(doc)
    }

    fn patched_source(&self) -> Cow<'_, str> {
        let mut edits: Vec<(&TagSpan, &BTreeMap<String, String>)> = self
            .overrides
            .iter()
            .filter_map(|(id, attrs)| self.spans.get(id).map(|span| (span, attrs)))
            .collect();
        if edits.is_empty() {
            return Cow::Borrowed(&self.canonical);
        }
        edits.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
        let mut out = self.canonical.clone();
        for (span, attrs) in edits {
            let patched = patch_start_tag(&self.canonical[span.start..span.end], attrs);
            out.replace_range(span.start..span.end, &patched);
        }
        Cow::Owned(out)
    }
}

impl SvgDocument for ResvgDocument {
    type Canvas = PixmapCanvas;
    type Node<'a>
        = ResvgNode<'a>
    where
        Self: 'a;

    fn find_by_id<'a>(&'a mut self, id: &str) -> Option<ResvgNode<'a>> {
        if !self.spans.contains_key(id) {
            return None;
        }
        Some(ResvgNode {
            doc: self,
            id: id.to_string(),
        })
    }

    fn set_container_size(&mut self, width: u32, height: u32) {
        if self.container != Some((width, height)) {
            self.container = Some((width, height));
            self.dirty = true;
        }
    }

    fn intrinsic_size(&self) -> (f32, f32) {
        if let Some(tree) = &self.tree {
            let size = tree.size();
            return (size.width(), size.height());
        }
        match self.container {
            Some((w, h)) => (w as f32, h as f32),
            None => (0.0, 0.0),
        }
    }

    fn prepare(&mut self) -> Result<(), DocumentError> {
        if self.tree.is_some() && !self.dirty {
            return Ok(());
        }
        let mut options = usvg::Options::default();
        options.fontdb = self.fontdb.clone();
        if let Some((w, h)) = self.container
            && let Some(size) = usvg::Size::from_wh(w as f32, h as f32)
        {
            options.default_size = size;
        }
        let source = self.patched_source();
        let tree = usvg::Tree::from_str(&source, &options)
            .map_err(|e| DocumentError::Parse(e.to_string()))?;
        self.tree = Some(tree);
        self.dirty = false;
        Ok(())
    }

    fn render(&mut self, canvas: &mut PixmapCanvas) -> Result<(), DocumentError> {
        self.prepare()?;
        let Some(tree) = &self.tree else {
            return Err(DocumentError::Render("document not prepared".into()));
        };
        canvas.draw_tree(tree)
    }
}

pub struct ResvgNode<'a> {
    doc: &'a mut ResvgDocument,
    id: String,
}

impl SvgNode for ResvgNode<'_> {
    fn set_attribute(&mut self, name: &str, value: &str) {
        let attrs = self.doc.overrides.entry(self.id.clone()).or_default();
        let unchanged = attrs.get(name).is_some_and(|v| v == value);
        if !unchanged {
            attrs.insert(name.to_string(), value.to_string());
            self.doc.dirty = true;
        }
    }
}

/// Byte offset one past the `>` of the start tag beginning at `open`.
fn tag_end(source: &str, open: usize) -> usize {
    let bytes = source.as_bytes();
    let mut i = open;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') => quote = Some(b'"'),
            (None, b'\'') => quote = Some(b'\''),
            (None, b'>') => return i + 1,
            (None, _) => {}
        }
        i += 1;
    }
    bytes.len()
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Rewrite one start tag, replacing or appending the given attributes.
/// Matching is by literal name first, then by local name so `href`
/// overrides reach `xlink:href` attributes and vice versa.
fn patch_start_tag(tag: &str, attrs: &BTreeMap<String, String>) -> String {
    let bytes = tag.as_bytes();
    // Scan existing attributes: (name range, value range inside quotes).
    let mut existing: Vec<(std::ops::Range<usize>, std::ops::Range<usize>)> = Vec::new();
    let mut i = 1; // skip '<'
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/'
    {
        i += 1; // tag name
    }
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' || bytes[i] == b'/' {
            break;
        }
        let name_start = i;
        while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let name_end = i;
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'=') {
            i += 1;
        }
        if i >= bytes.len() || (bytes[i] != b'"' && bytes[i] != b'\'') {
            continue; // malformed attribute, skip
        }
        let q = bytes[i];
        i += 1;
        let value_start = i;
        while i < bytes.len() && bytes[i] != q {
            i += 1;
        }
        existing.push((name_start..name_end, value_start..i));
        i += 1; // closing quote
    }

    let mut replacements: Vec<(std::ops::Range<usize>, String)> = Vec::new();
    let mut appended = String::new();
    for (name, value) in attrs {
        let escaped = escape_attr(value);
        let found = existing
            .iter()
            .find(|(n, _)| &tag[n.clone()] == name)
            .or_else(|| {
                existing
                    .iter()
                    .find(|(n, _)| local_name(&tag[n.clone()]) == local_name(name))
            });
        match found {
            Some((_, v)) => replacements.push((v.clone(), escaped)),
            None => {
                appended.push(' ');
                appended.push_str(name);
                appended.push_str("=\"");
                appended.push_str(&escaped);
                appended.push('"');
            }
        }
    }

    let mut out = tag.to_string();
    replacements.sort_by_key(|(r, _)| std::cmp::Reverse(r.start));
    for (range, value) in replacements {
        out.replace_range(range, &value);
    }
    if !appended.is_empty() {
        let insert_at = if out.ends_with("/>") {
            out.len() - 2
        } else {
            out.len() - 1
        };
        out.insert_str(insert_at, &appended);
    }
    out
}

/// tiny-skia pixel surface with a transform/clip stack.
pub struct PixmapCanvas {
    pixmap: tiny_skia::Pixmap,
    transform: tiny_skia::Transform,
    clip: Option<RectF>,
    stack: Vec<(tiny_skia::Transform, Option<RectF>)>,
    scratch: Option<tiny_skia::Pixmap>,
}

impl PixmapCanvas {
    pub fn new(width: u32, height: u32) -> Result<Self, DocumentError> {
        let pixmap =
            tiny_skia::Pixmap::new(width, height).ok_or(DocumentError::Surface { width, height })?;
        Ok(Self {
            pixmap,
            transform: tiny_skia::Transform::identity(),
            clip: None,
            stack: Vec::new(),
            scratch: None,
        })
    }

    /// Integer clip rectangle clamped to the surface, `None` when the
    /// current clip covers everything.
    fn device_clip(&self) -> Option<(u32, u32, u32, u32)> {
        let clip = self.clip?;
        let w = self.pixmap.width();
        let h = self.pixmap.height();
        let x0 = clip.x.floor().clamp(0.0, w as f32) as u32;
        let y0 = clip.y.floor().clamp(0.0, h as f32) as u32;
        let x1 = (clip.x + clip.w).ceil().clamp(0.0, w as f32) as u32;
        let y1 = (clip.y + clip.h).ceil().clamp(0.0, h as f32) as u32;
        if x0 == 0 && y0 == 0 && x1 >= w && y1 >= h {
            return None;
        }
        Some((x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0)))
    }

    fn draw_tree(&mut self, tree: &usvg::Tree) -> Result<(), DocumentError> {
        match self.device_clip() {
            None => {
                resvg::render(tree, self.transform, &mut self.pixmap.as_mut());
            }
            Some((_, _, 0, _)) | Some((_, _, _, 0)) => {}
            Some((cx, cy, cw, ch)) => {
                // Render the clipped region into a region-sized scratch
                // surface; tiny-skia clips rasterization to it, so the
                // raster cost tracks the dirty area.
                let stale = !matches!(
                    &self.scratch,
                    Some(s) if s.width() == cw && s.height() == ch
                );
                if stale {
                    self.scratch = Some(tiny_skia::Pixmap::new(cw, ch).ok_or(
                        DocumentError::Surface {
                            width: cw,
                            height: ch,
                        },
                    )?);
                }
                let scratch = self.scratch.as_mut().expect("scratch surface ensured");
                scratch.fill(tiny_skia::Color::BLACK);
                let shifted = self.transform.post_translate(-(cx as f32), -(cy as f32));
                resvg::render(tree, shifted, &mut scratch.as_mut());
                let paint = tiny_skia::PixmapPaint {
                    blend_mode: tiny_skia::BlendMode::Source,
                    ..Default::default()
                };
                self.pixmap.as_mut().draw_pixmap(
                    cx as i32,
                    cy as i32,
                    scratch.as_ref(),
                    &paint,
                    tiny_skia::Transform::identity(),
                    None,
                );
            }
        }
        Ok(())
    }
}

impl Canvas for PixmapCanvas {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn save(&mut self) {
        self.stack.push((self.transform, self.clip));
    }

    fn restore(&mut self) {
        if let Some((transform, clip)) = self.stack.pop() {
            self.transform = transform;
            self.clip = clip;
        }
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        self.transform = self.transform.pre_translate(dx, dy);
    }

    fn scale(&mut self, sx: f32, sy: f32) {
        self.transform = self.transform.pre_scale(sx, sy);
    }

    fn clip_rect(&mut self, rect: RectF) {
        self.clip = Some(match self.clip {
            None => rect,
            Some(prev) => {
                let x0 = prev.x.max(rect.x);
                let y0 = prev.y.max(rect.y);
                let x1 = (prev.x + prev.w).min(rect.x + rect.w);
                let y1 = (prev.y + prev.h).min(rect.y + rect.h);
                RectF::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
            }
        });
    }

    fn clear(&mut self, color: [u8; 4]) {
        let c = tiny_skia::Color::from_rgba8(color[2], color[1], color[0], color[3]);
        match self.device_clip() {
            None => self.pixmap.fill(c),
            Some((_, _, 0, _)) | Some((_, _, _, 0)) => {}
            Some((x, y, w, h)) => {
                if let Some(rect) =
                    tiny_skia::Rect::from_xywh(x as f32, y as f32, w as f32, h as f32)
                {
                    let mut paint = tiny_skia::Paint::default();
                    paint.set_color(c);
                    paint.anti_alias = false;
                    paint.blend_mode = tiny_skia::BlendMode::Source;
                    self.pixmap.as_mut().fill_rect(
                        rect,
                        &paint,
                        tiny_skia::Transform::identity(),
                        None,
                    );
                }
            }
        }
    }

    fn read_bgra(&self, dst: &mut Vec<u8>) {
        pixel::rgba_to_bgra_into(self.pixmap.data(), dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_end_handles_quotes() {
        let src = r#"<use id="a" title="x > y"/><g/>"#;
        let end = tag_end(src, 0);
        assert_eq!(&src[..end], r#"<use id="a" title="x > y"/>"#);
    }

    #[test]
    fn patch_replaces_existing_attribute() {
        let mut attrs = BTreeMap::new();
        attrs.insert("xlink:href".to_string(), "#f2".to_string());
        let out = patch_start_tag(r##"<use id="s" xlink:href="#f0">"##, &attrs);
        assert_eq!(out, r##"<use id="s" xlink:href="#f2">"##);
    }

    #[test]
    fn patch_matches_by_local_name() {
        // An `href` override must reach an `xlink:href` attribute.
        let mut attrs = BTreeMap::new();
        attrs.insert("href".to_string(), "#f1".to_string());
        let out = patch_start_tag(r##"<use xlink:href="#f0"/>"##, &attrs);
        assert_eq!(out, r##"<use xlink:href="#f1"/>"##);
    }

    #[test]
    fn patch_appends_missing_attribute() {
        let mut attrs = BTreeMap::new();
        attrs.insert("opacity".to_string(), "0.5".to_string());
        assert_eq!(
            patch_start_tag("<rect width=\"4\"/>", &attrs),
            "<rect width=\"4\" opacity=\"0.5\"/>"
        );
        assert_eq!(
            patch_start_tag("<g>", &attrs),
            "<g opacity=\"0.5\">"
        );
    }

    #[test]
    fn patch_escapes_values() {
        let mut attrs = BTreeMap::new();
        attrs.insert("data-x".to_string(), "a\"<&".to_string());
        let out = patch_start_tag("<g>", &attrs);
        assert_eq!(out, "<g data-x=\"a&quot;&lt;&amp;\">");
    }

    const TWO_FRAME_DOC: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="8" height="8">
<defs>
<g id="f0"><rect width="8" height="8" fill="#ff0000"/></g>
<g id="f1"><rect width="8" height="8" fill="#0000ff"/></g>
</defs>
<use id="stage" xlink:href="#f0"/>
</svg>"##;

    fn center_bgra(canvas: &PixmapCanvas) -> [u8; 4] {
        let mut out = Vec::new();
        canvas.read_bgra(&mut out);
        let w = canvas.width() as usize;
        let idx = (4 * w + 4) * 4;
        [out[idx], out[idx + 1], out[idx + 2], out[idx + 3]]
    }

    #[test]
    fn attribute_mutation_switches_rendered_frame() {
        let backend = ResvgBackend::without_fonts();
        let mut doc = backend.parse(TWO_FRAME_DOC).unwrap();
        let mut canvas = backend.create_canvas(8, 8).unwrap();

        canvas.clear(crate::CLEAR_BLACK_BGRA);
        doc.render(&mut canvas).unwrap();
        assert_eq!(center_bgra(&canvas), [0, 0, 255, 255], "frame 0 is red");

        doc.find_by_id("stage")
            .expect("stage present")
            .set_attribute("xlink:href", "#f1");
        canvas.clear(crate::CLEAR_BLACK_BGRA);
        doc.render(&mut canvas).unwrap();
        assert_eq!(center_bgra(&canvas), [255, 0, 0, 255], "frame 1 is blue");
    }

    #[test]
    fn reapplying_identical_value_keeps_document_clean() {
        let backend = ResvgBackend::without_fonts();
        let mut doc = backend.parse(TWO_FRAME_DOC).unwrap();
        doc.find_by_id("stage").unwrap().set_attribute("xlink:href", "#f1");
        doc.prepare().unwrap();
        assert!(!doc.dirty);
        doc.find_by_id("stage").unwrap().set_attribute("xlink:href", "#f1");
        assert!(!doc.dirty, "identical value must not invalidate the tree");
    }

    #[test]
    fn unknown_id_finds_nothing() {
        let backend = ResvgBackend::without_fonts();
        let mut doc = backend.parse(TWO_FRAME_DOC).unwrap();
        assert!(doc.find_by_id("nope").is_none());
    }

    #[test]
    fn intrinsic_size_from_source() {
        let backend = ResvgBackend::without_fonts();
        let doc = backend.parse(TWO_FRAME_DOC).unwrap();
        assert_eq!(doc.intrinsic_size(), (8.0, 8.0));
    }

    #[test]
    fn partial_clear_only_touches_clip() {
        let mut canvas = PixmapCanvas::new(4, 4).unwrap();
        canvas.clear([10, 20, 30, 255]);
        canvas.save();
        canvas.clip_rect(RectF::new(0.0, 0.0, 2.0, 2.0));
        canvas.clear([0, 0, 0, 255]);
        canvas.restore();
        let mut px = Vec::new();
        canvas.read_bgra(&mut px);
        assert_eq!(&px[0..4], &[0, 0, 0, 255], "inside clip cleared");
        let far = (3 * 4 + 3) * 4;
        assert_eq!(&px[far..far + 4], &[10, 20, 30, 255], "outside clip kept");
    }
}
