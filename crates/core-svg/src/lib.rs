//! SVG document and canvas boundary.
//!
//! The rendering pipeline never talks to a rasterizer library directly;
//! it goes through the trait family in this crate. [`SvgDocument`] is
//! the mutable polymorphic document (find node by id, set attribute,
//! container size, draw), [`Canvas`] is the pixel surface with the
//! save/restore/translate/scale/clip/clear capability set, and
//! [`RasterBackend`] ties a document type to its canvas type so the
//! render thread and the pre-buffer workers stay generic.
//!
//! The production backend (`backend` module) is resvg + tiny-skia with
//! text-tag patching for attribute mutation; `testing` carries a cheap
//! deterministic backend used by pipeline tests in dependent crates.
//!
//! Pixel format at this boundary is premultiplied BGRA, byte order
//! B, G, R, A.

use thiserror::Error;

pub mod backend;
pub mod bounds;
pub mod geom;
pub mod pixel;
pub mod testing;

pub use backend::{PixmapCanvas, ResvgBackend, ResvgDocument};
pub use bounds::DocumentGeometry;
pub use geom::{FitTransform, RectF};

/// Opaque black, the backdrop color for cleared frame regions.
pub const CLEAR_BLACK_BGRA: [u8; 4] = [0, 0, 0, 255];

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("SVG parse failed: {0}")]
    Parse(String),
    #[error("pixel surface allocation failed ({width}x{height})")]
    Surface { width: u32, height: u32 },
    #[error("render failed: {0}")]
    Render(String),
}

/// Mutable handle onto one element of a parsed document.
pub trait SvgNode {
    /// Stage an attribute mutation. Takes effect on the next
    /// [`SvgDocument::prepare`].
    fn set_attribute(&mut self, name: &str, value: &str);
}

/// Parsed, mutable in-memory SVG document.
pub trait SvgDocument {
    type Canvas: Canvas;
    type Node<'a>: SvgNode
    where
        Self: 'a;

    fn find_by_id<'a>(&'a mut self, id: &str) -> Option<Self::Node<'a>>;

    /// Fallback viewport for documents that do not declare their own
    /// width/height.
    fn set_container_size(&mut self, width: u32, height: u32);

    /// SVG user-space dimensions. Valid after [`Self::prepare`].
    fn intrinsic_size(&self) -> (f32, f32);

    /// Rebuild internal render state after attribute mutations. Kept
    /// separate from [`Self::render`] so callers can exclude document
    /// build time from render deadlines.
    fn prepare(&mut self) -> Result<(), DocumentError>;

    /// Draw the document through the canvas's current transform and
    /// clip.
    fn render(&mut self, canvas: &mut Self::Canvas) -> Result<(), DocumentError>;
}

/// Pixel surface capability consumed by document rendering.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, dx: f32, dy: f32);
    fn scale(&mut self, sx: f32, sy: f32);
    /// Intersect the current clip with `rect` (surface coordinates).
    fn clip_rect(&mut self, rect: RectF);
    /// Fill the current clip region (whole surface when unclipped) with
    /// a BGRA color.
    fn clear(&mut self, color: [u8; 4]);
    /// Copy the whole surface out as premultiplied BGRA rows.
    fn read_bgra(&self, dst: &mut Vec<u8>);
}

/// Factory pairing a document implementation with its canvas.
pub trait RasterBackend: Send + Sync + 'static {
    type Document: SvgDocument<Canvas = Self::Canvas> + Send;
    type Canvas: Canvas + Send;

    fn parse(&self, source: &str) -> Result<Self::Document, DocumentError>;
    fn create_canvas(&self, width: u32, height: u32) -> Result<Self::Canvas, DocumentError>;
}
