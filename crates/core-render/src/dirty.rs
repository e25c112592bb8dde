//! Dirty region tracking for partial renders.
//!
//! The tracker accumulates target ids whose frame index moved since the
//! last clear and exposes the union of their bounding rectangles in SVG
//! user coordinates. Policy (`use_full_render`) is re-evaluated every
//! tick from the actual dirty set, never cached.
//!
//! Invariants:
//! * `mark_dirty` is O(1) and ignores ids that are not animation
//!   targets.
//! * An id may be dirty without bounds (extraction is best effort);
//!   such ids force a full render when present.

use std::collections::{HashMap, HashSet};

use core_svg::RectF;

/// Share of the document area above which a partial render stops paying
/// for itself and the tracker escalates to a full frame. Chosen in the
/// middle of the useful range after the pathological flip-book cases
/// (every frame replaces most of the canvas) showed no win beyond it.
pub const FULL_RENDER_AREA_RATIO: f32 = 0.6;

#[derive(Debug, Default)]
pub struct DirtyRegionTracker {
    targets: HashSet<String>,
    bounds: HashMap<String, RectF>,
    dirty: HashSet<String>,
}

impl DirtyRegionTracker {
    /// `targets` is the set of animation target ids; `bounds` the
    /// best-effort bounds index for them.
    pub fn new(targets: HashSet<String>, bounds: HashMap<String, RectF>) -> Self {
        Self {
            targets,
            bounds,
            dirty: HashSet::new(),
        }
    }

    pub fn tracked_animations(&self) -> usize {
        self.targets.len()
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub fn mark_dirty(&mut self, target_id: &str, frame_index: usize) {
        if !self.targets.contains(target_id) {
            return;
        }
        tracing::trace!(
            target: "render.dirty",
            id = target_id,
            frame = frame_index,
            "mark_dirty"
        );
        self.dirty.insert(target_id.to_string());
    }

    /// Union of bounds for currently dirty ids (SVG user coordinates).
    pub fn union_rect(&self) -> RectF {
        let mut union = RectF::default();
        for id in &self.dirty {
            if let Some(rect) = self.bounds.get(id) {
                union = union.union(rect);
            }
        }
        union
    }

    /// True when partial rendering is not applicable this tick: no
    /// animations at all, a dirty id whose bounds are unknown (its
    /// region cannot be clipped, so the whole frame repaints), or the
    /// union covering most of the document.
    pub fn use_full_render(&self, svg_w: f32, svg_h: f32) -> bool {
        if self.targets.is_empty() || self.dirty.is_empty() {
            return true;
        }
        if self.dirty.iter().any(|id| !self.bounds.contains_key(id)) {
            return true;
        }
        let union = self.union_rect();
        let doc_area = svg_w * svg_h;
        doc_area <= 0.0 || union.area() >= FULL_RENDER_AREA_RATIO * doc_area
    }

    pub fn clear(&mut self) {
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DirtyRegionTracker {
        let targets: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let mut bounds = HashMap::new();
        bounds.insert("a".to_string(), RectF::new(10.0, 10.0, 20.0, 20.0));
        bounds.insert("b".to_string(), RectF::new(50.0, 50.0, 120.0, 120.0));
        // "c" deliberately has no bounds.
        DirtyRegionTracker::new(targets, bounds)
    }

    #[test]
    fn unknown_id_is_ignored() {
        let mut t = tracker();
        t.mark_dirty("ghost", 1);
        assert_eq!(t.dirty_len(), 0);
    }

    #[test]
    fn union_of_dirty_bounds() {
        let mut t = tracker();
        t.mark_dirty("a", 1);
        assert_eq!(t.union_rect(), RectF::new(10.0, 10.0, 20.0, 20.0));
        t.mark_dirty("b", 2);
        assert_eq!(t.union_rect(), RectF::new(10.0, 10.0, 160.0, 160.0));
    }

    #[test]
    fn zero_animations_forces_full() {
        let t = DirtyRegionTracker::new(HashSet::new(), HashMap::new());
        assert!(t.use_full_render(100.0, 100.0));
    }

    #[test]
    fn dirty_without_bounds_forces_full() {
        let mut t = tracker();
        t.mark_dirty("c", 3);
        assert!(t.use_full_render(200.0, 200.0));
    }

    #[test]
    fn small_union_stays_partial() {
        let mut t = tracker();
        t.mark_dirty("a", 1);
        assert!(!t.use_full_render(200.0, 200.0));
    }

    #[test]
    fn large_union_escalates() {
        let mut t = tracker();
        t.mark_dirty("b", 1);
        // 120x120 = 14400 over 150x150 = 22500 -> 64% >= 60%.
        assert!(t.use_full_render(150.0, 150.0));
    }

    #[test]
    fn clear_empties_dirty_set() {
        let mut t = tracker();
        t.mark_dirty("a", 1);
        t.clear();
        assert_eq!(t.dirty_len(), 0);
        assert!(t.union_rect().is_empty());
    }

    #[test]
    fn mixed_bounds_and_boundless_forces_full() {
        let mut t = tracker();
        t.mark_dirty("a", 1);
        t.mark_dirty("c", 1);
        // Clipping to "a"'s union would leave "c"'s region stale.
        assert!(t.use_full_render(200.0, 200.0));
    }

    #[test]
    fn empty_dirty_set_reports_full() {
        let t = tracker();
        assert!(t.use_full_render(200.0, 200.0));
    }
}
