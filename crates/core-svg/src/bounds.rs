//! Per-element bounding boxes extracted from the canonical source.
//!
//! Runs once per document load. Bounds are in SVG user coordinates and
//! feed the dirty-region tracker; a target that usvg cannot resolve to a
//! concrete node simply stays absent, which downstream policy treats as
//! "no partial rendering for that target".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::geom::RectF;
use crate::DocumentError;

/// Intrinsic document size plus the bounds of the requested targets.
#[derive(Debug, Clone, Default)]
pub struct DocumentGeometry {
    pub width: f32,
    pub height: f32,
    pub bounds: HashMap<String, RectF>,
}

/// Parse `canonical` and collect bounds for `target_ids`.
pub fn extract_geometry<'a>(
    canonical: &str,
    target_ids: impl IntoIterator<Item = &'a str>,
    fontdb: Arc<usvg::fontdb::Database>,
) -> Result<DocumentGeometry, DocumentError> {
    let wanted: HashSet<&str> = target_ids.into_iter().collect();

    let mut options = usvg::Options::default();
    options.fontdb = fontdb;
    let tree = usvg::Tree::from_str(canonical, &options)
        .map_err(|e| DocumentError::Parse(e.to_string()))?;

    let mut bounds = HashMap::new();
    collect(tree.root(), &wanted, &mut bounds);

    let missing = wanted.len() - bounds.len();
    if missing > 0 {
        tracing::debug!(
            target: "svg.bounds",
            missing,
            resolved = bounds.len(),
            "bounds_partially_resolved"
        );
    }

    let size = tree.size();
    Ok(DocumentGeometry {
        width: size.width(),
        height: size.height(),
        bounds,
    })
}

fn collect(group: &usvg::Group, wanted: &HashSet<&str>, out: &mut HashMap<String, RectF>) {
    for node in group.children() {
        match node {
            usvg::Node::Group(g) => {
                record(g.id(), {
                    let b = g.abs_bounding_box();
                    RectF::new(b.x(), b.y(), b.width(), b.height())
                }, wanted, out);
                collect(g, wanted, out);
            }
            usvg::Node::Path(p) => {
                let b = p.abs_bounding_box();
                record(p.id(), RectF::new(b.x(), b.y(), b.width(), b.height()), wanted, out);
            }
            usvg::Node::Image(i) => {
                let b = i.abs_bounding_box();
                record(i.id(), RectF::new(b.x(), b.y(), b.width(), b.height()), wanted, out);
            }
            usvg::Node::Text(t) => {
                let b = t.abs_bounding_box();
                record(t.id(), RectF::new(b.x(), b.y(), b.width(), b.height()), wanted, out);
            }
        }
    }
}

fn record(id: &str, rect: RectF, wanted: &HashSet<&str>, out: &mut HashMap<String, RectF>) {
    if !id.is_empty() && wanted.contains(id) && !out.contains_key(id) {
        out.insert(id.to_string(), rect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Arc<usvg::fontdb::Database> {
        Arc::new(usvg::fontdb::Database::new())
    }

    #[test]
    fn extracts_bounds_for_known_target() {
        let src = r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200">
<rect id="box" x="10" y="10" width="20" height="20" fill="green"/>
</svg>"#;
        let geometry = extract_geometry(src, ["box"], db()).unwrap();
        assert_eq!(geometry.width, 200.0);
        assert_eq!(geometry.height, 200.0);
        let b = geometry.bounds.get("box").expect("bounds resolved");
        assert_eq!((b.x, b.y, b.w, b.h), (10.0, 10.0, 20.0, 20.0));
    }

    #[test]
    fn unknown_target_is_tolerated() {
        let src = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><rect width="1" height="1"/></svg>"#;
        let geometry = extract_geometry(src, ["ghost"], db()).unwrap();
        assert!(geometry.bounds.is_empty());
    }

    #[test]
    fn malformed_source_fails() {
        assert!(extract_geometry("<svg", [], db()).is_err());
    }
}
