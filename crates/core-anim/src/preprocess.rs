//! Canonical-source preprocessing: synthetic id injection.
//!
//! SMIL animations address their target either through an `href`
//! (`xlink:href`) on the `<animate>` element or implicitly through the
//! parent element. The renderer mutates targets by id only, so every
//! implicit target must carry one. This pass scans the source and splices
//! an ` id="..."` attribute into each anonymous target's start tag. Ids
//! are derived from the byte offset of the target's `<` in the input, so
//! the output is stable across runs for identical input.
//!
//! Invariants:
//! * Idempotent: running the pass on its own output is a byte-for-byte
//!   no-op (all targets already have ids, nothing is spliced).
//! * The pass never reserializes; untouched bytes pass through verbatim,
//!   so element offsets recorded by later stages refer to this exact text.

use crate::ParseError;

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

fn synthetic_id(offset: usize) -> String {
    format!("smil-target-{offset}")
}

/// Resolve the id an `<animate>` element targets, without injecting
/// anything. Returns `None` when the target is the anonymous parent.
pub(crate) fn explicit_target<'a>(node: roxmltree::Node<'a, 'a>) -> Option<&'a str> {
    node.attribute("href")
        .or_else(|| node.attribute((XLINK_NS, "href")))
        .and_then(|href| href.strip_prefix('#'))
}

/// Produce the canonical preprocessed form of `source`.
pub fn canonicalize(source: &str) -> Result<String, ParseError> {
    let doc = roxmltree::Document::parse(source)?;

    // Start-tag offsets of anonymous animation targets, deduped (several
    // animate children may share one parent).
    let mut anchors: Vec<usize> = Vec::new();
    for node in doc.descendants().filter(is_animate) {
        if explicit_target(node).is_some() {
            continue;
        }
        let Some(parent) = node.parent_element() else {
            continue;
        };
        if parent.attribute("id").is_some() {
            continue;
        }
        let offset = parent.range().start;
        if !anchors.contains(&offset) {
            anchors.push(offset);
        }
    }

    if anchors.is_empty() {
        return Ok(source.to_string());
    }

    // Splice back-to-front so earlier offsets stay valid.
    anchors.sort_unstable();
    let mut out = source.to_string();
    for &offset in anchors.iter().rev() {
        let insert_at = tag_name_end(source, offset);
        let attr = format!(" id=\"{}\"", synthetic_id(offset));
        out.insert_str(insert_at, &attr);
        tracing::debug!(
            target: "anim.preprocess",
            offset,
            "synthetic_id_injected"
        );
    }
    Ok(out)
}

pub(crate) fn is_animate(node: &roxmltree::Node<'_, '_>) -> bool {
    node.is_element() && node.tag_name().name() == "animate"
}

/// Byte offset just past the tag name of the start tag beginning at
/// `open` (which indexes the `<`). Attributes are inserted here.
fn tag_name_end(source: &str, open: usize) -> usize {
    let bytes = source.as_bytes();
    debug_assert_eq!(bytes[open], b'<');
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'/' => break,
            _ => i += 1,
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANON_TARGET: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="10" height="10">
<use xlink:href="#frame0"><animate attributeName="xlink:href" values="#frame0;#frame1" dur="1s" repeatCount="indefinite"/></use>
<symbol id="frame0"/><symbol id="frame1"/>
</svg>"##;

    #[test]
    fn injects_id_into_anonymous_target() {
        let canonical = canonicalize(ANON_TARGET).unwrap();
        assert!(canonical.contains("<use id=\"smil-target-"));
        // The animate element itself is untouched.
        assert_eq!(
            canonical.matches("<animate").count(),
            ANON_TARGET.matches("<animate").count()
        );
    }

    #[test]
    fn idempotent_byte_for_byte() {
        let once = canonicalize(ANON_TARGET).unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn existing_id_passes_through_unchanged() {
        let src = r##"<svg xmlns="http://www.w3.org/2000/svg"><g id="anchor"><animate attributeName="opacity" values="0;1" dur="1s"/></g></svg>"##;
        assert_eq!(canonicalize(src).unwrap(), src);
    }

    #[test]
    fn href_target_needs_no_injection() {
        let src = r##"<svg xmlns="http://www.w3.org/2000/svg"><rect width="1" height="1"/><animate href="#r" attributeName="opacity" values="0;1" dur="1s"/></svg>"##;
        assert_eq!(canonicalize(src).unwrap(), src);
    }

    #[test]
    fn shared_parent_gets_one_id() {
        let src = r##"<svg xmlns="http://www.w3.org/2000/svg"><g><animate attributeName="x" values="0;1" dur="1s"/><animate attributeName="y" values="0;1" dur="1s"/></g></svg>"##;
        let canonical = canonicalize(src).unwrap();
        assert_eq!(canonical.matches("smil-target-").count(), 1);
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(canonicalize("<svg><unclosed").is_err());
    }
}
