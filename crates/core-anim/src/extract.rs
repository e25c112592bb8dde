//! SMIL `<animate>` extraction from canonical source.
//!
//! Only the discrete value-list form is modeled: `values` split on `;`,
//! a finite `dur`, and `repeatCount`/`repeatDur` mapped onto a repeat
//! mode. `from`/`to`/`by` interpolation animations are outside the
//! player's model and are skipped with a warning rather than failing the
//! whole document.
//!
//! The extractor runs on the canonical text produced by
//! [`crate::preprocess::canonicalize`]; target resolution relies on the
//! ids that pass guarantees.

use std::sync::LazyLock;

use regex::Regex;

use crate::preprocess::{explicit_target, is_animate};
use crate::{Animation, ParseError, RepeatMode};

static CLOCK_FULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):([0-5]\d):([0-5]\d(?:\.\d+)?)$").unwrap());
static CLOCK_PARTIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-5]?\d):([0-5]\d(?:\.\d+)?)$").unwrap());
static CLOCK_TIMECOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)(h|min|s|ms)?$").unwrap());

/// Parse a SMIL clock value into seconds. `None` for anything the
/// grammar does not cover (including `indefinite`).
pub fn parse_clock_value(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Some(c) = CLOCK_FULL.captures(value) {
        let h: f64 = c[1].parse().ok()?;
        let m: f64 = c[2].parse().ok()?;
        let s: f64 = c[3].parse().ok()?;
        return Some(h * 3600.0 + m * 60.0 + s);
    }
    if let Some(c) = CLOCK_PARTIAL.captures(value) {
        let m: f64 = c[1].parse().ok()?;
        let s: f64 = c[2].parse().ok()?;
        return Some(m * 60.0 + s);
    }
    if let Some(c) = CLOCK_TIMECOUNT.captures(value) {
        let n: f64 = c[1].parse().ok()?;
        let scale = match c.get(2).map(|m| m.as_str()) {
            Some("h") => 3600.0,
            Some("min") => 60.0,
            Some("ms") => 0.001,
            Some("s") | None => 1.0,
            _ => return None,
        };
        return Some(n * scale);
    }
    None
}

fn parse_repeat(node: roxmltree::Node<'_, '_>, offset: usize) -> Result<RepeatMode, ParseError> {
    let count = node.attribute("repeatCount").map(str::trim);
    let repeat_dur = node.attribute("repeatDur").map(str::trim);
    if count == Some("indefinite") || repeat_dur == Some("indefinite") {
        return Ok(RepeatMode::Loop);
    }
    match count {
        None => Ok(RepeatMode::Once),
        Some(raw) => {
            let parsed: f64 = raw.parse().map_err(|_| ParseError::BadRepeatCount {
                value: raw.to_string(),
                offset,
            })?;
            if parsed < 1.0 || parsed.fract() != 0.0 || parsed > u32::MAX as f64 {
                return Err(ParseError::BadRepeatCount {
                    value: raw.to_string(),
                    offset,
                });
            }
            Ok(RepeatMode::Count(parsed as u32))
        }
    }
}

fn split_values(raw: &str) -> Vec<String> {
    let mut values: Vec<String> = raw.split(';').map(|v| v.trim().to_string()).collect();
    // SMIL permits a trailing separator; an empty tail entry is noise.
    if values.last().is_some_and(String::is_empty) {
        values.pop();
    }
    values
}

/// Extract every modeled animation from canonical source. Order follows
/// document order, which downstream consumers rely on for stable
/// frame-change reporting.
pub fn extract(canonical: &str) -> Result<Vec<Animation>, ParseError> {
    let doc = roxmltree::Document::parse(canonical)?;
    let mut animations = Vec::new();

    for node in doc.descendants().filter(is_animate) {
        let offset = node.range().start;

        let Some(attribute_name) = node.attribute("attributeName") else {
            return Err(ParseError::MissingAttributeName { offset });
        };

        let Some(raw_values) = node.attribute("values") else {
            tracing::warn!(
                target: "anim.extract",
                offset,
                attribute = attribute_name,
                "non_discrete_animate_skipped"
            );
            continue;
        };
        let values = split_values(raw_values);
        if values.is_empty() || values.iter().any(String::is_empty) {
            return Err(ParseError::EmptyValues { offset });
        }

        let dur_raw = node.attribute("dur").unwrap_or("");
        let duration =
            parse_clock_value(dur_raw).ok_or_else(|| ParseError::BadClockValue {
                value: dur_raw.to_string(),
                offset,
            })?;
        if duration <= 0.0 {
            return Err(ParseError::BadClockValue {
                value: dur_raw.to_string(),
                offset,
            });
        }

        let repeat = parse_repeat(node, offset)?;

        let target_id = match explicit_target(node) {
            Some(id) => id.to_string(),
            None => node
                .parent_element()
                .and_then(|p| p.attribute("id"))
                .ok_or(ParseError::UnresolvedTarget { offset })?
                .to_string(),
        };

        tracing::debug!(
            target: "anim.extract",
            target = target_id.as_str(),
            attribute = attribute_name,
            frames = values.len(),
            duration,
            ?repeat,
            "animation_extracted"
        );
        animations.push(Animation {
            target_id,
            attribute_name: attribute_name.to_string(),
            values,
            duration,
            repeat,
        });
    }

    Ok(animations)
}
