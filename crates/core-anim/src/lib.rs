//! Animation controller: SMIL records, canonical timing, frame changes.
//!
//! The controller is loaded once per document and is the only authority
//! on the time -> frame mapping (`timing` module). It exposes:
//! - the extracted [`Animation`] records,
//! - canonical document timing `(D_max, N_max)`,
//! - per-tick target states and frame-change lists for the renderer,
//! - an optional repeat-mode override applied uniformly to every
//!   animation (the transport's `repeat` control).
//!
//! Invariants:
//! * Either the full parse succeeds or no animation set is exposed; a
//!   load error leaves the caller's previous controller untouched.
//! * Every animation of a document shares one frame count. Documents
//!   violating this are rejected at load.
//! * `frame_changes(a, b)` is a pure function of its arguments; calling
//!   it twice with equal arguments yields equal output.

use thiserror::Error;

pub mod extract;
pub mod preprocess;
pub mod timing;

/// Repeat behavior of one animation (and of the transport override).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    /// Play the value list once, clamp at the last frame.
    Once,
    /// Wrap around forever.
    Loop,
    /// Bounce between first and last frame with a `2 * duration` cycle.
    PingPong,
    /// Loop `k` times, then clamp at the last frame.
    Count(u32),
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Once => write!(f, "once"),
            RepeatMode::Loop => write!(f, "loop"),
            RepeatMode::PingPong => write!(f, "pingpong"),
            RepeatMode::Count(k) => write!(f, "count:{k}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid repeat mode `{0}`")]
pub struct RepeatModeParseError(String);

impl std::str::FromStr for RepeatMode {
    type Err = RepeatModeParseError;

    /// Accepts `once`, `loop`, `pingpong`, `count:<k>`, or a bare
    /// positive integer as a count.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(RepeatMode::Once),
            "loop" => Ok(RepeatMode::Loop),
            "pingpong" => Ok(RepeatMode::PingPong),
            other => other
                .strip_prefix("count:")
                .unwrap_or(other)
                .parse::<u32>()
                .ok()
                .filter(|k| *k >= 1)
                .map(RepeatMode::Count)
                .ok_or_else(|| RepeatModeParseError(s.to_string())),
        }
    }
}

/// One discrete SMIL animation extracted from the canonical source.
#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    /// Id of the element whose attribute is mutated. Synthetic when the
    /// source left the target anonymous.
    pub target_id: String,
    pub attribute_name: String,
    /// Ordered discrete values; `values.len() >= 1`.
    pub values: Vec<String>,
    /// Seconds, strictly positive.
    pub duration: f64,
    pub repeat: RepeatMode,
}

/// Reported whenever an animation's frame index moved between two ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameChange {
    pub target_id: String,
    pub previous_frame: usize,
    pub current_frame: usize,
}

/// The `{target, attribute, value}` triple applied to the document for
/// one tick. Identical on the direct and pre-buffered paths for equal
/// evaluation times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetState {
    pub target_id: String,
    pub attribute_name: String,
    pub value: String,
}

/// Canonical document timing: the shared frame count and the longest
/// duration across all animations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentTiming {
    pub duration: f64,
    pub frame_count: usize,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed SVG: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("animate element at byte {offset} lacks attributeName")]
    MissingAttributeName { offset: usize },
    #[error("animate element at byte {offset} has an empty values entry")]
    EmptyValues { offset: usize },
    #[error("invalid clock value `{value}` at byte {offset}")]
    BadClockValue { value: String, offset: usize },
    #[error("invalid repeatCount `{value}` at byte {offset}")]
    BadRepeatCount { value: String, offset: usize },
    #[error("animate element at byte {offset} has no resolvable target id")]
    UnresolvedTarget { offset: usize },
    #[error("animations disagree on frame count ({first} vs {other})")]
    MismatchedFrameCounts { first: usize, other: usize },
}

/// Result of a successful load: canonical text plus its controller.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub canonical_source: String,
    pub controller: AnimationController,
}

#[derive(Debug, Clone)]
pub struct AnimationController {
    animations: Vec<Animation>,
    timing: DocumentTiming,
    /// Mode used for document-level indexing when no override is set:
    /// `Once` iff every animation is `Once`, else `Loop`.
    default_mode: RepeatMode,
    repeat_override: Option<RepeatMode>,
}

impl AnimationController {
    /// Parse `source`, returning the canonical preprocessed text and the
    /// controller built from it. Both rendering paths must consume the
    /// returned canonical text, never the raw input.
    pub fn load(source: &str) -> Result<LoadedDocument, ParseError> {
        let canonical_source = preprocess::canonicalize(source)?;
        let animations = extract::extract(&canonical_source)?;

        let mut frame_count = 1usize;
        let mut duration = 0.0f64;
        for (i, anim) in animations.iter().enumerate() {
            if i == 0 {
                frame_count = anim.values.len();
            } else if anim.values.len() != frame_count {
                return Err(ParseError::MismatchedFrameCounts {
                    first: frame_count,
                    other: anim.values.len(),
                });
            }
            duration = duration.max(anim.duration);
        }

        let default_mode = if !animations.is_empty()
            && animations.iter().all(|a| a.repeat == RepeatMode::Once)
        {
            RepeatMode::Once
        } else {
            RepeatMode::Loop
        };

        tracing::info!(
            target: "anim.load",
            animations = animations.len(),
            frame_count,
            duration,
            "controller_loaded"
        );

        Ok(LoadedDocument {
            canonical_source,
            controller: AnimationController {
                animations,
                timing: DocumentTiming {
                    duration,
                    frame_count,
                },
                default_mode,
                repeat_override: None,
            },
        })
    }

    pub fn animations(&self) -> &[Animation] {
        &self.animations
    }

    pub fn is_static(&self) -> bool {
        self.animations.is_empty()
    }

    /// Canonical `(D_max, N_max)` timing. A static document reports
    /// duration `0` and a single frame.
    pub fn document_timing(&self) -> DocumentTiming {
        self.timing
    }

    /// Transport-level repeat override; `None` restores the per-animation
    /// modes from the source.
    pub fn set_repeat_override(&mut self, mode: Option<RepeatMode>) {
        self.repeat_override = mode;
    }

    pub fn repeat_override(&self) -> Option<RepeatMode> {
        self.repeat_override
    }

    fn mode_for(&self, anim: &Animation) -> RepeatMode {
        self.repeat_override.unwrap_or(anim.repeat)
    }

    fn document_mode(&self) -> RepeatMode {
        self.repeat_override.unwrap_or(self.default_mode)
    }

    /// Frame index of `anim` at animation time `t`.
    pub fn frame_at(&self, anim: &Animation, t: f64) -> usize {
        timing::frame_index(self.mode_for(anim), anim.duration, anim.values.len(), t)
    }

    /// Current discrete value of `anim` at animation time `t`.
    pub fn value_at<'a>(&self, anim: &'a Animation, t: f64) -> &'a str {
        &anim.values[self.frame_at(anim, t)]
    }

    /// Document-level frame index at `t`, computed from canonical timing.
    pub fn document_frame_at(&self, t: f64) -> usize {
        timing::frame_index(
            self.document_mode(),
            self.timing.duration,
            self.timing.frame_count,
            t,
        )
    }

    /// Animation time at which playback stops advancing, or `None` when
    /// any animation repeats forever. Static documents end immediately.
    pub fn end_time(&self) -> Option<f64> {
        if self.animations.is_empty() {
            return Some(0.0);
        }
        let mut end = 0.0f64;
        for anim in &self.animations {
            match timing::end_time(self.mode_for(anim), anim.duration) {
                Some(t) => end = end.max(t),
                None => return None,
            }
        }
        Some(end)
    }

    /// The full `{target, attribute, value}` set applied to the document
    /// at animation time `t`.
    pub fn target_states(&self, t: f64) -> Vec<TargetState> {
        self.animations
            .iter()
            .map(|anim| TargetState {
                target_id: anim.target_id.clone(),
                attribute_name: anim.attribute_name.clone(),
                value: self.value_at(anim, t).to_string(),
            })
            .collect()
    }

    /// Frame changes between two evaluation times, one entry per
    /// animation whose index differs. Equal arguments yield no changes.
    pub fn frame_changes(&self, t_prev: f64, t_now: f64) -> Vec<FrameChange> {
        self.animations
            .iter()
            .filter_map(|anim| {
                let previous_frame = self.frame_at(anim, t_prev);
                let current_frame = self.frame_at(anim, t_now);
                (previous_frame != current_frame).then(|| FrameChange {
                    target_id: anim.target_id.clone(),
                    previous_frame,
                    current_frame,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER_DOC: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="100" height="100">
<use id="stage" xlink:href="#f0"><animate attributeName="xlink:href" values="#f0;#f1;#f2;#f3" dur="1s" repeatCount="indefinite"/></use>
<symbol id="f0"/><symbol id="f1"/><symbol id="f2"/><symbol id="f3"/>
</svg>"##;

    fn controller() -> AnimationController {
        AnimationController::load(PLAYER_DOC).unwrap().controller
    }

    #[test]
    fn document_timing_reflects_animation() {
        let c = controller();
        let t = c.document_timing();
        assert_eq!(t.frame_count, 4);
        assert_eq!(t.duration, 1.0);
    }

    #[test]
    fn static_document_has_unit_timing() {
        let src = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"><rect width="100" height="100" fill="red"/></svg>"#;
        let loaded = AnimationController::load(src).unwrap();
        let t = loaded.controller.document_timing();
        assert!(loaded.controller.is_static());
        assert_eq!(t.frame_count, 1);
        assert_eq!(t.duration, 0.0);
        assert_eq!(loaded.controller.document_frame_at(0.0), 0);
        assert_eq!(loaded.controller.end_time(), Some(0.0));
    }

    #[test]
    fn value_matches_frame_index() {
        let c = controller();
        let anim = &c.animations()[0];
        for t in [0.0, 0.1, 0.26, 0.51, 0.76, 0.99, 1.3, 2.7] {
            assert_eq!(c.value_at(anim, t), anim.values[c.frame_at(anim, t)]);
        }
    }

    #[test]
    fn frame_changes_between_ticks() {
        let c = controller();
        let changes = c.frame_changes(0.1, 0.3);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].target_id, "stage");
        assert_eq!(changes[0].previous_frame, 0);
        assert_eq!(changes[0].current_frame, 1);
    }

    #[test]
    fn frame_changes_idempotent_for_equal_times() {
        let c = controller();
        assert!(c.frame_changes(0.4, 0.4).is_empty());
        assert_eq!(c.frame_changes(0.1, 0.6), c.frame_changes(0.1, 0.6));
    }

    #[test]
    fn repeat_override_applies_to_every_path() {
        let mut c = controller();
        c.set_repeat_override(Some(RepeatMode::Once));
        let anim = &c.animations()[0].clone();
        // Once clamps past the duration instead of wrapping.
        assert_eq!(c.frame_at(anim, 5.0), 3);
        assert_eq!(c.document_frame_at(5.0), 3);
        assert_eq!(c.end_time(), Some(1.0));
        c.set_repeat_override(None);
        assert_eq!(c.frame_at(anim, 5.0), 0);
        assert_eq!(c.end_time(), None);
    }

    #[test]
    fn mismatched_frame_counts_rejected() {
        let src = r##"<svg xmlns="http://www.w3.org/2000/svg">
<g id="a"><animate attributeName="x" values="0;1;2" dur="1s"/></g>
<g id="b"><animate attributeName="y" values="0;1" dur="1s"/></g>
</svg>"##;
        assert!(matches!(
            AnimationController::load(src),
            Err(ParseError::MismatchedFrameCounts { first: 3, other: 2 })
        ));
    }

    #[test]
    fn duration_max_spans_animations() {
        let src = r##"<svg xmlns="http://www.w3.org/2000/svg">
<g id="a"><animate attributeName="x" values="0;1" dur="1s"/></g>
<g id="b"><animate attributeName="y" values="0;1" dur="2s"/></g>
</svg>"##;
        let c = AnimationController::load(src).unwrap().controller;
        assert_eq!(c.document_timing().duration, 2.0);
        assert_eq!(c.document_timing().frame_count, 2);
    }

    #[test]
    fn load_failure_exposes_nothing() {
        assert!(AnimationController::load("<svg").is_err());
    }

    #[test]
    fn count_end_time_and_default_mode() {
        let src = r##"<svg xmlns="http://www.w3.org/2000/svg">
<g id="a"><animate attributeName="x" values="0;1" dur="0.5s" repeatCount="2"/></g>
</svg>"##;
        let c = AnimationController::load(src).unwrap().controller;
        assert_eq!(c.end_time(), Some(1.0));
        // Count is finite but not Once, so document indexing defaults to Loop
        // until the transport overrides it.
        assert_eq!(c.document_frame_at(1.25), 1);
    }
}
