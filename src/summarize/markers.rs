//! Goal marker extraction from summarizer output.
//!
//! Markers are full lines in one of three shapes:
//! `[CHECKPOINT] text - STATUS`, `[DECISION] text [- LOCKED]`,
//! `[ARTIFACT] Created|Modified|Deleted path`.

use crate::policy::{ArtifactAction, GoalMarker};

/// Parse all goal markers out of a summary. Malformed marker lines are
/// skipped; the summary text itself is left untouched by the caller.
pub fn parse_goal_markers(summary: &str) -> Vec<GoalMarker> {
    let mut markers = Vec::new();

    for line in summary.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("[CHECKPOINT]") {
            let rest = rest.trim();
            if rest.is_empty() {
                continue;
            }
            let (text, status) = match rest.rsplit_once(" - ") {
                Some((text, status)) if !status.trim().is_empty() => {
                    (text.trim().to_string(), status.trim().to_string())
                }
                _ => (rest.to_string(), "PENDING".to_string()),
            };
            markers.push(GoalMarker::Checkpoint { text, status });
        } else if let Some(rest) = line.strip_prefix("[DECISION]") {
            let rest = rest.trim();
            if rest.is_empty() {
                continue;
            }
            let (text, locked) = match rest.strip_suffix("- LOCKED") {
                Some(text) => (text.trim().to_string(), true),
                None => (rest.to_string(), false),
            };
            markers.push(GoalMarker::Decision { text, locked });
        } else if let Some(rest) = line.strip_prefix("[ARTIFACT]") {
            let rest = rest.trim();
            let Some((action_word, path)) = rest.split_once(' ') else {
                continue;
            };
            let Some(action) = ArtifactAction::parse(action_word) else {
                continue;
            };
            let path = path.trim();
            if path.is_empty() {
                continue;
            }
            markers.push(GoalMarker::Artifact {
                action,
                path: path.to_string(),
            });
        }
    }

    markers
}
