//! Locate-and-patch engine for decompressed payload buffers.
//!
//! The flag bytes this tool clears have no unique signature of their
//! own, so each rule reaches them indirectly: scan forward for a
//! textual marker, search backward from the marker for the closest
//! sentinel byte run, then step a fixed signed distance from the
//! sentinel start. A byte is only rewritten when it holds exactly 0x01;
//! anything else means the flag is already clear or the heuristic
//! landed on an unrelated byte, and in both cases the buffer must stay
//! untouched.

use tracing::{debug, info, warn};

use crate::hexdump;
use crate::rules::PatchRule;

/// Radius of the hex window attached to match diagnostics.
const CONTEXT_RADIUS: usize = 250;

/// Byte value marking a flag as set, and what it is rewritten to.
const FLAG_SET: u8 = 0x01;
const FLAG_CLEAR: u8 = 0x00;

/// What happened at one marker occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The target byte held 0x01 and was cleared, or would have been
    /// when `applied` is false (dry run).
    Patched { target: usize, applied: bool },
    /// The target byte held something other than 0x01 and was left
    /// alone. Expected whenever the flag is already clear.
    ByteMismatch { target: usize, value: u8 },
    /// No sentinel run inside the back-search window.
    SentinelNotFound,
    /// The sentinel was found but the offset landed outside the buffer.
    OutOfBounds { target: i64 },
}

/// One record per marker occurrence, in scan order.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule: String,
    pub marker_index: usize,
    pub sentinel_index: Option<usize>,
    pub outcome: MatchOutcome,
    /// Hex window around the point of interest: the target byte when it
    /// was in bounds, the marker when no sentinel was found. Empty for
    /// out-of-bounds targets.
    pub context: String,
}

/// Result of one engine pass over a buffer.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// True iff at least one byte was rewritten. Never set on a dry run.
    pub modified: bool,
    pub matches: Vec<RuleMatch>,
}

/// Apply every rule to `data`, reporting every marker occurrence and
/// clearing confirmed flag bytes when `apply` is true.
///
/// Markers are matched non-overlapping: the scan resumes just past each
/// occurrence whether or not it produced a patch. For each occurrence
/// the *rightmost* sentinel run that fits entirely inside the
/// back-search window (and entirely before the marker) is the anchor.
/// "Not found" and "out of bounds" are normal outcomes of the
/// heuristic, recorded and skipped rather than raised.
pub fn scan_and_patch(data: &mut [u8], rules: &[PatchRule], apply: bool) -> ScanReport {
    let mut report = ScanReport::default();

    for rule in rules {
        let marker = rule.marker.as_bytes();
        let mut from = 0usize;

        while let Some(marker_index) = find_from(data, marker, from) {
            // Resume past this occurrence no matter what happens below,
            // so overlapping markers are never re-matched.
            from = marker_index + marker.len();

            info!(rule = %rule.name, index = marker_index, "marker found");

            let window_start = marker_index.saturating_sub(rule.search_back_bytes);
            let sentinel_index =
                match rfind_within(data, &rule.sentinel, window_start, marker_index) {
                    Some(index) => index,
                    None => {
                        warn!(
                            rule = %rule.name,
                            index = marker_index,
                            "no sentinel run within the back-search window"
                        );
                        report.matches.push(RuleMatch {
                            rule: rule.name.clone(),
                            marker_index,
                            sentinel_index: None,
                            outcome: MatchOutcome::SentinelNotFound,
                            context: hexdump::format_window(data, marker_index, CONTEXT_RADIUS),
                        });
                        continue;
                    }
                };

            debug!(rule = %rule.name, sentinel_index, "sentinel found");

            let target = sentinel_index as i64 + rule.sentinel_offset;
            if target < 0 || target >= data.len() as i64 {
                warn!(rule = %rule.name, target, "target index out of bounds, skipping");
                report.matches.push(RuleMatch {
                    rule: rule.name.clone(),
                    marker_index,
                    sentinel_index: Some(sentinel_index),
                    outcome: MatchOutcome::OutOfBounds { target },
                    context: String::new(),
                });
                continue;
            }

            let target = target as usize;
            let context = hexdump::format_window(data, target, CONTEXT_RADIUS);
            let value = data[target];

            let outcome = if value == FLAG_SET {
                if apply {
                    data[target] = FLAG_CLEAR;
                    report.modified = true;
                    info!(rule = %rule.name, target, "cleared flag byte");
                } else {
                    info!(rule = %rule.name, target, "flag byte is set, would clear (dry run)");
                }
                MatchOutcome::Patched { target, applied: apply }
            } else {
                info!(
                    rule = %rule.name,
                    target,
                    value,
                    "byte does not hold the set-flag value, leaving untouched"
                );
                MatchOutcome::ByteMismatch { target, value }
            };

            report.matches.push(RuleMatch {
                rule: rule.name.clone(),
                marker_index,
                sentinel_index: Some(sentinel_index),
                outcome,
                context,
            });
        }
    }

    report
}

/// First occurrence of `needle` at or after `from`.
fn find_from(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= data.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Rightmost occurrence of `needle` lying entirely within
/// `data[start..end]`.
fn rfind_within(data: &[u8], needle: &[u8], start: usize, end: usize) -> Option<usize> {
    let end = end.min(data.len());
    if needle.is_empty() || start >= end || end - start < needle.len() {
        return None;
    }
    data[start..end]
        .windows(needle.len())
        .rposition(|window| window == needle)
        .map(|pos| pos + start)
}
