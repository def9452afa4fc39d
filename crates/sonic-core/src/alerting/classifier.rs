//! Threshold classification
//!
//! Maps a metric value onto a severity tier given a family's three
//! boundaries and its direction. Ties at a boundary belong to the more
//! severe tier.

use crate::models::{Direction, Severity, ThresholdConfig};

/// Classify `value` against `thresholds`.
///
/// Returns `None` when the family is disabled: the caller skips the metric
/// entirely instead of feeding a `Severity::None` into the latch.
pub fn classify(value: f64, thresholds: &ThresholdConfig) -> Option<Severity> {
    if !thresholds.enabled {
        return None;
    }

    let crossed = |boundary: Option<f64>| match (boundary, thresholds.direction) {
        (None, _) => false,
        (Some(b), Direction::IncreasingBad) => value >= b,
        (Some(b), Direction::DecreasingBad) => value <= b,
    };

    let severity = if crossed(thresholds.high) {
        Severity::High
    } else if crossed(thresholds.medium) {
        Severity::Medium
    } else if crossed(thresholds.low) {
        Severity::Low
    } else {
        Severity::None
    };

    Some(severity)
}
