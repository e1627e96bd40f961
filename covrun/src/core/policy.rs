//! Deterministic classification of test units by their policy markers.

use crate::core::types::Policy;

/// Skip/serial marker text. A marker matches wherever it appears in the
/// source as a plain substring, comments and longer identifiers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMarkers {
    skip: String,
    serial: String,
}

impl PolicyMarkers {
    pub fn new(skip_marker: &str, serial_marker: &str) -> Self {
        Self {
            skip: skip_marker.to_string(),
            serial: serial_marker.to_string(),
        }
    }
}

/// Classify a unit from its source text.
///
/// - `Skip` if the skip marker is present (dominates the serial marker).
/// - `Serial` if only the serial marker is present.
/// - `Parallel` otherwise.
pub fn classify_source(source: &str, markers: &PolicyMarkers) -> Policy {
    if source.contains(markers.skip.as_str()) {
        Policy::Skip
    } else if source.contains(markers.serial.as_str()) {
        Policy::Serial
    } else {
        Policy::Parallel
    }
}
