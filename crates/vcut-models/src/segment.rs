//! Time-range segments and their validation.
//!
//! A request carries a JSON array of `{start, end}` records. Entries that are
//! not well-formed are dropped silently; the request only fails when nothing
//! usable remains.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors raised while turning a raw segment payload into a validated set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("segments payload is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("segments must be a non-empty array")]
    EmptyOrNotArray,

    #[error("no valid segments")]
    NoValidSegments,
}

/// A caller-specified range, in seconds, to keep from the source video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    /// Create a segment, returning `None` unless `0 <= start < end`.
    pub fn new(start: f64, end: f64) -> Option<Self> {
        let segment = Self { start, end };
        segment.is_valid().then_some(segment)
    }

    /// Length of the range in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start >= 0.0 && self.end > self.start
    }

    /// Interpret one untyped record. Both bounds must be JSON numbers.
    fn from_value(value: &Value) -> Option<Self> {
        let start = value.get("start")?.as_f64()?;
        let end = value.get("end")?.as_f64()?;
        Self::new(start, end)
    }
}

/// Ordered, non-empty list of well-formed segments.
///
/// Order is the caller's order and defines the concatenation order of the
/// output; it is never sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSegmentSet {
    segments: Vec<Segment>,
}

impl ValidatedSegmentSet {
    /// Keep the well-formed entries of `raw`, in order.
    pub fn validate(raw: &[Value]) -> Result<Self, ValidationError> {
        let segments: Vec<Segment> = raw.iter().filter_map(Segment::from_value).collect();

        let dropped = raw.len() - segments.len();
        if dropped > 0 {
            debug!(dropped, kept = segments.len(), "Dropped malformed segments");
        }

        if segments.is_empty() {
            return Err(ValidationError::NoValidSegments);
        }

        Ok(Self { segments })
    }

    /// Build a set from already-typed segments.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, ValidationError> {
        let segments: Vec<Segment> = segments.into_iter().filter(Segment::is_valid).collect();
        if segments.is_empty() {
            return Err(ValidationError::NoValidSegments);
        }
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn as_slice(&self) -> &[Segment] {
        &self.segments
    }

    /// Sum of all segment durations, i.e. the expected output length.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(Segment::duration).sum()
    }
}

impl<'a> IntoIterator for &'a ValidatedSegmentSet {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

/// Decode the `segments` form field into raw records.
///
/// A missing field is treated as an empty list. The result must be a
/// non-empty JSON array; its entries are checked later by
/// [`ValidatedSegmentSet::validate`].
pub fn parse_segments_payload(payload: Option<&str>) -> Result<Vec<Value>, ValidationError> {
    let text = payload.unwrap_or("[]");
    let value: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::MalformedJson(e.to_string()))?;

    match value {
        Value::Array(items) if !items.is_empty() => Ok(items),
        _ => Err(ValidationError::EmptyOrNotArray),
    }
}
