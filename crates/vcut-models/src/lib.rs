//! Shared data models for the VCut service.
//!
//! This crate provides:
//! - Time-range segments and their validation
//! - Per-request job state
//! - The fixed output encoding policy

pub mod encoding;
pub mod job;
pub mod segment;

// Re-export common types
pub use encoding::{EncodingConfig, OUTPUT_CONTENT_TYPE};
pub use job::{InvalidTransition, Job, JobId, JobState};
pub use segment::{parse_segments_payload, Segment, ValidatedSegmentSet, ValidationError};
