//! Business logic services.

pub mod lifecycle;
pub mod retention;
pub mod upload;

pub use lifecycle::{JobGuard, JobRunner, ProcessedVideo, TrackedFileStream};
pub use retention::{
    ManualScheduler, RetentionPolicy, RetentionScheduler, Scheduler, TokioScheduler,
};
pub use upload::{receive_upload, StoredUpload, UploadForm, ALLOWED_VIDEO_TYPES};
