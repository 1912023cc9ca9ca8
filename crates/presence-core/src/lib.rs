//! presence-core - Face recognition attendance engine.
//!
//! Matches probe embeddings against an enrolled gallery and records a
//! once-per-day attendance event per recognized person. Detection and
//! embedding use SCRFD and ArcFace via ONNX Runtime behind the
//! [`Extractor`] trait.

pub mod align;
pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod recognizer;
pub mod session;
pub mod system;
pub mod types;

pub use extractor::{ExtractError, Extractor, OnnxExtractor};
pub use gallery::{Gallery, GalleryError, LoadReport, SampleDir, SampleSource};
pub use ledger::{AttendanceRecord, Ledger, LedgerError};
pub use matcher::{CosineMatcher, EuclideanMatcher, MatchPolicy, Matcher, Metric};
pub use session::{
    CaptureError, Clock, FrameSource, RecognitionSession, SessionConfig, SessionState,
    SessionSummary, StopReason, Surface, SystemClock, VisibleFace, VisibleFaces,
};
pub use system::{
    AttendanceSystem, EnrollOutcome, SampleProvider, Settings, StillImage, SystemError,
};
pub use types::{Embedding, FaceBox, Identity, MatchResult, Probe, Region};
