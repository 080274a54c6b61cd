//! ML inference boundary.
//!
//! Backends see pixels through `InferenceView::run_detector` and return labelled
//! boxes. The kernel keeps only the classes it cares about (people and animals)
//! and maps them into `DetectionEvent`s.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendHealth, BackendRegistry};
pub use result::{
    classify_label, BoundingBox, DetectedObject, DetectionEvent, DetectionKind, DetectionResult,
};
