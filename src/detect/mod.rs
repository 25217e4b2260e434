mod backend;
mod backends;
pub mod labels;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractSettings};
pub use registry::{BackendRegistry, SharedDetector};
pub use result::{
    Classified, Detection, DetectionFrame, ObjectClass, SUBJECT_LABEL, TARGET_LABEL,
};
