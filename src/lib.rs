//! touchwatch
//!
//! Watches a camera feed for a person touching a cell phone, raises a
//! cooldown-gated audio alert and serves the annotated frames as an MJPEG
//! stream.
//!
//! # Pipeline
//!
//! Each frame flows acquire → detect → classify → decide → act → encode:
//!
//! 1. **Acquire**: a `FrameSource` yields the next frame, or fails transiently.
//! 2. **Detect**: a `DetectorBackend` returns labelled boxes for the frame.
//! 3. **Classify**: boxes are split into subjects (`person`) and targets
//!    (`cell phone`).
//! 4. **Decide**: the frame is flagged when any target's center lies strictly
//!    inside any subject box grown by the proximity factor.
//! 5. **Act**: flagged frames get the alert overlay; the `CooldownGate` decides
//!    whether the audio cue fires.
//! 6. **Encode**: the annotated frame becomes one JPEG part of the stream.
//!
//! # Module Structure
//!
//! - `geometry`: boxes, the proximity test and the pairwise decision
//! - `detect`: detections, classification and detector backends
//! - `frame`: owned RGB frames
//! - `ingest`: frame sources (synthetic, V4L2, HTTP MJPEG)
//! - `alert`: cooldown gate, audio cue and alert sinks
//! - `render`: box, label and alert overlay drawing
//! - `pipeline`: per-frame pipeline and the cancellable stream loop
//! - `transport`: JPEG/MJPEG encoding and the HTTP stream server
//! - `config`: daemon configuration

pub mod alert;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod transport;

pub use alert::{
    AlertCue, AlertDecision, AlertSink, AlertState, CommandSink, CooldownGate, LogSink,
};
pub use detect::{
    BackendRegistry, Detection, DetectionFrame, DetectorBackend, ObjectClass, ScriptedBackend,
    SharedDetector,
};
pub use frame::Frame;
pub use geometry::{any_touching, touches, BoundingBox};
pub use ingest::{open_source, FrameSource, SourceSettings, SourceStats, SyntheticSource};
pub use pipeline::{
    CancelToken, DecisionSettings, EncodedFrame, FrameDecision, FramePipeline, StreamLoop,
};
pub use render::Renderer;
pub use transport::{
    JpegEncoder, ServerConfig, SessionFactory, SessionSettings, SourcePool, StreamHandle,
    StreamServer,
};
