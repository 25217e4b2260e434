//! Per-frame decision pipeline and the streaming loop around it.
//!
//! `FramePipeline` runs one frame through detect, classify, decide and act.
//! `StreamLoop` wraps a frame source and a pipeline into a lazy, cancellable
//! iterator of encoded frames: consumers pull at their own pace and nothing is
//! buffered beyond the frame in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::alert::{AlertCue, AlertDecision, AlertSink, CooldownGate};
use crate::detect::{Detection, DetectionFrame, SharedDetector};
use crate::frame::Frame;
use crate::geometry::any_touching;
use crate::ingest::FrameSource;
use crate::render::Renderer;
use crate::transport::JpegEncoder;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Decision settings shared by every stream.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionSettings {
    /// Subject box growth factor, > 1.0.
    pub proximity: f64,
    pub cooldown: Duration,
    pub alert_text: String,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            proximity: 1.1,
            cooldown: Duration::from_secs(4),
            alert_text: "Put the phone down".to_string(),
        }
    }
}

/// What happened to one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameDecision {
    pub sequence: u64,
    pub subjects: usize,
    pub targets: usize,
    pub flagged: bool,
    pub alert: AlertDecision,
}

/// Runs detection and the touch decision for one stream.
///
/// Owns its `CooldownGate`; the detector and sink may be shared.
pub struct FramePipeline {
    detector: SharedDetector,
    renderer: Renderer,
    gate: CooldownGate,
    sink: Arc<dyn AlertSink>,
    cue: AlertCue,
    proximity: f64,
}

impl FramePipeline {
    pub fn new(
        detector: SharedDetector,
        sink: Arc<dyn AlertSink>,
        cue: AlertCue,
        settings: &DecisionSettings,
    ) -> Self {
        Self {
            detector,
            renderer: Renderer::new(settings.alert_text.clone()),
            gate: CooldownGate::new(settings.cooldown),
            sink,
            cue,
            proximity: settings.proximity,
        }
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    /// Process one frame observed at `now`, annotating it in place.
    ///
    /// A detector failure is logged and treated as an empty frame.
    pub fn process(&mut self, frame: &mut Frame, now: Instant) -> FrameDecision {
        let detections = match self.detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("detector failed on frame {}: {}", frame.sequence, err);
                Vec::new()
            }
        };
        let detection_frame = DetectionFrame::new(detections);
        let classified = detection_frame.classify();
        let flagged = any_touching(&classified.subjects, &classified.targets, self.proximity);
        let alert = self.gate.evaluate(flagged, now);

        match alert {
            AlertDecision::Fire => {
                log::info!(
                    "touch detected on frame {}; alert fired (cooldown {:.1}s)",
                    frame.sequence,
                    self.gate.cooldown().as_secs_f64()
                );
                self.sink.play(&self.cue);
            }
            AlertDecision::Suppressed { remaining } => {
                log::debug!(
                    "touch detected on frame {}; alert suppressed for {:.1}s",
                    frame.sequence,
                    remaining.as_secs_f64()
                );
            }
            AlertDecision::Clear => {}
        }

        let image = frame.image_mut();
        self.renderer
            .draw_detections(image, detection_frame.detections());
        if flagged {
            self.renderer.draw_alert(image);
        }

        FrameDecision {
            sequence: frame.sequence,
            subjects: classified.subjects.len(),
            targets: classified.targets.len(),
            flagged,
            alert,
        }
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut guard = self
            .detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        guard.detect(frame)
    }
}

/// Cooperative cancellation flag, checked at iteration boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early on cancellation. Returns true
    /// when cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }
}

/// One encoded frame ready for the transport.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub decision: FrameDecision,
}

/// Counters for one stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_emitted: u64,
    pub acquire_failures: u64,
    pub encode_failures: u64,
    pub frames_flagged: u64,
    pub alerts_fired: u64,
}

/// The acquire → decide → encode loop for one stream.
///
/// Ends (returns `None`) only when cancelled. Acquisition failures back off
/// for `retry_delay` and retry forever; encoding failures drop the frame.
pub struct StreamLoop {
    source: Box<dyn FrameSource>,
    pipeline: FramePipeline,
    encoder: JpegEncoder,
    cancel: CancelToken,
    retry_delay: Duration,
    stats: LoopStats,
    last_health_log: Instant,
}

impl StreamLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        pipeline: FramePipeline,
        encoder: JpegEncoder,
        cancel: CancelToken,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            pipeline,
            encoder,
            cancel,
            retry_delay,
            stats: LoopStats::default(),
            last_health_log: Instant::now(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// Stop the loop and hand the source back for reuse.
    pub fn into_source(self) -> Box<dyn FrameSource> {
        self.source
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        let source = self.source.stats();
        log::info!(
            "stream health={} source={} captured={} emitted={} flagged={} alerts={} acquire_failures={}",
            self.source.is_healthy(),
            source.source,
            source.frames_captured,
            self.stats.frames_emitted,
            self.stats.frames_flagged,
            self.stats.alerts_fired,
            self.stats.acquire_failures
        );
        self.last_health_log = Instant::now();
    }
}

impl Iterator for StreamLoop {
    type Item = EncodedFrame;

    fn next(&mut self) -> Option<EncodedFrame> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            let mut frame = match self.source.next_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    self.stats.acquire_failures += 1;
                    log::warn!(
                        "frame acquisition failed ({}); retrying in {}ms",
                        err,
                        self.retry_delay.as_millis()
                    );
                    if self.cancel.sleep(self.retry_delay) {
                        return None;
                    }
                    continue;
                }
            };

            let decision = self.pipeline.process(&mut frame, Instant::now());
            if decision.flagged {
                self.stats.frames_flagged += 1;
            }
            if decision.alert.fired() {
                self.stats.alerts_fired += 1;
            }
            self.log_health();

            match self.encoder.encode(&frame) {
                Ok(jpeg) => {
                    self.stats.frames_emitted += 1;
                    log::trace!(
                        "frame {} encoded: {} bytes, {}ms after capture",
                        frame.sequence,
                        jpeg.len(),
                        frame.age_ms()
                    );
                    return Some(EncodedFrame { jpeg, decision });
                }
                Err(err) => {
                    self.stats.encode_failures += 1;
                    log::warn!("frame {} encode failed: {}", frame.sequence, err);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertState;
    use crate::detect::{DetectorBackend, ScriptedBackend};
    use crate::geometry::BoundingBox;
    use crate::ingest::SourceStats;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSink {
        plays: Mutex<u32>,
    }

    impl CountingSink {
        fn plays(&self) -> u32 {
            *self.plays.lock().unwrap()
        }
    }

    impl AlertSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn play(&self, _cue: &AlertCue) {
            *self.plays.lock().unwrap() += 1;
        }
    }

    /// Source that replays a script of successes and failures.
    struct ScriptedSource {
        script: VecDeque<bool>,
        sequence: u64,
    }

    impl ScriptedSource {
        fn new(script: &[bool]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                sequence: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            match self.script.pop_front() {
                Some(false) => Err(anyhow!("camera hiccup")),
                _ => {
                    self.sequence += 1;
                    Ok(Frame::blank(160, 240, self.sequence))
                }
            }
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.sequence,
                failures: 0,
                source: "scripted".to_string(),
            }
        }
    }

    /// Source that yields frames of the listed sizes, in order.
    struct SizedSource {
        sizes: VecDeque<(u32, u32)>,
        sequence: u64,
    }

    impl FrameSource for SizedSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            let (width, height) = self
                .sizes
                .pop_front()
                .ok_or_else(|| anyhow!("no more frames"))?;
            self.sequence += 1;
            Ok(Frame::blank(width, height, self.sequence))
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.sequence,
                failures: 0,
                source: "sized".to_string(),
            }
        }
    }

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("model exploded"))
        }
    }

    fn person() -> Detection {
        Detection::new("person", BoundingBox::new(0.0, 0.0, 100.0, 200.0).unwrap())
    }

    fn phone_near() -> Detection {
        Detection::new("cell phone", BoundingBox::new(90.0, 10.0, 110.0, 30.0).unwrap())
    }

    fn phone_far() -> Detection {
        Detection::new(
            "cell phone",
            BoundingBox::new(200.0, 200.0, 220.0, 220.0).unwrap(),
        )
    }

    fn test_cue(dir: &tempfile::TempDir) -> AlertCue {
        let path = dir.path().join("cue.mp3");
        std::fs::write(&path, b"ID3").unwrap();
        AlertCue::load(path).unwrap()
    }

    fn pipeline_with(
        backend: impl DetectorBackend + 'static,
        sink: Arc<CountingSink>,
        cue: AlertCue,
    ) -> FramePipeline {
        let detector: SharedDetector = Arc::new(Mutex::new(backend));
        FramePipeline::new(detector, sink, cue, &DecisionSettings::default())
    }

    #[test]
    fn touching_pair_flags_and_fires_once_per_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let backend = ScriptedBackend::repeating(vec![person(), phone_near()]);
        let mut pipeline = pipeline_with(backend, sink.clone(), test_cue(&dir));

        let t0 = Instant::now();
        let mut frame = Frame::blank(320, 240, 1);
        let first = pipeline.process(&mut frame, t0);
        assert!(first.flagged);
        assert_eq!(first.alert, AlertDecision::Fire);
        assert_eq!((first.subjects, first.targets), (1, 1));

        let mut frame = Frame::blank(320, 240, 2);
        let second = pipeline.process(&mut frame, t0 + Duration::from_secs(1));
        assert!(second.flagged);
        assert!(!second.alert.fired());

        let mut frame = Frame::blank(320, 240, 3);
        let third = pipeline.process(&mut frame, t0 + Duration::from_secs(5));
        assert!(third.alert.fired());
        assert_eq!(sink.plays(), 2);
    }

    #[test]
    fn overlay_drawn_on_every_flagged_frame() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let backend = ScriptedBackend::repeating(vec![person(), phone_near()]);
        let mut pipeline = pipeline_with(backend, sink, test_cue(&dir));
        let t0 = Instant::now();
        let red = image::Rgb([255u8, 0, 0]);

        for (i, offset) in [0u64, 1].iter().enumerate() {
            let mut frame = Frame::blank(640, 480, i as u64 + 1);
            pipeline.process(&mut frame, t0 + Duration::from_secs(*offset));
            // first row of the first alert glyph ("P")
            assert_eq!(*frame.image().get_pixel(50, 50), red);
        }
    }

    #[test]
    fn distant_phone_is_not_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let backend = ScriptedBackend::repeating(vec![person(), phone_far()]);
        let mut pipeline = pipeline_with(backend, sink.clone(), test_cue(&dir));

        let mut frame = Frame::blank(320, 240, 1);
        let decision = pipeline.process(&mut frame, Instant::now());
        assert!(!decision.flagged);
        assert_eq!(decision.alert, AlertDecision::Clear);
        assert_eq!(sink.plays(), 0);
        assert_eq!(pipeline.gate().state(), AlertState::never());
    }

    #[test]
    fn detector_failure_yields_unflagged_frame() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let mut pipeline = pipeline_with(FailingBackend, sink.clone(), test_cue(&dir));

        let mut frame = Frame::blank(32, 32, 1);
        let decision = pipeline.process(&mut frame, Instant::now());
        assert!(!decision.flagged);
        assert_eq!((decision.subjects, decision.targets), (0, 0));
        assert_eq!(sink.plays(), 0);
    }

    #[test]
    fn acquisition_failure_does_not_disturb_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let backend = ScriptedBackend::new(vec![
            vec![person(), phone_near()],
            vec![person(), phone_far()],
            vec![person(), phone_near()],
        ]);
        let pipeline = pipeline_with(backend, sink.clone(), test_cue(&dir));
        let source = ScriptedSource::new(&[true, false, false, true, true]);
        let mut stream = StreamLoop::new(
            Box::new(source),
            pipeline,
            JpegEncoder::new(80),
            CancelToken::new(),
            Duration::from_millis(1),
        );

        let first = stream.next().expect("first frame");
        assert!(first.decision.flagged);
        assert!(first.decision.alert.fired());
        let state_before = stream.pipeline().gate().state();

        let second = stream.next().expect("frame after hiccups");
        assert_eq!(second.decision.sequence, 2);
        assert!(!second.decision.flagged);
        assert_eq!(stream.pipeline().gate().state(), state_before);

        let third = stream.next().expect("third frame");
        assert!(third.decision.flagged);
        assert!(!third.decision.alert.fired());
        assert_eq!(&third.jpeg[..2], &[0xFF, 0xD8]);

        let stats = stream.stats();
        assert_eq!(stats.acquire_failures, 2);
        assert_eq!(stats.frames_emitted, 3);
        assert_eq!(stats.alerts_fired, 1);
        assert_eq!(sink.plays(), 1);
    }

    #[test]
    fn unencodable_frame_is_dropped_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let pipeline = pipeline_with(ScriptedBackend::default(), sink, test_cue(&dir));
        let source = SizedSource {
            sizes: VecDeque::from(vec![(0, 0), (16, 16)]),
            sequence: 0,
        };
        let mut stream = StreamLoop::new(
            Box::new(source),
            pipeline,
            JpegEncoder::new(80),
            CancelToken::new(),
            Duration::from_millis(1),
        );

        let emitted = stream.next().expect("frame after the empty one");
        assert_eq!(emitted.decision.sequence, 2);
        assert_eq!(&emitted.jpeg[..2], &[0xFF, 0xD8]);

        let stats = stream.stats();
        assert_eq!(stats.encode_failures, 1);
        assert_eq!(stats.frames_emitted, 1);
        assert_eq!(stats.acquire_failures, 0);
    }

    #[test]
    fn cancelled_loop_stops_and_releases_source() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let pipeline = pipeline_with(ScriptedBackend::default(), sink, test_cue(&dir));
        let cancel = CancelToken::new();
        let mut stream = StreamLoop::new(
            Box::new(ScriptedSource::new(&[])),
            pipeline,
            JpegEncoder::new(80),
            cancel.clone(),
            Duration::from_millis(1),
        );

        assert!(stream.next().is_some());
        cancel.cancel();
        assert!(stream.next().is_none());
        let source = stream.into_source();
        assert_eq!(source.stats().frames_captured, 1);
    }

    #[test]
    fn cancellation_interrupts_retry_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CountingSink::default());
        let pipeline = pipeline_with(ScriptedBackend::default(), sink, test_cue(&dir));
        let cancel = CancelToken::new();
        let mut stream = StreamLoop::new(
            Box::new(ScriptedSource::new(&[false; 8])),
            pipeline,
            JpegEncoder::new(80),
            cancel.clone(),
            Duration::from_secs(30),
        );

        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });
        let started = Instant::now();
        assert!(stream.next().is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }
}
