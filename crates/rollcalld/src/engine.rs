use crate::overlay;
use chrono::NaiveDateTime;
use rollcall_core::{AttendanceLedger, Config, EncodingStore, FaceAnalyzer, FrameMatcher, Recognition};
use rollcall_hw::{CaptureError, Frame, FrameSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no enrolled faces; add images to the enrollment directory first")]
    EmptyStore,
}

/// Where the live loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Capturing,
    Detecting,
    Matching,
    Recording,
    Stopped,
}

/// Why the live loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was raised.
    Operator,
    /// Too many consecutive failed frame reads.
    DeviceFailure,
    /// A finite source ran out of frames.
    EndOfStream,
    /// `max_frames` frames were processed.
    FrameLimit,
}

/// Counters for one run of the live loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub faces: u64,
    pub recognized: u64,
    pub recorded: u64,
    pub analyzer_failures: u64,
    pub ledger_failures: u64,
    pub stop_reason: StopReason,
}

#[derive(Debug, Default)]
struct Counters {
    frames: u64,
    faces: u64,
    recognized: u64,
    recorded: u64,
    analyzer_failures: u64,
    ledger_failures: u64,
}

impl Counters {
    fn finish(self, stop_reason: StopReason) -> LoopSummary {
        LoopSummary {
            frames: self.frames,
            faces: self.faces,
            recognized: self.recognized,
            recorded: self.recorded,
            analyzer_failures: self.analyzer_failures,
            ledger_failures: self.ledger_failures,
            stop_reason,
        }
    }
}

/// Owns the frame source for the duration of a run and logs its release,
/// whichever way the run ends.
struct SourceGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        tracing::info!(source = %self.source.describe(), "releasing frame source");
    }
}

/// Refuse to go live with nobody to recognise.
pub fn ensure_enrolled(count: usize) -> Result<(), EngineError> {
    if count == 0 {
        return Err(EngineError::EmptyStore);
    }
    Ok(())
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Capture → recognise → record, one frame at a time.
pub struct LiveLoop {
    store: EncodingStore,
    matcher: FrameMatcher,
    ledger: AttendanceLedger,
    capture_failure_limit: u32,
    max_frames: u64,
    snapshot_path: Option<PathBuf>,
    clock: fn() -> NaiveDateTime,
    state: LoopState,
}

impl LiveLoop {
    pub fn new(store: EncodingStore, config: &Config) -> Self {
        Self {
            store,
            matcher: FrameMatcher::from_config(config),
            ledger: AttendanceLedger::new(&config.attendance_path),
            capture_failure_limit: config.capture_failure_limit.max(1),
            max_frames: config.max_frames,
            snapshot_path: config.snapshot_path.clone(),
            clock: local_now,
            state: LoopState::Idle,
        }
    }

    /// Replace the wall clock used to timestamp attendance.
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "loop state");
            self.state = next;
        }
    }

    /// Run until stopped, the source fails or ends, or the frame limit is hit.
    ///
    /// `stop` is checked once per iteration, so a frame already in progress
    /// is always finished. The source is dropped before this returns.
    ///
    /// Neither frame reads nor face analysis are timed out. A stalled source
    /// or analyzer holds the loop until the call returns, and only then is
    /// `stop` seen.
    pub fn run<A, S>(
        &mut self,
        analyzer: &mut A,
        source: S,
        stop: &AtomicBool,
    ) -> Result<LoopSummary, EngineError>
    where
        A: FaceAnalyzer + ?Sized,
        S: FrameSource,
    {
        ensure_enrolled(self.store.len())?;

        let mut guard = SourceGuard { source };
        tracing::info!(
            source = %guard.source.describe(),
            enrolled = self.store.len(),
            threshold = self.matcher.threshold(),
            "live loop started"
        );

        let mut counters = Counters::default();
        let mut consecutive_failures = 0u32;

        let reason = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::Operator;
            }
            if self.max_frames > 0 && counters.frames >= self.max_frames {
                break StopReason::FrameLimit;
            }

            self.transition(LoopState::Capturing);
            let frame = match guard.source.read_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                Err(CaptureError::EndOfStream) => break StopReason::EndOfStream,
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        error = %e,
                        consecutive = consecutive_failures,
                        limit = self.capture_failure_limit,
                        "frame read failed"
                    );
                    if consecutive_failures >= self.capture_failure_limit {
                        break StopReason::DeviceFailure;
                    }
                    continue;
                }
            };

            counters.frames += 1;
            self.process_frame(analyzer, &frame, &mut counters);
        };

        self.transition(LoopState::Stopped);
        drop(guard);

        let summary = counters.finish(reason);
        tracing::info!(
            reason = ?summary.stop_reason,
            frames = summary.frames,
            recorded = summary.recorded,
            "live loop stopped"
        );
        Ok(summary)
    }

    fn process_frame<A>(&mut self, analyzer: &mut A, frame: &Frame, counters: &mut Counters)
    where
        A: FaceAnalyzer + ?Sized,
    {
        self.transition(LoopState::Detecting);
        let recognitions = match self.matcher.match_frame(analyzer, &frame.image, &self.store) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "face analysis failed, skipping frame");
                counters.analyzer_failures += 1;
                return;
            }
        };

        self.transition(LoopState::Matching);
        counters.faces += recognitions.len() as u64;
        for r in &recognitions {
            tracing::debug!(seq = frame.sequence, label = %r.label(), distance = ?r.distance, "face");
        }

        self.transition(LoopState::Recording);
        for identity in recognitions.iter().filter_map(|r| r.identity.as_ref()) {
            counters.recognized += 1;
            match self.ledger.upsert(identity, (self.clock)()) {
                Ok(_) => counters.recorded += 1,
                Err(e) => {
                    tracing::error!(name = %identity.display_name, error = %e, "failed to record attendance");
                    counters.ledger_failures += 1;
                }
            }
        }

        self.write_snapshot(frame, &recognitions);
    }

    fn write_snapshot(&self, frame: &Frame, recognitions: &[Recognition]) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        if let Err(e) = overlay::write_snapshot(path, &frame.image, recognitions) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write overlay snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{Rgb, RgbImage};
    use rollcall_core::{read_enrollment_dir, AnalyzerError, BoundingBox, Embedding, EnrolledFace, Identity};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    /// One face per non-black frame, embedded as the frame's colour.
    struct ColourAnalyzer {
        fail: bool,
    }

    impl FaceAnalyzer for ColourAnalyzer {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
            if self.fail {
                return Err(AnalyzerError::Failed("model crashed".into()));
            }
            if image.get_pixel(0, 0) == &BLACK {
                return Ok(vec![]);
            }
            Ok(vec![BoundingBox {
                x: 2.0,
                y: 2.0,
                width: 8.0,
                height: 8.0,
                confidence: 0.9,
                landmarks: None,
            }])
        }

        fn compute_embedding(
            &mut self,
            image: &RgbImage,
            _face: &BoundingBox,
        ) -> Result<Embedding, AnalyzerError> {
            let p = image.get_pixel(0, 0).0;
            Ok(Embedding::new(p.iter().map(|&c| c as f32 / 255.0).collect()))
        }
    }

    struct ScriptedSource {
        script: VecDeque<Result<RgbImage, CaptureError>>,
        reads: Arc<std::sync::atomic::AtomicUsize>,
        released: Arc<AtomicBool>,
        raise_on_read: Option<Arc<AtomicBool>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<RgbImage, CaptureError>>) -> Self {
            Self {
                script: script.into(),
                reads: Arc::default(),
                released: Arc::default(),
                raise_on_read: None,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            let seq = self.reads.fetch_add(1, Ordering::SeqCst) as u32;
            if let Some(flag) = &self.raise_on_read {
                flag.store(true, Ordering::SeqCst);
            }
            match self.script.pop_front() {
                Some(Ok(image)) => Ok(Frame::new(image, seq)),
                Some(Err(e)) => Err(e),
                None => Err(CaptureError::EndOfStream),
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Wraps a source or analyzer and makes every call take `delay`.
    struct Slow<T> {
        inner: T,
        delay: Duration,
    }

    impl<S: FrameSource> FrameSource for Slow<S> {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            std::thread::sleep(self.delay);
            self.inner.read_frame()
        }

        fn describe(&self) -> String {
            format!("slow {}", self.inner.describe())
        }
    }

    impl<A: FaceAnalyzer> FaceAnalyzer for Slow<A> {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
            std::thread::sleep(self.delay);
            self.inner.detect_faces(image)
        }

        fn compute_embedding(
            &mut self,
            image: &RgbImage,
            face: &BoundingBox,
        ) -> Result<Embedding, AnalyzerError> {
            self.inner.compute_embedding(image, face)
        }
    }

    fn frame(colour: Rgb<u8>) -> Result<RgbImage, CaptureError> {
        Ok(RgbImage::from_pixel(16, 16, colour))
    }

    fn failed() -> Result<RgbImage, CaptureError> {
        Err(CaptureError::ReadFailed("timeout".into()))
    }

    fn class_store() -> EncodingStore {
        EncodingStore::from_faces(vec![
            EnrolledFace {
                identity: Identity::from_stem("1_Alice"),
                embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
            },
            EnrolledFace {
                identity: Identity::from_stem("2_Bob"),
                embedding: Embedding::new(vec![0.0, 0.0, 1.0]),
            },
        ])
    }

    fn config(dir: &Path) -> Config {
        Config {
            attendance_path: dir.join("Attendance.csv"),
            downsample_factor: 1.0,
            ..Config::default()
        }
    }

    fn morning() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_repeated_sightings_leave_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = ScriptedSource::new(vec![frame(RED), frame(BLACK), frame(RED), frame(RED)]);
        let released = source.released.clone();

        let mut live = LiveLoop::new(class_store(), &config).with_clock(morning);
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.faces, 3);
        assert_eq!(summary.recorded, 3);
        assert_eq!(live.state(), LoopState::Stopped);
        assert!(released.load(Ordering::SeqCst));

        let text = std::fs::read_to_string(&config.attendance_path).unwrap();
        assert_eq!(text, "Name,RollNo,Date,Time\nAlice,1,2026-10-16,09:15:00\n");
    }

    #[test]
    fn test_enrollment_directory_to_single_attendance_row() {
        let enroll = tempfile::tempdir().unwrap();
        for (name, colour) in [("1_Alice.png", RED), ("2_Bob.png", BLUE)] {
            RgbImage::from_pixel(16, 16, colour)
                .save_with_format(enroll.path().join(name), image::ImageFormat::Png)
                .unwrap();
        }
        let mut analyzer = ColourAnalyzer { fail: false };
        let images = read_enrollment_dir(enroll.path()).unwrap();
        let (store, report) = EncodingStore::build(&mut analyzer, &images);
        assert_eq!(report.enrolled, 2);

        let out = tempfile::tempdir().unwrap();
        let config = config(out.path());
        let mut live = LiveLoop::new(store, &config).with_clock(morning);
        live.run(&mut analyzer, ScriptedSource::new(vec![frame(RED)]), &AtomicBool::new(false))
            .unwrap();

        let rows = AttendanceLedger::new(&config.attendance_path).load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].name.as_str(), rows[0].roll_no.as_str()), ("Alice", "1"));
        assert_eq!(rows[0].date, morning().date());
        assert_eq!(rows[0].time, morning().time());
    }

    #[test]
    fn test_empty_enrollment_directory_never_starts() {
        let enroll = tempfile::tempdir().unwrap();
        let mut analyzer = ColourAnalyzer { fail: false };
        let images = read_enrollment_dir(enroll.path()).unwrap();
        let (store, _) = EncodingStore::build(&mut analyzer, &images);

        let out = tempfile::tempdir().unwrap();
        let mut live = LiveLoop::new(store, &config(out.path()));
        let result = live.run(&mut analyzer, ScriptedSource::new(vec![frame(RED)]), &AtomicBool::new(false));
        assert!(matches!(result, Err(EngineError::EmptyStore)));
    }

    #[test]
    fn test_unknown_faces_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let source = ScriptedSource::new(vec![frame(GREEN), frame(BLUE)]);

        let mut live = LiveLoop::new(class_store(), &config).with_clock(morning);
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.faces, 2);
        assert_eq!(summary.recognized, 1);
        let rows = AttendanceLedger::new(&config.attendance_path).load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Bob");
        assert_eq!(rows[0].roll_no, "2");
    }

    #[test]
    fn test_empty_store_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![frame(RED)]);
        let reads = source.reads.clone();

        let mut live = LiveLoop::new(EncodingStore::default(), &config(dir.path()));
        let result = live.run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false));

        assert!(matches!(result, Err(EngineError::EmptyStore)));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(live.state(), LoopState::Idle);
    }

    #[test]
    fn test_first_read_failure_stops_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![failed(), frame(RED)]);
        let released = source.released.clone();

        let mut live = LiveLoop::new(class_store(), &config(dir.path()));
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::DeviceFailure);
        assert_eq!(summary.frames, 0);
        assert!(released.load(Ordering::SeqCst));
        assert!(!dir.path().join("Attendance.csv").exists());
    }

    #[test]
    fn test_failure_limit_counts_consecutive_reads() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { capture_failure_limit: 2, ..config(dir.path()) };
        let source = ScriptedSource::new(vec![failed(), frame(RED), failed(), failed(), frame(RED)]);

        let mut live = LiveLoop::new(class_store(), &config).with_clock(morning);
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::DeviceFailure);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.recorded, 1);
    }

    #[test]
    fn test_ledger_failure_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            attendance_path: dir.path().join("missing").join("Attendance.csv"),
            ..config(dir.path())
        };
        let source = ScriptedSource::new(vec![frame(RED), frame(BLUE)]);

        let mut live = LiveLoop::new(class_store(), &config);
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.ledger_failures, 2);
        assert_eq!(summary.recorded, 0);
    }

    #[test]
    fn test_analyzer_failure_skips_frame() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![frame(RED), frame(RED)]);

        let mut live = LiveLoop::new(class_store(), &config(dir.path()));
        let summary = live
            .run(&mut ColourAnalyzer { fail: true }, source, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.analyzer_failures, 2);
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    }

    #[test]
    fn test_stop_flag_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![frame(RED)]);
        let reads = source.reads.clone();
        let released = source.released.clone();

        let mut live = LiveLoop::new(class_store(), &config(dir.path()));
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(true))
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Operator);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_during_frame_finishes_that_frame() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource::new(vec![frame(RED), frame(BLUE)]);
        source.raise_on_read = Some(stop.clone());

        let mut live = LiveLoop::new(class_store(), &config).with_clock(morning);
        let summary = live.run(&mut ColourAnalyzer { fail: false }, source, &stop).unwrap();

        assert_eq!(summary.stop_reason, StopReason::Operator);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.recorded, 1);
        assert_eq!(AttendanceLedger::new(&config.attendance_path).load().unwrap().len(), 1);
    }

    #[test]
    fn test_frame_limit() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { max_frames: 2, ..config(dir.path()) };
        let source = ScriptedSource::new((0..5).map(|_| frame(BLACK)).collect());
        let reads = source.reads.clone();

        let mut live = LiveLoop::new(class_store(), &config);
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::FrameLimit);
        assert_eq!(summary.frames, 2);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_snapshot_written_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("overlay.png");
        let config = Config {
            snapshot_path: Some(snapshot.clone()),
            ..config(dir.path())
        };
        let source = ScriptedSource::new(vec![frame(GREEN)]);

        let mut live = LiveLoop::new(class_store(), &config);
        live.run(&mut ColourAnalyzer { fail: false }, source, &AtomicBool::new(false))
            .unwrap();

        let written = image::open(&snapshot).unwrap().to_rgb8();
        assert_eq!(written.get_pixel(2, 2).0, [255, 0, 0]);
    }

    #[test]
    fn test_ensure_enrolled() {
        assert!(matches!(ensure_enrolled(0), Err(EngineError::EmptyStore)));
        assert!(ensure_enrolled(2).is_ok());
    }

    #[test]
    fn test_slow_read_is_waited_out_without_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let delay = Duration::from_millis(150);
        let mut inner = ScriptedSource::new(vec![frame(RED)]);
        let stop = Arc::new(AtomicBool::new(false));
        inner.raise_on_read = Some(stop.clone());
        let source = Slow { inner, delay };

        let started = Instant::now();
        let mut live = LiveLoop::new(class_store(), &config).with_clock(morning);
        let summary = live
            .run(&mut ColourAnalyzer { fail: false }, source, &stop)
            .unwrap();

        assert!(started.elapsed() >= delay);
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.recorded, 1);
        assert_eq!(summary.stop_reason, StopReason::Operator);
    }

    #[test]
    fn test_slow_analysis_is_waited_out_without_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let delay = Duration::from_millis(150);
        let mut analyzer = Slow {
            inner: ColourAnalyzer { fail: false },
            delay,
        };

        let started = Instant::now();
        let mut live = LiveLoop::new(class_store(), &config).with_clock(morning);
        let summary = live
            .run(&mut analyzer, ScriptedSource::new(vec![frame(BLUE)]), &AtomicBool::new(false))
            .unwrap();

        assert!(started.elapsed() >= delay);
        assert_eq!(summary.analyzer_failures, 0);
        assert_eq!(summary.recorded, 1);
    }
}
