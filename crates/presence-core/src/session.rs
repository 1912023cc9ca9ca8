//! Recognition loop controller.
//!
//! One synchronous loop: capture a frame, sample every Nth frame through
//! extraction and matching, mark recognized people present, render, poll
//! for quit. Skipped frames are rendered with the faces of the last sampled
//! frame; that map is replaced wholesale on each sample and never merged.

use crate::extractor::Extractor;
use crate::gallery::Gallery;
use crate::ledger::{Ledger, LedgerError};
use crate::matcher::{EuclideanMatcher, MatchPolicy, Matcher, Metric};
use crate::types::Region;
use chrono::NaiveDateTime;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_SAMPLE_STRIDE: u32 = 2;
pub const DEFAULT_DOWNSCALE: u32 = 2;
pub const DEFAULT_MAX_DROPPED_FRAMES: u32 = 5;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("attendance ledger: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    /// A single frame could not be read; the stream is still usable.
    #[error("frame dropped: {0}")]
    Dropped(String),
    /// The device is gone or unusable.
    #[error("capture failed: {0}")]
    Failed(String),
}

/// Produces full-resolution grayscale frames. Blocks until one is ready.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError>;
}

/// Displays frames with their annotations and reports the quit key.
pub trait Surface {
    fn render(
        &mut self,
        frame: &GrayImage,
        faces: &VisibleFaces,
        now: NaiveDateTime,
    ) -> std::io::Result<()>;

    /// Non-blocking check for the quit signal.
    fn quit_requested(&mut self) -> bool;
}

pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    Sampling,
    Skipping,
    Rendering,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Only every Nth frame is matched.
    pub sample_stride: u32,
    /// Frames are shrunk by this factor before extraction.
    pub downscale: u32,
    /// Consecutive dropped frames tolerated before the source counts as failed.
    pub max_dropped_frames: u32,
    pub policy: MatchPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_stride: DEFAULT_SAMPLE_STRIDE,
            downscale: DEFAULT_DOWNSCALE,
            max_dropped_frames: DEFAULT_MAX_DROPPED_FRAMES,
            policy: MatchPolicy::default(),
        }
    }
}

/// What the surface shows for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleFace {
    /// `None` for an unknown face.
    pub name: Option<String>,
    /// Whether this sample created the ledger record. Display only.
    pub newly_marked: bool,
    pub confidence: f32,
}

impl VisibleFace {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(crate::types::MatchResult::UNKNOWN_LABEL)
    }
}

/// Faces from the most recent sampled frame, keyed by region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleFaces {
    faces: BTreeMap<Region, VisibleFace>,
}

impl VisibleFaces {
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn get(&self, region: &Region) -> Option<&VisibleFace> {
        self.faces.get(region)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Region, &VisibleFace)> {
        self.faces.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Sampled,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    SourceFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub sampled: u64,
    /// Names newly marked present during this session, in marking order.
    pub newly_marked: Vec<String>,
    pub stop: StopReason,
}

pub struct RecognitionSession<'a> {
    gallery: &'a Gallery,
    ledger: &'a Ledger,
    clock: &'a dyn Clock,
    matcher: Box<dyn Matcher + 'a>,
    config: SessionConfig,
    state: SessionState,
    frames: u64,
    sampled: u64,
    visible: VisibleFaces,
    newly_marked: Vec<String>,
}

impl<'a> RecognitionSession<'a> {
    pub fn new(
        gallery: &'a Gallery,
        ledger: &'a Ledger,
        clock: &'a dyn Clock,
        config: SessionConfig,
    ) -> Self {
        Self {
            gallery,
            ledger,
            clock,
            matcher: Box::new(EuclideanMatcher),
            config: SessionConfig {
                sample_stride: config.sample_stride.max(1),
                downscale: config.downscale.max(1),
                ..config
            },
            state: SessionState::Idle,
            frames: 0,
            sampled: 0,
            visible: VisibleFaces::default(),
            newly_marked: Vec::new(),
        }
    }

    /// Compare embeddings in `metric` space instead of Euclidean.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.matcher = metric.matcher();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn visible(&self) -> &VisibleFaces {
        &self.visible
    }

    /// Admit one captured frame: sample it or skip it.
    pub fn process_frame(
        &mut self,
        frame: &GrayImage,
        extractor: &mut dyn Extractor,
    ) -> Result<FrameKind, SessionError> {
        let sample = self.frames % self.config.sample_stride as u64 == 0;
        self.frames += 1;

        if !sample {
            self.state = SessionState::Skipping;
            return Ok(FrameKind::Skipped);
        }

        self.state = SessionState::Sampling;
        self.sampled += 1;
        self.visible = self.identify(frame, extractor)?;
        Ok(FrameKind::Sampled)
    }

    fn identify(
        &mut self,
        frame: &GrayImage,
        extractor: &mut dyn Extractor,
    ) -> Result<VisibleFaces, SessionError> {
        let factor = self.config.downscale;
        let probes = if factor > 1 {
            let (w, h) = frame.dimensions();
            let (sw, sh) = ((w / factor).max(1), (h / factor).max(1));
            let small = imageops::resize(frame, sw, sh, FilterType::Triangle);
            extractor.extract(&small)
        } else {
            extractor.extract(frame)
        };

        let probes = match probes {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    frame = self.frames,
                    "extraction failed; no faces this cycle"
                );
                return Ok(VisibleFaces::default());
            }
        };

        let mut faces = BTreeMap::new();
        for probe in probes {
            let region = probe.region.scaled(factor);
            let result = self
                .matcher
                .compare(&probe.embedding, self.gallery.identities(), &self.config.policy);

            let newly_marked = match result.name.as_deref() {
                Some(name) => {
                    let marked = self.ledger.mark_present(name, self.clock.now())?;
                    if marked {
                        self.newly_marked.push(name.to_string());
                    }
                    marked
                }
                None => false,
            };
            tracing::debug!(
                label = result.label(),
                confidence = result.confidence,
                distance = result.distance,
                ?region,
                "face matched"
            );
            faces.insert(
                region,
                VisibleFace { name: result.name, newly_marked, confidence: result.confidence },
            );
        }
        Ok(VisibleFaces { faces })
    }

    /// Drive the loop until quit or an unrecoverable capture failure.
    ///
    /// Ledger writes made before stopping stay in place.
    pub fn run(
        mut self,
        source: &mut dyn FrameSource,
        extractor: &mut dyn Extractor,
        surface: &mut dyn Surface,
    ) -> Result<SessionSummary, SessionError> {
        let mut dropped_in_row = 0u32;

        let stop = loop {
            self.state = SessionState::Capturing;
            let frame = match source.next_frame() {
                Ok(frame) => {
                    dropped_in_row = 0;
                    frame
                }
                Err(CaptureError::Dropped(reason)) => {
                    dropped_in_row += 1;
                    tracing::warn!(%reason, dropped_in_row, "dropped frame");
                    if dropped_in_row > self.config.max_dropped_frames {
                        let reason = format!("{dropped_in_row} consecutive frames dropped");
                        break StopReason::SourceFailed(reason);
                    }
                    if surface.quit_requested() {
                        break StopReason::Quit;
                    }
                    continue;
                }
                Err(CaptureError::Failed(reason)) => break StopReason::SourceFailed(reason),
            };

            if let Err(e) = self.process_frame(&frame, extractor) {
                self.state = SessionState::Stopped;
                return Err(e);
            }

            self.state = SessionState::Rendering;
            if let Err(e) = surface.render(&frame, &self.visible, self.clock.now()) {
                tracing::warn!(error = %e, "render failed");
            }

            if surface.quit_requested() {
                break StopReason::Quit;
            }
        };

        self.state = SessionState::Stopped;
        match &stop {
            StopReason::Quit => {
                tracing::info!(frames = self.frames, sampled = self.sampled, "recognition stopped")
            }
            StopReason::SourceFailed(reason) => {
                tracing::warn!(%reason, "recognition stopped: capture failed")
            }
        }

        Ok(SessionSummary {
            frames: self.frames,
            sampled: self.sampled,
            newly_marked: self.newly_marked,
            stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractError;
    use crate::recognizer::RecognizerError;
    use crate::types::{Embedding, FaceBox, Identity, Probe};
    use chrono::NaiveDate;
    use image::Luma;
    use std::collections::VecDeque;

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn noon() -> FixedClock {
        FixedClock(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap())
    }

    /// Returns one scripted result per `extract` call, then nothing.
    #[derive(Default)]
    struct Scripted {
        script: VecDeque<Result<Vec<Probe>, String>>,
        sizes: Vec<(u32, u32)>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Vec<Probe>, String>>) -> Self {
            Self { script: script.into(), sizes: Vec::new() }
        }

        fn one(face: Probe) -> Self {
            Self::new(vec![Ok(vec![face])])
        }
    }

    impl Extractor for Scripted {
        fn detect(&mut self, _image: &GrayImage) -> Result<Vec<FaceBox>, ExtractError> {
            Ok(Vec::new())
        }

        fn extract(&mut self, image: &GrayImage) -> Result<Vec<Probe>, ExtractError> {
            self.sizes.push(image.dimensions());
            match self.script.pop_front() {
                Some(Ok(probes)) => Ok(probes),
                Some(Err(msg)) => Err(RecognizerError::InferenceFailed(msg).into()),
                None => Ok(Vec::new()),
            }
        }
    }

    struct Frames(VecDeque<Result<GrayImage, CaptureError>>);

    impl Frames {
        fn ok(n: usize) -> Self {
            Self((0..n).map(|_| Ok(GrayImage::from_pixel(64, 48, Luma([100])))).collect())
        }
    }

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<GrayImage, CaptureError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::Failed("end of stream".into())))
        }
    }

    #[derive(Default)]
    struct Recorder {
        rendered: Vec<VisibleFaces>,
        quit_after: Option<usize>,
    }

    impl Surface for Recorder {
        fn render(
            &mut self,
            _frame: &GrayImage,
            faces: &VisibleFaces,
            _now: NaiveDateTime,
        ) -> std::io::Result<()> {
            self.rendered.push(faces.clone());
            Ok(())
        }

        fn quit_requested(&mut self) -> bool {
            self.quit_after.is_some_and(|n| self.rendered.len() >= n)
        }
    }

    fn gallery() -> Gallery {
        Gallery::from_identities(vec![
            Identity { name: "Alice".into(), embedding: Embedding::new(vec![0.0, 0.0]) },
            Identity { name: "Bob".into(), embedding: Embedding::new(vec![1.0, 1.0]) },
        ])
    }

    fn probe(values: Vec<f32>, region: Region) -> Probe {
        Probe { embedding: Embedding::new(values), region }
    }

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("attendance.csv")).unwrap();
        (dir, ledger)
    }

    fn no_downscale() -> SessionConfig {
        SessionConfig { downscale: 1, ..SessionConfig::default() }
    }

    #[test]
    fn test_every_nth_frame_is_sampled() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let config = SessionConfig { sample_stride: 3, ..no_downscale() };
        let mut session = RecognitionSession::new(&gallery, &ledger, &clock, config);
        let mut extractor = Scripted::default();
        let frame = GrayImage::new(8, 8);

        let kinds: Vec<_> = (0..7)
            .map(|_| session.process_frame(&frame, &mut extractor).unwrap())
            .collect();
        use FrameKind::*;
        assert_eq!(kinds, vec![Sampled, Skipped, Skipped, Sampled, Skipped, Skipped, Sampled]);
        assert_eq!(extractor.sizes.len(), 3);
    }

    #[test]
    fn test_visible_faces_replaced_on_sample_and_held_on_skip() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let mut session = RecognitionSession::new(&gallery, &ledger, &clock, no_downscale());
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(20, 20, 30, 30);
        let mut extractor = Scripted::new(vec![
            Ok(vec![probe(vec![0.0, 0.0], a)]),
            Ok(vec![probe(vec![1.0, 1.0], b)]),
        ]);
        let frame = GrayImage::new(8, 8);

        session.process_frame(&frame, &mut extractor).unwrap();
        let after_sample = session.visible().clone();
        assert_eq!(after_sample.get(&a).unwrap().label(), "Alice");
        assert!(after_sample.get(&a).unwrap().newly_marked);

        assert_eq!(session.process_frame(&frame, &mut extractor).unwrap(), FrameKind::Skipped);
        assert_eq!(session.state(), SessionState::Skipping);
        assert_eq!(session.visible(), &after_sample);

        session.process_frame(&frame, &mut extractor).unwrap();
        assert_eq!(session.visible().len(), 1);
        assert!(session.visible().get(&a).is_none());
        assert_eq!(session.visible().get(&b).unwrap().label(), "Bob");
    }

    #[test]
    fn test_cosine_metric_matches_by_angle() {
        let (_dir, ledger) = ledger();
        let gallery = Gallery::from_identities(vec![
            Identity { name: "Alice".into(), embedding: Embedding::new(vec![1.0, 0.0]) },
            Identity { name: "Bob".into(), embedding: Embedding::new(vec![0.0, 1.0]) },
        ]);
        let clock = noon();
        let region = Region::new(0, 0, 10, 10);
        // 40 degrees off Alice: Euclidean 0.68 misses, cosine 0.23 hits.
        let angle = 40f32.to_radians();
        let script = || Scripted::one(probe(vec![angle.cos(), angle.sin()], region));
        let frame = GrayImage::new(8, 8);

        let mut euclidean = RecognitionSession::new(&gallery, &ledger, &clock, no_downscale());
        euclidean.process_frame(&frame, &mut script()).unwrap();
        assert_eq!(euclidean.visible().get(&region).unwrap().label(), "Unknown");

        let mut cosine = RecognitionSession::new(&gallery, &ledger, &clock, no_downscale())
            .with_metric(Metric::Cosine);
        cosine.process_frame(&frame, &mut script()).unwrap();
        assert_eq!(cosine.visible().get(&region).unwrap().label(), "Alice");
    }

    #[test]
    fn test_repeat_sighting_is_not_newly_marked() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let region = Region::new(0, 0, 10, 10);
        let mut extractor = Scripted::new(vec![
            Ok(vec![probe(vec![0.0, 0.0], region)]),
            Ok(vec![probe(vec![0.01, 0.0], region)]),
        ]);
        let mut surface = Recorder { quit_after: Some(3), ..Default::default() };
        let config = SessionConfig { sample_stride: 1, ..no_downscale() };

        let summary = RecognitionSession::new(&gallery, &ledger, &clock, config)
            .run(&mut Frames::ok(10), &mut extractor, &mut surface)
            .unwrap();

        assert_eq!(summary.stop, StopReason::Quit);
        assert_eq!(summary.newly_marked, vec!["Alice".to_string()]);
        assert!(surface.rendered[0].get(&region).unwrap().newly_marked);
        assert!(!surface.rendered[1].get(&region).unwrap().newly_marked);
        assert_eq!(ledger.records_for_date(clock.0.date()).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_face_is_shown_but_not_marked() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let region = Region::new(5, 5, 15, 15);
        let mut session = RecognitionSession::new(&gallery, &ledger, &clock, no_downscale());
        let mut extractor = Scripted::new(vec![Ok(vec![probe(vec![5.0, -5.0], region)])]);

        session.process_frame(&GrayImage::new(8, 8), &mut extractor).unwrap();
        let face = session.visible().get(&region).unwrap();
        assert_eq!(face.label(), "Unknown");
        assert!(!face.newly_marked);
        assert!(ledger.all_records_grouped_by_date().unwrap().is_empty());
    }

    #[test]
    fn test_downscaled_regions_map_back_to_full_resolution() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let mut session =
            RecognitionSession::new(&gallery, &ledger, &clock, SessionConfig::default());
        let mut extractor = Scripted::one(probe(vec![0.0, 0.0], Region::new(10, 10, 20, 20)));

        session.process_frame(&GrayImage::new(64, 48), &mut extractor).unwrap();
        assert_eq!(extractor.sizes, vec![(32, 24)]);
        assert!(session.visible().get(&Region::new(20, 20, 40, 40)).is_some());
    }

    #[test]
    fn test_extraction_failure_clears_faces_and_continues() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let region = Region::new(0, 0, 4, 4);
        let mut session = RecognitionSession::new(&gallery, &ledger, &clock, no_downscale());
        let mut extractor = Scripted::new(vec![
            Ok(vec![probe(vec![0.0, 0.0], region)]),
            Err("model crashed".into()),
        ]);
        let frame = GrayImage::new(8, 8);

        session.process_frame(&frame, &mut extractor).unwrap();
        session.process_frame(&frame, &mut extractor).unwrap();
        session.process_frame(&frame, &mut extractor).unwrap();
        assert!(session.visible().is_empty());
    }

    #[test]
    fn test_capture_failure_stops_and_keeps_earlier_writes() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let mut extractor = Scripted::one(probe(vec![1.0, 1.0], Region::new(0, 0, 4, 4)));
        let mut surface = Recorder::default();

        let summary = RecognitionSession::new(&gallery, &ledger, &clock, no_downscale())
            .run(&mut Frames::ok(3), &mut extractor, &mut surface)
            .unwrap();

        assert_eq!(summary.stop, StopReason::SourceFailed("end of stream".into()));
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.sampled, 2);
        assert_eq!(surface.rendered.len(), 3);
        assert_eq!(ledger.records_for_date(clock.0.date()).unwrap()[0].name, "Bob");
    }

    #[test]
    fn test_dropped_frame_budget() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let frame = || -> Result<GrayImage, CaptureError> { Ok(GrayImage::new(8, 8)) };
        let dropped =
            || -> Result<GrayImage, CaptureError> { Err(CaptureError::Dropped("timeout".into())) };
        let config = SessionConfig { max_dropped_frames: 2, ..no_downscale() };

        // Two drops in a row are tolerated.
        let mut source = Frames(vec![frame(), dropped(), dropped(), frame()].into());
        let mut surface = Recorder { quit_after: Some(2), ..Default::default() };
        let summary = RecognitionSession::new(&gallery, &ledger, &clock, config)
            .run(&mut source, &mut Scripted::default(), &mut surface)
            .unwrap();
        assert_eq!(summary.stop, StopReason::Quit);
        assert_eq!(summary.frames, 2);

        // A third one is not.
        let mut source = Frames(vec![frame(), dropped(), dropped(), dropped(), frame()].into());
        let summary = RecognitionSession::new(&gallery, &ledger, &clock, config)
            .run(&mut source, &mut Scripted::default(), &mut Recorder::default())
            .unwrap();
        assert!(matches!(summary.stop, StopReason::SourceFailed(_)));
        assert_eq!(summary.frames, 1);
    }

    #[test]
    fn test_ledger_fault_aborts_session() {
        let (dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        std::fs::remove_file(ledger.path()).unwrap();
        std::fs::create_dir(ledger.path()).unwrap();
        let mut extractor = Scripted::one(probe(vec![0.0, 0.0], Region::new(0, 0, 4, 4)));

        let result = RecognitionSession::new(&gallery, &ledger, &clock, no_downscale()).run(
            &mut Frames::ok(5),
            &mut extractor,
            &mut Recorder::default(),
        );
        assert!(matches!(result, Err(SessionError::Ledger(_))));
        drop(dir);
    }

    #[test]
    fn test_zero_stride_is_treated_as_one() {
        let (_dir, ledger) = ledger();
        let gallery = gallery();
        let clock = noon();
        let config = SessionConfig { sample_stride: 0, downscale: 0, ..SessionConfig::default() };
        let mut session = RecognitionSession::new(&gallery, &ledger, &clock, config);
        let mut extractor = Scripted::default();
        for _ in 0..3 {
            assert_eq!(
                session.process_frame(&GrayImage::new(4, 4), &mut extractor).unwrap(),
                FrameKind::Sampled
            );
        }
    }
}
