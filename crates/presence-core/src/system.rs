//! The four entry points consumed by the interactive surface.

use crate::extractor::{ExtractError, Extractor};
use crate::gallery::{display_name, Gallery, GalleryError, LoadReport, SampleDir};
use crate::ledger::{AttendanceRecord, Ledger, LedgerError};
use crate::session::{
    CaptureError, Clock, FrameSource, RecognitionSession, SessionConfig, SessionError,
    SessionSummary, Surface, SystemClock,
};
use chrono::NaiveDate;
use image::GrayImage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("no known faces loaded; enroll someone first")]
    NoIdentities,
    #[error("name cannot be empty")]
    EmptyName,
    #[error("no face found in the captured sample")]
    NoFaceInSample,
}

/// Supplies one enrollment image, e.g. from a live camera preview.
pub trait SampleProvider {
    /// `Ok(None)` means the user cancelled.
    fn capture(&mut self, extractor: &mut dyn Extractor) -> Result<Option<GrayImage>, CaptureError>;
}

/// A provider for an image that is already in hand.
pub struct StillImage(pub Option<GrayImage>);

impl SampleProvider for StillImage {
    fn capture(
        &mut self,
        _extractor: &mut dyn Extractor,
    ) -> Result<Option<GrayImage>, CaptureError> {
        Ok(self.0.take())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub known_faces_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub session: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    /// Name as it will appear in the gallery and ledger.
    pub name: String,
    pub path: PathBuf,
    pub identities: usize,
}

pub struct AttendanceSystem<E: Extractor> {
    samples: SampleDir,
    ledger: Ledger,
    gallery: Gallery,
    extractor: E,
    session: SessionConfig,
    clock: Box<dyn Clock>,
}

impl<E: Extractor> AttendanceSystem<E> {
    /// Prepare the sample directory and ledger, then build the gallery.
    pub fn open(settings: Settings, extractor: E) -> Result<Self, SystemError> {
        let samples = SampleDir::new(settings.known_faces_dir);
        samples.ensure_exists()?;
        let ledger = Ledger::open(settings.ledger_path)?;

        let mut system = Self {
            samples,
            ledger,
            gallery: Gallery::new(),
            extractor,
            session: settings.session,
            clock: Box::new(SystemClock),
        };
        system.reload_gallery()?;
        Ok(system)
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn extractor_mut(&mut self) -> &mut E {
        &mut self.extractor
    }

    /// Rebuild the gallery from disk. The old gallery stays on failure.
    pub fn reload_gallery(&mut self) -> Result<LoadReport, SystemError> {
        let (gallery, report) = Gallery::load(&self.samples, &mut self.extractor)?;
        if gallery.is_empty() {
            tracing::warn!(dir = %self.samples.root().display(), "no known faces found");
        }
        self.gallery = gallery;
        Ok(report)
    }

    /// Run the recognition loop until the surface asks to quit.
    pub fn run_recognition(
        &mut self,
        source: &mut dyn FrameSource,
        surface: &mut dyn Surface,
    ) -> Result<SessionSummary, SystemError> {
        if self.gallery.is_empty() {
            return Err(SystemError::NoIdentities);
        }
        tracing::info!(identities = self.gallery.len(), "starting recognition");
        let session =
            RecognitionSession::new(&self.gallery, &self.ledger, self.clock.as_ref(), self.session)
                .with_metric(self.extractor.metric());
        Ok(session.run(source, &mut self.extractor, surface)?)
    }

    /// Capture a sample for `name`, store it and rebuild the gallery.
    ///
    /// Returns `Ok(None)` if the provider was cancelled.
    pub fn enroll(
        &mut self,
        name: &str,
        provider: &mut dyn SampleProvider,
    ) -> Result<Option<EnrollOutcome>, SystemError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SystemError::EmptyName);
        }

        let Some(image) = provider.capture(&mut self.extractor)? else {
            tracing::info!(name, "enrollment cancelled");
            return Ok(None);
        };
        if self.extractor.detect(&image)?.is_empty() {
            return Err(SystemError::NoFaceInSample);
        }

        let path = self.samples.store(name, &image)?;
        self.reload_gallery()?;

        let stored_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(display_name)
            .unwrap_or_else(|| name.to_string());
        tracing::info!(name = %stored_name, path = %path.display(), "enrolled");

        Ok(Some(EnrollOutcome { name: stored_name, path, identities: self.gallery.len() }))
    }

    pub fn query_by_date(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, SystemError> {
        Ok(self.ledger.records_for_date(date)?)
    }

    pub fn query_all_grouped(
        &self,
    ) -> Result<BTreeMap<NaiveDate, Vec<AttendanceRecord>>, SystemError> {
        Ok(self.ledger.all_records_grouped_by_date()?)
    }
}
