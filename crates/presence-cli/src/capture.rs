//! Camera-backed frame source and live enrollment capture.

use crate::config::Config;
use crate::terminal::{is_interrupt, poll_key, TerminalSurface};
use crossterm::event::KeyCode;
use image::GrayImage;
use presence_core::{CaptureError, Extractor, FrameSource, SampleProvider};
use presence_hw::{Camera, CameraError};

/// Grabs frames from a V4L2 camera. The device closes when this is dropped.
pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    /// Open the configured device and discard the warm-up frames.
    pub fn open(config: &Config) -> Result<Self, CameraError> {
        let mut camera =
            Camera::open(&config.camera_device, config.capture_width, config.capture_height)?;
        let dark = camera.warm_up(config.warmup_frames);
        if config.warmup_frames > 0 && dark == config.warmup_frames {
            tracing::warn!(
                device = %camera.device_path,
                "every warm-up frame was dark; is the lens covered?"
            );
        }
        Ok(Self { camera })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<GrayImage, CaptureError> {
        let frame = self.camera.capture_frame().map_err(classify)?;
        if frame.is_dark {
            return Err(CaptureError::Dropped(format!("dark frame #{}", frame.sequence)));
        }
        frame.into_image().map_err(|e| CaptureError::Dropped(e.to_string()))
    }
}

/// A single failed read is a dropped frame; the session's drop budget decides
/// when repeated failures end it. Anything else means the device is unusable.
fn classify(e: CameraError) -> CaptureError {
    match e {
        CameraError::CaptureFailed(reason) => CaptureError::Dropped(reason),
        other => CaptureError::Failed(other.to_string()),
    }
}

/// Live enrollment: preview with face detection, SPACE captures, ESC cancels.
pub struct LiveSampleProvider<'a> {
    source: &'a mut CameraSource,
    surface: &'a mut TerminalSurface,
    max_dropped_frames: u32,
}

impl<'a> LiveSampleProvider<'a> {
    pub fn new(
        source: &'a mut CameraSource,
        surface: &'a mut TerminalSurface,
        max_dropped_frames: u32,
    ) -> Self {
        Self { source, surface, max_dropped_frames }
    }
}

impl SampleProvider for LiveSampleProvider<'_> {
    fn capture(
        &mut self,
        extractor: &mut dyn Extractor,
    ) -> Result<Option<GrayImage>, CaptureError> {
        let mut status = String::from("Look at the camera.");
        let mut dropped_in_row = 0u32;

        loop {
            let frame = match self.source.next_frame() {
                Ok(frame) => {
                    dropped_in_row = 0;
                    frame
                }
                Err(CaptureError::Dropped(reason)) => {
                    dropped_in_row += 1;
                    tracing::warn!(%reason, dropped_in_row, "dropped frame during enrollment");
                    if dropped_in_row > self.max_dropped_frames {
                        let reason = format!("{dropped_in_row} consecutive frames dropped");
                        return Err(CaptureError::Failed(reason));
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let faces = extractor.detect(&frame).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "face detection failed on preview frame");
                Vec::new()
            });

            match self.surface.render_enrollment(&frame, &faces, &status) {
                Ok(overlay) if overlay.attempted && !overlay.succeeded => {
                    tracing::debug!("landmarks fell outside the preview")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "render failed"),
            }

            let key = poll_key().map_err(|e| CaptureError::Failed(format!("keyboard: {e}")))?;
            match key {
                Some(k) if k.code == KeyCode::Esc || is_interrupt(&k) => return Ok(None),
                Some(k) if k.code == KeyCode::Char(' ') => {
                    if faces.is_empty() {
                        status = "No face in view, try again.".to_string();
                    } else {
                        return Ok(Some(frame));
                    }
                }
                _ => {}
            }
        }
    }
}
