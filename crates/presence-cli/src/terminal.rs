//! Terminal rendering surface.
//!
//! Frames are drawn as a coarse brightness map with face boxes and labels
//! on top. The terminal is put in raw mode on an alternate screen for the
//! lifetime of a [`TerminalSurface`] and restored when it is dropped.

use chrono::NaiveDateTime;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use image::GrayImage;
use presence_core::{FaceBox, Region, Surface, VisibleFace, VisibleFaces};
use std::io::{self, Stdout, Write};
use std::time::Duration;

const RAMP: &[u8] = b" .:-=+*#%@";
/// Rows kept free for the header and the text below the picture.
const RESERVED_ROWS: u16 = 6;
const QUIT_HINT: &str = "Press q or Esc to quit";

/// Result of drawing facial landmarks, which not every detector provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overlay {
    /// At least one face came with landmarks.
    pub attempted: bool,
    /// Every landmark point landed on the canvas.
    pub succeeded: bool,
}

/// `Alice ✓ (93%)` for a newly marked face, `Alice (93%)` otherwise.
pub fn face_label(face: &VisibleFace) -> String {
    match &face.name {
        Some(name) => {
            let pct = (face.confidence * 100.0).round() as u32;
            if face.newly_marked {
                format!("{name} \u{2713} ({pct}%)")
            } else {
                format!("{name} ({pct}%)")
            }
        }
        None => face.label().to_string(),
    }
}

/// A character grid mapped onto frame coordinates.
pub struct Canvas {
    cols: usize,
    rows: usize,
    cells: Vec<char>,
    scale_x: f32,
    scale_y: f32,
}

impl Canvas {
    pub fn from_frame(frame: &GrayImage, cols: usize, rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let (w, h) = frame.dimensions();
        let scale_x = w as f32 / cols as f32;
        let scale_y = h as f32 / rows as f32;

        let mut cells = Vec::with_capacity(cols * rows);
        for r in 0..rows {
            for c in 0..cols {
                let x = (((c as f32 + 0.5) * scale_x) as u32).min(w.saturating_sub(1));
                let y = (((r as f32 + 0.5) * scale_y) as u32).min(h.saturating_sub(1));
                let luma = if w == 0 || h == 0 { 0 } else { frame.get_pixel(x, y).0[0] };
                let idx = luma as usize * (RAMP.len() - 1) / 255;
                cells.push(RAMP[idx] as char);
            }
        }
        Self { cols, rows, cells, scale_x, scale_y }
    }

    fn cell_of(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        if x < 0.0 || y < 0.0 || self.scale_x <= 0.0 || self.scale_y <= 0.0 {
            return None;
        }
        let c = (x / self.scale_x) as usize;
        let r = (y / self.scale_y) as usize;
        (c < self.cols && r < self.rows).then_some((c, r))
    }

    fn set(&mut self, c: usize, r: usize, ch: char) {
        if c < self.cols && r < self.rows {
            self.cells[r * self.cols + c] = ch;
        }
    }

    /// Put a character at a frame coordinate. False if it falls outside.
    pub fn plot(&mut self, x: f32, y: f32, ch: char) -> bool {
        match self.cell_of(x, y) {
            Some((c, r)) => {
                self.set(c, r, ch);
                true
            }
            None => false,
        }
    }

    /// Outline `region`, clipped to the canvas.
    pub fn draw_box(&mut self, region: &Region) {
        let clamp_c = |x: i32| ((x.max(0) as f32 / self.scale_x) as usize).min(self.cols - 1);
        let clamp_r = |y: i32| ((y.max(0) as f32 / self.scale_y) as usize).min(self.rows - 1);
        let (c0, c1) = (clamp_c(region.left), clamp_c(region.right));
        let (r0, r1) = (clamp_r(region.top), clamp_r(region.bottom));

        for c in c0..=c1 {
            self.set(c, r0, '-');
            self.set(c, r1, '-');
        }
        for r in r0..=r1 {
            self.set(c0, r, '|');
            self.set(c1, r, '|');
        }
        for (c, r) in [(c0, r0), (c1, r0), (c0, r1), (c1, r1)] {
            self.set(c, r, '+');
        }
    }

    /// Write `text` just above `region`, or on its top edge at the canvas top.
    pub fn label(&mut self, region: &Region, text: &str) {
        let c0 = ((region.left.max(0) as f32 / self.scale_x) as usize).min(self.cols - 1);
        let top = ((region.top.max(0) as f32 / self.scale_y) as usize).min(self.rows - 1);
        let r = top.saturating_sub(1);
        for (i, ch) in text.chars().enumerate() {
            self.set(c0 + i, r, ch);
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.cells.chunks(self.cols).map(|row| row.iter().collect()).collect()
    }
}

/// Raw mode plus alternate screen, undone on drop on every exit path.
struct RawModeGuard;

impl RawModeGuard {
    fn enter(out: &mut Stdout) -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(e);
        }
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
        let _ = terminal::disable_raw_mode();
    }
}

/// Non-blocking read of one key press.
pub fn poll_key() -> io::Result<Option<KeyEvent>> {
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(Some(key));
            }
        }
    }
    Ok(None)
}

pub fn is_interrupt(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

pub struct TerminalSurface {
    out: Stdout,
    _guard: RawModeGuard,
}

impl TerminalSurface {
    pub fn new() -> io::Result<Self> {
        let mut out = io::stdout();
        let guard = RawModeGuard::enter(&mut out)?;
        Ok(Self { out, _guard: guard })
    }

    fn canvas_size() -> (usize, usize) {
        let (cols, rows) = terminal::size().unwrap_or((80, 24));
        (cols.max(10) as usize, rows.saturating_sub(RESERVED_ROWS).max(4) as usize)
    }

    fn draw(&mut self, header: &str, picture: &[String], footer: &[String]) -> io::Result<()> {
        queue!(self.out, MoveTo(0, 0), Clear(ClearType::All), Print(header), Print("\r\n"))?;
        for line in picture.iter().chain(footer) {
            queue!(self.out, Print(line), Print("\r\n"))?;
        }
        self.out.flush()
    }

    /// Draw an enrollment preview with detected boxes and landmarks.
    pub fn render_enrollment(
        &mut self,
        frame: &GrayImage,
        faces: &[FaceBox],
        status: &str,
    ) -> io::Result<Overlay> {
        let (cols, rows) = Self::canvas_size();
        let mut canvas = Canvas::from_frame(frame, cols, rows);
        let mut overlay = Overlay::default();
        let mut all_plotted = true;

        for face in faces {
            canvas.draw_box(&face.region);
            if let Some(points) = face.landmarks {
                overlay.attempted = true;
                for (x, y) in points {
                    all_plotted &= canvas.plot(x, y, 'o');
                }
            }
        }
        overlay.succeeded = overlay.attempted && all_plotted;

        let detected = if faces.is_empty() { "No face detected" } else { "Face detected" };
        let footer = vec![
            format!("{detected}. {status}"),
            "SPACE: capture    ESC: cancel".to_string(),
        ];
        self.draw("Enrollment", &canvas.lines(), &footer)?;
        Ok(overlay)
    }
}

impl Surface for TerminalSurface {
    fn render(
        &mut self,
        frame: &GrayImage,
        faces: &VisibleFaces,
        now: NaiveDateTime,
    ) -> io::Result<()> {
        let (cols, rows) = Self::canvas_size();
        let mut canvas = Canvas::from_frame(frame, cols, rows);
        let mut footer = Vec::with_capacity(faces.len() + 1);

        for (region, face) in faces.iter() {
            let label = face_label(face);
            canvas.draw_box(region);
            canvas.label(region, &label);
            footer.push(label);
        }
        footer.push(QUIT_HINT.to_string());

        let header = now.format("%Y-%m-%d %H:%M:%S").to_string();
        self.draw(&header, &canvas.lines(), &footer)
    }

    fn quit_requested(&mut self) -> bool {
        match poll_key() {
            Ok(Some(key)) => {
                matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc)
                    || is_interrupt(&key)
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "reading keyboard failed; stopping");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_face_label() {
        let known =
            VisibleFace { name: Some("Alice".into()), newly_marked: false, confidence: 0.934 };
        assert_eq!(face_label(&known), "Alice (93%)");

        let marked = VisibleFace { newly_marked: true, ..known };
        assert_eq!(face_label(&marked), "Alice \u{2713} (93%)");

        let unknown = VisibleFace { name: None, newly_marked: false, confidence: 0.2 };
        assert_eq!(face_label(&unknown), "Unknown");
    }

    #[test]
    fn test_canvas_brightness() {
        let black = Canvas::from_frame(&GrayImage::new(40, 20), 4, 2);
        assert_eq!(black.lines(), vec!["    ", "    "]);

        let white = Canvas::from_frame(&GrayImage::from_pixel(40, 20, Luma([255])), 4, 2);
        assert_eq!(white.lines(), vec!["@@@@", "@@@@"]);
    }

    #[test]
    fn test_canvas_box_and_label() {
        let mut canvas = Canvas::from_frame(&GrayImage::new(100, 100), 10, 10);
        let region = Region::new(20, 40, 60, 80);
        canvas.draw_box(&region);
        canvas.label(&region, "Bob");

        let lines = canvas.lines();
        assert_eq!(lines[3], "  Bob     ");
        assert_eq!(lines[4], "  +---+   ");
        assert_eq!(lines[5], "  |   |   ");
        assert_eq!(lines[8], "  +---+   ");
    }

    #[test]
    fn test_canvas_clips_out_of_frame() {
        let mut canvas = Canvas::from_frame(&GrayImage::new(100, 100), 10, 10);
        canvas.draw_box(&Region::new(-30, -30, 500, 500));
        assert!(canvas.plot(55.0, 55.0, 'o'));
        assert!(!canvas.plot(150.0, 5.0, 'o'));
        assert!(!canvas.plot(-1.0, 5.0, 'o'));

        let lines = canvas.lines();
        assert_eq!(lines[0], "+--------+");
        assert_eq!(lines[5], "|    o   |");
    }
}
