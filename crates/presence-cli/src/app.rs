//! Operations shared by the interactive menu and the subcommands.

use crate::capture::{CameraSource, LiveSampleProvider};
use crate::config::Config;
use crate::report::{self, DayReport};
use crate::terminal::TerminalSurface;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use presence_core::{
    AttendanceRecord, AttendanceSystem, EnrollOutcome, OnnxExtractor, SessionSummary, StillImage,
    StopReason,
};
use std::collections::BTreeMap;
use std::path::Path;

pub type System = AttendanceSystem<OnnxExtractor>;

/// Which days a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportScope {
    Today,
    Date(NaiveDate),
    All,
}

pub fn load_extractor(config: &Config) -> Result<OnnxExtractor> {
    OnnxExtractor::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))
}

/// Load the models, prepare the ledger and build the gallery.
pub fn open_system(config: &Config) -> Result<System> {
    let extractor = load_extractor(config)?;
    AttendanceSystem::open(config.settings(), extractor).context("opening attendance system")
}

/// Open the camera and run recognition until the user quits.
///
/// The camera and the raw terminal are released before this returns.
pub fn run_recognition(system: &mut System, config: &Config) -> Result<SessionSummary> {
    if system.gallery().is_empty() {
        anyhow::bail!("no known faces loaded; add a face first");
    }
    let mut source = CameraSource::open(config).context("opening camera")?;
    let mut surface = TerminalSurface::new().context("preparing terminal")?;
    let summary = system.run_recognition(&mut source, &mut surface)?;
    Ok(summary)
}

/// Enroll `name` from the live camera preview. `None` if cancelled.
pub fn enroll_live(
    system: &mut System,
    config: &Config,
    name: &str,
) -> Result<Option<EnrollOutcome>> {
    let mut source = CameraSource::open(config).context("opening camera")?;
    let mut surface = TerminalSurface::new().context("preparing terminal")?;
    let mut provider =
        LiveSampleProvider::new(&mut source, &mut surface, config.max_dropped_frames);
    Ok(system.enroll(name, &mut provider)?)
}

/// Enroll `name` from an image file on disk.
pub fn enroll_image(system: &mut System, name: &str, path: &Path) -> Result<EnrollOutcome> {
    let image = image::open(path)
        .with_context(|| format!("reading {}", path.display()))?
        .to_luma8();
    let outcome = system.enroll(name, &mut StillImage(Some(image)))?;
    outcome.context("no image supplied")
}

pub fn summary_text(summary: &SessionSummary) -> String {
    let mut out = format!(
        "Session ended after {} frames ({} matched).\n",
        summary.frames, summary.sampled
    );
    if summary.newly_marked.is_empty() {
        out.push_str("No new attendance recorded.\n");
    } else {
        out.push_str(&format!("Marked present: {}\n", summary.newly_marked.join(", ")));
    }
    if let StopReason::SourceFailed(reason) = &summary.stop {
        out.push_str(&format!("Camera stopped: {reason}\n"));
    }
    out
}

pub fn enrolled_text(outcome: &EnrollOutcome) -> String {
    format!(
        "Enrolled {} ({}). {} known face(s).",
        outcome.name,
        outcome.path.display(),
        outcome.identities
    )
}

/// Collect the days a report covers.
///
/// Both the menu and the `report` subcommand read the ledger directly so a
/// report never needs the face models.
pub fn collect_report<E>(
    scope: ReportScope,
    today: NaiveDate,
    by_date: impl Fn(NaiveDate) -> Result<Vec<AttendanceRecord>, E>,
    all: impl FnOnce() -> Result<BTreeMap<NaiveDate, Vec<AttendanceRecord>>, E>,
) -> Result<Vec<DayReport>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Ok(match scope {
        ReportScope::Today => vec![DayReport::new(today, by_date(today)?)],
        ReportScope::Date(date) => vec![DayReport::new(date, by_date(date)?)],
        ReportScope::All => report::days_descending(all()?),
    })
}

pub fn print_report(days: &[DayReport], json: bool) -> Result<()> {
    if json {
        println!("{}", report::to_json(days)?);
    } else {
        print!("{}", report::format_days(days));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_summary_text() {
        let summary = SessionSummary {
            frames: 40,
            sampled: 20,
            newly_marked: vec!["Alice".into(), "Bob".into()],
            stop: StopReason::Quit,
        };
        assert_eq!(
            summary_text(&summary),
            "Session ended after 40 frames (20 matched).\nMarked present: Alice, Bob\n"
        );

        let failed = SessionSummary {
            newly_marked: Vec::new(),
            stop: StopReason::SourceFailed("6 consecutive frames dropped".into()),
            ..summary
        };
        assert!(summary_text(&failed).contains("No new attendance recorded."));
        assert!(summary_text(&failed).ends_with("Camera stopped: 6 consecutive frames dropped\n"));
    }

    #[test]
    fn test_collect_report_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = presence_core::Ledger::open(dir.path().join("attendance.csv")).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        ledger.mark_present("Alice", d1.and_hms_opt(8, 0, 0).unwrap()).unwrap();
        ledger.mark_present("Bob", d2.and_hms_opt(9, 0, 0).unwrap()).unwrap();

        let query = |scope| {
            collect_report(
                scope,
                d2,
                |d| ledger.records_for_date(d),
                || ledger.all_records_grouped_by_date(),
            )
            .unwrap()
        };

        let today = query(ReportScope::Today);
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].records[0].name, "Bob");

        let earlier = query(ReportScope::Date(d1));
        assert_eq!(earlier[0].date, d1);
        assert_eq!(earlier[0].total, 1);

        let all = query(ReportScope::All);
        assert_eq!(all.iter().map(|d| d.date).collect::<Vec<_>>(), vec![d2, d1]);
    }

    #[test]
    fn test_enrolled_text() {
        let outcome = EnrollOutcome {
            name: "carol ann".into(),
            path: PathBuf::from("known_faces/carol_ann.jpg"),
            identities: 3,
        };
        assert_eq!(
            enrolled_text(&outcome),
            "Enrolled carol ann (known_faces/carol_ann.jpg). 3 known face(s)."
        );
    }
}
