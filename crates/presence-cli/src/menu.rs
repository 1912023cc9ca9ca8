//! Interactive menu.
//!
//! Every action's error is printed and the menu comes back; only end of
//! input or "Exit" leaves the loop.

use crate::app::{self, ReportScope, System};
use crate::config::Config;
use crate::report;
use anyhow::{Context, Result};
use presence_core::Ledger;
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Recognize,
    AddFace,
    ViewAttendance,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Recognize),
            "2" => Some(Self::AddFace),
            "3" => Some(Self::ViewAttendance),
            "4" | "q" | "quit" | "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

const MAIN_MENU: &str = "\n=== Face Recognition Attendance ===
1. Start recognition
2. Add a new face
3. View attendance
4. Exit";

const REPORT_MENU: &str = "\nView attendance:
1. Today
2. A specific date
3. All records";

/// Line-oriented prompt over any reader and writer.
pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print `question` and read one trimmed line. `None` at end of input.
    pub fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    pub fn say(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "{text}")
    }

    /// Show the main menu until a valid choice is entered.
    pub fn choose(&mut self) -> io::Result<Option<MenuChoice>> {
        loop {
            self.say(MAIN_MENU)?;
            let Some(answer) = self.ask("Choose an option (1-4): ")? else {
                return Ok(None);
            };
            match MenuChoice::parse(&answer) {
                Some(choice) => return Ok(Some(choice)),
                None => self.say("Invalid choice. Please enter 1, 2, 3 or 4.")?,
            }
        }
    }

    /// Ask which days to report. `Ok(None)` on end of input or bad input,
    /// after telling the user why.
    pub fn report_scope(&mut self) -> io::Result<Option<ReportScope>> {
        self.say(REPORT_MENU)?;
        let Some(answer) = self.ask("Choose an option (1-3): ")? else {
            return Ok(None);
        };
        match answer.as_str() {
            "1" => Ok(Some(ReportScope::Today)),
            "3" => Ok(Some(ReportScope::All)),
            "2" => {
                let Some(raw) = self.ask("Date (YYYY-MM-DD): ")? else {
                    return Ok(None);
                };
                match report::parse_date(&raw) {
                    Ok(date) => Ok(Some(ReportScope::Date(date))),
                    Err(e) => {
                        self.say(&format!("{e}"))?;
                        Ok(None)
                    }
                }
            }
            _ => {
                self.say("Invalid choice.")?;
                Ok(None)
            }
        }
    }
}

/// The interactive menu. The face models are loaded on first use, so the
/// attendance report works on a machine without them.
pub struct Menu<'a> {
    config: &'a Config,
    ledger: Ledger,
    system: Option<System>,
}

impl<'a> Menu<'a> {
    pub fn open(config: &'a Config) -> Result<Self> {
        let ledger = Ledger::open(&config.ledger_path)
            .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?;
        Ok(Self { config, ledger, system: None })
    }

    /// Run on stdin/stdout.
    pub fn run_stdio(&mut self) -> Result<()> {
        let stdin = io::stdin();
        self.run(&mut Prompt::new(stdin.lock(), io::stdout()))
    }

    pub fn run<R: BufRead, W: Write>(&mut self, prompt: &mut Prompt<R, W>) -> Result<()> {
        while let Some(choice) = prompt.choose()? {
            let outcome = match choice {
                MenuChoice::Recognize => self.recognize(prompt),
                MenuChoice::AddFace => self.add_face(prompt),
                MenuChoice::ViewAttendance => self.view_attendance(prompt),
                MenuChoice::Exit => break,
            };
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "menu action failed");
                prompt.say(&format!("Error: {e:#}"))?;
            }
        }
        prompt.say("Goodbye.")?;
        Ok(())
    }

    /// The attendance system, loading the models and gallery if needed.
    fn system<R: BufRead, W: Write>(&mut self, prompt: &mut Prompt<R, W>) -> Result<&mut System> {
        let system = match self.system.take() {
            Some(system) => system,
            None => {
                let system = app::open_system(self.config)?;
                prompt.say(&format!("Loaded {} known face(s).", system.gallery().len()))?;
                system
            }
        };
        Ok(self.system.insert(system))
    }

    fn recognize<R: BufRead, W: Write>(&mut self, prompt: &mut Prompt<R, W>) -> Result<()> {
        let config = self.config;
        let summary = app::run_recognition(self.system(prompt)?, config)?;
        prompt.say(app::summary_text(&summary).trim_end())?;
        Ok(())
    }

    fn add_face<R: BufRead, W: Write>(&mut self, prompt: &mut Prompt<R, W>) -> Result<()> {
        let Some(name) = prompt.ask("Name of the person: ")? else {
            return Ok(());
        };
        if name.is_empty() {
            prompt.say("Name cannot be empty.")?;
            return Ok(());
        }
        let config = self.config;
        match app::enroll_live(self.system(prompt)?, config, &name)? {
            Some(outcome) => prompt.say(&app::enrolled_text(&outcome))?,
            None => prompt.say("Enrollment cancelled.")?,
        }
        Ok(())
    }

    fn view_attendance<R: BufRead, W: Write>(&self, prompt: &mut Prompt<R, W>) -> Result<()> {
        let Some(scope) = prompt.report_scope()? else {
            return Ok(());
        };
        let today = chrono::Local::now().date_naive();
        let days = app::collect_report(
            scope,
            today,
            |d| self.ledger.records_for_date(d),
            || self.ledger.all_records_grouped_by_date(),
        )?;
        prompt.say(report::format_days(&days).trim_end())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn prompt(input: &str) -> Prompt<Cursor<Vec<u8>>, Vec<u8>> {
        Prompt::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn output(p: Prompt<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(p.output).unwrap()
    }

    #[test]
    fn test_menu_choice_parse() {
        assert_eq!(MenuChoice::parse(" 1 "), Some(MenuChoice::Recognize));
        assert_eq!(MenuChoice::parse("2"), Some(MenuChoice::AddFace));
        assert_eq!(MenuChoice::parse("3"), Some(MenuChoice::ViewAttendance));
        assert_eq!(MenuChoice::parse("4"), Some(MenuChoice::Exit));
        assert_eq!(MenuChoice::parse("5"), None);
        assert_eq!(MenuChoice::parse(""), None);
    }

    #[test]
    fn test_choose_reprompts_on_invalid_input() {
        let mut p = prompt("9\nabc\n3\n");
        assert_eq!(p.choose().unwrap(), Some(MenuChoice::ViewAttendance));
        let out = output(p);
        assert_eq!(out.matches("Invalid choice").count(), 2);
        assert_eq!(out.matches("1. Start recognition").count(), 3);
    }

    #[test]
    fn test_choose_end_of_input() {
        let mut p = prompt("");
        assert_eq!(p.choose().unwrap(), None);
    }

    #[test]
    fn test_report_scope() {
        assert_eq!(prompt("1\n").report_scope().unwrap(), Some(ReportScope::Today));
        assert_eq!(prompt("3\n").report_scope().unwrap(), Some(ReportScope::All));
        assert_eq!(
            prompt("2\n2024-09-02\n").report_scope().unwrap(),
            Some(ReportScope::Date(NaiveDate::from_ymd_opt(2024, 9, 2).unwrap()))
        );
    }

    #[test]
    fn test_report_works_without_face_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            model_dir: dir.path().join("no-models"),
            known_faces_dir: dir.path().join("known_faces"),
            ledger_path: dir.path().join("attendance.csv"),
            ..Config::default()
        };
        let ledger = Ledger::open(&config.ledger_path).unwrap();
        let when = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap().and_hms_opt(8, 30, 0).unwrap();
        ledger.mark_present("Dana", when).unwrap();

        let mut menu = Menu::open(&config).unwrap();
        let mut p = prompt("1\n3\n3\n4\n");
        menu.run(&mut p).unwrap();

        let out = output(p);
        assert!(out.contains("Error: loading face models"));
        assert!(out.contains("Dana"));
        assert!(out.contains("08:30:00"));
        assert!(out.ends_with("Goodbye.\n"));
        assert!(menu.system.is_none());
    }

    #[test]
    fn test_report_scope_rejects_bad_date() {
        let mut p = prompt("2\n09/02/2024\n");
        assert_eq!(p.report_scope().unwrap(), None);
        assert!(output(p).contains("expected YYYY-MM-DD"));
    }
}
