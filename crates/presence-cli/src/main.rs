mod app;
mod capture;
mod config;
mod menu;
mod report;
mod terminal;

use anyhow::{Context, Result};
use app::ReportScope;
use clap::{Parser, Subcommand};
use config::Config;
use presence_core::{Gallery, Ledger, SampleDir};
use presence_hw::Camera;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "presence", version, about = "Face recognition attendance terminal")]
struct Cli {
    /// TOML configuration file (default: $PRESENCE_CONFIG, if set)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default)
    Menu,
    /// Run live recognition and mark attendance
    Run,
    /// Enroll a new face from the camera or an image file
    Enroll {
        /// Display name of the person
        #[arg(short, long)]
        name: String,
        /// Use this image instead of the live camera
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
    },
    /// Print attendance records (today by default)
    Report {
        /// Day to report, YYYY-MM-DD
        #[arg(long, conflicts_with_all = ["today", "all"])]
        date: Option<String>,
        /// Today's records
        #[arg(long, conflicts_with = "all")]
        today: bool,
        /// Every day, most recent first
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List enrolled faces
    Gallery,
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration resolved");

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Menu => menu::Menu::open(&config)?.run_stdio()?,
        Commands::Run => {
            let mut system = app::open_system(&config)?;
            let summary = app::run_recognition(&mut system, &config)?;
            print!("{}", app::summary_text(&summary));
        }
        Commands::Enroll { name, image } => {
            let mut system = app::open_system(&config)?;
            match image {
                Some(path) => {
                    let outcome = app::enroll_image(&mut system, &name, &path)?;
                    println!("{}", app::enrolled_text(&outcome));
                }
                None => match app::enroll_live(&mut system, &config, &name)? {
                    Some(outcome) => println!("{}", app::enrolled_text(&outcome)),
                    None => println!("Enrollment cancelled."),
                },
            }
        }
        Commands::Report { date, today: _, all, json } => {
            let scope = match (date, all) {
                (Some(raw), _) => ReportScope::Date(report::parse_date(&raw)?),
                (None, true) => ReportScope::All,
                (None, false) => ReportScope::Today,
            };
            let ledger = Ledger::open(&config.ledger_path)
                .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?;
            let today = chrono::Local::now().date_naive();
            let days = app::collect_report(
                scope,
                today,
                |d| ledger.records_for_date(d),
                || ledger.all_records_grouped_by_date(),
            )?;
            app::print_report(&days, json)?;
        }
        Commands::Gallery => {
            let samples = SampleDir::new(&config.known_faces_dir);
            let mut extractor = app::load_extractor(&config)?;
            let (gallery, load) = Gallery::load(&samples, &mut extractor)?;
            if gallery.is_empty() {
                println!("No known faces in {}", samples.root().display());
            }
            for name in gallery.names() {
                println!("{name}");
            }
            for skipped in &load.skipped {
                println!("skipped {}: {}", skipped.origin.display(), skipped.reason);
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}
