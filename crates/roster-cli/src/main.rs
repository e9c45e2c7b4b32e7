use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use roster_core::types::TIMESTAMP_FORMAT;
use roster_core::{leaderboard, AttendanceEvent, Ledger, SessionEvent, Standing};
use roster_hw::Camera;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod runner;

use config::Config;

#[derive(Parser)]
#[command(name = "roster", about = "Face-recognition attendance kiosk", version)]
struct Cli {
    /// TOML configuration file (defaults to $ROSTER_CONFIG when set)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Attendance ledger CSV
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and record attendance until Ctrl-C
    Run(RunArgs),
    /// Print the leaderboard computed from the ledger
    Leaderboard {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Show only the first N rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Print the current top attendee
    Top,
    /// Create the ledger with its header if it does not exist
    Init,
    /// List V4L2 capture devices
    Devices,
}

#[derive(Args)]
struct RunArgs {
    /// Directory of known faces, one image per person
    #[arg(long)]
    gallery: Option<PathBuf>,
    /// Leaderboard CSV rewritten after every new event
    #[arg(long)]
    leaderboard: Option<PathBuf>,
    /// Camera device path
    #[arg(short, long)]
    device: Option<String>,
    /// Directory holding the ONNX models
    #[arg(long)]
    models: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(ledger) = cli.ledger {
        config.ledger_path = ledger;
    }

    match cli.command {
        Commands::Run(args) => {
            apply_run_args(&mut config, args);
            run(config).await?;
        }
        Commands::Leaderboard { json, limit } => {
            let events = history(&config.ledger_path)?;
            let mut standings = leaderboard::rank(&events);
            if let Some(limit) = limit {
                standings.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&standings)?);
            } else if standings.is_empty() {
                println!("No attendance recorded");
            } else {
                print!("{}", render_table(&standings));
            }
        }
        Commands::Top => {
            let events = history(&config.ledger_path)?;
            match leaderboard::top(&events) {
                Some(identity) => println!("{identity}"),
                None => println!("No attendance recorded"),
            }
        }
        Commands::Init => {
            let ledger = Ledger::initialize(&config.ledger_path)?;
            if ledger.was_created() {
                println!("Created {}", ledger.path().display());
            } else {
                println!("{} already exists", ledger.path().display());
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn apply_run_args(config: &mut Config, args: RunArgs) {
    if let Some(gallery) = args.gallery {
        config.gallery_dir = gallery;
    }
    if let Some(leaderboard) = args.leaderboard {
        config.leaderboard_path = leaderboard;
    }
    if let Some(device) = args.device {
        config.camera_device = device;
    }
    if let Some(models) = args.models {
        config.model_dir = models;
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(
        gallery = %config.gallery_dir.display(),
        ledger = %config.ledger_path.display(),
        device = %config.camera_device,
        "roster starting"
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let handle = runner::spawn_session(&config, events_tx)?;

    // The channel closes once the session thread drops its sender.
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => announce(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                tracing::info!("stop requested");
                handle.stop();
            }
        }
    }

    let summary = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("joining session thread")??;

    println!(
        "Session ended: {} frame(s), {} attendee(s) recorded",
        summary.frames, summary.recorded
    );
    Ok(())
}

fn announce(event: &SessionEvent) {
    match event {
        SessionEvent::Recorded { identity, timestamp } => {
            println!("{identity} checked in at {}", timestamp.format(TIMESTAMP_FORMAT));
        }
        SessionEvent::LeaderboardUpdated { standings } => {
            tracing::debug!(rows = standings.len(), "leaderboard updated");
        }
        SessionEvent::TopAttendeeArrived { identity } => {
            println!("Congratulations {identity} for being the top attendee!");
        }
    }
}

/// Ledger contents, or nothing when the ledger has not been created yet.
fn history(path: &Path) -> Result<Vec<AttendanceEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    leaderboard::load_all_events(path).with_context(|| format!("reading {}", path.display()))
}

fn render_table(standings: &[Standing]) -> String {
    let width = standings
        .iter()
        .map(|s| s.identity.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max("Student".len());

    let mut out = format!("{:>4}  {:<width$}  {:>5}\n", "Rank", "Student", "Total");
    for s in standings {
        out.push_str(&format!(
            "{:>4}  {:<width$}  {:>5}\n",
            s.rank,
            s.identity.as_str(),
            s.total
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use roster_core::Identity;

    fn event(name: &str, minute: u32) -> AttendanceEvent {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, minute, 0)
            .unwrap();
        AttendanceEvent::new(Identity::new(name), ts)
    }

    #[test]
    fn test_render_table_aligns_names() {
        let standings = leaderboard::rank(&[event("Bo", 0), event("Alexandra", 1), event("Bo", 2)]);
        let table = render_table(&standings);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Rank  Student    Total");
        assert_eq!(lines[1], "   1  Bo             2");
        assert_eq!(lines[2], "   2  Alexandra      1");
    }

    #[test]
    fn test_history_missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = history(&dir.path().join("sheet.csv")).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_history_reads_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(
            &path,
            "Name,Timestamp\nAda,2024-05-01 09:00:00\nBo,2024-05-01 09:01:00\nAda,2024-05-02 09:00:00\n",
        )
        .unwrap();

        let events = history(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(leaderboard::top(&events), Some(Identity::new("Ada")));
    }

    #[test]
    fn test_run_flags_override_config() {
        let mut config = Config::default();
        apply_run_args(
            &mut config,
            RunArgs {
                gallery: Some(PathBuf::from("faces")),
                leaderboard: None,
                device: Some("/dev/video4".into()),
                models: None,
            },
        );
        assert_eq!(config.gallery_dir, PathBuf::from("faces"));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.leaderboard_path, PathBuf::from("attendance_leaderboard.csv"));
    }

    #[test]
    fn test_cli_parses_global_ledger_after_subcommand() {
        let cli = Cli::try_parse_from(["roster", "leaderboard", "--json", "--ledger", "x.csv"]).unwrap();
        assert_eq!(cli.ledger, Some(PathBuf::from("x.csv")));
        assert!(matches!(cli.command, Commands::Leaderboard { json: true, limit: None }));
    }
}
