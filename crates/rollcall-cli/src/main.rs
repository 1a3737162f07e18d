use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::DEFAULT_ENCODING_DIM;
use rollcall_store::SqliteStore;
use std::path::PathBuf;
use std::time::Duration;

mod admin;
mod daemon;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// SQLite database (default: $ROLLCALL_DB_PATH or $XDG_DATA_HOME/rollcall/attendance.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Talk to rollcalld on the system bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person with a reference encoding
    Add {
        name: String,
        /// Role, e.g. "Student", "Teacher", "Employee"
        #[arg(short, long, default_value = "Student")]
        role: String,
        /// JSON file holding the encoding as an array of numbers
        #[arg(short, long)]
        encoding: PathBuf,
        /// Path of the photo the encoding came from
        #[arg(long)]
        image: Option<String>,
        /// Expected encoding dimension
        #[arg(long, default_value_t = DEFAULT_ENCODING_DIM)]
        dim: usize,
    },
    /// Remove a person and their attendance history
    Remove { name: String },
    /// List registered people
    People,
    /// Show who is present and absent on a date
    Today {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show one person's recent attendance
    History {
        name: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Attendance between two dates
    Report {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// Per-person days present and rate instead of individual rows
        #[arg(long)]
        summary: bool,
    },
    /// Headcount for a date
    Stats {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Record attendance by hand
    Mark {
        name: String,
        /// Local timestamp, e.g. 2026-10-19T08:55:00 (default: now)
        #[arg(long, value_parser = parse_at)]
        at: Option<NaiveDateTime>,
    },
    /// Start a recognition session in rollcalld
    Start {
        #[arg(long)]
        tolerance: Option<f32>,
        #[arg(long)]
        stride: Option<u32>,
    },
    /// Stop the running session
    Stop,
    /// Show daemon status
    Status,
    /// Submit frames from an NDJSON file to the running session
    Feed {
        file: PathBuf,
        /// Pause between frames, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

fn parse_at(raw: &str) -> Result<NaiveDateTime, String> {
    rollcall_core::parse_timestamp(raw).map_err(|e| e.to_string())
}

fn db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var("ROLLCALL_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(rollcall_store::default_db_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    let today = Local::now().date_naive();
    let open = || SqliteStore::open(db_path(cli.db.clone()));

    match cli.command {
        Commands::Add {
            name,
            role,
            encoding,
            image,
            dim,
        } => {
            let encoding = admin::read_encoding(&encoding, dim)?;
            admin::add(&open()?, &name, &role, &encoding, image.as_deref())?;
        }
        Commands::Remove { name } => admin::remove(&open()?, &name)?,
        Commands::People => admin::people(&open()?, json)?,
        Commands::Today { date } => admin::today(&open()?, date.unwrap_or(today), json)?,
        Commands::History { name, days } => admin::history(&open()?, &name, days, today, json)?,
        Commands::Report { from, to, summary } => admin::report(&open()?, from, to, summary, json)?,
        Commands::Stats { date } => admin::stats(&open()?, date.unwrap_or(today), json)?,
        Commands::Mark { name, at } => {
            let at = at.unwrap_or_else(|| Local::now().naive_local());
            admin::mark(open()?, &name, at)?;
        }
        Commands::Start { tolerance, stride } => {
            let proxy = daemon::connect(cli.system).await?;
            daemon::start(&proxy, tolerance, stride).await?;
        }
        Commands::Stop => daemon::stop(&daemon::connect(cli.system).await?).await?,
        Commands::Status => daemon::status(&daemon::connect(cli.system).await?).await?,
        Commands::Feed { file, interval_ms } => {
            let proxy = daemon::connect(cli.system).await?;
            daemon::feed(&proxy, &file, interval_ms.map(Duration::from_millis)).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_report_dates() {
        let cli = Cli::try_parse_from(["rollcall", "report", "--from", "2026-10-01", "--to", "2026-10-19", "--summary"])
            .unwrap();
        let Commands::Report { from, to, summary } = cli.command else {
            panic!("expected report");
        };
        assert_eq!(from, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert!(summary);
    }

    #[test]
    fn test_parse_mark_timestamp() {
        let cli = Cli::try_parse_from(["rollcall", "mark", "Alice", "--at", "2026-10-19 08:55:00"]).unwrap();
        let Commands::Mark { at, .. } = cli.command else {
            panic!("expected mark");
        };
        assert!(at.is_some());
        assert!(Cli::try_parse_from(["rollcall", "mark", "Alice", "--at", "noon"]).is_err());
    }
}
