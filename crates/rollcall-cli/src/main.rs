use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::enrollment::{enroll_image, list_identities};
use rollcall_core::{
    read_enrollment_dir, AttendanceLedger, AttendanceRecord, Config, EncodingStore, Identity,
    OnnxAnalyzer,
};
use rollcall_hw::Camera;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance CLI", version)]
struct Cli {
    /// Enrollment image directory (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    enrollment_dir: Option<PathBuf>,

    /// Attendance CSV file (overrides config)
    #[arg(long, global = true, value_name = "FILE")]
    attendance: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode every enrollment image and report the result
    Train,
    /// Add a photo to the enrollment directory
    Enroll {
        /// Roll number (digits only)
        #[arg(long)]
        roll: String,
        /// Display name (letters and spaces only)
        #[arg(long)]
        name: String,
        /// Photo to enroll
        image: PathBuf,
    },
    /// List enrolled students
    Students,
    /// Show attendance records, newest first
    Attendance {
        /// Only show this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Count today's attendees
    Today,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(dir) = cli.enrollment_dir {
        config.enrollment_dir = dir;
    }
    if let Some(path) = cli.attendance {
        config.attendance_path = path;
    }

    match cli.command {
        Commands::Train => train(&config)?,
        Commands::Enroll { roll, name, image } => {
            let identity = Identity::for_enrollment(&roll, &name)?;
            let dest = enroll_image(&config.enrollment_dir, &image, &identity)?;
            println!("Enrolled {identity} as {}", dest.display());
        }
        Commands::Students => {
            let students = list_identities(&config.enrollment_dir)?;
            if students.is_empty() {
                println!("No students enrolled in {}", config.enrollment_dir.display());
            }
            for (path, identity) in students {
                let file = path.file_name().map(|f| f.to_string_lossy()).unwrap_or_default();
                println!("{:<8} {:<24} {file}", identity.roll_number, identity.display_name);
            }
        }
        Commands::Attendance { date, json } => {
            let ledger = AttendanceLedger::new(&config.attendance_path);
            let mut records = ledger.newest_first()?;
            if let Some(date) = date {
                records.retain(|r| r.date == date);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_records(&records);
            }
        }
        Commands::Today => {
            let today = chrono::Local::now().date_naive();
            let count = AttendanceLedger::new(&config.attendance_path).count_on(today)?;
            println!("{count} present on {today}");
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

fn train(config: &Config) -> Result<()> {
    let images = read_enrollment_dir(&config.enrollment_dir)?;
    let mut analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let (store, report) = EncodingStore::build(&mut analyzer, &images);

    println!("Encoding complete");
    println!("  images:     {}", images.len());
    println!("  enrolled:   {}", report.enrolled);
    println!("  no face:    {}", report.no_face);
    println!("  failed:     {}", report.failed);
    if report.dimension_mismatch > 0 {
        println!("  mismatched: {}", report.dimension_mismatch);
    }
    if let Some(dim) = store.dimension() {
        println!("  dimension:  {dim}");
    }
    Ok(())
}

fn print_records(records: &[AttendanceRecord]) {
    if records.is_empty() {
        println!("No attendance recorded");
        return;
    }
    println!("{:<24} {:<8} {:<10} {}", "Name", "RollNo", "Date", "Time");
    for r in records {
        println!("{:<24} {:<8} {:<10} {}", r.name, r.roll_no, r.date.to_string(), r.time);
    }
}
