use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser as _;
use mp4check::{FileSource, Severity};

#[derive(clap::Parser)]
struct Args {
    /// Maximum size of any single box payload read into memory, in bytes.
    #[clap(long)]
    max_payload_size: Option<u64>,

    /// Print warnings as well as errors.
    #[clap(long, short = 'w')]
    warnings: bool,

    /// Path to the MP4 file to validate.
    file: PathBuf,
}

fn main() -> Result<ExitCode, anyhow::Error> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .context("Error initializing logging")?;

    let args = Args::try_parse().context("Error parsing command line arguments")?;

    let file = File::open(&args.file).context("Error opening file")?;
    let source = FileSource::new(file).context("Error reading file")?;

    let mut config = mp4check::Config::builder();
    if let Some(max_payload_size) = args.max_payload_size {
        config.max_payload_size(max_payload_size);
    }

    let outcome = mp4check::validate_with_config(&source, config.build())
        .with_context(|| format!("Error parsing {}", args.file.display()))?;

    for finding in &outcome.findings {
        if finding.severity == Severity::Error || args.warnings {
            eprintln!("{finding}");
        }
    }

    let error_count = outcome.error_count();
    if error_count > 0 {
        eprintln!("{}: {error_count} error(s)", args.file.display());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
