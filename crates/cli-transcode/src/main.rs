use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use transcoder::{
    config::TranscodeConfig,
    job::{JobStore, StatusReporter},
    recording::{parse_starttime, RecordingRef},
    Pipeline, TranscodeError,
};

/// Transcode a finished recording to H.264/MP4, removing commercials first
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Job id of the queued transcode job
    #[arg(conflicts_with_all = ["chanid", "starttime", "tzoffset"])]
    jobid: Option<String>,

    /// Channel id, for manual runs together with --starttime and --tzoffset
    #[arg(long, requires_all = ["starttime", "tzoffset"])]
    chanid: Option<u32>,

    /// Recording start time (YYYYMMDDHHMMSS or YYYY-MM-DD HH:MM:SS)
    #[arg(long, requires_all = ["chanid", "tzoffset"])]
    starttime: Option<String>,

    /// Hours added to --starttime to reach UTC
    #[arg(long, allow_hyphen_values = true, requires_all = ["chanid", "starttime"])]
    tzoffset: Option<i32>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        let code = e
            .downcast_ref::<TranscodeError>()
            .map(TranscodeError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = TranscodeConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("H.264 transcode starting");
    info!("Configuration loaded:");
    info!("  Encoder: {}", cfg.ffmpeg_bin.display());
    info!("  Job state dir: {}", cfg.job_state_dir.display());
    info!("  Recording dir: {}", cfg.recording_dir.display());
    info!(
        "  Compression ratio: {}, HD max bitrate: {} kbps",
        cfg.encoding.compression_ratio, cfg.encoding.hd_max_bitrate_kbps
    );

    let (recording, reporter) = match (args.jobid, args.chanid, args.starttime, args.tzoffset) {
        (Some(job_id), _, _, _) => {
            info!("Running job {}", job_id);
            let sink = JobStore::new(&cfg.job_state_dir).sink_for(&job_id);
            (RecordingRef::Job(job_id), StatusReporter::new(Arc::new(sink)))
        }
        (None, Some(chanid), Some(starttime), Some(tzoffset)) => {
            let starttime = parse_starttime(&starttime, tzoffset)?;
            info!("Manual run for chanid {} at {}", chanid, starttime);
            (RecordingRef::Channel { chanid, starttime }, StatusReporter::log_only())
        }
        _ => bail!("Must be provided jobid, or chanid, starttime and timezone offset."),
    };

    let stats = Pipeline::new(&cfg, reporter).run(&recording).await?;
    info!("{}", stats.comment());
    Ok(())
}
