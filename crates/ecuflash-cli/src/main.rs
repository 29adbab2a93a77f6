//! Command-line demonstration client driving [`ecuflash_core::FlashSession`]
//! over a real SocketCAN interface (§6, §9).
//!
//! This is the one companion surface the repository actually ships, standing
//! in for the text menu / GUI front-ends the core is deliberately agnostic
//! of: it wires a [`FlashConfig`] and a [`ecuflash_socketcan::SocketCanTransport`]
//! together, forwards progress events to `log`, and translates the result
//! into the process exit code classification.

use clap::{Parser, Subcommand};
use ecuflash_core::config::FlashConfig;
use ecuflash_core::integrity::CalibrationImage;
use ecuflash_core::safety;
use ecuflash_core::{CancellationToken, CoreError, FlashSession, OrchestratorError, Phase, ProgressEvent, RollbackOutcome};
use ecuflash_socketcan::SocketCanTransport;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser)]
#[command(name = "ecuflash", about = "Safety-gated ECU flashing client for BMW N54 controllers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the safety gate (Phase A) against a candidate image without
    /// opening a CAN channel. Useful to check an image before committing to
    /// a real session.
    Validate {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        stock: Option<PathBuf>,
    },
    /// Runs a full flash session end to end over the configured SocketCAN
    /// interface.
    Flash {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        stock: Option<PathBuf>,
        /// Proceeds even if Phase A reports non-fatal warnings.
        #[arg(long)]
        ack_warnings: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Validate { config, image, stock } => run_validate(config, image, stock),
        Command::Flash { config, image, stock, ack_warnings } => run_flash(config, image, stock, ack_warnings),
    };
    std::process::exit(code);
}

fn run_validate(config_path: PathBuf, image_path: PathBuf, stock_path: Option<PathBuf>) -> i32 {
    let config = match FlashConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config: {e}");
            return 6;
        }
    };
    let image = match std::fs::read(&image_path) {
        Ok(b) => b,
        Err(e) => {
            log::error!("failed to read image {}: {e}", image_path.display());
            return 6;
        }
    };
    let stock = match stock_path.map(std::fs::read).transpose() {
        Ok(b) => b,
        Err(e) => {
            log::error!("failed to read stock image: {e}");
            return 6;
        }
    };

    match safety::validate_image(config.variant.id, &image, stock.as_deref()) {
        Ok(outcome) => {
            if outcome.warnings.is_empty() {
                log::info!("image accepted with no warnings");
            } else {
                for warning in &outcome.warnings {
                    log::warn!("validation warning at {:#X}: {}", warning.offset, warning.detail);
                }
            }
            0
        }
        Err(OrchestratorError::ValidationRefused { layer, details }) => {
            log::error!("safety gate refused the image at layer {layer}: {details}");
            2
        }
        Err(other) => {
            log::error!("unexpected error from the safety gate: {other}");
            6
        }
    }
}

fn run_flash(config_path: PathBuf, image_path: PathBuf, stock_path: Option<PathBuf>, ack_warnings: bool) -> i32 {
    let config = match FlashConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config: {e}");
            return 6;
        }
    };
    let image_bytes = match std::fs::read(&image_path) {
        Ok(b) => b,
        Err(e) => {
            log::error!("failed to read image {}: {e}", image_path.display());
            return 6;
        }
    };
    let stock_bytes = match stock_path.map(std::fs::read).transpose() {
        Ok(b) => b,
        Err(e) => {
            log::error!("failed to read stock image: {e}");
            return 6;
        }
    };

    let variant = config.variant.id;
    let session_id = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let cancel = CancellationToken::new();

    let mut session = match FlashSession::begin_flash(session_id, config.clone(), cancel.clone()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to start session: {e}");
            return 6;
        }
    };

    let mut transport = match SocketCanTransport::open(&config.transport.channel) {
        Ok(t) => t,
        Err(e) => {
            log::error!("failed to open {}: {e}", config.transport.channel);
            return 3;
        }
    };

    let candidate = CalibrationImage::new(variant, image_bytes);
    let (tx, rx) = crossbeam_channel::unbounded();
    let progress_thread = std::thread::spawn(move || {
        for event in rx {
            log_progress(event);
        }
    });

    let result = session.run(&mut transport, candidate, stock_bytes.as_deref(), ack_warnings, &tx);
    drop(tx);
    let _ = progress_thread.join();

    match result {
        Ok(outcome) => {
            log::info!("flash completed: {} bytes transferred, {} warnings", outcome.bytes_transferred, outcome.warnings.len());
            0
        }
        Err(err) => {
            log::error!("{err}");
            exit_code_for(&err)
        }
    }
}

fn log_progress(event: ProgressEvent) {
    match event {
        ProgressEvent::PhaseStarted(phase) => log::info!("phase started: {phase:?}"),
        ProgressEvent::PhaseCompleted(phase) => log::info!("phase completed: {phase:?}"),
        ProgressEvent::Transfer { bytes_sent, bytes_total } => log::debug!("transfer progress: {bytes_sent}/{bytes_total}"),
        ProgressEvent::Warning(warning) => log::warn!("validation warning at {:#X}: {}", warning.offset, warning.detail),
    }
}

/// Maps a failed session outcome to the exit code classification (§6): `2`
/// validation refusal, `3` connect/unlock failure, `4` transfer failure with
/// successful rollback, `5` transfer failure requiring manual recovery, `6`
/// internal invariant violation.
fn exit_code_for(err: &CoreError) -> i32 {
    match &err.source {
        OrchestratorError::ValidationRefused { .. } => 2,
        OrchestratorError::VerifyMismatch { rollback, .. } => {
            if matches!(rollback, RollbackOutcome::Ok) {
                4
            } else {
                5
            }
        }
        OrchestratorError::InternalInvariant(_) => 6,
        OrchestratorError::Diagnostic(_) if matches!(err.phase, Phase::Connect | Phase::Backup) => 3,
        _ => 5,
    }
}
