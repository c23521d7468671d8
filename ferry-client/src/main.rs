//! Ferry command-line client

mod args;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use ferry_client::config::Settings;
use ferry_client::constants::{CHECKPOINTS_FILE_NAME, CONFIG_FILE_NAME, HISTORY_FILE_NAME};
use ferry_client::transfers::{
    CheckpointStore, CheckpointWriter, EventStream, FailureAction, FsSink, HistoryEntry,
    HistoryStore, SessionContext, SessionError, TransferError, TransferEvent, copy_file,
    event_channel, receive_file, send_file,
};
use ferry_common::protocol::Direction;

use args::{Args, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let Some(data_dir) = data_dir(&args) else {
        eprintln!("error: could not determine the configuration directory");
        return ExitCode::FAILURE;
    };
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
    let mut settings = Settings::load_from(&config_path);
    if let Some(server) = &args.server {
        settings.server_address = server.clone();
    }
    if let Some(out) = &args.out {
        settings.download_dir = Some(out.clone());
    }

    let history_path = data_dir.join(HISTORY_FILE_NAME);
    let checkpoints_path = data_dir.join(CHECKPOINTS_FILE_NAME);
    let lifetime = Duration::from_secs(settings.resume.cache_lifetime_hours.saturating_mul(3600));

    let job = match args.command {
        Command::History { clear } => return show_history(HistoryStore::open(history_path), clear),
        Command::Checkpoints { clear } => {
            return show_checkpoints(CheckpointStore::open(checkpoints_path, lifetime), clear);
        }
        Command::Send { file, resume } => Job::Send { file, resume },
        Command::Receive { code, resume } => Job::Receive { code, resume },
        Command::Copy { file } => Job::Copy { file },
    };
    let store = CheckpointStore::open(checkpoints_path, lifetime);
    match transfer(job, settings, store, HistoryStore::open(history_path)).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if e.action() == FailureAction::Retry && !matches!(e, TransferError::Cancelled) {
                eprintln!("the transfer can be continued with --resume");
            }
            ExitCode::FAILURE
        }
    }
}

/// A command that moves a file
enum Job {
    Send { file: PathBuf, resume: bool },
    Receive { code: String, resume: bool },
    Copy { file: PathBuf },
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Directory holding the settings, checkpoints and history files
fn data_dir(args: &Args) -> Option<PathBuf> {
    match &args.config {
        Some(path) => Some(
            path.parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        ),
        None => Settings::app_dir(),
    }
}

/// Run one transfer command with checkpoints, history and Ctrl+C handling
async fn transfer(
    job: Job,
    settings: Settings,
    store: CheckpointStore,
    history: HistoryStore,
) -> Result<HistoryEntry, TransferError> {
    let resume = match &job {
        Job::Send { file, resume: true } => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let size = tokio::fs::metadata(file).await?.len();
            Some(
                store
                    .find_for_file(&name, size)
                    .ok_or(SessionError::NothingToResume)?,
            )
        }
        Job::Receive { code, resume: true } => Some(
            store
                .find_for_room(code)
                .ok_or(SessionError::NothingToResume)?,
        ),
        _ => None,
    };

    let download_dir = settings
        .download_dir
        .clone()
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let sink = FsSink::new(download_dir);

    let (writer, store_task) = CheckpointWriter::spawn(store);
    let (events, stream) = event_channel();
    let printer = tokio::spawn(print_events(stream, history));
    let ctx = SessionContext::new(settings, writer, events);

    let cancel = ctx.cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ncancelling...");
            cancel.cancel();
        }
    });

    let result = match job {
        Job::Send { file, .. } => send_file(&ctx, &file, resume).await,
        Job::Receive { code, .. } => receive_file(&ctx, &code, &sink, resume).await,
        Job::Copy { file } => copy_file(&ctx, &file, &sink).await,
    };

    ctrl_c.abort();
    ctx.checkpoints.flush().await;
    drop(ctx);
    finish_task(store_task, "checkpoint writer").await;
    finish_task(printer, "event printer").await;
    result
}

async fn finish_task<T>(task: JoinHandle<T>, name: &str) {
    if let Err(e) = task.await {
        tracing::warn!(task = name, error = %e, "task ended abnormally");
    }
}

/// Print session events and record finished transfers
async fn print_events(mut stream: EventStream, mut history: HistoryStore) {
    let mut last_percent = None;
    while let Some(event) = stream.recv().await {
        match event {
            TransferEvent::RoomCreated { room_id } => {
                println!("room code: {room_id}");
                println!("waiting for the receiver to join...");
            }
            TransferEvent::Joined { file_info, .. } => {
                println!("file: {} ({})", file_info.name, format_size(file_info.size));
            }
            TransferEvent::PeerJoined { .. } => println!("peer joined"),
            TransferEvent::ModeSelected {
                mode,
                reason,
                estimate,
                compression,
                ..
            } => {
                println!("transfer mode: {mode} ({reason}), about {}s", estimate.as_secs());
                if compression {
                    println!("the server suggests compressing this file");
                }
            }
            TransferEvent::ChannelOpened { kind } => tracing::info!(?kind, "data channel open"),
            TransferEvent::FellBackToRelay => println!("direct connection failed, using relay"),
            TransferEvent::Progress {
                bytes_transferred,
                file_size,
                ..
            } => {
                let percent = match file_size {
                    0 => 100,
                    size => bytes_transferred.saturating_mul(100) / size,
                };
                if last_percent.is_none_or(|last| percent >= last + 10 || percent == 100)
                    && last_percent != Some(percent)
                {
                    println!("{percent:>3}% {}", format_size(bytes_transferred));
                    last_percent = Some(percent);
                }
            }
            TransferEvent::Suspended { reason } => println!("connection lost: {reason}"),
            TransferEvent::Reconnecting {
                attempt,
                max_attempts,
                delay,
            } => println!(
                "reconnecting in {:.1}s (attempt {attempt}/{max_attempts})",
                delay.as_secs_f64()
            ),
            TransferEvent::Resumed { from_chunk } => println!("resumed at chunk {from_chunk}"),
            TransferEvent::Completed(entry) => {
                match (&entry.direction, &entry.save_path) {
                    (Direction::Receive, Some(path)) => println!("saved to {}", path.display()),
                    _ => println!("sent {}", entry.file_name),
                }
                record(&mut history, entry);
            }
            TransferEvent::Failed { record: entry, .. } => record(&mut history, entry),
        }
    }
}

fn record(history: &mut HistoryStore, entry: HistoryEntry) {
    if let Err(e) = history.append(entry) {
        tracing::warn!(error = %e, "failed to write transfer history");
    }
}

fn show_history(mut history: HistoryStore, clear: bool) -> ExitCode {
    if clear {
        return match history.clear() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        };
    }
    if history.entries().is_empty() {
        println!("no transfers recorded");
    }
    for entry in history.entries() {
        println!(
            "{}  {:<7} {:<9} {} ({}, {}s)",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.direction.to_string(),
            format!("{:?}", entry.outcome).to_lowercase(),
            entry.file_name,
            format_size(entry.file_size),
            entry.duration_seconds,
        );
    }
    ExitCode::SUCCESS
}

fn show_checkpoints(mut store: CheckpointStore, clear: bool) -> ExitCode {
    if clear {
        return match store.clear_all() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        };
    }
    let checkpoints = store.list();
    if checkpoints.is_empty() {
        println!("no resumable transfers");
    }
    for checkpoint in checkpoints {
        println!(
            "{}  {:<7} room {} {} chunk {}/{}",
            checkpoint.last_updated.format("%Y-%m-%d %H:%M"),
            checkpoint.direction.to_string(),
            checkpoint.room_id,
            checkpoint.file_name,
            checkpoint.chunk_index,
            checkpoint.total_chunks,
        );
    }
    ExitCode::SUCCESS
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
