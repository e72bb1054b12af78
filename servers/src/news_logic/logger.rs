use anyhow::{Context, Result};
use chrono::Local;
use colored::{ColoredString, Colorize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_FILE_PREFIX: &str = "server_news";

/// Log files kept from previous runs, besides the one about to be created.
const KEEP_PREVIOUS_LOGS: usize = 1;

/// Installs the global logger: coloured lines on stdout plus a fresh
/// timestamped file in `log_dir`. Returns the path of that file.
pub fn setup_logging(log_dir: &Path, level: log::LevelFilter) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let pruned = prune_logs(log_dir, KEEP_PREVIOUS_LOGS)?;

    let log_path = log_dir.join(format!(
        "{}_{}.log",
        LOG_FILE_PREFIX,
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));

    let console = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                paint(record.level()),
                message
            ))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(&log_path)?);

    fern::Dispatch::new()
        .level(level)
        // Handshake and frame chatter from the socket stack stays out of the way.
        .level_for("tungstenite", log::LevelFilter::Warn)
        .level_for("tokio_tungstenite", log::LevelFilter::Warn)
        .level_for("hyper", log::LevelFilter::Warn)
        .chain(console)
        .chain(file)
        .apply()?;

    if pruned > 0 {
        log::debug!("Removed {} old log file(s) from {}", pruned, log_dir.display());
    }
    Ok(log_path)
}

fn paint(level: log::Level) -> ColoredString {
    let name = level.to_string();
    match level {
        log::Level::Error => name.red().bold(),
        log::Level::Warn => name.yellow(),
        log::Level::Info => name.green(),
        log::Level::Debug => name.blue(),
        log::Level::Trace => name.dimmed(),
    }
}

/// Deletes `.log` files in `log_dir`, newest first by modification time,
/// keeping the first `keep`. Returns how many were removed.
pub fn prune_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
