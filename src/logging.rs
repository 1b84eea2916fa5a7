use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory the daily JSON log files are written to.
pub const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "timetable.log";
const DEFAULT_DIRECTIVES: &str = "timetable_scraper=info,info";

/// Daily-rotated writer under `dir`, created if missing.
///
/// Lines are flushed by a background thread until the returned guard drops.
pub fn file_writer(dir: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber: JSON lines to `dir`, readable text to stdout.
///
/// `RUST_LOG` overrides the default filter. Keep the guard alive for the life
/// of the process; dropping it flushes and stops file output.
pub fn init_logging(dir: &Path) -> io::Result<WorkerGuard> {
    let (writer, guard) = file_writer(dir)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_writer(writer))
        .with(fmt::layer().with_target(true).with_writer(io::stdout))
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dropping_the_guard_flushes_pending_lines() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("var").join("log");

        let (mut writer, guard) = file_writer(&nested).unwrap();
        writer.write_all(b"{\"message\":\"run finished\"}\n").unwrap();
        drop(guard);

        let files: Vec<_> = fs::read_dir(&nested).unwrap().map(|entry| entry.unwrap().path()).collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].file_name().unwrap().to_string_lossy().starts_with(LOG_FILE_PREFIX));
        assert!(fs::read_to_string(&files[0]).unwrap().contains("run finished"));
    }

    #[test]
    fn unusable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();
        assert!(file_writer(&blocker).is_err());
    }
}
