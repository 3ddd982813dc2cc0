use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    fmt::{
        self,
        format::{Format, Full},
        time::SystemTime,
    },
    prelude::*,
};

const LOG_FILE_NAME: &str = "expenses.log";

fn build_base_log_format() -> Format<Full, SystemTime> {
    fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_file(true)
        .with_target(true)
        .with_thread_names(true)
}

fn build_filter(default_level: Level) -> Targets {
    // Noisy dependencies stay at INFO unless the service itself is quieter.
    let dependency_level = default_level.min(Level::INFO);
    Targets::new()
        .with_target("sqlx", dependency_level)
        .with_target("hyper_util", dependency_level)
        .with_target("tower", dependency_level)
        .with_default(default_level)
}

/// Plain and JSON log directories. An empty base disables file logging.
fn file_log_dirs(base_log_dir: &str) -> Option<(PathBuf, PathBuf)> {
    (!base_log_dir.is_empty()).then(|| {
        let base = Path::new(base_log_dir);
        (base.to_path_buf(), base.join("structured"))
    })
}

/// Logs to stdout, and to daily rolling files under `base_log_dir` if set.
pub fn setup_logging(base_log_dir: &str, default_level: Level) {
    let stdout_layer = fmt::layer().event_format(build_base_log_format().with_ansi(true));

    let (log_file_layer, json_file_layer) = match file_log_dirs(base_log_dir) {
        Some((plain_dir, json_dir)) => (
            Some(
                fmt::layer()
                    .event_format(build_base_log_format())
                    .with_writer(tracing_appender::rolling::daily(plain_dir, LOG_FILE_NAME)),
            ),
            Some(
                fmt::layer()
                    .event_format(build_base_log_format().json())
                    .with_writer(tracing_appender::rolling::daily(json_dir, LOG_FILE_NAME)),
            ),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(stdout_layer)
        .with(log_file_layer)
        .with(json_file_layer)
        .init();
}
