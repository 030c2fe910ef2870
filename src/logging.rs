//! File logging. The terminal is in raw mode while capturing, so nothing is
//! ever logged to stdout or stderr.
//!
//! [`LogSettings`] decides where logs go and how much is kept. [`LogSettings::init`]
//! installs the global subscriber for the binary; [`LogSettings::set_default`]
//! scopes one to the current thread, which is what tests want.

use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use tracing::dispatcher::DefaultGuard;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Daily files kept before the oldest is pruned.
pub const DEFAULT_MAX_LOG_FILES: usize = 7;

type FileLayer = Layer<Registry, DefaultFields, Format, NonBlocking>;

#[derive(Debug, Clone)]
pub struct LogSettings {
    app_name: String,
    directory: Option<PathBuf>,
    default_level: LevelFilter,
    max_files: usize,
}

impl LogSettings {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            directory: None,
            default_level: LevelFilter::INFO,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }

    /// Write logs here instead of the resolved default.
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Level used when `$<APP>_LOG` is unset or unparsable.
    pub fn default_level(mut self, level: LevelFilter) -> Self {
        self.default_level = level;
        self
    }

    pub fn max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// An explicit [`directory`](Self::directory), else `$<APP>_LOG_DIR`,
    /// else `~/.<app>/logs`, else `/tmp/<app>`.
    pub fn resolve_directory(&self) -> PathBuf {
        if let Some(dir) = &self.directory {
            return dir.clone();
        }
        match std::env::var_os(self.env_var("LOG_DIR")) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => match dirs::home_dir() {
                Some(home) => home.join(format!(".{}", self.app_name)).join("logs"),
                None => std::env::temp_dir().join(&self.app_name),
            },
        }
    }

    /// Install the file subscriber process-wide.
    pub fn init(&self) -> Result<LoggerGuard> {
        let (layer, guard) = self.file_layer()?;
        tracing_subscriber::registry()
            .with(layer)
            .with(self.filter())
            .try_init()
            .wrap_err("Failed to initialize tracing subscriber")?;
        tracing::debug!(directory = %guard.directory.display(), "logger initialized");
        Ok(guard)
    }

    /// Install the file subscriber for the current thread only. Logging stops
    /// when the returned [`DefaultGuard`] is dropped.
    pub fn set_default(&self) -> Result<(LoggerGuard, DefaultGuard)> {
        let (layer, guard) = self.file_layer()?;
        let scope = tracing_subscriber::registry()
            .with(layer)
            .with(self.filter())
            .set_default();
        Ok((guard, scope))
    }

    fn env_var(&self, suffix: &str) -> String {
        format!("{}_{}", self.app_name.to_ascii_uppercase(), suffix)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(self.default_level.into())
            .with_env_var(self.env_var("LOG"))
            .from_env_lossy()
    }

    fn appender(&self, directory: &Path) -> Result<RollingFileAppender> {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(self.app_name.as_str())
            .filename_suffix("log")
            .max_log_files(self.max_files.max(1))
            .build(directory)
            .wrap_err_with(|| format!("Failed to open log file in {}", directory.display()))
    }

    fn file_layer(&self) -> Result<(FileLayer, LoggerGuard)> {
        let directory = self.resolve_directory();
        std::fs::create_dir_all(&directory)
            .wrap_err_with(|| format!("Failed to create log directory {}", directory.display()))?;

        let (writer, worker) = tracing_appender::non_blocking(self.appender(&directory)?);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true);
        Ok((
            layer,
            LoggerGuard {
                _worker: worker,
                directory,
            },
        ))
    }
}

/// Flushes buffered log lines when dropped.
pub struct LoggerGuard {
    _worker: WorkerGuard,
    directory: PathBuf,
}

impl LoggerGuard {
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
