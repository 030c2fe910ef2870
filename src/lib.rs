//! Raw keyboard capture: a timeout-bounded background reader feeding a
//! bounded queue, drained by a consumer loop, inside a raw-mode terminal
//! session that is always restored.

pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod poller;
pub mod queue;
pub mod render;
pub mod session;
pub mod shutdown;

pub use capture::{Capture, CaptureSummary, StopReason};
pub use config::{CaptureConfig, OverflowPolicy, WaitStrategy};
pub use error::CaptureError;
pub use event::KeyEvent;
pub use poller::{InputPoller, PollerExit, PollerHandle};
pub use queue::{BoundedEventQueue, QueueFull};
pub use render::{ColorRenderer, Render};
pub use session::{TerminalAttributes, TerminalSession};
pub use shutdown::ShutdownSignal;

use color_eyre::Result;
use eyre::WrapErr;
use logging::{LogSettings, LoggerGuard};
use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;

/// Coordinates color-eyre, logging, signals, and the terminal lifecycle around
/// a [`Capture`].
#[derive(Debug, Clone)]
pub struct CaptureAppBuilder {
    app_name: String,
    use_panic_terminal_restore: bool,
    use_color_eyre: bool,
    use_disk_logs: bool,
    log_dir: Option<PathBuf>,
    color: bool,
    screen_control: bool,
    config: CaptureConfig,
}

impl Default for CaptureAppBuilder {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            use_panic_terminal_restore: true,
            use_color_eyre: true,
            use_disk_logs: true,
            log_dir: None,
            color: true,
            screen_control: true,
            config: CaptureConfig::default(),
        }
    }
}

impl CaptureAppBuilder {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    pub fn config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// Color-code rendered bytes (only when stdout is a terminal).
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Clear the screen and hide the cursor for the duration of the capture
    /// (only when stdout is a terminal).
    pub fn screen_control(mut self, screen_control: bool) -> Self {
        self.screen_control = screen_control;
        self
    }

    pub fn use_panic_terminal_restore(mut self, use_panic_terminal_restore: bool) -> Self {
        self.use_panic_terminal_restore = use_panic_terminal_restore;
        self
    }

    pub fn use_color_eyre(mut self, use_color_eyre: bool) -> Self {
        self.use_color_eyre = use_color_eyre;
        self
    }

    pub fn use_disk_logs(mut self, use_disk_logs: bool) -> Self {
        self.use_disk_logs = use_disk_logs;
        self
    }

    /// Write log files here instead of the default location.
    pub fn log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    pub fn build(self) -> CaptureApp {
        let app_name = if self.app_name.is_empty() {
            env!("CARGO_PKG_NAME").to_string()
        } else {
            self.app_name
        };

        CaptureApp {
            logger_guard: None,
            app_name,
            use_panic_terminal_restore: self.use_panic_terminal_restore,
            use_color_eyre: self.use_color_eyre,
            use_disk_logs: self.use_disk_logs,
            log_dir: self.log_dir,
            color: self.color,
            screen_control: self.screen_control,
            config: self.config,
        }
    }
}

pub struct CaptureApp {
    logger_guard: Option<LoggerGuard>,
    app_name: String,
    use_panic_terminal_restore: bool,
    use_color_eyre: bool,
    use_disk_logs: bool,
    log_dir: Option<PathBuf>,
    color: bool,
    screen_control: bool,
    config: CaptureConfig,
}

impl CaptureApp {
    pub fn builder(app_name: impl Into<String>) -> CaptureAppBuilder {
        CaptureAppBuilder::new(app_name)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Install diagnostics and start logging.
    pub fn init(&mut self) -> Result<()> {
        if self.use_color_eyre {
            color_eyre::install()?;
        }

        if self.use_disk_logs {
            let mut settings = LogSettings::new(&self.app_name);
            if let Some(dir) = &self.log_dir {
                settings = settings.directory(dir);
            }
            let guard = settings.init().wrap_err("Failed to initialize file logger")?;
            self.logger_guard = Some(guard);
        }
        Ok(())
    }

    /// Capture stdin until end-of-stream or interrupt, rendering to stdout.
    ///
    /// Raw mode is only entered when stdin is a terminal; piped input is
    /// captured as-is. Everything that can fail at startup is checked before
    /// the terminal is touched.
    pub fn run(&self) -> Result<CaptureSummary> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let stdout_tty = stdout.is_terminal();

        let shutdown = ShutdownSignal::new();
        let _interrupts = shutdown
            .register_interrupts()
            .map_err(CaptureError::Signals)?;
        let capture = Capture::new(self.config.clone(), shutdown)?;

        if stdout_tty {
            let (cols, rows) =
                crossterm::terminal::size().wrap_err("Failed to query terminal size")?;
            if cols == 0 || rows == 0 {
                return Err(CaptureError::TerminalSize { cols, rows }.into());
            }
        }

        let source = stdin
            .as_fd()
            .try_clone_to_owned()
            .map(File::from)
            .map_err(CaptureError::Input)?;

        let session = if stdin.is_terminal() {
            let session = TerminalSession::enter(stdin.as_fd(), self.use_panic_terminal_restore)
                .map_err(CaptureError::Session)
                .wrap_err("Failed to enter raw mode")?;
            Some(session)
        } else {
            tracing::info!("stdin is not a terminal, capturing without raw mode");
            None
        };

        let mut renderer = ColorRenderer::new(stdout.lock(), self.color && stdout_tty);
        let screen_control = self.screen_control && stdout_tty;
        let result = run_on_screen(&mut renderer, screen_control, |renderer| {
            capture.run(source, renderer)
        });

        if let Some(session) = session {
            session.restore().wrap_err("Failed to restore terminal")?;
        }
        Ok(result?)
    }
}

/// Runs `capture` with the screen cleared and the cursor hidden when
/// `screen_control` is set, then prints the termination line. The cursor is
/// shown again whether or not `capture` succeeds.
fn run_on_screen<W, F>(
    renderer: &mut ColorRenderer<W>,
    screen_control: bool,
    capture: F,
) -> std::result::Result<CaptureSummary, CaptureError>
where
    W: Write,
    F: FnOnce(&mut ColorRenderer<W>) -> std::result::Result<CaptureSummary, CaptureError>,
{
    if screen_control {
        if let Err(e) = renderer.enter() {
            // Part of the sequence may have reached the terminal.
            let _ = renderer.leave("");
            return Err(CaptureError::Output(e));
        }
    }

    let result = capture(renderer);
    let message = match &result {
        Ok(summary) => termination_message(summary),
        Err(e) => format!("-- capture failed: {}", e),
    };
    let finished = if screen_control {
        renderer.leave(&message)
    } else {
        renderer.finish(&message)
    };
    if let Err(e) = finished {
        tracing::error!("Failed to write termination message: {}", e);
    }
    result
}

fn termination_message(summary: &CaptureSummary) -> String {
    let reason = match summary.reason {
        StopReason::EndOfStream => "input closed",
        StopReason::Shutdown => "interrupted",
        StopReason::PollerGone => "reader stopped",
    };
    format!(
        "-- {}: {} events, {} dropped",
        reason, summary.events, summary.dropped
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_defaults_to_package_name() {
        let app = CaptureApp::builder("").build();
        assert_eq!(app.app_name(), "rawtap");
    }

    #[test]
    fn termination_message_reports_counts() {
        let summary = CaptureSummary {
            events: 5,
            dropped: 2,
            reason: StopReason::Shutdown,
            poller: PollerExit::Shutdown,
        };
        assert_eq!(
            termination_message(&summary),
            "-- interrupted: 5 events, 2 dropped"
        );
    }

    #[test]
    fn failed_capture_shows_the_cursor_again() {
        let mut renderer = ColorRenderer::new(Vec::new(), false);
        let result = run_on_screen(&mut renderer, true, |_| {
            Err(CaptureError::Spawn(io::Error::other("thread limit reached")))
        });

        assert!(matches!(result, Err(CaptureError::Spawn(_))));
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        let hidden = out.find("\x1b[?25l").unwrap();
        let shown = out.find("\x1b[?25h").unwrap();
        assert!(hidden < shown);
        assert!(out.ends_with("-- capture failed: failed to spawn input poller\n"));
    }

    #[test]
    fn successful_capture_without_screen_control_leaves_cursor_alone() {
        let mut renderer = ColorRenderer::new(Vec::new(), false);
        let result = run_on_screen(&mut renderer, false, |renderer| {
            renderer.render(b'a');
            Ok(CaptureSummary {
                events: 1,
                dropped: 0,
                reason: StopReason::EndOfStream,
                poller: PollerExit::EndOfStream,
            })
        });

        assert_eq!(result.unwrap().events, 1);
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(out, " 97 'a'\n-- input closed: 1 events, 0 dropped\n");
    }
}
