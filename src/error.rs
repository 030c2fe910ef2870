use crate::config::ConfigError;
use crate::queue::QueueError;
use crate::session::SessionError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("failed to allocate event queue")]
    Queue(#[from] QueueError),
    #[error("terminal configuration failed")]
    Session(#[from] SessionError),
    #[error("failed to duplicate input descriptor")]
    Input(#[source] io::Error),
    #[error("failed to spawn input poller")]
    Spawn(#[source] io::Error),
    #[error("failed to register interrupt handlers")]
    Signals(#[source] io::Error),
    #[error("failed to write to the terminal")]
    Output(#[source] io::Error),
    #[error("terminal reports a size of {cols}x{rows}")]
    TerminalSize { cols: u16, rows: u16 },
}
