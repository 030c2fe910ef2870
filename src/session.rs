//! Raw-mode lifecycle for the controlling terminal.
//!
//! [`TerminalSession::enter`] snapshots the current line discipline and
//! switches to non-canonical, unechoed input with `VMIN = 1`. The snapshot
//! is restored exactly once: by [`TerminalSession::restore`], by `Drop`, or by
//! the optional panic hook, whichever runs first. `ISIG` stays set so Ctrl-C
//! still reaches the process as SIGINT.

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::fmt;
use std::io::IsTerminal;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::panic;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("input is not a terminal")]
    NotATerminal,
    #[error("failed to duplicate terminal descriptor")]
    Dup(#[source] std::io::Error),
    #[error("failed to read terminal attributes")]
    GetAttributes(#[source] nix::Error),
    #[error("failed to apply terminal attributes")]
    SetAttributes(#[source] nix::Error),
}

/// The parts of the line discipline this crate touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalAttributes {
    pub echo: bool,
    pub canonical: bool,
    pub min_read: u8,
}

impl From<&Termios> for TerminalAttributes {
    fn from(t: &Termios) -> Self {
        Self {
            echo: t.local_flags.contains(LocalFlags::ECHO),
            canonical: t.local_flags.contains(LocalFlags::ICANON),
            min_read: t.control_chars[SpecialCharacterIndices::VMIN as usize],
        }
    }
}

impl TerminalAttributes {
    /// Read the current attributes of `fd`.
    pub fn read<Fd: AsFd>(fd: Fd) -> Result<Self, SessionError> {
        let termios = termios::tcgetattr(fd).map_err(SessionError::GetAttributes)?;
        Ok(Self::from(&termios))
    }
}

fn make_raw(orig: &Termios) -> Termios {
    let mut raw = orig.clone();
    raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    raw
}

/// Snapshot slot shared with the panic hook. `take()` makes restoration
/// happen at most once no matter how many paths race for it.
type Snapshot = Arc<Mutex<Option<Termios>>>;

fn restore_snapshot(fd: BorrowedFd<'_>, snapshot: &Snapshot) -> Result<bool, SessionError> {
    let orig = snapshot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match orig {
        Some(orig) => {
            termios::tcsetattr(fd, SetArg::TCSANOW, &orig).map_err(SessionError::SetAttributes)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Undoes the panic hook installed by [`TerminalSession::enter`], putting the
/// previous hook back and releasing the hook's descriptor and snapshot.
struct PanicHookGuard {
    uninstall: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for PanicHookGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicHookGuard")
            .field("installed", &self.uninstall.is_some())
            .finish()
    }
}

impl PanicHookGuard {
    fn install(fd: &Arc<OwnedFd>, snapshot: &Snapshot) -> Self {
        let hook_fd = Arc::clone(fd);
        let hook_snapshot = Arc::clone(snapshot);
        let previous = Arc::new(panic::take_hook());
        let hook_previous = Arc::clone(&previous);
        panic::set_hook(Box::new(move |panic_info| {
            // We've already panicked so ignore any err
            let _ = restore_snapshot(hook_fd.as_fd(), &hook_snapshot);
            (**hook_previous)(panic_info);
        }));

        let uninstall = move || {
            // Dropping our hook closes its descriptor clone.
            drop(panic::take_hook());
            panic::set_hook(Box::new(move |panic_info| (**previous)(panic_info)));
        };
        Self {
            uninstall: Some(Box::new(uninstall)),
        }
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        // The hook cannot be swapped from a panicking thread.
        if thread::panicking() {
            return;
        }
        if let Some(uninstall) = self.uninstall.take() {
            uninstall();
        }
    }
}

/// Sessions that install a panic hook must be dropped in reverse order of
/// creation, since each one puts back the hook it found.
#[derive(Debug)]
pub struct TerminalSession {
    fd: Arc<OwnedFd>,
    snapshot: Snapshot,
    original: TerminalAttributes,
    panic_hook: Option<PanicHookGuard>,
}

impl TerminalSession {
    /// Put the terminal behind `fd` into raw mode.
    ///
    /// Fails without touching the terminal if `fd` is not a terminal or its
    /// attributes cannot be read.
    pub fn enter<Fd: AsFd>(fd: Fd, panic_restore: bool) -> Result<Self, SessionError> {
        let fd = fd.as_fd();
        if !fd.is_terminal() {
            return Err(SessionError::NotATerminal);
        }
        let fd = Arc::new(fd.try_clone_to_owned().map_err(SessionError::Dup)?);

        let orig = termios::tcgetattr(fd.as_fd()).map_err(SessionError::GetAttributes)?;
        let original = TerminalAttributes::from(&orig);
        let raw = make_raw(&orig);
        termios::tcsetattr(fd.as_fd(), SetArg::TCSANOW, &raw)
            .map_err(SessionError::SetAttributes)?;
        tracing::debug!(target: "session", ?original, "terminal switched to raw mode");

        let snapshot = Arc::new(Mutex::new(Some(orig)));

        let panic_hook = panic_restore.then(|| PanicHookGuard::install(&fd, &snapshot));

        Ok(Self {
            fd,
            snapshot,
            original,
            panic_hook,
        })
    }

    /// Attributes as they were before raw mode was applied.
    pub fn original(&self) -> TerminalAttributes {
        self.original
    }

    pub fn is_active(&self) -> bool {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Put the original attributes back. Returns `Ok(false)` if another path
    /// already did.
    pub fn restore(&self) -> Result<bool, SessionError> {
        let restored = restore_snapshot(self.fd.as_fd(), &self.snapshot)?;
        if restored {
            tracing::debug!(target: "session", "terminal attributes restored");
        }
        Ok(restored)
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!(target: "session", "Failed to restore terminal during drop: {}", e);
        }
        self.panic_hook.take();
    }
}
