//! Background reader bridging a blocking byte stream into the event queue.
//!
//! The poller waits for readability with a bounded `poll(2)` so it can notice
//! [`ShutdownSignal`] at least once per poll interval, reads a single byte
//! when the descriptor is ready, and pushes it into the [`BoundedEventQueue`].
//! It is the only reader of the input descriptor.
//!
//! The source must be unbuffered. `std::io::Stdin` keeps its own buffer, so
//! bytes it has already pulled off the descriptor are invisible to `poll` and
//! would sit there until the next keystroke. Hand the poller a `File` over a
//! duplicate of the descriptor instead.

use crate::config::{CaptureConfig, OverflowPolicy};
use crate::event::KeyEvent;
use crate::queue::{BoundedEventQueue, QueueFull};
use crate::shutdown::ShutdownSignal;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io::{self, ErrorKind, Read};
use std::os::fd::{AsFd, AsRawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Why the poller stopped.
#[derive(Debug)]
pub enum PollerExit {
    Shutdown,
    EndOfStream,
    PollFailed(Errno),
    ReadFailed(io::Error),
    Panicked,
}

impl PollerExit {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::PollFailed(_) | Self::ReadFailed(_) | Self::Panicked
        )
    }
}

pub struct InputPoller<R> {
    source: R,
    queue: Arc<BoundedEventQueue>,
    shutdown: ShutdownSignal,
    poll_timeout: Duration,
    overflow: OverflowPolicy,
    report_drops: bool,
}

impl<R> InputPoller<R>
where
    R: AsFd + Read + Send + 'static,
{
    pub fn new(
        source: R,
        queue: Arc<BoundedEventQueue>,
        shutdown: ShutdownSignal,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            source,
            queue,
            shutdown,
            poll_timeout: config.poll_timeout,
            overflow: config.overflow,
            report_drops: config.report_drops,
        }
    }

    /// Run the poll loop on a dedicated `input-poller` thread.
    pub fn spawn(self) -> io::Result<PollerHandle> {
        let handle = thread::Builder::new()
            .name("input-poller".to_string())
            .spawn(move || self.run())?;
        Ok(PollerHandle { handle })
    }

    /// Run the poll loop on the current thread until shutdown, end-of-stream,
    /// or a fatal poll/read error.
    ///
    /// Unless stopped by shutdown, a [`KeyEvent::EndOfStream`] marker is
    /// queued before returning so the consumer learns the stream is gone.
    pub fn run(mut self) -> PollerExit {
        let fd = self.source.as_fd().as_raw_fd();
        let timeout_ms = duration_to_poll_timeout(self.poll_timeout);
        let timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX);
        tracing::debug!(target: "input_poller", fd, timeout_ms, "poller started");

        let exit = loop {
            if self.shutdown.is_triggered() {
                break PollerExit::Shutdown;
            }

            match self.wait_readable(timeout) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(errno) => {
                    let io_err: io::Error = errno.into();
                    tracing::error!(
                        target: "input_poller",
                        fd,
                        timeout_ms,
                        errno = errno as i32,
                        kind = ?io_err.kind(),
                        "poll failed"
                    );
                    break PollerExit::PollFailed(errno);
                }
            }

            let mut byte = [0u8; 1];
            match self.source.read(&mut byte) {
                Ok(0) => break PollerExit::EndOfStream,
                Ok(_) => self.enqueue(byte[0]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => {
                    tracing::error!(target: "input_poller", fd, kind = ?err.kind(), "read failed: {}", err);
                    break PollerExit::ReadFailed(err);
                }
            }
        };

        if !matches!(exit, PollerExit::Shutdown) {
            self.push_end_of_stream();
        }
        tracing::debug!(target: "input_poller", ?exit, dropped = self.queue.dropped(), "poller stopped");
        exit
    }

    /// `Ok(false)` on timeout or EINTR, both of which send the loop back to
    /// the shutdown check.
    fn wait_readable(&self, timeout: PollTimeout) -> Result<bool, Errno> {
        let mut fds = [PollFd::new(self.source.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            Err(Errno::EINTR) => {
                tracing::trace!(target: "input_poller", "poll interrupted");
                return Ok(false);
            }
            Err(errno) => return Err(errno),
        }

        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        // POLLHUP with no POLLIN still needs a read to observe EOF.
        if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
            Ok(true)
        } else if revents.contains(PollFlags::POLLNVAL) {
            Err(Errno::EBADF)
        } else if revents.contains(PollFlags::POLLERR) {
            Err(Errno::EIO)
        } else {
            Ok(false)
        }
    }

    fn enqueue(&self, byte: u8) {
        let event = KeyEvent::Byte(byte);
        let lost = match self.overflow {
            OverflowPolicy::DropNewest => self.queue.push(event).err().map(QueueFull::into_inner),
            OverflowPolicy::DropOldest => self.queue.push_overwrite(event),
        };
        if let Some(lost) = lost {
            if self.report_drops {
                tracing::warn!(
                    target: "input_poller",
                    ?lost,
                    policy = ?self.overflow,
                    dropped = self.queue.dropped(),
                    "queue full, event dropped"
                );
            } else {
                tracing::trace!(target: "input_poller", ?lost, "queue full, event dropped");
            }
        }
    }

    // Only the poller pushes, so a slot seen free here stays free until the
    // push below.
    fn push_end_of_stream(&self) {
        loop {
            if !self.queue.is_full() && self.queue.push(KeyEvent::EndOfStream).is_ok() {
                return;
            }
            if self.shutdown.is_triggered() {
                return;
            }
            thread::sleep(self.poll_timeout);
        }
    }
}

pub struct PollerHandle {
    handle: JoinHandle<PollerExit>,
}

impl PollerHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> PollerExit {
        self.handle.join().unwrap_or_else(|_| {
            tracing::error!(target: "input_poller", "poller thread panicked");
            PollerExit::Panicked
        })
    }
}

fn duration_to_poll_timeout(duration: Duration) -> libc::c_int {
    if duration == Duration::ZERO {
        return 0;
    }

    let millis = duration.as_millis().min(i32::MAX as u128);
    millis as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::io::Write;
    use std::time::Instant;

    fn pipe() -> (File, File) {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        (File::from(read_end), File::from(write_end))
    }

    fn poller(
        source: File,
        capacity: usize,
        config: CaptureConfig,
    ) -> (InputPoller<File>, Arc<BoundedEventQueue>, ShutdownSignal) {
        let queue = Arc::new(BoundedEventQueue::new(capacity).unwrap());
        let shutdown = ShutdownSignal::new();
        let poller = InputPoller::new(source, Arc::clone(&queue), shutdown.clone(), &config);
        (poller, queue, shutdown)
    }

    #[test]
    fn reads_bytes_then_marks_end_of_stream() {
        let (read_end, mut write_end) = pipe();
        write_end.write_all(b"Hello").unwrap();
        drop(write_end);

        let (poller, queue, _shutdown) = poller(read_end, 10, CaptureConfig::default());
        let exit = poller.run();
        assert!(matches!(exit, PollerExit::EndOfStream));

        let events: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(
            events,
            vec![
                KeyEvent::Byte(72),
                KeyEvent::Byte(101),
                KeyEvent::Byte(108),
                KeyEvent::Byte(108),
                KeyEvent::Byte(111),
                KeyEvent::EndOfStream,
            ]
        );
    }

    #[test]
    fn stops_within_a_poll_interval_after_shutdown() {
        let (read_end, _write_end) = pipe();
        let (poller, queue, shutdown) = poller(read_end, 10, CaptureConfig::default());
        let handle = poller.spawn().unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());

        let start = Instant::now();
        shutdown.trigger();
        let exit = handle.join();
        assert!(matches!(exit, PollerExit::Shutdown));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_drops_newest_and_still_delivers_marker() {
        let (read_end, mut write_end) = pipe();
        write_end.write_all(&[1, 2, 3, 4, 5]).unwrap();
        drop(write_end);

        let (poller, queue, _shutdown) = poller(read_end, 2, CaptureConfig::default());
        let handle = poller.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.dropped() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(queue.dropped(), 3);
        assert_eq!(queue.pop(), Some(KeyEvent::Byte(1)));
        assert_eq!(queue.pop(), Some(KeyEvent::Byte(2)));
        assert_eq!(
            queue.pop_timeout(Duration::from_secs(5)),
            Some(KeyEvent::EndOfStream)
        );
        assert!(matches!(handle.join(), PollerExit::EndOfStream));
    }

    #[test]
    fn full_queue_drops_oldest_when_configured() {
        let (read_end, mut write_end) = pipe();
        write_end.write_all(&[1, 2, 3, 4, 5]).unwrap();
        drop(write_end);

        let config = CaptureConfig::builder()
            .overflow(OverflowPolicy::DropOldest)
            .build()
            .unwrap();
        let (poller, queue, _shutdown) = poller(read_end, 2, config);
        let handle = poller.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.dropped() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(queue.pop(), Some(KeyEvent::Byte(4)));
        assert_eq!(queue.pop(), Some(KeyEvent::Byte(5)));
        assert_eq!(
            queue.pop_timeout(Duration::from_secs(5)),
            Some(KeyEvent::EndOfStream)
        );
        assert!(matches!(handle.join(), PollerExit::EndOfStream));
    }

    #[test]
    fn shutdown_abandons_pending_marker() {
        let (read_end, mut write_end) = pipe();
        write_end.write_all(&[9]).unwrap();
        drop(write_end);

        let (poller, queue, shutdown) = poller(read_end, 1, CaptureConfig::default());
        let handle = poller.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        // The only slot holds the byte, so the marker cannot fit.
        thread::sleep(Duration::from_millis(30));
        shutdown.trigger();
        assert!(matches!(handle.join(), PollerExit::EndOfStream));
        assert_eq!(queue.pop(), Some(KeyEvent::Byte(9)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn read_failure_stops_poller_and_marks_end_of_stream() {
        // poll(2) always reports a directory readable; read(2) then fails.
        let dir = File::open(std::env::temp_dir()).unwrap();
        let (poller, queue, shutdown) = poller(dir, 4, CaptureConfig::default());

        let exit = poller.run();
        match exit {
            PollerExit::ReadFailed(err) => assert_eq!(err.raw_os_error(), Some(libc::EISDIR)),
            other => panic!("expected ReadFailed, got {:?}", other),
        }
        assert_eq!(queue.pop(), Some(KeyEvent::EndOfStream));
        assert_eq!(queue.pop(), None);
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn poll_timeout_conversion() {
        assert_eq!(duration_to_poll_timeout(Duration::ZERO), 0);
        assert_eq!(duration_to_poll_timeout(Duration::from_millis(10)), 10);
        assert_eq!(
            duration_to_poll_timeout(Duration::from_secs(u64::MAX)),
            i32::MAX
        );
    }
}
