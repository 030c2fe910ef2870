//! The consumer side of the pipeline: spawn the poller, drain the queue into
//! a [`Render`], join the poller.

use crate::config::{CaptureConfig, WaitStrategy};
use crate::error::CaptureError;
use crate::event::KeyEvent;
use crate::poller::{InputPoller, PollerExit, PollerHandle};
use crate::queue::BoundedEventQueue;
use crate::render::Render;
use crate::shutdown::ShutdownSignal;
use std::io::Read;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The poller queued [`KeyEvent::EndOfStream`].
    EndOfStream,
    /// [`ShutdownSignal`] was set, usually by SIGINT.
    Shutdown,
    /// The poller thread ended without leaving a marker behind.
    PollerGone,
}

#[derive(Debug)]
pub struct CaptureSummary {
    pub events: u64,
    pub dropped: u64,
    pub reason: StopReason,
    pub poller: PollerExit,
}

pub struct Capture {
    config: CaptureConfig,
    queue: Arc<BoundedEventQueue>,
    shutdown: ShutdownSignal,
}

impl Capture {
    pub fn new(config: CaptureConfig, shutdown: ShutdownSignal) -> Result<Self, CaptureError> {
        config.validate()?;
        let queue = Arc::new(BoundedEventQueue::new(config.capacity)?);
        Ok(Self {
            config,
            queue,
            shutdown,
        })
    }

    pub fn queue(&self) -> &Arc<BoundedEventQueue> {
        &self.queue
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Capture from `source` until end-of-stream or shutdown.
    ///
    /// Returns only after the poller thread has been joined, so the caller
    /// may restore terminal attributes as soon as this returns.
    pub fn run<S, R>(&self, source: S, renderer: &mut R) -> Result<CaptureSummary, CaptureError>
    where
        S: AsFd + Read + Send + 'static,
        R: Render + ?Sized,
    {
        let poller = InputPoller::new(
            source,
            Arc::clone(&self.queue),
            self.shutdown.clone(),
            &self.config,
        )
        .spawn()
        .map_err(CaptureError::Spawn)?;
        tracing::info!(
            target: "capture",
            capacity = self.config.capacity,
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            wait = ?self.config.wait,
            "capture started"
        );

        let (events, reason) = self.consume(&poller, renderer);

        // Make sure the poller sees the stop even when we left because it died.
        self.shutdown.trigger();
        let poller = poller.join();
        if poller.is_error() {
            tracing::warn!(target: "capture", ?poller, "input poller stopped on an error");
        }

        let summary = CaptureSummary {
            events,
            dropped: self.queue.dropped(),
            reason,
            poller,
        };
        tracing::info!(
            target: "capture",
            events = summary.events,
            dropped = summary.dropped,
            reason = ?summary.reason,
            poller = ?summary.poller,
            "capture finished"
        );
        Ok(summary)
    }

    // With `WaitStrategy::Spin` an idle consumer yields and re-polls in a
    // tight loop: lowest wake-up latency at the cost of a busy core.
    // `WaitStrategy::Block` parks on the queue's condvar for at most one poll
    // interval instead. Ordering and drop behavior are identical.
    fn consume<R: Render + ?Sized>(&self, poller: &PollerHandle, renderer: &mut R) -> (u64, StopReason) {
        let mut events = 0u64;
        let reason = loop {
            if self.shutdown.is_triggered() {
                break StopReason::Shutdown;
            }

            let next = match self.config.wait {
                WaitStrategy::Spin => self.queue.pop(),
                WaitStrategy::Block => self.queue.pop_timeout(self.config.poll_timeout),
            };

            match next {
                Some(KeyEvent::Byte(byte)) => {
                    tracing::trace!(target: "capture", byte, "event");
                    renderer.render(byte);
                    events += 1;
                }
                Some(KeyEvent::EndOfStream) => {
                    self.shutdown.trigger();
                    break StopReason::EndOfStream;
                }
                None => {
                    if poller.is_finished() && self.queue.is_empty() {
                        break StopReason::PollerGone;
                    }
                    if self.config.wait == WaitStrategy::Spin {
                        thread::yield_now();
                    }
                }
            }
        };
        (events, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::io::Write;
    use std::time::{Duration, Instant};
    use test_case::test_case;

    fn pipe() -> (File, File) {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        (File::from(read_end), File::from(write_end))
    }

    #[test_case(WaitStrategy::Spin ; "spin")]
    #[test_case(WaitStrategy::Block ; "block")]
    fn hello_then_close(wait: WaitStrategy) {
        let (read_end, mut write_end) = pipe();
        write_end.write_all(&[72, 101, 108, 108, 111]).unwrap();
        drop(write_end);

        let config = CaptureConfig::builder().wait(wait).build().unwrap();
        let capture = Capture::new(config, ShutdownSignal::new()).unwrap();
        let mut seen = Vec::new();
        let summary = capture
            .run(read_end, &mut |b: u8| seen.push(b))
            .unwrap();

        assert_eq!(seen, vec![72, 101, 108, 108, 111]);
        assert_eq!(summary.events, 5);
        assert_eq!(summary.reason, StopReason::EndOfStream);
        assert!(matches!(summary.poller, PollerExit::EndOfStream));
        assert!(capture.shutdown().is_triggered());
    }

    #[test]
    fn slow_consumer_sees_every_byte_in_order() {
        let (read_end, mut write_end) = pipe();
        let config = CaptureConfig::builder().capacity(4).build().unwrap();
        let capture = Capture::new(config, ShutdownSignal::new()).unwrap();

        let writer = thread::spawn(move || {
            for b in 0..50u8 {
                write_end.write_all(&[b]).unwrap();
                thread::sleep(Duration::from_millis(5));
            }
        });

        let mut seen = Vec::new();
        let summary = capture.run(read_end, &mut |b: u8| seen.push(b)).unwrap();
        writer.join().unwrap();

        // Pacing keeps the queue from filling, so nothing is dropped.
        assert_eq!(summary.dropped, 0);
        assert_eq!(seen, (0..50).collect::<Vec<u8>>());
        assert_eq!(summary.reason, StopReason::EndOfStream);
    }

    #[test]
    fn shutdown_mid_capture_stops_both_sides() {
        let (read_end, mut write_end) = pipe();
        let capture = Capture::new(CaptureConfig::default(), ShutdownSignal::new()).unwrap();
        let shutdown = capture.shutdown().clone();

        let stopper = thread::spawn(move || {
            write_end.write_all(b"ab").unwrap();
            thread::sleep(Duration::from_millis(50));
            shutdown.trigger();
            // Keep the write end open so only the shutdown can end the capture.
            thread::sleep(Duration::from_millis(200));
            drop(write_end);
        });

        let start = Instant::now();
        let mut seen = Vec::new();
        let summary = capture.run(read_end, &mut |b: u8| seen.push(b)).unwrap();
        let elapsed = start.elapsed();
        stopper.join().unwrap();

        assert_eq!(seen, b"ab".to_vec());
        assert_eq!(summary.reason, StopReason::Shutdown);
        assert!(matches!(summary.poller, PollerExit::Shutdown));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[test]
    fn reader_failure_ends_capture_as_end_of_stream() {
        let dir = File::open(std::env::temp_dir()).unwrap();
        let capture = Capture::new(CaptureConfig::default(), ShutdownSignal::new()).unwrap();

        let mut seen = Vec::new();
        let summary = capture.run(dir, &mut |b: u8| seen.push(b)).unwrap();

        assert!(seen.is_empty());
        assert_eq!(summary.events, 0);
        assert_eq!(summary.reason, StopReason::EndOfStream);
        assert!(matches!(summary.poller, PollerExit::ReadFailed(_)));
        assert!(summary.poller.is_error());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = CaptureConfig {
            capacity: 0,
            ..CaptureConfig::default()
        };
        assert!(matches!(
            Capture::new(config, ShutdownSignal::new()),
            Err(CaptureError::Config(_))
        ));
    }
}
