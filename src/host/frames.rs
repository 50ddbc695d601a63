//! Rendering-frame scheduling.
//!
//! `request_frame` queues a callback to run on the next frame. Callbacks queued
//! while a frame is running belong to the following frame, never the current
//! one.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{tick, unbounded, Receiver, Sender};

/// A callback deferred to the next rendering frame.
pub type FrameCallback = Box<dyn FnOnce() + Send>;

/// Next-frame scheduling primitive.
pub trait FrameScheduler: Send + Sync {
    /// Run `callback` on the next frame.
    fn request_frame(&self, callback: FrameCallback);
}

/// Frames advance only when the embedder calls `advance`.
#[derive(Default)]
pub struct ManualFrames {
    queue: Mutex<Vec<FrameCallback>>,
}

impl ManualFrames {
    /// No pending callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting for the next frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run one frame. Returns how many callbacks ran.
    pub fn advance(&self) -> usize {
        let due = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let ran = due.len();
        for callback in due {
            callback();
        }
        ran
    }
}

impl FrameScheduler for ManualFrames {
    fn request_frame(&self, callback: FrameCallback) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }
}

impl std::fmt::Debug for ManualFrames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualFrames")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Frames driven by a dedicated worker thread at a fixed interval.
///
/// The worker exits once the scheduler is dropped.
#[derive(Debug)]
pub struct IntervalFrames {
    tx: Sender<FrameCallback>,
    interval: Duration,
}

impl IntervalFrames {
    /// Nominal 60 Hz frame interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(16);

    /// Start the worker with the default interval.
    #[must_use]
    pub fn new() -> Self {
        Self::with_interval(Self::DEFAULT_INTERVAL)
    }

    /// Start the worker with a custom interval.
    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let (tx, rx) = unbounded::<FrameCallback>();

        thread::Builder::new()
            .name("cartwatch-frames".to_string())
            .spawn(move || frame_loop(&rx, interval))
            .expect("failed to spawn cartwatch frame worker");

        Self { tx, interval }
    }

    /// The frame interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for IntervalFrames {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler for IntervalFrames {
    fn request_frame(&self, callback: FrameCallback) {
        // Only fails once the worker is gone, which cannot happen while `self` lives.
        let _ = self.tx.send(callback);
    }
}

fn frame_loop(rx: &Receiver<FrameCallback>, interval: Duration) {
    let ticker = tick(interval);
    let mut queued: Vec<FrameCallback> = Vec::new();

    loop {
        crossbeam_channel::select! {
            recv(rx) -> msg => {
                match msg {
                    Ok(callback) => queued.push(callback),
                    Err(_) => break,
                }
            }
            recv(ticker) -> _ => {
                for callback in std::mem::take(&mut queued) {
                    callback();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn manual_frames_run_on_advance() {
        let frames = ManualFrames::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            frames.request_frame(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(frames.pending(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(frames.advance(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(frames.advance(), 0);
    }

    #[test]
    fn callbacks_queued_during_a_frame_run_next_frame() {
        let frames = Arc::new(ManualFrames::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_frames = Arc::clone(&frames);
        let inner_hits = Arc::clone(&hits);
        frames.request_frame(Box::new(move || {
            let hits = Arc::clone(&inner_hits);
            inner_frames.request_frame(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(frames.advance(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(frames.advance(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interval_frames_eventually_run_callbacks() {
        let frames = IntervalFrames::with_interval(Duration::from_millis(2));
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        frames.request_frame(Box::new(move || {
            let _ = tx.send(());
        }));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }
}
