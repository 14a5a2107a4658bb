//! Bounded frame queue for one receiver connection
//!
//! Live media favours fresh frames: when the queue is full the oldest frame
//! is dropped to make room.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::EngineError;
use crate::frame::Frame;

pub struct FrameQueue {
    tx: Mutex<Option<Sender<Frame>>>,
    rx: Receiver<Frame>,
    capacity: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl FrameQueue {
    /// Create a new queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            capacity,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame, evicting the oldest one if full.
    /// Returns false if the queue is closed.
    pub fn push(&self, frame: Frame) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let _ = self.rx.try_recv();
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                tx.try_send(frame).is_ok()
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Wait up to `timeout` for a frame.
    /// `Ok(None)` on timeout, `Err(Closed)` once closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Frame>, EngineError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Closed),
        }
    }

    /// Stop accepting frames and wake any waiting consumer
    pub fn close(&self) {
        self.tx.lock().take();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped because the consumer fell behind
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Waits that ended without a frame
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MetadataFrame;
    use std::sync::Arc;
    use std::time::Instant;

    fn meta(text: &str) -> Frame {
        Frame::Metadata(MetadataFrame::new(text))
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        assert!(queue.push(meta("a")));
        assert!(queue.push(meta("b")));
        assert_eq!(queue.len(), 2);

        let first = queue.pop_timeout(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(first.into_metadata().unwrap().data, "a");
        let second = queue.pop_timeout(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(second.into_metadata().unwrap().data, "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.push(meta("a"));
        queue.push(meta("b"));
        queue.push(meta("c"));
        assert_eq!(queue.overflow_count(), 1);

        let first = queue.pop_timeout(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(first.into_metadata().unwrap().data, "b");
    }

    #[test]
    fn test_timeout_counts_underrun() {
        let queue = FrameQueue::new(2);
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(30)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(queue.underrun_count(), 1);
    }

    #[test]
    fn test_close_wakes_waiter() {
        let queue = Arc::new(FrameQueue::new(2));
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(waiter.join().unwrap(), Err(EngineError::Closed));
        assert!(!queue.push(meta("late")));
        assert!(queue.is_closed());
    }
}
