//! Live-stream frame publishing.
//!
//! The capture loop publishes each encoded frame into a single slot; stream
//! writers read the latest frame at their own pace (independent fan-out per
//! viewer). Publishing swaps an `Arc`, so viewers never observe a partially
//! written frame, and a condition variable wakes writers that are blocked
//! waiting for something newer.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// One JPEG-encoded frame ready for streaming.
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    /// Publisher sequence number, strictly increasing.
    pub seq: u64,
}

struct Slot {
    latest: Option<Arc<EncodedFrame>>,
    seq: u64,
    closed: bool,
}

/// Latest-frame slot shared between the capture loop and stream writers.
pub struct FramePublisher {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl FramePublisher {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                latest: None,
                seq: 0,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Publish a frame and wake every waiting viewer. No-op once closed.
    pub fn publish(&self, jpeg: Vec<u8>) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.closed {
            return;
        }
        slot.seq += 1;
        slot.latest = Some(Arc::new(EncodedFrame {
            jpeg,
            seq: slot.seq,
        }));
        self.cond.notify_all();
    }

    /// The most recently published frame, if any.
    pub fn latest(&self) -> Option<Arc<EncodedFrame>> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .latest
            .clone()
    }

    /// Block until a frame newer than `last_seq` is available, the timeout
    /// elapses, or the publisher closes. `None` means "nothing newer yet";
    /// callers decide whether to keep waiting or drop the viewer.
    pub fn wait_newer(&self, last_seq: u64, timeout: Duration) -> Option<Arc<EncodedFrame>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if slot.closed {
                return None;
            }
            if slot.seq > last_seq {
                return slot.latest.clone();
            }
            let (next, wait) = self
                .cond
                .wait_timeout(slot, timeout)
                .unwrap_or_else(|e| e.into_inner());
            slot = next;
            if wait.timed_out() {
                return if slot.seq > last_seq {
                    slot.latest.clone()
                } else {
                    None
                };
            }
        }
    }

    /// Whether the publisher has been closed.
    pub fn is_closed(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Close the stream and wake all waiters. Called on shutdown or fatal
    /// device failure so viewer threads exit.
    pub fn close(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.closed = true;
        self.cond.notify_all();
    }
}

impl Default for FramePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn publish_bumps_sequence() {
        let publisher = FramePublisher::new();
        assert!(publisher.latest().is_none());

        publisher.publish(vec![1]);
        publisher.publish(vec![2]);

        let latest = publisher.latest().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.jpeg, vec![2]);
    }

    #[test]
    fn wait_newer_returns_fresh_frame() {
        let publisher = Arc::new(FramePublisher::new());
        publisher.publish(vec![1]);

        let waiter = {
            let publisher = Arc::clone(&publisher);
            thread::spawn(move || publisher.wait_newer(1, Duration::from_secs(5)))
        };
        // Give the waiter a moment to block, then publish.
        thread::sleep(Duration::from_millis(20));
        publisher.publish(vec![2]);

        let frame = waiter.join().unwrap().expect("frame");
        assert_eq!(frame.seq, 2);
    }

    #[test]
    fn wait_newer_times_out_without_new_frames() {
        let publisher = FramePublisher::new();
        publisher.publish(vec![1]);
        assert!(publisher
            .wait_newer(1, Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn close_wakes_waiters() {
        let publisher = Arc::new(FramePublisher::new());
        let waiter = {
            let publisher = Arc::clone(&publisher);
            thread::spawn(move || publisher.wait_newer(0, Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        publisher.close();
        assert!(waiter.join().unwrap().is_none());
        assert!(publisher.is_closed());
    }

    #[test]
    fn publish_after_close_is_dropped() {
        let publisher = FramePublisher::new();
        publisher.close();
        publisher.publish(vec![1]);
        assert!(publisher.latest().is_none());
    }
}
