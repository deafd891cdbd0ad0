//! Per-player bounded event queue.
//!
//! Producers (command handlers, room broadcasts) push encoded event frames;
//! exactly one consumer per player drains them in FIFO order to the
//! outbound stream. Pushes never block: a full queue and a closed queue are
//! distinct, synchronous failures, and the caller decides policy.

use bytes::Bytes;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue full")]
    Full,
    #[error("event queue closed")]
    Closed,
}

#[derive(Debug)]
pub struct EventQueue {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Enqueue one frame without blocking.
    pub fn push(&self, data: Bytes) -> Result<(), QueueError> {
        let guard = self.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return Err(QueueError::Closed);
        };
        tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Close the queue. Idempotent; later pushes fail with
    /// [`QueueError::Closed`] and the consumer sees end-of-queue after
    /// draining what is already buffered.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }

    /// Hand out the consumer side. Yields `Some` exactly once.
    pub fn take_consumer(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.rx.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_in_fifo_order() {
        let q = EventQueue::new(8);
        q.push(Bytes::from_static(b"one")).unwrap();
        q.push(Bytes::from_static(b"two")).unwrap();
        q.push(Bytes::from_static(b"three")).unwrap();
        q.close();

        let mut rx = q.take_consumer().unwrap();
        assert_eq!(&rx.recv().await.unwrap()[..], b"one");
        assert_eq!(&rx.recv().await.unwrap()[..], b"two");
        assert_eq!(&rx.recv().await.unwrap()[..], b"three");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn push_at_capacity_fails_full_without_blocking() {
        let q = EventQueue::new(2);
        q.push(Bytes::from_static(b"a")).unwrap();
        q.push(Bytes::from_static(b"b")).unwrap();
        assert_eq!(q.push(Bytes::from_static(b"c")), Err(QueueError::Full));
        // The queue is still usable; nothing was lost or reordered.
        assert!(!q.is_closed());
    }

    #[test]
    fn closed_queue_rejects_all_pushes() {
        let q = EventQueue::new(2);
        q.close();
        assert_eq!(q.push(Bytes::from_static(b"x")), Err(QueueError::Closed));
        assert_eq!(q.push(Bytes::from_static(b"y")), Err(QueueError::Closed));
    }

    #[test]
    fn close_is_idempotent() {
        let q = EventQueue::new(2);
        q.close();
        q.close();
        q.close();
        assert!(q.is_closed());
    }

    #[test]
    fn consumer_is_handed_out_exactly_once() {
        let q = EventQueue::new(2);
        assert!(q.take_consumer().is_some());
        assert!(q.take_consumer().is_none());
    }

    #[tokio::test]
    async fn buffered_frames_survive_close() {
        let q = EventQueue::new(4);
        q.push(Bytes::from_static(b"last words")).unwrap();
        q.close();
        let mut rx = q.take_consumer().unwrap();
        assert_eq!(&rx.recv().await.unwrap()[..], b"last words");
        assert!(rx.recv().await.is_none());
    }
}
