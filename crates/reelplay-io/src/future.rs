// crates/reelplay-io/src/future.rs
//
// One-shot promise/future pairs with cooperative cancellation. The promise
// side lives in a reader's request queue; the future side is polled by the
// timeline coordinator. Cancellation sets a shared flag the worker checks
// before doing real work — a cancelled future may still complete (best
// effort), so callers must treat Cancelled and late success the same way.
//
// A promise dropped without being fulfilled breaks the future with
// Cancelled; nothing ever blocks forever on a dead worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use reelplay_core::error::{Error, Result};

pub fn pair<T>() -> (Promise<T>, Future<T>) {
    let (tx, rx) = bounded(1);
    let cancel = Arc::new(AtomicBool::new(false));
    (
        Promise { tx: Some(tx), cancel: Arc::clone(&cancel) },
        Future { rx, cancel },
    )
}

pub struct Promise<T> {
    tx: Option<Sender<Result<T>>>,
    cancel: Arc<AtomicBool>,
}

impl<T> Promise<T> {
    /// Complete the future. A value sent after the caller stopped listening
    /// is silently discarded.
    pub fn fulfill(mut self, value: Result<T>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(value);
        }
    }

    /// Whether the caller asked for this work to be abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Break the future with Cancelled without doing the work.
    pub fn abort(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(Error::Cancelled));
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // An unfulfilled promise (worker died, queue drained on shutdown)
        // must not leave the future waiting.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(Error::Cancelled));
        }
    }
}

pub struct Future<T> {
    rx: Receiver<Result<T>>,
    cancel: Arc<AtomicBool>,
}

impl<T> Future<T> {
    /// An already-completed future.
    pub fn ready(value: Result<T>) -> Self {
        let (promise, future) = pair();
        promise.fulfill(value);
        future
    }

    /// Non-blocking poll; consumes the value on first success.
    pub fn try_get(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::Cancelled)),
        }
    }

    /// Block until the worker completes or the promise is broken.
    pub fn get(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(Error::Cancelled))
    }

    /// Request cancellation. Cooperative: the worker short-circuits when it
    /// next checks the flag.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}
