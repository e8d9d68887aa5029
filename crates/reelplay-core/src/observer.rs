// crates/reelplay-core/src/observer.rs
//
// Value observables. The publisher (player or coordinator) owns an
// Observable<T>; each observe() call returns a Subscription backed by its
// own channel, so subscribers on other threads receive immutable snapshots.
// Dropping the subscription unsubscribes — dead channels are pruned on the
// next publish.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::time::Duration;

pub struct Observable<T: Clone> {
    value: T,
    subscribers: Vec<Sender<T>>,
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Self { value, subscribers: Vec::new() }
    }

    /// The latest published value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Subscribe. The current value is delivered immediately.
    pub fn observe(&mut self) -> Subscription<T> {
        let (tx, rx) = unbounded();
        let _ = tx.send(self.value.clone());
        self.subscribers.push(tx);
        Subscription { rx }
    }

    /// Publish unconditionally.
    pub fn set_always(&mut self, value: T) {
        self.value = value;
        self.subscribers.retain(|tx| tx.send(self.value.clone()).is_ok());
    }
}

impl<T: Clone + PartialEq> Observable<T> {
    /// Publish only when the value changed. Returns whether it did.
    pub fn set_if_changed(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.set_always(value);
        true
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A subscriber's end of an observable. Values queue until consumed.
pub struct Subscription<T> {
    rx: Receiver<T>,
}

impl<T> Subscription<T> {
    /// The next queued value, if any.
    pub fn poll(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain the queue and keep only the most recent value.
    pub fn latest(&self) -> Option<T> {
        let mut out = None;
        while let Some(value) = self.poll() {
            out = Some(value);
        }
        out
    }

    /// Block for the next value up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// All queued values, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(value) = self.poll() {
            out.push(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_delivers_current_value() {
        let mut obs = Observable::new(7);
        let sub = obs.observe();
        assert_eq!(sub.poll(), Some(7));
        assert_eq!(sub.poll(), None);
    }

    #[test]
    fn set_always_fans_out() {
        let mut obs = Observable::new(0);
        let a = obs.observe();
        let b = obs.observe();
        a.drain();
        b.drain();
        obs.set_always(1);
        obs.set_always(2);
        assert_eq!(a.drain(), vec![1, 2]);
        assert_eq!(b.latest(), Some(2));
    }

    #[test]
    fn set_if_changed_skips_duplicates() {
        let mut obs = Observable::new(5);
        let sub = obs.observe();
        sub.drain();
        assert!(!obs.set_if_changed(5));
        assert!(obs.set_if_changed(6));
        assert_eq!(sub.drain(), vec![6]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let mut obs = Observable::new(0);
        let a = obs.observe();
        drop(obs.observe());
        obs.set_always(1);
        assert_eq!(obs.subscribers.len(), 1);
        assert_eq!(a.latest(), Some(1));
    }
}
