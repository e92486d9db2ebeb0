//! One-shot decision points between the background task and the observer.
//!
//! The background task calls [`DecisionSlot::request`], which arms the slot
//! and returns a receiver to await. The observer answers through
//! [`DecisionSlot::resolve`] or refuses with [`DecisionSlot::decline`].
//! Only the first answer per request is delivered; later ones are ignored.

use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

/// What the background task sees when it wakes up.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution<T> {
    Chosen(T),
    Declined,
}

#[derive(Debug)]
pub(crate) struct DecisionSlot<T> {
    pending: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Default for DecisionSlot<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }
}

impl<T> DecisionSlot<T> {
    /// Arm the slot. Any earlier unanswered request is dropped (declined).
    pub(crate) fn request(&self) -> PendingDecision<T> {
        let (tx, rx) = oneshot::channel();
        *self.lock() = Some(tx);
        PendingDecision { rx }
    }

    /// Deliver `value` if a request is waiting. Returns whether it was taken.
    pub(crate) fn resolve(&self, value: T) -> bool {
        match self.lock().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                debug!("no pending decision; resolution ignored");
                false
            }
        }
    }

    /// Refuse the waiting request. Returns whether one was waiting.
    pub(crate) fn decline(&self) -> bool {
        self.lock().take().is_some()
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<T>>> {
        // The guarded value is a plain Option; a poisoned lock is still usable.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Receiving side of an armed [`DecisionSlot`].
#[derive(Debug)]
pub(crate) struct PendingDecision<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> PendingDecision<T> {
    pub(crate) async fn wait(self) -> Resolution<T> {
        match self.rx.await {
            Ok(v) => Resolution::Chosen(v),
            Err(_) => Resolution::Declined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_resolution_wins() {
        let slot = DecisionSlot::default();
        let pending = slot.request();
        assert!(slot.is_pending());
        assert!(slot.resolve("upload"));
        assert!(!slot.resolve("plugin"));
        assert_eq!(pending.wait().await, Resolution::Chosen("upload"));
        assert!(!slot.is_pending());
    }

    #[tokio::test]
    async fn decline_wakes_waiter() {
        let slot = DecisionSlot::<u8>::default();
        let pending = slot.request();
        assert!(slot.decline());
        assert_eq!(pending.wait().await, Resolution::Declined);
        assert!(!slot.decline());
    }

    #[test]
    fn resolve_without_request_is_ignored() {
        let slot = DecisionSlot::default();
        assert!(!slot.resolve(1));
    }

    #[test]
    fn waiter_stays_pending_until_answered() {
        let slot = DecisionSlot::default();
        let mut waiter = tokio_test::task::spawn(slot.request().wait());
        tokio_test::assert_pending!(waiter.poll());
        assert!(slot.resolve('r'));
        assert!(waiter.is_woken());
        assert_eq!(tokio_test::assert_ready!(waiter.poll()), Resolution::Chosen('r'));
    }

    #[tokio::test]
    async fn resolution_from_another_task() {
        let slot = std::sync::Arc::new(DecisionSlot::default());
        let pending = slot.request();
        let s = slot.clone();
        tokio::spawn(async move {
            s.resolve(42);
        });
        assert_eq!(pending.wait().await, Resolution::Chosen(42));
    }
}
