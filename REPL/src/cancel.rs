//! Per-turn cancel slot and the cross-thread trigger that resolves it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Single-resolution "the user asked to cancel this turn" signal.
#[derive(Debug, Clone, Default)]
pub struct CancelSlot {
    token: CancellationToken,
}

impl CancelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the slot. Returns `true` only for the call that resolved it.
    pub fn resolve(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn resolved(&self) {
        self.token.cancelled().await;
    }
}

/// Posts a cancel request to the session from any thread. Requests are
/// applied to the current turn's slot by the session loop itself.
#[derive(Debug, Clone)]
pub struct CancelTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl CancelTrigger {
    /// Returns `false` if the session is gone.
    pub fn trigger(&self) -> bool {
        trace!("cancel trigger posted");
        self.tx.send(()).is_ok()
    }
}

/// Receiving side of [`CancelTrigger`], owned by the session.
#[derive(Debug)]
pub struct TriggerInbox {
    rx: mpsc::UnboundedReceiver<()>,
}

impl TriggerInbox {
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Discard requests posted outside a turn. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

pub fn trigger_channel() -> (CancelTrigger, TriggerInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CancelTrigger { tx }, TriggerInbox { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_slot_resolves_once() {
        let slot = CancelSlot::new();
        assert!(!slot.is_resolved());
        assert!(slot.resolve());
        assert!(!slot.resolve());
        assert!(slot.is_resolved());

        let clone = slot.clone();
        assert!(!clone.resolve());
    }

    #[tokio::test]
    async fn test_resolved_wakes_waiter() {
        let slot = CancelSlot::new();
        let waiter = slot.clone();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let handle = tokio::task::spawn_local(async move { waiter.resolved().await });
                tokio::task::yield_now().await;
                slot.resolve();
                tokio::time::timeout(Duration::from_secs(1), handle)
                    .await
                    .expect("waiter should wake")
                    .unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn test_trigger_from_other_thread() {
        let (trigger, mut inbox) = trigger_channel();
        let remote = trigger.clone();
        std::thread::spawn(move || remote.trigger()).join().unwrap();

        assert_eq!(inbox.recv().await, Some(()));
    }

    #[test]
    fn test_drain_discards_stale_requests() {
        let (trigger, mut inbox) = trigger_channel();
        trigger.trigger();
        trigger.trigger();
        assert_eq!(inbox.drain(), 2);
        assert_eq!(inbox.drain(), 0);

        drop(inbox);
        assert!(!trigger.trigger());
    }
}
