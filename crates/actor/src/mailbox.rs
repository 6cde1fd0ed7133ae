// SPDX-License-Identifier: MIT

//! `ActorRef`: the handle callers use to `tell`/`ask` an actor, plus the
//! `ask` request/response helper built on a one-shot reply channel.

use crate::error::ActorError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Default mailbox capacity (spec §5 "Mailboxes are bounded (default 256)").
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// A cheaply-clonable handle to an actor's mailbox.
pub struct ActorRef<M> {
    tx: mpsc::Sender<M>,
    running: Arc<AtomicBool>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), running: self.running.clone() }
    }
}

impl<M> ActorRef<M> {
    pub(crate) fn new(tx: mpsc::Sender<M>, running: Arc<AtomicBool>) -> Self {
        Self { tx, running }
    }

    /// Fire-and-forget send. Blocks the caller only while the mailbox is
    /// full, which is the back-pressure mechanism spec §5 relies on to
    /// rate-limit bursty producers.
    pub async fn tell(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).await.map_err(|_| ActorError::MailboxClosed)
    }

    /// Non-blocking send; used by callers (like a tick loop) that must
    /// never await on back-pressure.
    pub fn try_tell(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|_| ActorError::MailboxClosed)
    }

    /// Request/response: build the message with an embedded reply
    /// channel, send it, and await the reply under `deadline`.
    pub async fn ask<R>(
        &self,
        deadline: Duration,
        make: impl FnOnce(oneshot::Sender<R>) -> M,
    ) -> Result<R, ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tell(make(reply_tx)).await?;
        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(ActorError::MailboxClosed),
            Err(_) => Err(ActorError::Timeout),
        }
    }

    /// Request the actor's loop stop at its next iteration boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tell_delivers_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let running = Arc::new(AtomicBool::new(true));
        let actor_ref = ActorRef::new(tx, running);
        actor_ref.tell(1).await.unwrap_or(());
        actor_ref.tell(2).await.unwrap_or(());
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn ask_times_out_when_nobody_replies() {
        let (tx, mut rx) = mpsc::channel::<oneshot::Sender<u32>>(8);
        let running = Arc::new(AtomicBool::new(true));
        let actor_ref = ActorRef::new(tx, running);
        let result = actor_ref.ask(Duration::from_millis(20), |reply| reply).await;
        // Drain so the sender doesn't see a closed channel instead.
        let _ = rx.try_recv();
        assert_eq!(result, Err(ActorError::Timeout));
    }
}
