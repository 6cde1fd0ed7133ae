// SPDX-License-Identifier: MIT

//! The actor trait and its run loop (spec §4.1).

use crate::mailbox::{ActorRef, DEFAULT_MAILBOX_CAPACITY};
use async_trait::async_trait;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Messages drained from a single mailbox poll before `tick` runs, so a
/// bursty sender can never starve an actor's autonomous behavior.
const DRAIN_BUDGET: usize = 32;

/// An autonomous, single-mailbox actor.
///
/// Exactly one `handle`/`tick` call is in flight at a time per actor —
/// the run loop below never invokes two concurrently — so an actor's own
/// fields never need synchronization.
#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    /// Handle one message. Errors are the actor's own business: catch
    /// them internally (and emit `actor.error`) rather than panicking,
    /// per spec §4.1.
    async fn handle(&mut self, msg: Self::Message);

    /// Autonomous behavior invoked once per loop iteration, after the
    /// mailbox has been drained. Default: nothing.
    async fn tick(&mut self) {}

    /// How often `tick` fires when the mailbox is otherwise idle.
    fn tick_period(&self) -> Duration {
        Duration::from_millis(50)
    }

    /// Release any owned external resources. Called once, after the run
    /// loop has been asked to stop.
    async fn on_stop(&mut self) {}
}

/// Start an actor's run loop on its own task and return a handle to it.
pub fn spawn_actor<A: Actor>(actor: A) -> (ActorRef<A::Message>, tokio::task::JoinHandle<()>) {
    spawn_actor_with_capacity(actor, DEFAULT_MAILBOX_CAPACITY)
}

pub fn spawn_actor_with_capacity<A: Actor>(
    mut actor: A,
    capacity: usize,
) -> (ActorRef<A::Message>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<A::Message>(capacity);
    let running = Arc::new(AtomicBool::new(true));
    let running_in_loop = running.clone();
    let tick_period = actor.tick_period();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if !running_in_loop.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                biased;
                received = rx.recv() => {
                    match received {
                        Some(msg) => {
                            actor.handle(msg).await;
                            let mut drained = 1usize;
                            while drained < DRAIN_BUDGET {
                                match rx.try_recv() {
                                    Ok(msg) => {
                                        actor.handle(msg).await;
                                        drained += 1;
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    actor.tick().await;
                }
            }
        }
        actor.on_stop().await;
    });

    (ActorRef::new(tx, running), join)
}
