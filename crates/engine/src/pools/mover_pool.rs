// SPDX-License-Identifier: MIT

//! Mover pool: FIFO dispatcher of interchangeable mover actors (spec §4.5).
//!
//! `request_mover` is poll-style rather than a single indefinitely-parked
//! `ask`: a first call either grants immediately or enqueues the caller as
//! a waiter and returns `Pending`; the caller (the plate actor, from its
//! own `tick`) polls again on its next tick. This keeps a plate that is
//! merely waiting its turn for a mover free to also notice `Pause`/`Abort`
//! messages in between polls, instead of blocking the plate's mailbox for
//! an unbounded time.

use labtrans_actor::{async_trait, Actor, ActorRef, EventBus};
use labtrans_core::{DeckConfig, Event, Location, LocationId, MoverId, Position, PlateId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::actors::mover::MoverMessage;

/// A claim on a specific mover, handed to whichever plate requested it.
#[derive(Clone)]
pub struct MoverHandle {
    pub mover_id: MoverId,
    pub actor_ref: ActorRef<MoverMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoverPollResult {
    Granted(MoverId),
    Pending,
}

pub enum MoverPoolMessage {
    RequestMover { plate_id: PlateId, destination_hint: LocationId, reply: oneshot::Sender<MoverPollResult> },
    ReleaseMover { mover_id: MoverId },
    GetHandle { mover_id: MoverId, reply: oneshot::Sender<Option<MoverHandle>> },
    ListAvailable { reply: oneshot::Sender<Vec<MoverId>> },
}

struct Waiter {
    plate_id: PlateId,
    destination_hint: LocationId,
}

pub struct MoverPool {
    deck: Arc<DeckConfig>,
    bus: Arc<EventBus>,
    movers: Vec<MoverHandle>,
    available: Vec<MoverId>,
    /// Movers whose grant has been computed but not yet claimed by the
    /// plate that is polling for it.
    fulfilled: HashMap<PlateId, MoverId>,
    waiters: VecDeque<Waiter>,
}

impl MoverPool {
    pub fn new(deck: Arc<DeckConfig>, bus: Arc<EventBus>, movers: Vec<MoverHandle>) -> Self {
        let available = movers.iter().map(|m| m.mover_id).collect();
        Self { deck, bus, movers, available, fulfilled: HashMap::new(), waiters: VecDeque::new() }
    }

    fn handle_of(&self, mover_id: MoverId) -> Option<&MoverHandle> {
        self.movers.iter().find(|m| m.mover_id == mover_id)
    }

    fn hint_location(&self, hint: LocationId) -> Option<&Location> {
        self.deck.location(hint)
    }

    /// Estimated cost of sending `mover_id` to `hint`, used only to rank
    /// otherwise-interchangeable available movers. Falls back to a
    /// straight-line estimate so pool selection stays cheap; the actual
    /// routed plan is computed later by the mover actor itself.
    fn estimated_cost(&self, from: Position, hint: LocationId) -> f64 {
        match self.hint_location(hint) {
            Some(loc) => from.distance_to(&loc.position),
            None => 0.0,
        }
    }

    /// Choose the best available mover for `hint`, tie-broken by lowest
    /// `mover_id`. Needs each candidate's current position; in the absence
    /// of a cached position (no prior report), an available mover is
    /// treated as equally eligible at cost 0.
    fn pick_available(&self, hint: LocationId, positions: &HashMap<MoverId, Position>) -> Option<MoverId> {
        self.available
            .iter()
            .copied()
            .min_by(|a, b| {
                let ca = positions.get(a).map(|p| self.estimated_cost(*p, hint)).unwrap_or(0.0);
                let cb = positions.get(b).map(|p| self.estimated_cost(*p, hint)).unwrap_or(0.0);
                ca.total_cmp(&cb).then_with(|| a.cmp(b))
            })
    }

    fn assign(&mut self, mover_id: MoverId, plate_id: PlateId) {
        self.available.retain(|m| *m != mover_id);
        self.bus.publish(Event::MoverAssigned { mover_id, plate_id });
    }

    async fn request_mover(
        &mut self,
        plate_id: PlateId,
        destination_hint: LocationId,
        positions: &HashMap<MoverId, Position>,
    ) -> MoverPollResult {
        if let Some(mover_id) = self.fulfilled.remove(&plate_id) {
            return MoverPollResult::Granted(mover_id);
        }
        if self.waiters.iter().any(|w| w.plate_id == plate_id) {
            return MoverPollResult::Pending;
        }
        if let Some(mover_id) = self.pick_available(destination_hint, positions) {
            self.assign(mover_id, plate_id);
            return MoverPollResult::Granted(mover_id);
        }
        self.waiters.push_back(Waiter { plate_id, destination_hint });
        MoverPollResult::Pending
    }

    fn release_mover(&mut self, mover_id: MoverId, positions: &HashMap<MoverId, Position>) {
        if !self.available.contains(&mover_id) {
            self.available.push(mover_id);
        }
        self.bus.publish(Event::MoverReleased { mover_id });
        if let Some(waiter) = self.waiters.pop_front() {
            match self.pick_available(waiter.destination_hint, positions) {
                Some(chosen) => {
                    self.fulfilled.insert(waiter.plate_id, chosen);
                    self.assign(chosen, waiter.plate_id);
                }
                None => {
                    // Should not happen: a release just made one available.
                    self.waiters.push_front(waiter);
                }
            }
        }
    }
}

pub struct MoverPoolActor {
    pool: MoverPool,
    /// Last-known position per mover, refreshed by polling each available
    /// mover's `GetState` lazily on each selection. Kept cheap: movers are
    /// few, and selection only needs a rough ranking.
    positions: HashMap<MoverId, Position>,
}

impl MoverPoolActor {
    pub fn new(pool: MoverPool) -> Self {
        Self { pool, positions: HashMap::new() }
    }

    async fn refresh_positions(&mut self) {
        for handle in self.pool.movers.clone() {
            if let Ok(snapshot) = handle
                .actor_ref
                .ask(std::time::Duration::from_millis(200), MoverMessage::GetState)
                .await
            {
                self.positions.insert(handle.mover_id, snapshot.physical.position);
            }
        }
    }
}

#[async_trait]
impl Actor for MoverPoolActor {
    type Message = MoverPoolMessage;

    async fn handle(&mut self, msg: MoverPoolMessage) {
        match msg {
            MoverPoolMessage::RequestMover { plate_id, destination_hint, reply } => {
                self.refresh_positions().await;
                let result = self.pool.request_mover(plate_id, destination_hint, &self.positions).await;
                let _ = reply.send(result);
            }
            MoverPoolMessage::ReleaseMover { mover_id } => {
                self.refresh_positions().await;
                self.pool.release_mover(mover_id, &self.positions);
            }
            MoverPoolMessage::GetHandle { mover_id, reply } => {
                let _ = reply.send(self.pool.handle_of(mover_id).cloned());
            }
            MoverPoolMessage::ListAvailable { reply } => {
                let _ = reply.send(self.pool.available.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_available_ties_break_on_mover_id() {
        let deck = Arc::new(DeckConfig::default());
        let bus = EventBus::new();
        let m1 = MoverId::from_raw("mov-aaa");
        let m2 = MoverId::from_raw("mov-bbb");
        // Without position data both candidates cost 0; lowest id wins.
        let pool = MoverPool::new(deck, bus, vec![]);
        let mut pool = pool;
        pool.available = vec![m2, m1];
        let chosen = pool.pick_available(LocationId::from_raw("x"), &HashMap::new());
        assert_eq!(chosen, Some(m1));
    }

    #[tokio::test]
    async fn waiters_are_served_fifo_on_release() {
        let deck = Arc::new(DeckConfig::default());
        let bus = EventBus::new();
        let mover_id = MoverId::from_raw("mov-only");
        let mut pool = MoverPool::new(deck, bus, vec![]);
        pool.available = vec![mover_id];
        let positions = HashMap::new();

        let p1 = PlateId::generate();
        let p2 = PlateId::generate();
        let p3 = PlateId::generate();

        // p1 grabs the only mover.
        assert_eq!(pool.request_mover(p1, LocationId::from_raw("x"), &positions).await, MoverPollResult::Granted(mover_id));
        // p2, p3 queue behind it.
        assert_eq!(pool.request_mover(p2, LocationId::from_raw("x"), &positions).await, MoverPollResult::Pending);
        assert_eq!(pool.request_mover(p3, LocationId::from_raw("x"), &positions).await, MoverPollResult::Pending);

        pool.release_mover(mover_id, &positions);
        assert_eq!(pool.request_mover(p2, LocationId::from_raw("x"), &positions).await, MoverPollResult::Granted(mover_id));
        assert_eq!(pool.request_mover(p3, LocationId::from_raw("x"), &positions).await, MoverPollResult::Pending);

        pool.release_mover(mover_id, &positions);
        assert_eq!(pool.request_mover(p3, LocationId::from_raw("x"), &positions).await, MoverPollResult::Granted(mover_id));
    }
}
