// SPDX-License-Identifier: MIT

//! Mover actor: transport executor (spec §4.7). Holds physical state,
//! executes a plan against the physical driver, and knows nothing about
//! workflows — it only ever sees a destination and a plate id to tag
//! events with.

use crate::driver::{DriverError, PhysicalDriver};
use labtrans_actor::{async_trait, Actor, EventBus};
use labtrans_core::{Clock, DeckConfig, Event, Location, MoverId, MoverPhysicalState, MoverRunState, MoverStateSnapshot, PlateId};
use labtrans_planner::{self as planner, PlanConstraints};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Minimum spacing between `mover.position_changed` emissions (spec §4.7).
const POSITION_EMIT_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MoverError {
    #[error("no route to destination")]
    NoRoute,
    #[error("destination unreachable")]
    Unreachable,
    #[error("driver error: {0}")]
    Driver(String),
}

pub enum MoverMessage {
    TransportTo { destination: Location, plate_id: PlateId, reply: oneshot::Sender<Result<(), MoverError>> },
    ReleaseFromPlate { plate_id: PlateId },
    GetState(oneshot::Sender<MoverStateSnapshot>),
}

pub struct MoverActor<C: Clock> {
    pub mover_id: MoverId,
    deck: Arc<DeckConfig>,
    driver: Arc<dyn PhysicalDriver>,
    bus: Arc<EventBus>,
    clock: C,
    physical: MoverPhysicalState,
    assigned_plate: Option<PlateId>,
    last_position_emit: Option<std::time::Instant>,
}

impl<C: Clock> MoverActor<C> {
    pub fn new(
        mover_id: MoverId,
        deck: Arc<DeckConfig>,
        driver: Arc<dyn PhysicalDriver>,
        bus: Arc<EventBus>,
        clock: C,
        initial: MoverPhysicalState,
    ) -> Self {
        Self { mover_id, deck, driver, bus, clock, physical: initial, assigned_plate: None, last_position_emit: None }
    }

    async fn transport_to(&mut self, destination: &Location, plate_id: PlateId) -> Result<(), MoverError> {
        self.assigned_plate = Some(plate_id);
        let plan = planner::plan(&self.deck, self.physical.position, destination, None::<&PlanConstraints>).map_err(
            |err| match err {
                planner::PlannerError::NoRoute => MoverError::NoRoute,
                planner::PlannerError::Unreachable => MoverError::Unreachable,
            },
        )?;

        self.bus.publish(Event::MoverTransportStarted { mover_id: self.mover_id, plate_id });
        self.physical.state = MoverRunState::Transporting;

        for (index, timed) in plan.commands.iter().enumerate() {
            if let Err(err) = self.driver.execute_command(self.mover_id, timed.command).await {
                self.bus.publish(Event::MoverTransportFailed { mover_id: self.mover_id, reason: err.to_string() });
                self.physical.state = MoverRunState::Idle;
                return Err(MoverError::Driver(err.to_string()));
            }
            if let Ok(state) = self.driver.get_physical_state(self.mover_id).await {
                self.physical = state;
            }
            self.bus.publish(Event::MoverTransportProgress { mover_id: self.mover_id, command_index: index });
        }

        self.physical.state = MoverRunState::Assigned;
        self.bus.publish(Event::MoverTransportCompleted { mover_id: self.mover_id });
        Ok(())
    }
}

#[async_trait]
impl<C: Clock> Actor for MoverActor<C> {
    type Message = MoverMessage;

    async fn handle(&mut self, msg: MoverMessage) {
        match msg {
            MoverMessage::TransportTo { destination, plate_id, reply } => {
                let result = self.transport_to(&destination, plate_id).await;
                let _ = reply.send(result);
            }
            MoverMessage::ReleaseFromPlate { plate_id } => {
                if self.assigned_plate == Some(plate_id) {
                    self.assigned_plate = None;
                }
            }
            MoverMessage::GetState(reply) => {
                let snapshot = MoverStateSnapshot {
                    mover_id: self.mover_id,
                    physical: self.physical.clone(),
                    assigned_plate: self.assigned_plate,
                };
                let _ = reply.send(snapshot);
            }
        }
    }

    async fn tick(&mut self) {
        if let Ok(state) = self.driver.get_physical_state(self.mover_id).await {
            self.physical = state;
        }
        let now = self.clock.now();
        let due = self.last_position_emit.map(|t| now.duration_since(t) >= POSITION_EMIT_PERIOD).unwrap_or(true);
        if due {
            self.last_position_emit = Some(now);
            self.bus.publish(Event::MoverPositionChanged {
                mover_id: self.mover_id,
                x: self.physical.position.x,
                y: self.physical.position.y,
                c: self.physical.position.c,
            });
        }
    }

    fn tick_period(&self) -> Duration {
        Duration::from_millis(50)
    }
}

impl From<DriverError> for MoverError {
    fn from(err: DriverError) -> Self {
        MoverError::Driver(err.to_string())
    }
}
