// SPDX-License-Identifier: MIT

//! The coordinator: boots the pools and device/mover actors from a deck
//! configuration, then spawns and indexes plates on demand (spec §4.10,
//! §6 "External interfaces").

use crate::actors::device::DeviceActor;
use crate::actors::mover::MoverActor;
use crate::actors::plate::{PlateActor, PlateError, PlateMessage};
use crate::driver::PhysicalDriver;
use crate::pools::device_pool::{DeviceHandle, DevicePoolActor, DevicePoolMessage};
use crate::pools::mover_pool::{MoverHandle, MoverPool, MoverPoolActor, MoverPoolMessage};
use crate::station_manager::{StationManager, StationMessage};
use labtrans_actor::{spawn_actor, ActorError, ActorRef, EventBus, Subscription};
use labtrans_core::{Clock, DeckConfig, DeviceId, Event, MoverId, MoverPhysicalState, MoverStateSnapshot, PlateId, PlateStateSnapshot, Position, Workflow};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no plate with id {0:?}")]
    UnknownPlate(PlateId),
    #[error("plate rejected the request: {0}")]
    Plate(#[from] PlateError),
    #[error("plate actor unreachable: {0}")]
    Actor(#[from] ActorError),
}

/// Action an operator can apply to a running plate (spec §6).
pub enum PlateControl {
    Pause { reason: String },
    Resume,
    Abort { reason: String },
    RetryStep,
    SkipStep,
}

pub struct Coordinator<C: Clock> {
    deck: Arc<DeckConfig>,
    bus: Arc<EventBus>,
    clock: C,
    mover_pool: ActorRef<MoverPoolMessage>,
    device_pool: ActorRef<DevicePoolMessage>,
    station_manager: ActorRef<StationMessage>,
    mover_refs: HashMap<MoverId, ActorRef<crate::actors::mover::MoverMessage>>,
    plates: Mutex<HashMap<PlateId, ActorRef<PlateMessage>>>,
}

impl<C: Clock> Coordinator<C> {
    /// Boot every mover and device actor, the mover/device pools, and the
    /// station manager from `deck`. `movers` gives each mover's starting
    /// physical position; `devices` lists the device ids a station may
    /// reference in a workflow step.
    pub fn new(deck: Arc<DeckConfig>, driver: Arc<dyn PhysicalDriver>, clock: C, movers: Vec<(MoverId, Position)>, devices: Vec<DeviceId>) -> Self {
        let bus = EventBus::new();

        let mut mover_refs = HashMap::new();
        let mover_handles: Vec<MoverHandle> = movers
            .into_iter()
            .map(|(mover_id, position)| {
                let actor = MoverActor::new(mover_id, deck.clone(), driver.clone(), bus.clone(), clock.clone(), MoverPhysicalState::idle_at(position));
                let (actor_ref, _join) = spawn_actor(actor);
                mover_refs.insert(mover_id, actor_ref.clone());
                MoverHandle { mover_id, actor_ref }
            })
            .collect();

        let device_handles: Vec<DeviceHandle> = devices
            .into_iter()
            .map(|device_id| {
                let actor = DeviceActor::new(device_id, driver.clone(), bus.clone());
                let (actor_ref, _join) = spawn_actor(actor);
                actor_ref.try_tell(crate::actors::device::DeviceMessage::BindSelfRef(actor_ref.clone())).ok();
                DeviceHandle { device_id, actor_ref }
            })
            .collect();

        let mover_pool = MoverPool::new(deck.clone(), bus.clone(), mover_handles);
        let (mover_pool, _join) = spawn_actor(MoverPoolActor::new(mover_pool));

        let (device_pool, _join) = spawn_actor(DevicePoolActor::new(device_handles));

        let (station_manager, _join) = spawn_actor(StationManager::new(deck.clone(), bus.clone()));

        Self { deck, bus, clock, mover_pool, device_pool, station_manager, mover_refs, plates: Mutex::new(HashMap::new()) }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn subscribe(&self, pattern: &str) -> Subscription {
        self.bus.subscribe(pattern)
    }

    /// Spawn a plate under the given id, assign its workflow, and hand
    /// control to it. The plate runs autonomously from this point on
    /// (spec §6 "spawn_plate").
    pub async fn spawn_plate(&self, plate_id: PlateId, workflow: Workflow, sample_ids: Vec<String>, barcode: Option<String>) -> Result<PlateId, CoordinatorError> {
        self.bus.publish(Event::PlateCreated { plate_id });

        let actor = PlateActor::new(
            plate_id,
            sample_ids,
            barcode,
            self.mover_pool.clone(),
            self.device_pool.clone(),
            self.station_manager.clone(),
            self.deck.clone(),
            self.bus.clone(),
            self.clock.clone(),
        );
        let (actor_ref, _join) = spawn_actor(actor);
        self.plates.lock().insert(plate_id, actor_ref.clone());

        actor_ref.ask(Duration::from_secs(5), |reply| PlateMessage::AssignWorkflow { workflow, reply }).await??;
        Ok(plate_id)
    }

    /// Snapshot every tracked plate (spec §6 "list_plates"). An id whose
    /// actor no longer answers (stopped between the index read and the
    /// query) is silently dropped rather than failing the whole listing.
    pub async fn list_plates(&self) -> Vec<PlateStateSnapshot> {
        let ids: Vec<PlateId> = self.plates.lock().keys().copied().collect();
        let mut snapshots = Vec::with_capacity(ids.len());
        for plate_id in ids {
            if let Ok(snapshot) = self.get_plate_state(plate_id).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Snapshot every mover (spec §6 "list_movers"), same drop-on-miss
    /// behavior as `list_plates`.
    pub async fn list_movers(&self) -> Vec<MoverStateSnapshot> {
        let ids: Vec<MoverId> = self.mover_refs.keys().copied().collect();
        let mut snapshots = Vec::with_capacity(ids.len());
        for mover_id in ids {
            if let Ok(snapshot) = self.get_mover_state(mover_id).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    pub async fn get_plate_state(&self, plate_id: PlateId) -> Result<PlateStateSnapshot, CoordinatorError> {
        let plate_ref = self.plate_ref(plate_id)?;
        let snapshot = plate_ref.ask(Duration::from_secs(5), |reply| PlateMessage::GetState { reply }).await?;
        Ok(snapshot)
    }

    pub async fn get_mover_state(&self, mover_id: MoverId) -> Result<MoverStateSnapshot, CoordinatorError> {
        let mover_ref = self.mover_refs.get(&mover_id).cloned().ok_or(CoordinatorError::Actor(ActorError::MailboxClosed))?;
        let snapshot = mover_ref.ask(Duration::from_secs(5), crate::actors::mover::MoverMessage::GetState).await?;
        Ok(snapshot)
    }

    pub async fn control_plate(&self, plate_id: PlateId, action: PlateControl) -> Result<(), CoordinatorError> {
        let plate_ref = self.plate_ref(plate_id)?;
        let deadline = Duration::from_secs(5);
        let result = match action {
            PlateControl::Pause { reason } => plate_ref.ask(deadline, |reply| PlateMessage::Pause { reason, reply }).await?,
            PlateControl::Resume => plate_ref.ask(deadline, |reply| PlateMessage::Resume { reply }).await?,
            PlateControl::Abort { reason } => plate_ref.ask(deadline, |reply| PlateMessage::Abort { reason, reply }).await?,
            PlateControl::RetryStep => plate_ref.ask(deadline, |reply| PlateMessage::RetryStep { reply }).await?,
            PlateControl::SkipStep => plate_ref.ask(deadline, |reply| PlateMessage::SkipStep { reply }).await?,
        };
        Ok(result?)
    }

    fn plate_ref(&self, plate_id: PlateId) -> Result<ActorRef<PlateMessage>, CoordinatorError> {
        self.plates.lock().get(&plate_id).cloned().ok_or(CoordinatorError::UnknownPlate(plate_id))
    }
}
