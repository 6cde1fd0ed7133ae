// SPDX-License-Identifier: MIT

//! Plate actor: the autonomous passenger (spec §4.9). Drives itself
//! forward from `ready` through each workflow step, one phase-transition
//! per `tick`, so that `Pause`/`Abort`/query messages sent while a step is
//! in flight are always handled between two such transitions rather than
//! queued behind an indefinitely long one.

use crate::actors::device::DeviceMessage;
use crate::actors::mover::MoverMessage;
use crate::pools::device_pool::{DeviceHandle, DevicePollResult, DevicePoolMessage};
use crate::pools::mover_pool::{MoverHandle, MoverPollResult, MoverPoolMessage};
use crate::station_manager::{StationGrant, StationMessage};
use labtrans_actor::{async_trait, Actor, ActorError, ActorRef, EventBus, Subscription};
use labtrans_core::{
    Clock, DeckConfig, ErrorClass, Event, PlateErrorInfo, PlateHistoryEntry, PlateId, PlateLocation, PlatePhase,
    PlateStateSnapshot, StationId, Workflow, PLATE_HISTORY_CAP,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

const RESOURCE_POLL_DEADLINE: Duration = Duration::from_secs(2);
const TRANSPORT_DEADLINE: Duration = Duration::from_secs(30);
const LOAD_UNLOAD_DEADLINE: Duration = Duration::from_secs(10);
const PROCESS_START_DEADLINE: Duration = Duration::from_secs(5);

/// Spec §7: "mailbox full, ask timeout, brief driver unavailability ->
/// retried automatically up to a small bound (default 3) with
/// exponential backoff". Only `ActorError::class() == Transient` failures
/// are eligible; anything else returns on the first attempt.
const MAX_TRANSIENT_RETRIES: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Retry `attempt` while it fails with a transient `ActorError`, doubling
/// the backoff delay each time, up to `MAX_TRANSIENT_RETRIES` retries.
/// Any non-transient failure, or the final exhausted attempt, is returned
/// as-is for the caller to classify and surface.
async fn retry_transient<R, F, Fut>(mut attempt: F) -> Result<R, ActorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, ActorError>>,
{
    let mut delay = RETRY_BACKOFF_BASE;
    let mut retries = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.class() == ErrorClass::Transient && retries < MAX_TRANSIENT_RETRIES => {
                retries += 1;
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlateError {
    #[error("operation is not valid in the plate's current phase")]
    InvalidTransition,
}

pub enum PlateMessage {
    AssignWorkflow { workflow: Workflow, reply: oneshot::Sender<Result<(), PlateError>> },
    Pause { reason: String, reply: oneshot::Sender<Result<(), PlateError>> },
    Resume { reply: oneshot::Sender<Result<(), PlateError>> },
    Abort { reason: String, reply: oneshot::Sender<Result<(), PlateError>> },
    RetryStep { reply: oneshot::Sender<Result<(), PlateError>> },
    SkipStep { reply: oneshot::Sender<Result<(), PlateError>> },
    GetState { reply: oneshot::Sender<PlateStateSnapshot> },
}

/// Which mover request/transit this is: the outbound leg to the device,
/// or the leg back to pick the plate up after processing. The public
/// phase enum has a single `in_transit` value reused for both (spec's
/// pseudocode shows an explicit transit ask for the outbound leg and
/// folds the pickup leg's transit into the same phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitLeg {
    DropOff,
    Pickup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceStage {
    RequestStation,
    AwaitingStationGrant,
    RequestDevice,
}

struct StepView {
    station_id: StationId,
    device_id: labtrans_core::DeviceId,
    duration: Option<Duration>,
    parameters: std::collections::HashMap<String, String>,
}

pub struct PlateActor<C: Clock> {
    plate_id: PlateId,
    sample_ids: Vec<String>,
    barcode: Option<String>,
    workflow: Option<Workflow>,
    step_index: usize,
    phase: PlatePhase,
    paused_from: Option<PlatePhase>,
    location: PlateLocation,

    leg: TransitLeg,
    device_stage: DeviceStage,

    current_mover: Option<MoverHandle>,
    current_device: Option<DeviceHandle>,
    occupied_station: Option<StationId>,
    pending_station: Option<StationId>,
    station_grant_sub: Option<Subscription>,
    processing_sub: Option<Subscription>,

    history: VecDeque<PlateHistoryEntry>,
    last_error: Option<PlateErrorInfo>,
    start_epoch_ms: u64,
    step_start_epoch_ms: u64,
    seq: u64,

    mover_pool: ActorRef<MoverPoolMessage>,
    device_pool: ActorRef<DevicePoolMessage>,
    station_manager: ActorRef<StationMessage>,
    deck: Arc<DeckConfig>,
    bus: Arc<EventBus>,
    clock: C,
}

impl<C: Clock> PlateActor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plate_id: PlateId,
        sample_ids: Vec<String>,
        barcode: Option<String>,
        mover_pool: ActorRef<MoverPoolMessage>,
        device_pool: ActorRef<DevicePoolMessage>,
        station_manager: ActorRef<StationMessage>,
        deck: Arc<DeckConfig>,
        bus: Arc<EventBus>,
        clock: C,
    ) -> Self {
        Self {
            plate_id,
            sample_ids,
            barcode,
            workflow: None,
            step_index: 0,
            phase: PlatePhase::Created,
            paused_from: None,
            location: PlateLocation::Unassigned,
            leg: TransitLeg::DropOff,
            device_stage: DeviceStage::RequestStation,
            current_mover: None,
            current_device: None,
            occupied_station: None,
            pending_station: None,
            station_grant_sub: None,
            processing_sub: None,
            history: VecDeque::new(),
            last_error: None,
            start_epoch_ms: 0,
            step_start_epoch_ms: 0,
            seq: 0,
            mover_pool,
            device_pool,
            station_manager,
            deck,
            bus,
            clock,
        }
    }

    fn step_view(&self) -> Option<StepView> {
        let wf = self.workflow.as_ref()?;
        let step = wf.step(self.step_index)?;
        Some(StepView {
            station_id: step.station_id,
            device_id: step.device_id,
            duration: step.duration,
            parameters: step.parameters.clone(),
        })
    }

    fn set_phase(&mut self, phase: PlatePhase) {
        self.phase = phase;
        self.seq += 1;
        self.history.push_back(PlateHistoryEntry { seq: self.seq, phase, epoch_ms: self.clock.epoch_ms() });
        while self.history.len() > PLATE_HISTORY_CAP {
            self.history.pop_front();
        }
        self.bus.publish(Event::PlatePhaseChanged { plate_id: self.plate_id, phase, step_index: self.step_index });
    }

    /// Enter `error`, first giving back any device/station grant held for
    /// the current step. `RetryStep` always restarts a step at
    /// `RequestStation`, so anything left held here would have the plate
    /// queue behind its own stale grant on the next attempt. The mover is
    /// left alone: `on_requesting_mover` already knows to reuse one it's
    /// still holding, and movers have no pool-level "busy" to desync.
    async fn enter_error(&mut self, class: ErrorClass, message: impl Into<String>) {
        let plate_id = self.plate_id;
        if let Some(device) = self.current_device.take() {
            let _ = device.actor_ref.ask(LOAD_UNLOAD_DEADLINE, |reply| DeviceMessage::ResetFaulted { plate_id, reply }).await;
            let _ = self.device_pool.tell(DevicePoolMessage::ReleaseDevice { device_id: device.device_id }).await;
        }
        if let Some(station_id) = self.occupied_station.take() {
            let _ = self.station_manager.tell(StationMessage::ReleaseAccess { plate_id, station_id }).await;
        } else if let Some(station_id) = self.pending_station.take() {
            let _ = self.station_manager.tell(StationMessage::CancelRequest { plate_id, station_id }).await;
        }
        self.station_grant_sub = None;
        self.processing_sub = None;

        let info = PlateErrorInfo { step_index: self.step_index, class, message: message.into() };
        self.last_error = Some(info.clone());
        self.set_phase(PlatePhase::Error);
        self.bus.publish(Event::PlateError { plate_id, info });
    }

    fn assign_workflow(&mut self, workflow: Workflow) -> Result<(), PlateError> {
        match &self.workflow {
            None if self.phase == PlatePhase::Created => {
                let step_count = workflow.len();
                self.workflow = Some(workflow);
                self.start_epoch_ms = self.clock.epoch_ms();
                self.bus.publish(Event::PlateWorkflowAssigned { plate_id: self.plate_id, step_count });
                self.set_phase(PlatePhase::Ready);
                Ok(())
            }
            Some(existing) if existing.workflow_id == workflow.workflow_id => Ok(()),
            _ => Err(PlateError::InvalidTransition),
        }
    }

    fn pause(&mut self, reason: String) -> Result<(), PlateError> {
        if self.phase.is_terminal() || self.phase == PlatePhase::Paused || self.phase == PlatePhase::Created {
            return Err(PlateError::InvalidTransition);
        }
        self.paused_from = Some(self.phase);
        self.set_phase(PlatePhase::Paused);
        self.bus.publish(Event::PlatePaused { plate_id: self.plate_id, reason });
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PlateError> {
        match self.paused_from.take() {
            Some(prev) => {
                self.set_phase(prev);
                self.bus.publish(Event::PlateResumed { plate_id: self.plate_id });
                Ok(())
            }
            None => Err(PlateError::InvalidTransition),
        }
    }

    fn retry_step(&mut self) -> Result<(), PlateError> {
        if self.phase != PlatePhase::Error {
            return Err(PlateError::InvalidTransition);
        }
        self.leg = TransitLeg::DropOff;
        self.device_stage = DeviceStage::RequestStation;
        self.set_phase(PlatePhase::Ready);
        Ok(())
    }

    fn skip_step(&mut self) -> Result<(), PlateError> {
        if self.phase != PlatePhase::Error {
            return Err(PlateError::InvalidTransition);
        }
        self.step_index += 1;
        self.leg = TransitLeg::DropOff;
        self.device_stage = DeviceStage::RequestStation;
        self.set_phase(PlatePhase::Ready);
        Ok(())
    }

    /// Release held resources in reverse order of acquisition and
    /// transition to `aborted` (spec §5 "Cancellation and timeout").
    async fn abort(&mut self, reason: String) -> Result<(), PlateError> {
        if self.phase.is_terminal() {
            return Err(PlateError::InvalidTransition);
        }
        let plate_id = self.plate_id;

        if let Some(device) = self.current_device.take() {
            let _ = self.device_pool.tell(DevicePoolMessage::ReleaseDevice { device_id: device.device_id }).await;
        }
        if let Some(station_id) = self.occupied_station.take() {
            let _ = self.station_manager.tell(StationMessage::ReleaseAccess { plate_id, station_id }).await;
        } else if let Some(station_id) = self.pending_station.take() {
            let _ = self.station_manager.tell(StationMessage::CancelRequest { plate_id, station_id }).await;
        }
        if let Some(mover) = self.current_mover.take() {
            let _ = self.mover_pool.tell(MoverPoolMessage::ReleaseMover { mover_id: mover.mover_id }).await;
            let _ = mover.actor_ref.tell(MoverMessage::ReleaseFromPlate { plate_id }).await;
        }
        self.station_grant_sub = None;
        self.processing_sub = None;
        self.location = PlateLocation::Unassigned;

        self.set_phase(PlatePhase::Aborted);
        self.bus.publish(Event::PlateAborted { plate_id, reason });
        Ok(())
    }

    fn snapshot(&self) -> PlateStateSnapshot {
        PlateStateSnapshot {
            plate_id: self.plate_id,
            sample_ids: self.sample_ids.clone(),
            barcode: self.barcode.clone(),
            workflow: self.workflow.clone().unwrap_or(Workflow { workflow_id: labtrans_core::WorkflowId::from_raw(""), steps: vec![] }),
            step_index: self.step_index,
            phase: self.phase,
            location: self.location.clone(),
            assigned_mover: self.current_mover.as_ref().map(|m| m.mover_id),
            start_epoch_ms: self.start_epoch_ms,
            step_start_epoch_ms: self.step_start_epoch_ms,
            last_error: self.last_error.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }

    // --- tick-driven step machine -----------------------------------

    async fn on_ready(&mut self) {
        let len = self.workflow.as_ref().map(|w| w.len()).unwrap_or(0);
        if self.step_index >= len {
            if let Some(mover) = self.current_mover.take() {
                let _ = self.mover_pool.tell(MoverPoolMessage::ReleaseMover { mover_id: mover.mover_id }).await;
                let _ =
                    mover.actor_ref.tell(MoverMessage::ReleaseFromPlate { plate_id: self.plate_id }).await;
            }
            self.location = PlateLocation::Unassigned;
            self.set_phase(PlatePhase::Completed);
            self.bus.publish(Event::PlateWorkflowCompleted { plate_id: self.plate_id });
            return;
        }
        self.step_start_epoch_ms = self.clock.epoch_ms();
        self.leg = TransitLeg::DropOff;
        self.device_stage = DeviceStage::RequestStation;
        let station_id = match self.step_view() {
            Some(s) => s.station_id,
            None => return,
        };
        self.set_phase(PlatePhase::RequestingMover);
        self.bus.publish(Event::PlateMoverRequested { plate_id: self.plate_id, station_id });
    }

    async fn on_requesting_mover(&mut self) {
        if self.current_mover.is_some() {
            // Carried over from this step's pickup leg: no pool round-trip.
            self.set_phase(PlatePhase::InTransit);
            return;
        }
        let station_id = match self.step_view() {
            Some(s) => s.station_id,
            None => return,
        };
        let hint = match self.deck.station(station_id) {
            Some(s) => s.primary_location,
            None => return self.enter_error(ErrorClass::Fatal, "unknown station in workflow step").await,
        };
        let plate_id = self.plate_id;
        let mover_pool = self.mover_pool.clone();
        let result = retry_transient(|| {
            let mover_pool = mover_pool.clone();
            async move { mover_pool.ask(RESOURCE_POLL_DEADLINE, |reply| MoverPoolMessage::RequestMover { plate_id, destination_hint: hint, reply }).await }
        })
        .await;
        match result {
            Ok(MoverPollResult::Granted(mover_id)) => {
                let handle = self
                    .mover_pool
                    .ask(RESOURCE_POLL_DEADLINE, |reply| MoverPoolMessage::GetHandle { mover_id, reply })
                    .await
                    .ok()
                    .flatten();
                match handle {
                    Some(handle) => {
                        self.current_mover = Some(handle);
                        self.location = PlateLocation::OnMover(mover_id);
                        self.bus.publish(Event::PlateMoverAssigned { plate_id, mover_id });
                        self.set_phase(PlatePhase::InTransit);
                    }
                    None => self.enter_error(ErrorClass::Fatal, "mover pool granted an unknown mover id").await,
                }
            }
            Ok(MoverPollResult::Pending) => {}
            Err(err) => self.enter_error(err.class(), format!("mover pool unreachable: {err}")).await,
        }
    }

    async fn on_in_transit(&mut self) {
        let mover = match self.current_mover.clone() {
            Some(m) => m,
            None => return self.enter_error(ErrorClass::Fatal, "in transit without a mover").await,
        };
        let station_id = match self.step_view() {
            Some(s) => s.station_id,
            None => return,
        };
        let destination = match self.deck.station(station_id).and_then(|s| self.deck.location(s.primary_location)) {
            Some(loc) => loc.clone(),
            None => return self.enter_error(ErrorClass::Fatal, "station has no configured primary location").await,
        };
        let plate_id = self.plate_id;
        self.bus.publish(Event::PlateTransportStarted { plate_id, mover_id: mover.mover_id, destination: destination.location_id });
        let result = retry_transient(|| {
            let mover = mover.clone();
            let destination = destination.clone();
            async move { mover.actor_ref.ask(TRANSPORT_DEADLINE, |reply| MoverMessage::TransportTo { destination, plate_id, reply }).await }
        })
        .await;
        match result {
            Ok(Ok(())) => {
                self.bus.publish(Event::PlateArrived { plate_id, location: destination.location_id });
                match self.leg {
                    TransitLeg::DropOff => {
                        self.device_stage = DeviceStage::RequestStation;
                        self.set_phase(PlatePhase::RequestingDevice);
                    }
                    TransitLeg::Pickup => self.set_phase(PlatePhase::Unloading),
                }
            }
            Ok(Err(err)) => self.enter_error(ErrorClass::Resource, format!("transport failed: {err}")).await,
            Err(err) => self.enter_error(err.class(), format!("transport ask failed: {err}")).await,
        }
    }

    async fn on_requesting_device(&mut self) {
        let step = match self.step_view() {
            Some(s) => s,
            None => return,
        };
        let plate_id = self.plate_id;

        if self.device_stage == DeviceStage::RequestStation {
            let station_manager = self.station_manager.clone();
            let station_id = step.station_id;
            let result = retry_transient(|| {
                let station_manager = station_manager.clone();
                async move { station_manager.ask(RESOURCE_POLL_DEADLINE, |reply| StationMessage::RequestAccess { plate_id, station_id, reply }).await }
            })
            .await;
            match result {
                Ok(StationGrant::Granted) => {
                    self.occupied_station = Some(step.station_id);
                    self.device_stage = DeviceStage::RequestDevice;
                }
                Ok(StationGrant::Queued { queue_location, .. }) => {
                    self.pending_station = Some(step.station_id);
                    if let Some(mover) = self.current_mover.clone() {
                        if let Some(loc) = self.deck.location(queue_location).cloned() {
                            let _ = mover
                                .actor_ref
                                .ask(TRANSPORT_DEADLINE, |reply| MoverMessage::TransportTo {
                                    destination: loc,
                                    plate_id,
                                    reply,
                                })
                                .await;
                        }
                    }
                    self.station_grant_sub = Some(self.bus.subscribe("station.access_granted"));
                    self.device_stage = DeviceStage::AwaitingStationGrant;
                    return;
                }
                Err(err) => return self.enter_error(err.class(), format!("station manager unreachable: {err}")).await,
            }
        } else if self.device_stage == DeviceStage::AwaitingStationGrant {
            let mut granted = false;
            if let Some(sub) = self.station_grant_sub.as_mut() {
                while let Ok(event) = sub.rx.try_recv() {
                    if let Event::StationAccessGranted { station_id, plate_id: pid } = event {
                        if pid == plate_id && Some(station_id) == self.pending_station {
                            granted = true;
                            break;
                        }
                    }
                }
            }
            if !granted {
                return;
            }
            self.station_grant_sub = None;
            self.occupied_station = self.pending_station.take();
            self.device_stage = DeviceStage::RequestDevice;
        }

        if self.device_stage == DeviceStage::RequestDevice {
            let device_pool = self.device_pool.clone();
            let device_id = step.device_id;
            let result = retry_transient(|| {
                let device_pool = device_pool.clone();
                async move { device_pool.ask(RESOURCE_POLL_DEADLINE, |reply| DevicePoolMessage::RequestDevice { device_id, plate_id, reply }).await }
            })
            .await;
            match result {
                Ok(DevicePollResult::Granted) => {
                    let handle = self
                        .device_pool
                        .ask(RESOURCE_POLL_DEADLINE, |reply| DevicePoolMessage::GetHandle { device_id: step.device_id, reply })
                        .await
                        .ok()
                        .flatten();
                    match handle {
                        Some(handle) => {
                            self.current_device = Some(handle);
                            self.bus.publish(Event::PlateDeviceRequested { plate_id, device_id: step.device_id });
                            self.set_phase(PlatePhase::Loading);
                        }
                        None => self.enter_error(ErrorClass::Fatal, "device pool granted an unknown device id").await,
                    }
                }
                Ok(DevicePollResult::Pending) => {}
                Err(err) => self.enter_error(err.class(), format!("device pool unreachable: {err}")).await,
            }
        }
    }

    async fn on_loading(&mut self) {
        let mover = match self.current_mover.clone() {
            Some(m) => m,
            None => return self.enter_error(ErrorClass::Fatal, "loading without a mover").await,
        };
        let device = match self.current_device.clone() {
            Some(d) => d,
            None => return self.enter_error(ErrorClass::Fatal, "loading without a device").await,
        };
        let step = match self.step_view() {
            Some(s) => s,
            None => return,
        };
        let plate_id = self.plate_id;
        self.bus.publish(Event::PlateLoading { plate_id, device_id: device.device_id });

        let load_result = retry_transient(|| {
            let device_ref = device.actor_ref.clone();
            let mover = mover.clone();
            async move { device_ref.ask(LOAD_UNLOAD_DEADLINE, |reply| DeviceMessage::LoadPlate { plate_id, mover, reply }).await }
        })
        .await;
        match load_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return self.enter_error(ErrorClass::Resource, format!("device load failed: {err}")).await,
            Err(err) => return self.enter_error(err.class(), format!("device load ask failed: {err}")).await,
        }

        let _ = self.mover_pool.tell(MoverPoolMessage::ReleaseMover { mover_id: mover.mover_id }).await;
        let _ = mover.actor_ref.tell(MoverMessage::ReleaseFromPlate { plate_id }).await;
        self.current_mover = None;
        self.location = PlateLocation::InDevice { device_id: device.device_id, station_id: step.station_id };
        self.bus.publish(Event::PlateMoverReleased { plate_id, mover_id: mover.mover_id });

        let start_result = retry_transient(|| {
            let device_ref = device.actor_ref.clone();
            let parameters = step.parameters.clone();
            let duration = step.duration;
            async move { device_ref.ask(PROCESS_START_DEADLINE, |reply| DeviceMessage::StartProcess { plate_id, parameters, duration, reply }).await }
        })
        .await;
        match start_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return self.enter_error(ErrorClass::Resource, format!("device refused to start processing: {err}")).await,
            Err(err) => return self.enter_error(err.class(), format!("device start-process ask failed: {err}")).await,
        }
        self.bus.publish(Event::PlateProcessingStarted { plate_id, device_id: device.device_id });
        // "device.*" catches both the completion and error events the
        // device actor may publish for this run.
        self.processing_sub = Some(self.bus.subscribe("device.*"));
        self.set_phase(PlatePhase::Processing);
    }

    async fn on_processing(&mut self) {
        let device_id = self.current_device.as_ref().map(|d| d.device_id);
        let plate_id = self.plate_id;
        let mut completed = false;
        let mut failure: Option<String> = None;
        if let Some(sub) = self.processing_sub.as_mut() {
            while let Ok(event) = sub.rx.try_recv() {
                match event {
                    Event::DeviceProcessingCompleted { device_id: did, plate_id: pid } if pid == plate_id && Some(did) == device_id => {
                        completed = true;
                        break;
                    }
                    Event::DeviceError { device_id: did, plate_id: pid, reason } if pid == Some(plate_id) && Some(did) == device_id => {
                        failure = Some(reason);
                        break;
                    }
                    _ => {}
                }
            }
        }
        if let Some(reason) = failure {
            self.processing_sub = None;
            // Spec §4.8 Failure clause: a device.error during processing
            // fails the outstanding operation with a typed (Resource)
            // error, the same class a device/station refusal gets
            // elsewhere — "retried automatically" (spec §7) applies only
            // to ask-level transient failures, not domain-level faults.
            return self.enter_error(ErrorClass::Resource, format!("device reported an error while processing: {reason}")).await;
        }
        if !completed {
            return;
        }
        self.processing_sub = None;
        if let Some(did) = device_id {
            self.bus.publish(Event::PlateProcessingCompleted { plate_id, device_id: did });
        }
        self.leg = TransitLeg::Pickup;
        self.set_phase(PlatePhase::RequestingMover);
    }

    async fn on_unloading(&mut self) {
        let mover = match self.current_mover.clone() {
            Some(m) => m,
            None => return self.enter_error(ErrorClass::Fatal, "unloading without a mover").await,
        };
        let device = match self.current_device.take() {
            Some(d) => d,
            None => return self.enter_error(ErrorClass::Fatal, "unloading without a device").await,
        };
        let plate_id = self.plate_id;
        self.bus.publish(Event::PlateUnloading { plate_id, device_id: device.device_id });

        let result = retry_transient(|| {
            let device_ref = device.actor_ref.clone();
            let mover = mover.clone();
            async move { device_ref.ask(LOAD_UNLOAD_DEADLINE, |reply| DeviceMessage::UnloadPlate { plate_id, mover, reply }).await }
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.current_device = Some(device);
                return self.enter_error(ErrorClass::Resource, format!("device unload failed: {err}")).await;
            }
            Err(err) => {
                self.current_device = Some(device);
                return self.enter_error(err.class(), format!("device unload ask failed: {err}")).await;
            }
        }

        let _ = self.device_pool.tell(DevicePoolMessage::ReleaseDevice { device_id: device.device_id }).await;
        if let Some(station_id) = self.occupied_station.take() {
            let _ = self.station_manager.tell(StationMessage::ReleaseAccess { plate_id, station_id }).await;
        }
        self.location = PlateLocation::OnMover(mover.mover_id);
        self.bus.publish(Event::PlateStepCompleted { plate_id, step_index: self.step_index });
        self.step_index += 1;
        self.set_phase(PlatePhase::Ready);
    }
}

#[async_trait]
impl<C: Clock> Actor for PlateActor<C> {
    type Message = PlateMessage;

    async fn handle(&mut self, msg: PlateMessage) {
        match msg {
            PlateMessage::AssignWorkflow { workflow, reply } => {
                let _ = reply.send(self.assign_workflow(workflow));
            }
            PlateMessage::Pause { reason, reply } => {
                let _ = reply.send(self.pause(reason));
            }
            PlateMessage::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            PlateMessage::Abort { reason, reply } => {
                let result = self.abort(reason).await;
                let _ = reply.send(result);
            }
            PlateMessage::RetryStep { reply } => {
                let _ = reply.send(self.retry_step());
            }
            PlateMessage::SkipStep { reply } => {
                let _ = reply.send(self.skip_step());
            }
            PlateMessage::GetState { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn tick(&mut self) {
        match self.phase {
            PlatePhase::Ready => self.on_ready().await,
            PlatePhase::RequestingMover => self.on_requesting_mover().await,
            PlatePhase::InTransit => self.on_in_transit().await,
            PlatePhase::RequestingDevice => self.on_requesting_device().await,
            PlatePhase::Loading => self.on_loading().await,
            PlatePhase::Processing => self.on_processing().await,
            PlatePhase::Unloading => self.on_unloading().await,
            PlatePhase::Created
            | PlatePhase::AwaitingMover
            | PlatePhase::Paused
            | PlatePhase::Error
            | PlatePhase::Aborted
            | PlatePhase::Completed => {}
        }
    }

    fn tick_period(&self) -> Duration {
        Duration::from_millis(20)
    }
}
