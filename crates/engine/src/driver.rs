// SPDX-License-Identifier: MIT

//! The physical-driver boundary (spec §6): the contract the core consumes
//! from whatever moves real hardware, plus a deterministic test double.
//!
//! Grounded on the teacher's adapter-trait boundaries (`AgentAdapter`,
//! `NotifyAdapter`): an `async_trait` with a real implementation left to
//! the host and a simulation double used here and in tests.

use async_trait::async_trait;
use labtrans_core::{DeviceId, MoverId, MoverPhysicalState, MoverRunState, Position};
use labtrans_planner::PrimitiveCommand;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub type DeviceCompletionCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("unknown mover {0:?}")]
    UnknownMover(MoverId),
    #[error("driver reported a transient fault executing {command}")]
    Transient { command: String },
    #[error("driver reported a fatal fault executing {command}")]
    Fatal { command: String },
}

/// What the core needs from whatever is actually moving hardware.
#[async_trait]
pub trait PhysicalDriver: Send + Sync + 'static {
    async fn execute_command(&self, mover_id: MoverId, command: PrimitiveCommand) -> Result<(), DriverError>;
    async fn get_physical_state(&self, mover_id: MoverId) -> Result<MoverPhysicalState, DriverError>;
    fn register_device_completion_listener(&self, device_id: DeviceId, on_complete: DeviceCompletionCallback);

    /// Consumed by the device actor right as a process operation would
    /// otherwise complete; `Some(error)` fails that operation instead of
    /// completing it. Real drivers have no scripted faults to report.
    fn take_device_fault(&self, _device_id: DeviceId) -> Option<DriverError> {
        None
    }
}

/// A scripted fault: the Nth time `command_name` executes against
/// `mover_id`, fail with `error` instead of succeeding.
#[derive(Clone)]
struct ScriptedFault {
    mover_id: MoverId,
    command_name: &'static str,
    remaining: u32,
    error: DriverError,
}

/// A scripted device fault: the next process operation on `device_id`
/// fails with `error` instead of completing.
#[derive(Clone)]
struct ScriptedDeviceFault {
    device_id: DeviceId,
    error: DriverError,
}

struct SimState {
    movers: HashMap<MoverId, MoverPhysicalState>,
    faults: Vec<ScriptedFault>,
    device_faults: Vec<ScriptedDeviceFault>,
    listeners: HashMap<DeviceId, DeviceCompletionCallback>,
}

/// In-process simulated driver: movers teleport instantly to wherever
/// `execute_command` points them (no physics), which is all the
/// scheduling core's tests need. Supports scripted one-shot faults for
/// the error/retry end-to-end scenario and manual device-completion
/// injection for event-driven devices.
pub struct SimDriver {
    state: Mutex<SimState>,
}

impl SimDriver {
    pub fn new(initial_positions: HashMap<MoverId, Position>) -> Arc<Self> {
        let movers = initial_positions.into_iter().map(|(id, pos)| (id, MoverPhysicalState::idle_at(pos))).collect();
        Arc::new(Self { state: Mutex::new(SimState { movers, faults: Vec::new(), device_faults: Vec::new(), listeners: HashMap::new() }) })
    }

    /// Arrange for the next `command_name` executed against `mover_id` to
    /// fail with `error` instead of succeeding.
    pub fn fail_once(&self, mover_id: MoverId, command_name: &'static str, error: DriverError) {
        self.state.lock().faults.push(ScriptedFault { mover_id, command_name, remaining: 1, error });
    }

    /// Arrange for `device_id`'s next process operation to fail with
    /// `error` instead of completing.
    pub fn fail_device_once(&self, device_id: DeviceId, error: DriverError) {
        self.state.lock().device_faults.push(ScriptedDeviceFault { device_id, error });
    }

    /// Fire a registered device's completion callback, as a real fieldbus
    /// would once the physical operation finishes.
    pub fn complete_device(&self, device_id: DeviceId) {
        let state = self.state.lock();
        if let Some(cb) = state.listeners.get(&device_id) {
            cb();
        }
    }

    fn command_name(command: &PrimitiveCommand) -> &'static str {
        match command {
            PrimitiveCommand::HopOn { .. } => "hop_on",
            PrimitiveCommand::Follow { .. } => "follow",
            PrimitiveCommand::Transition { .. } => "transition",
            PrimitiveCommand::HopOff { .. } => "hop_off",
            PrimitiveCommand::FreeMove { .. } => "free_move",
            PrimitiveCommand::Rotate { .. } => "rotate",
        }
    }

    fn take_fault(&self, mover_id: MoverId, name: &str) -> Option<DriverError> {
        let mut state = self.state.lock();
        if let Some(idx) = state.faults.iter().position(|f| f.mover_id == mover_id && f.command_name == name) {
            state.faults[idx].remaining -= 1;
            let error = state.faults[idx].error.clone();
            if state.faults[idx].remaining == 0 {
                state.faults.remove(idx);
            }
            return Some(error);
        }
        None
    }

    fn apply(position: &mut MoverPhysicalState, command: &PrimitiveCommand) {
        match *command {
            PrimitiveCommand::HopOn { track_id, distance } => {
                position.track_id = Some(track_id);
                position.track_distance = distance;
                position.state = MoverRunState::Transporting;
            }
            PrimitiveCommand::Follow { track_id, target_distance } => {
                position.track_id = Some(track_id);
                position.track_distance = target_distance;
                position.state = MoverRunState::Transporting;
            }
            PrimitiveCommand::Transition { to_track, .. } => {
                position.track_id = Some(to_track);
            }
            PrimitiveCommand::HopOff { x, y } => {
                position.position.x = x;
                position.position.y = y;
                position.track_id = None;
                position.state = MoverRunState::Idle;
            }
            PrimitiveCommand::FreeMove { x, y, c } => {
                position.position.x = x;
                position.position.y = y;
                position.position.c = c;
            }
            PrimitiveCommand::Rotate { c } => {
                position.position.c = c;
                position.state = MoverRunState::Idle;
            }
        }
    }
}

#[async_trait]
impl PhysicalDriver for SimDriver {
    async fn execute_command(&self, mover_id: MoverId, command: PrimitiveCommand) -> Result<(), DriverError> {
        let name = Self::command_name(&command);
        if let Some(error) = self.take_fault(mover_id, name) {
            return Err(error);
        }
        let mut state = self.state.lock();
        let position = state.movers.get_mut(&mover_id).ok_or(DriverError::UnknownMover(mover_id))?;
        Self::apply(position, &command);
        Ok(())
    }

    async fn get_physical_state(&self, mover_id: MoverId) -> Result<MoverPhysicalState, DriverError> {
        self.state.lock().movers.get(&mover_id).cloned().ok_or(DriverError::UnknownMover(mover_id))
    }

    fn register_device_completion_listener(&self, device_id: DeviceId, on_complete: DeviceCompletionCallback) {
        self.state.lock().listeners.insert(device_id, on_complete);
    }

    fn take_device_fault(&self, device_id: DeviceId) -> Option<DriverError> {
        let mut state = self.state.lock();
        let idx = state.device_faults.iter().position(|f| f.device_id == device_id)?;
        Some(state.device_faults.remove(idx).error)
    }
}
