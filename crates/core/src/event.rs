// SPDX-License-Identifier: MIT

//! The event taxonomy published to the event bus (spec §6).
//!
//! Every phase change, resource grant, and transport/device transition
//! emits one of these. Dotted `name()` strings are what subscribers match
//! against (`plate.*`, `mover.transport_*`, `**`).

use crate::error::PlateErrorInfo;
use crate::id::{DeviceId, LocationId, MoverId, PlateId, StationId};
use crate::plate::PlatePhase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "plate.created")]
    PlateCreated { plate_id: PlateId },
    #[serde(rename = "plate.workflow_assigned")]
    PlateWorkflowAssigned { plate_id: PlateId, step_count: usize },
    #[serde(rename = "plate.phase_changed")]
    PlatePhaseChanged { plate_id: PlateId, phase: PlatePhase, step_index: usize },
    #[serde(rename = "plate.mover_requested")]
    PlateMoverRequested { plate_id: PlateId, station_id: StationId },
    #[serde(rename = "plate.mover_assigned")]
    PlateMoverAssigned { plate_id: PlateId, mover_id: MoverId },
    #[serde(rename = "plate.transport_started")]
    PlateTransportStarted { plate_id: PlateId, mover_id: MoverId, destination: LocationId },
    #[serde(rename = "plate.arrived")]
    PlateArrived { plate_id: PlateId, location: LocationId },
    #[serde(rename = "plate.device_requested")]
    PlateDeviceRequested { plate_id: PlateId, device_id: DeviceId },
    #[serde(rename = "plate.loading")]
    PlateLoading { plate_id: PlateId, device_id: DeviceId },
    #[serde(rename = "plate.mover_released")]
    PlateMoverReleased { plate_id: PlateId, mover_id: MoverId },
    #[serde(rename = "plate.processing_started")]
    PlateProcessingStarted { plate_id: PlateId, device_id: DeviceId },
    #[serde(rename = "plate.processing_completed")]
    PlateProcessingCompleted { plate_id: PlateId, device_id: DeviceId },
    #[serde(rename = "plate.unloading")]
    PlateUnloading { plate_id: PlateId, device_id: DeviceId },
    #[serde(rename = "plate.step_completed")]
    PlateStepCompleted { plate_id: PlateId, step_index: usize },
    #[serde(rename = "plate.paused")]
    PlatePaused { plate_id: PlateId, reason: String },
    #[serde(rename = "plate.resumed")]
    PlateResumed { plate_id: PlateId },
    #[serde(rename = "plate.error")]
    PlateError { plate_id: PlateId, info: PlateErrorInfo },
    #[serde(rename = "plate.aborted")]
    PlateAborted { plate_id: PlateId, reason: String },
    #[serde(rename = "plate.workflow_completed")]
    PlateWorkflowCompleted { plate_id: PlateId },

    #[serde(rename = "mover.assigned")]
    MoverAssigned { mover_id: MoverId, plate_id: PlateId },
    #[serde(rename = "mover.released")]
    MoverReleased { mover_id: MoverId },
    #[serde(rename = "mover.transport_started")]
    MoverTransportStarted { mover_id: MoverId, plate_id: PlateId },
    #[serde(rename = "mover.position_changed")]
    MoverPositionChanged { mover_id: MoverId, x: f64, y: f64, c: f64 },
    #[serde(rename = "mover.transport_progress")]
    MoverTransportProgress { mover_id: MoverId, command_index: usize },
    #[serde(rename = "mover.transport_completed")]
    MoverTransportCompleted { mover_id: MoverId },
    #[serde(rename = "mover.transport_failed")]
    MoverTransportFailed { mover_id: MoverId, reason: String },

    #[serde(rename = "device.load_started")]
    DeviceLoadStarted { device_id: DeviceId, plate_id: PlateId },
    #[serde(rename = "device.processing_started")]
    DeviceProcessingStarted { device_id: DeviceId, plate_id: PlateId },
    #[serde(rename = "device.processing_progress")]
    DeviceProcessingProgress { device_id: DeviceId, plate_id: PlateId, fraction: f64 },
    #[serde(rename = "device.processing_completed")]
    DeviceProcessingCompleted { device_id: DeviceId, plate_id: PlateId },
    #[serde(rename = "device.error")]
    DeviceError { device_id: DeviceId, plate_id: Option<PlateId>, reason: String },

    #[serde(rename = "station.access_requested")]
    StationAccessRequested { station_id: StationId, plate_id: PlateId },
    #[serde(rename = "station.access_granted")]
    StationAccessGranted { station_id: StationId, plate_id: PlateId },
    #[serde(rename = "station.access_released")]
    StationAccessReleased { station_id: StationId, plate_id: PlateId },

    #[serde(rename = "actor.error")]
    ActorError { actor: String, message: String },
}

impl Event {
    /// The dotted name subscribers match patterns against.
    pub fn name(&self) -> &'static str {
        match self {
            Event::PlateCreated { .. } => "plate.created",
            Event::PlateWorkflowAssigned { .. } => "plate.workflow_assigned",
            Event::PlatePhaseChanged { .. } => "plate.phase_changed",
            Event::PlateMoverRequested { .. } => "plate.mover_requested",
            Event::PlateMoverAssigned { .. } => "plate.mover_assigned",
            Event::PlateTransportStarted { .. } => "plate.transport_started",
            Event::PlateArrived { .. } => "plate.arrived",
            Event::PlateDeviceRequested { .. } => "plate.device_requested",
            Event::PlateLoading { .. } => "plate.loading",
            Event::PlateMoverReleased { .. } => "plate.mover_released",
            Event::PlateProcessingStarted { .. } => "plate.processing_started",
            Event::PlateProcessingCompleted { .. } => "plate.processing_completed",
            Event::PlateUnloading { .. } => "plate.unloading",
            Event::PlateStepCompleted { .. } => "plate.step_completed",
            Event::PlatePaused { .. } => "plate.paused",
            Event::PlateResumed { .. } => "plate.resumed",
            Event::PlateError { .. } => "plate.error",
            Event::PlateAborted { .. } => "plate.aborted",
            Event::PlateWorkflowCompleted { .. } => "plate.workflow_completed",
            Event::MoverAssigned { .. } => "mover.assigned",
            Event::MoverReleased { .. } => "mover.released",
            Event::MoverTransportStarted { .. } => "mover.transport_started",
            Event::MoverPositionChanged { .. } => "mover.position_changed",
            Event::MoverTransportProgress { .. } => "mover.transport_progress",
            Event::MoverTransportCompleted { .. } => "mover.transport_completed",
            Event::MoverTransportFailed { .. } => "mover.transport_failed",
            Event::DeviceLoadStarted { .. } => "device.load_started",
            Event::DeviceProcessingStarted { .. } => "device.processing_started",
            Event::DeviceProcessingProgress { .. } => "device.processing_progress",
            Event::DeviceProcessingCompleted { .. } => "device.processing_completed",
            Event::DeviceError { .. } => "device.error",
            Event::StationAccessRequested { .. } => "station.access_requested",
            Event::StationAccessGranted { .. } => "station.access_granted",
            Event::StationAccessReleased { .. } => "station.access_released",
            Event::ActorError { .. } => "actor.error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_matches_serde_tag() {
        let ev = Event::PlateCreated { plate_id: PlateId::generate() };
        let json = serde_json::to_value(&ev).unwrap_or_default();
        assert_eq!(json["type"], ev.name());
    }
}
