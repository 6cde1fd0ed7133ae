// SPDX-License-Identifier: MIT

//! Plate state: the passenger's own view of where it is and what it's doing.

use crate::error::PlateErrorInfo;
use crate::id::{DeviceId, MoverId, PlateId, SlotId};
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};

/// Maximum number of history entries retained on a plate actor (spec §4.9).
pub const PLATE_HISTORY_CAP: usize = 50;

/// Where a plate physically is right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlateLocation {
    Unassigned,
    OnMover(MoverId),
    InDevice { device_id: DeviceId, station_id: crate::id::StationId },
    InStorage(SlotId),
}

/// The plate execution state machine (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatePhase {
    Created,
    Ready,
    RequestingMover,
    AwaitingMover,
    InTransit,
    RequestingDevice,
    Loading,
    Processing,
    Unloading,
    Paused,
    Error,
    Aborted,
    Completed,
}

impl PlatePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// One entry in a plate's bounded phase-transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateHistoryEntry {
    pub seq: u64,
    pub phase: PlatePhase,
    pub epoch_ms: u64,
}

/// A point-in-time snapshot of a plate, as returned by the coordinator's
/// query API (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateStateSnapshot {
    pub plate_id: PlateId,
    pub sample_ids: Vec<String>,
    pub barcode: Option<String>,
    pub workflow: Workflow,
    pub step_index: usize,
    pub phase: PlatePhase,
    pub location: PlateLocation,
    pub assigned_mover: Option<MoverId>,
    pub start_epoch_ms: u64,
    pub step_start_epoch_ms: u64,
    pub last_error: Option<PlateErrorInfo>,
    pub history: Vec<PlateHistoryEntry>,
}
