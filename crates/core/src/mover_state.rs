// SPDX-License-Identifier: MIT

//! Mover physical state, as reported by the physical driver.

use crate::geometry::Position;
use crate::id::TrackId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoverRunState {
    Idle,
    Assigned,
    Transporting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoverPhysicalState {
    pub position: Position,
    pub track_id: Option<TrackId>,
    pub track_distance: f64,
    pub velocity: f64,
    pub state: MoverRunState,
}

impl MoverPhysicalState {
    pub fn idle_at(position: Position) -> Self {
        Self { position, track_id: None, track_distance: 0.0, velocity: 0.0, state: MoverRunState::Idle }
    }
}

/// A point-in-time snapshot of a mover, for `list_movers()` (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoverStateSnapshot {
    pub mover_id: crate::id::MoverId,
    pub physical: MoverPhysicalState,
    pub assigned_plate: Option<crate::id::PlateId>,
}
