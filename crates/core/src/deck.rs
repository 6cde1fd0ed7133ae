// SPDX-License-Identifier: MIT

//! Locations, stations, and the immutable boot-time deck configuration.

use crate::geometry::{Position, StatorTile, Track};
use crate::id::{DeviceId, LocationId, StationId, TrackId};
use serde::{Deserialize, Serialize};

/// What a named point on the deck is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Waypoint,
    Device,
    Pivot,
    Queue,
    TrackServiceLocation,
}

/// A named point movers can be routed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: LocationId,
    pub name: String,
    pub kind: LocationKind,
    pub position: Position,
    /// Parent track and signed distance along it, if this location sits
    /// on a track rather than free space.
    #[serde(default)]
    pub parent_track: Option<(TrackId, f64)>,
    /// Populated when `kind == Device`.
    #[serde(default)]
    pub station_id: Option<StationId>,
}

/// A logical dock associated with exactly one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: StationId,
    pub device_type: String,
    pub device_id: DeviceId,
    pub primary_location: LocationId,
    pub slots: u32,
    pub queue_location: LocationId,
}

/// The immutable set of tiles, tracks, locations, and stations provided
/// at boot. Nothing in the core ever mutates a `DeckConfig` after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeckConfig {
    pub tiles: Vec<StatorTile>,
    pub tracks: Vec<Track>,
    pub locations: Vec<Location>,
    pub stations: Vec<Station>,
}

impl DeckConfig {
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.track_id == id)
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.iter().find(|l| l.location_id == id)
    }

    pub fn station(&self, id: StationId) -> Option<&Station> {
        self.stations.iter().find(|s| s.station_id == id)
    }

    /// Whether `(x, y)` lies within the bounds of some enabled tile.
    pub fn is_navigable(&self, x: f64, y: f64) -> bool {
        self.tiles.iter().any(|t| t.enabled && t.bounds.contains(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bounds;

    #[test]
    fn navigable_requires_enabled_tile() {
        let deck = DeckConfig {
            tiles: vec![StatorTile {
                grid_col: 0,
                grid_row: 0,
                enabled: false,
                bounds: Bounds { x_min: 0.0, y_min: 0.0, x_max: 240.0, y_max: 240.0 },
            }],
            ..Default::default()
        };
        assert!(!deck.is_navigable(120.0, 120.0));
    }
}
