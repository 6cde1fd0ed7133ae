// SPDX-License-Identifier: MIT

//! On-disk scenario format: a deck plus the movers, devices, and plates
//! to boot the coordinator with. There is no daemon and no persisted
//! state (spec §6 "Persisted state: None mandated for the core at MVP")
//! so a scenario file is the whole input to one `labtrans run` process.

use labtrans_core::{DeckConfig, DeviceId, MoverId, PlateId, Position, Workflow};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },
}

#[derive(Debug, Deserialize)]
pub struct MoverSpec {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub c: f64,
}

#[derive(Debug, Deserialize)]
pub struct PlateSpec {
    pub id: String,
    #[serde(default)]
    pub sample_ids: Vec<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    pub workflow: Workflow,
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub deck: DeckConfig,
    #[serde(default)]
    pub movers: Vec<MoverSpec>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub plates: Vec<PlateSpec>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ScenarioError::Read { path: path.display().to_string(), source })?;
        serde_json::from_str(&raw).map_err(|source| ScenarioError::Parse { path: path.display().to_string(), source })
    }

    pub fn mover_positions(&self) -> Vec<(MoverId, Position)> {
        self.movers.iter().map(|m| (MoverId::from_raw(&m.id), Position::new(m.x, m.y, m.c))).collect()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|d| DeviceId::from_raw(d)).collect()
    }
}

impl PlateSpec {
    pub fn plate_id(&self) -> PlateId {
        PlateId::from_raw(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_scenario() {
        let json = r#"{
            "deck": {"tiles": [], "tracks": [], "locations": [], "stations": []},
            "movers": [{"id": "mov-1", "x": 0.0, "y": 0.0}],
            "devices": ["dev-1"],
            "plates": []
        }"#;
        let scenario: Scenario = serde_json::from_str(json).expect("valid scenario");
        assert_eq!(scenario.movers.len(), 1);
        assert_eq!(scenario.device_ids(), vec![DeviceId::from_raw("dev-1")]);
    }
}
