// SPDX-License-Identifier: MIT

//! Workflow steps: a plate's immutable itinerary.

use crate::id::{DeviceId, StationId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One stop in a plate's itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    pub name: String,
    pub station_id: StationId,
    pub device_id: DeviceId,
    pub device_type: String,
    /// `None` means the device signals completion asynchronously rather
    /// than after a fixed duration.
    #[serde(default, with = "duration_ms_opt")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// An ordered, immutable-once-assigned itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: WorkflowId,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms: Option<u64> = Option::deserialize(d)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_len_matches_steps() {
        let wf = Workflow { workflow_id: WorkflowId::generate(), steps: vec![] };
        assert_eq!(wf.len(), 0);
        assert!(wf.is_empty());
    }
}
