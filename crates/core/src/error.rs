// SPDX-License-Identifier: MIT

//! Shared error taxonomy (spec §7): every failure is transient, resource,
//! or fatal, and that classification drives how the plate actor reacts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Mailbox full, ask timeout, brief driver hiccup: retried automatically.
    Transient,
    /// `NoRoute`, station rejection, device refusal: surfaced to the plate.
    Resource,
    /// Invariant violation, unknown message: surfaced to the coordinator.
    Fatal,
}

/// A record of the last error a plate hit, attached to its snapshot so an
/// operator can see what happened before choosing a recovery action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateErrorInfo {
    pub step_index: usize,
    pub class: ErrorClass,
    pub message: String,
}
