// SPDX-License-Identifier: MIT

//! Device pool: FIFO dispatcher partitioned by `device_id`, capacity 1
//! each (spec §4.6). Same poll-style protocol as [`crate::pools::mover_pool`].

use labtrans_actor::{async_trait, Actor, ActorRef};
use labtrans_core::{DeviceId, PlateId};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

use crate::actors::device::DeviceMessage;

#[derive(Clone)]
pub struct DeviceHandle {
    pub device_id: DeviceId,
    pub actor_ref: ActorRef<DeviceMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DevicePollResult {
    Granted,
    Pending,
}

pub enum DevicePoolMessage {
    RequestDevice { device_id: DeviceId, plate_id: PlateId, reply: oneshot::Sender<DevicePollResult> },
    ReleaseDevice { device_id: DeviceId },
    GetHandle { device_id: DeviceId, reply: oneshot::Sender<Option<DeviceHandle>> },
}

#[derive(Default)]
struct DeviceState {
    busy: bool,
    waiters: VecDeque<PlateId>,
    fulfilled: std::collections::HashSet<PlateId>,
}

pub struct DevicePoolActor {
    devices: HashMap<DeviceId, DeviceHandle>,
    states: HashMap<DeviceId, DeviceState>,
}

impl DevicePoolActor {
    pub fn new(devices: Vec<DeviceHandle>) -> Self {
        let states = devices.iter().map(|d| (d.device_id, DeviceState::default())).collect();
        let devices = devices.into_iter().map(|d| (d.device_id, d)).collect();
        Self { devices, states }
    }

    fn request_device(&mut self, device_id: DeviceId, plate_id: PlateId) -> DevicePollResult {
        let state = self.states.entry(device_id).or_default();
        if state.fulfilled.remove(&plate_id) {
            return DevicePollResult::Granted;
        }
        if state.waiters.iter().any(|p| *p == plate_id) {
            return DevicePollResult::Pending;
        }
        if !state.busy {
            state.busy = true;
            return DevicePollResult::Granted;
        }
        state.waiters.push_back(plate_id);
        DevicePollResult::Pending
    }

    fn release_device(&mut self, device_id: DeviceId) {
        let state = self.states.entry(device_id).or_default();
        match state.waiters.pop_front() {
            Some(next) => {
                state.fulfilled.insert(next);
                // `busy` remains true: the device passes straight to the
                // next waiter without an intervening idle tick.
            }
            None => state.busy = false,
        }
    }
}

#[async_trait]
impl Actor for DevicePoolActor {
    type Message = DevicePoolMessage;

    async fn handle(&mut self, msg: DevicePoolMessage) {
        match msg {
            DevicePoolMessage::RequestDevice { device_id, plate_id, reply } => {
                let result = self.request_device(device_id, plate_id);
                let _ = reply.send(result);
            }
            DevicePoolMessage::ReleaseDevice { device_id } => {
                self.release_device(device_id);
            }
            DevicePoolMessage::GetHandle { device_id, reply } => {
                let _ = reply.send(self.devices.get(&device_id).cloned());
            }
        }
    }
}
