// SPDX-License-Identifier: MIT

//! Station access gating: occupancy plus a strict-FIFO wait queue per
//! station (spec §4.4).

use labtrans_actor::{async_trait, Actor, EventBus};
use labtrans_core::{DeckConfig, Event, LocationId, PlateId, StationId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Outcome of a `request_access` call.
#[derive(Debug, Clone, PartialEq)]
pub enum StationGrant {
    Granted,
    Queued { position: usize, queue_location: LocationId },
}

#[derive(Debug)]
pub enum StationMessage {
    RequestAccess { plate_id: PlateId, station_id: StationId, reply: oneshot::Sender<StationGrant> },
    ReleaseAccess { plate_id: PlateId, station_id: StationId },
    CancelRequest { plate_id: PlateId, station_id: StationId },
}

#[derive(Default)]
struct StationState {
    occupants: HashSet<PlateId>,
    queue: VecDeque<PlateId>,
}

pub struct StationManager {
    deck: Arc<DeckConfig>,
    bus: Arc<EventBus>,
    states: HashMap<StationId, StationState>,
}

impl StationManager {
    pub fn new(deck: Arc<DeckConfig>, bus: Arc<EventBus>) -> Self {
        Self { deck, bus, states: HashMap::new() }
    }

    fn slots(&self, station_id: StationId) -> u32 {
        self.deck.station(station_id).map(|s| s.slots).unwrap_or(1)
    }

    fn queue_location(&self, station_id: StationId) -> LocationId {
        self.deck
            .station(station_id)
            .map(|s| s.queue_location)
            .unwrap_or_else(|| LocationId::from_raw("unknown-queue"))
    }

    fn request_access(&mut self, plate_id: PlateId, station_id: StationId) -> StationGrant {
        let slots = self.slots(station_id);
        let state = self.states.entry(station_id).or_default();
        self.bus.publish(Event::StationAccessRequested { station_id, plate_id });
        if (state.occupants.len() as u32) < slots {
            state.occupants.insert(plate_id);
            StationGrant::Granted
        } else {
            state.queue.push_back(plate_id);
            StationGrant::Queued { position: state.queue.len(), queue_location: self.queue_location(station_id) }
        }
    }

    fn release_access(&mut self, plate_id: PlateId, station_id: StationId) {
        let slots = self.slots(station_id);
        let state = self.states.entry(station_id).or_default();
        state.occupants.remove(&plate_id);
        self.bus.publish(Event::StationAccessReleased { station_id, plate_id });
        while (state.occupants.len() as u32) < slots {
            match state.queue.pop_front() {
                Some(next) => {
                    state.occupants.insert(next);
                    self.bus.publish(Event::StationAccessGranted { station_id, plate_id: next });
                }
                None => break,
            }
        }
    }

    fn cancel_request(&mut self, plate_id: PlateId, station_id: StationId) {
        if let Some(state) = self.states.get_mut(&station_id) {
            state.queue.retain(|p| *p != plate_id);
        }
    }
}

#[async_trait]
impl Actor for StationManager {
    type Message = StationMessage;

    async fn handle(&mut self, msg: StationMessage) {
        match msg {
            StationMessage::RequestAccess { plate_id, station_id, reply } => {
                let grant = self.request_access(plate_id, station_id);
                let _ = reply.send(grant);
            }
            StationMessage::ReleaseAccess { plate_id, station_id } => {
                self.release_access(plate_id, station_id);
            }
            StationMessage::CancelRequest { plate_id, station_id } => {
                self.cancel_request(plate_id, station_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labtrans_core::Station;

    fn deck_with_station(slots: u32) -> Arc<DeckConfig> {
        Arc::new(DeckConfig {
            stations: vec![Station {
                station_id: StationId::from_raw("s1"),
                device_type: "pipetter".into(),
                device_id: labtrans_core::DeviceId::from_raw("d1"),
                primary_location: LocationId::from_raw("loc-primary"),
                slots,
                queue_location: LocationId::from_raw("loc-queue"),
            }],
            ..Default::default()
        })
    }

    #[test]
    fn third_request_is_queued_behind_two_occupants() {
        let mut mgr = StationManager::new(deck_with_station(2), EventBus::new());
        let station_id = StationId::from_raw("s1");
        let p1 = PlateId::generate();
        let p2 = PlateId::generate();
        let p3 = PlateId::generate();
        assert_eq!(mgr.request_access(p1, station_id), StationGrant::Granted);
        assert_eq!(mgr.request_access(p2, station_id), StationGrant::Granted);
        assert!(matches!(mgr.request_access(p3, station_id), StationGrant::Queued { position: 1, .. }));
    }

    #[test]
    fn release_grants_fifo() {
        let mut mgr = StationManager::new(deck_with_station(1), EventBus::new());
        let station_id = StationId::from_raw("s1");
        let p1 = PlateId::generate();
        let p2 = PlateId::generate();
        let p3 = PlateId::generate();
        assert_eq!(mgr.request_access(p1, station_id), StationGrant::Granted);
        assert!(matches!(mgr.request_access(p2, station_id), StationGrant::Queued { .. }));
        assert!(matches!(mgr.request_access(p3, station_id), StationGrant::Queued { .. }));

        let mut sub = mgr.bus.subscribe("station.access_granted");
        mgr.release_access(p1, station_id);
        let first = sub.rx.try_recv().expect("a grant should have been published");
        match first {
            Event::StationAccessGranted { plate_id, .. } => assert_eq!(plate_id, p2),
            other => panic!("unexpected event: {other:?}"),
        }

        mgr.release_access(p2, station_id);
        let second = sub.rx.try_recv().expect("a second grant should have been published");
        match second {
            Event::StationAccessGranted { plate_id, .. } => assert_eq!(plate_id, p3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn cancel_removes_from_queue() {
        let mut mgr = StationManager::new(deck_with_station(1), EventBus::new());
        let station_id = StationId::from_raw("s1");
        let p1 = PlateId::generate();
        let p2 = PlateId::generate();
        mgr.request_access(p1, station_id);
        mgr.request_access(p2, station_id);
        mgr.cancel_request(p2, station_id);
        assert_eq!(mgr.states.get(&station_id).map(|s| s.queue.len()), Some(0));
    }
}
