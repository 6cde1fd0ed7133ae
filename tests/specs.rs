// SPDX-License-Identifier: MIT

//! End-to-end scenarios driving a real `Coordinator` (actors, pools,
//! station manager, and a simulated physical driver) through the six
//! seed scenarios and a handful of the quantified invariants.

use labtrans_core::{
    Bounds, DeckConfig, DeviceId, Event, Location, LocationId, LocationKind, MoverId, MoverRunState, PlateId,
    PlatePhase, Position, Station, StationId, StatorTile, SystemClock, Track, TrackId, Workflow, WorkflowId,
    WorkflowStep,
};
use labtrans_engine::driver::DriverError;
use labtrans_engine::{Coordinator, PhysicalDriver, SimDriver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct StationSpec {
    station_id: &'static str,
    device_id: &'static str,
    x: f64,
    slots: u32,
}

/// A single straight track from x=0 to `track_len`, with one tile wide
/// enough to cover every station's dock and queue point. Stations sit
/// just off the track (no `parent_track`) so the planner routes to them
/// via its free-space hop-on/hop-off connector rather than its
/// track-endpoint-only `parent_track` shortcut.
fn build_deck(track_len: f64, stations: &[StationSpec]) -> DeckConfig {
    let track_id = TrackId::from_raw("trk-main");
    let tiles = vec![StatorTile {
        grid_col: 0,
        grid_row: 0,
        enabled: true,
        bounds: Bounds { x_min: -10.0, y_min: -10.0, x_max: track_len + 50.0, y_max: 100.0 },
    }];
    let tracks = vec![Track { track_id, name: "main".to_string(), start: (0.0, 0.0), end: (track_len, 0.0) }];

    let mut locations = Vec::new();
    let mut station_defs = Vec::new();
    for s in stations {
        let dock_id = LocationId::from_raw(&format!("{}-dock", s.station_id));
        let queue_id = LocationId::from_raw(&format!("{}-queue", s.station_id));
        let station_id = StationId::from_raw(s.station_id);
        locations.push(Location {
            location_id: dock_id,
            name: format!("{} dock", s.station_id),
            kind: LocationKind::Device,
            position: Position::new(s.x, 0.0, 0.0),
            parent_track: None,
            station_id: Some(station_id),
        });
        locations.push(Location {
            location_id: queue_id,
            name: format!("{} queue", s.station_id),
            kind: LocationKind::Queue,
            position: Position::new(s.x, 30.0, 0.0),
            parent_track: None,
            station_id: None,
        });
        station_defs.push(Station {
            station_id,
            device_type: "generic".to_string(),
            device_id: DeviceId::from_raw(s.device_id),
            primary_location: dock_id,
            slots: s.slots,
            queue_location: queue_id,
        });
    }
    DeckConfig { tiles, tracks, locations, stations: station_defs }
}

fn workflow(steps: &[(&str, &str, &str, u64)]) -> Workflow {
    Workflow {
        workflow_id: WorkflowId::from_raw("wf"),
        steps: steps
            .iter()
            .map(|(step_id, station_id, device_id, ms)| WorkflowStep {
                step_id: step_id.to_string(),
                name: step_id.to_string(),
                station_id: StationId::from_raw(station_id),
                device_id: DeviceId::from_raw(device_id),
                device_type: "generic".to_string(),
                duration: Some(Duration::from_millis(*ms)),
                parameters: HashMap::new(),
            })
            .collect(),
    }
}

fn driver_for(positions: &[(MoverId, Position)]) -> Arc<dyn PhysicalDriver> {
    SimDriver::new(positions.iter().cloned().collect())
}

/// Subscribe and drain into a shared buffer for the life of the test;
/// the returned task is left running and reaped when the runtime shuts
/// down, which is fine for a short-lived `#[tokio::test]` process.
fn collect_events(coordinator: &Coordinator<SystemClock>, pattern: &str) -> Arc<Mutex<Vec<Event>>> {
    let mut sub = coordinator.subscribe(pattern);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    tokio::spawn(async move {
        while let Some(event) = sub.rx.recv().await {
            sink.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        }
    });
    events
}

async fn wait_terminal(
    coordinator: &Coordinator<SystemClock>,
    plate_id: PlateId,
    timeout: Duration,
) -> labtrans_core::PlateStateSnapshot {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = coordinator.get_plate_state(plate_id).await.expect("plate is registered");
        if snapshot.phase.is_terminal() {
            return snapshot;
        }
        assert!(tokio::time::Instant::now() < deadline, "plate stuck in {:?}", snapshot.phase);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_until(
    coordinator: &Coordinator<SystemClock>,
    plate_id: PlateId,
    timeout: Duration,
    mut predicate: impl FnMut(&labtrans_core::PlateStateSnapshot) -> bool,
) -> labtrans_core::PlateStateSnapshot {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = coordinator.get_plate_state(plate_id).await.expect("plate is registered");
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition never became true (phase={:?})", snapshot.phase);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Scenario 1: single plate, two steps. Ends `completed`, step_completed
/// events strictly ordered 0 then 1, mover returns to idle.
#[tokio::test]
async fn single_plate_two_steps_completes_in_order() {
    let deck = Arc::new(build_deck(480.0, &[
        StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 },
        StationSpec { station_id: "stn-b", device_id: "dev-b", x: 360.0, slots: 1 },
    ]));
    let mover_id = MoverId::from_raw("mov-1");
    let positions = vec![(mover_id, Position::new(0.0, 0.0, 0.0))];
    let driver = driver_for(&positions);
    let coordinator = Coordinator::new(
        deck,
        driver,
        SystemClock,
        positions,
        vec![DeviceId::from_raw("dev-a"), DeviceId::from_raw("dev-b")],
    );

    let events = collect_events(&coordinator, "plate.step_completed");

    let plate_id = PlateId::from_raw("plt-1");
    let wf = workflow(&[("s1", "stn-a", "dev-a", 30), ("s2", "stn-b", "dev-b", 30)]);
    coordinator.spawn_plate(plate_id, wf, vec!["sample-1".to_string()], None).await.expect("spawn succeeds");

    let snapshot = wait_terminal(&coordinator, plate_id, Duration::from_secs(5)).await;
    assert_eq!(snapshot.phase, PlatePhase::Completed);

    let mover = coordinator.get_mover_state(mover_id).await.expect("mover exists");
    assert_eq!(mover.assigned_plate, None);
    assert_eq!(mover.physical.state, MoverRunState::Idle);

    let step_indices: Vec<usize> = events
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .filter_map(|e| match e {
            Event::PlateStepCompleted { step_index, .. } => Some(*step_index),
            _ => None,
        })
        .collect();
    assert_eq!(step_indices, vec![0, 1]);
}

/// Scenario 2: two plates contend for one mover and one station. Both
/// finish; the mover is granted to P1 before P2.
#[tokio::test]
async fn contention_is_resolved_fifo() {
    let deck = Arc::new(build_deck(240.0, &[StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 }]));
    let mover_id = MoverId::from_raw("mov-1");
    let positions = vec![(mover_id, Position::new(0.0, 0.0, 0.0))];
    let driver = driver_for(&positions);
    let coordinator = Coordinator::new(deck, driver, SystemClock, positions, vec![DeviceId::from_raw("dev-a")]);

    let events = collect_events(&coordinator, "mover.assigned");

    let wf = workflow(&[("s1", "stn-a", "dev-a", 60)]);
    let p1 = PlateId::from_raw("plt-1");
    let p2 = PlateId::from_raw("plt-2");
    coordinator.spawn_plate(p1, wf.clone(), vec![], None).await.expect("spawn p1");
    // Give p1 a deterministic head start on the mover pool's mailbox
    // rather than relying on scheduler fairness between two freshly
    // spawned actors.
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.spawn_plate(p2, wf, vec![], None).await.expect("spawn p2");

    let snap1 = wait_terminal(&coordinator, p1, Duration::from_secs(5)).await;
    let snap2 = wait_terminal(&coordinator, p2, Duration::from_secs(5)).await;
    assert_eq!(snap1.phase, PlatePhase::Completed);
    assert_eq!(snap2.phase, PlatePhase::Completed);

    let order: Vec<PlateId> = events
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .filter_map(|e| match e {
            Event::MoverAssigned { plate_id, .. } => Some(*plate_id),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![p1, p2]);
}

/// Scenario 3: the mover is released strictly between `plate.loading`
/// and `plate.processing_started`, and stays available in the pool for
/// the whole processing window (checked via `list_movers`/mover state,
/// since there's only one mover and one plate).
#[tokio::test]
async fn mover_is_released_before_processing_starts() {
    let deck = Arc::new(build_deck(240.0, &[StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 }]));
    let mover_id = MoverId::from_raw("mov-1");
    let positions = vec![(mover_id, Position::new(0.0, 0.0, 0.0))];
    let driver = driver_for(&positions);
    let coordinator = Coordinator::new(deck, driver, SystemClock, positions, vec![DeviceId::from_raw("dev-a")]);

    let events = collect_events(&coordinator, "plate.**");

    let plate_id = PlateId::from_raw("plt-1");
    let wf = workflow(&[("s1", "stn-a", "dev-a", 150)]);
    coordinator.spawn_plate(plate_id, wf, vec![], None).await.expect("spawn succeeds");

    // Catch it mid-processing and confirm the mover is idle and unassigned.
    wait_until(&coordinator, plate_id, Duration::from_secs(5), |s| s.phase == PlatePhase::Processing).await;
    let mover = coordinator.get_mover_state(mover_id).await.expect("mover exists");
    assert_eq!(mover.assigned_plate, None);
    assert_eq!(mover.physical.state, MoverRunState::Idle);

    let snapshot = wait_terminal(&coordinator, plate_id, Duration::from_secs(5)).await;
    assert_eq!(snapshot.phase, PlatePhase::Completed);

    let recorded = events.lock().unwrap_or_else(|e| e.into_inner());
    let loading_pos = recorded.iter().position(|e| matches!(e, Event::PlateLoading { .. }));
    let released_pos = recorded.iter().position(|e| matches!(e, Event::PlateMoverReleased { .. }));
    let started_pos = recorded.iter().position(|e| matches!(e, Event::PlateProcessingStarted { .. }));
    let (loading_pos, released_pos, started_pos) =
        (loading_pos.expect("saw loading"), released_pos.expect("saw mover released"), started_pos.expect("saw processing started"));
    assert!(loading_pos < released_pos, "mover must be released after loading begins");
    assert!(released_pos < started_pos, "mover must be released before processing starts");
}

/// Scenario 4: three plates target the same slots=1 station; grants are
/// issued in request order and exactly one grant fires per release.
#[tokio::test]
async fn station_queue_grants_in_request_order() {
    let deck = Arc::new(build_deck(240.0, &[StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 }]));
    let movers = vec![
        (MoverId::from_raw("mov-1"), Position::new(0.0, 0.0, 0.0)),
        (MoverId::from_raw("mov-2"), Position::new(0.0, 0.0, 0.0)),
        (MoverId::from_raw("mov-3"), Position::new(0.0, 0.0, 0.0)),
    ];
    let driver = driver_for(&movers);
    let coordinator = Coordinator::new(deck, driver, SystemClock, movers, vec![DeviceId::from_raw("dev-a")]);

    let events = collect_events(&coordinator, "station.**");

    let wf = workflow(&[("s1", "stn-a", "dev-a", 40)]);
    let plates = [PlateId::from_raw("plt-1"), PlateId::from_raw("plt-2"), PlateId::from_raw("plt-3")];
    for plate_id in plates {
        coordinator.spawn_plate(plate_id, wf.clone(), vec![], None).await.expect("spawn succeeds");
        // Stagger spawns so each plate's first station request lands on
        // the station manager's mailbox strictly after the previous
        // plate's, making the FIFO order deterministic.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for plate_id in plates {
        let snapshot = wait_terminal(&coordinator, plate_id, Duration::from_secs(5)).await;
        assert_eq!(snapshot.phase, PlatePhase::Completed);
    }

    let recorded = events.lock().unwrap_or_else(|e| e.into_inner());
    let requested: Vec<PlateId> = recorded
        .iter()
        .filter_map(|e| match e {
            Event::StationAccessRequested { plate_id, .. } => Some(*plate_id),
            _ => None,
        })
        .collect();
    let granted: Vec<PlateId> = recorded
        .iter()
        .filter_map(|e| match e {
            Event::StationAccessGranted { plate_id, .. } => Some(*plate_id),
            _ => None,
        })
        .collect();
    // The first requester to arrive finds a free slot and is granted
    // synchronously inside `request_access`, which publishes no event for
    // that case (spec: "Exactly one station.access_granted fires per
    // release"). Only the plates that actually waited get a grant event,
    // each one fired by the release that frees their slot.
    assert_eq!(requested.len(), 3, "all three plates record a request");
    assert_eq!(granted, &requested[1..], "waiters are granted in request order");
}

/// Scenario 5: pausing mid-processing freezes the plate's phase and
/// holds its resources; resuming lets it complete normally.
#[tokio::test]
async fn pause_then_resume_completes_normally() {
    let deck = Arc::new(build_deck(240.0, &[StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 }]));
    let mover_id = MoverId::from_raw("mov-1");
    let positions = vec![(mover_id, Position::new(0.0, 0.0, 0.0))];
    let driver = driver_for(&positions);
    let coordinator = Coordinator::new(deck, driver, SystemClock, positions, vec![DeviceId::from_raw("dev-a")]);

    let plate_id = PlateId::from_raw("plt-1");
    let wf = workflow(&[("s1", "stn-a", "dev-a", 300)]);
    coordinator.spawn_plate(plate_id, wf, vec![], None).await.expect("spawn succeeds");

    wait_until(&coordinator, plate_id, Duration::from_secs(5), |s| s.phase == PlatePhase::Processing).await;
    coordinator
        .control_plate(plate_id, labtrans_engine::PlateControl::Pause { reason: "operator hold".to_string() })
        .await
        .expect("pause accepted");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let paused = coordinator.get_plate_state(plate_id).await.expect("plate exists");
    assert_eq!(paused.phase, PlatePhase::Paused);
    assert!(paused.location != labtrans_core::PlateLocation::Unassigned, "station/device occupancy is retained while paused");

    coordinator.control_plate(plate_id, labtrans_engine::PlateControl::Resume).await.expect("resume accepted");

    let snapshot = wait_terminal(&coordinator, plate_id, Duration::from_secs(5)).await;
    assert_eq!(snapshot.phase, PlatePhase::Completed);
}

/// Scenario 6: a one-shot transient driver fault during transport sends
/// the plate to `error`; `RetryStep` clears it and the plate completes,
/// with exactly one `plate.error` entry recorded in its history.
#[tokio::test]
async fn error_and_retry_recovers_and_completes() {
    let deck = Arc::new(build_deck(240.0, &[StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 }]));
    let mover_id = MoverId::from_raw("mov-1");
    let positions = vec![(mover_id, Position::new(0.0, 0.0, 0.0))];
    let driver = SimDriver::new(positions.iter().cloned().collect());
    driver.fail_once(mover_id, "follow", DriverError::Transient { command: "follow".to_string() });
    let driver: Arc<dyn PhysicalDriver> = driver;
    let coordinator = Coordinator::new(deck, driver, SystemClock, positions, vec![DeviceId::from_raw("dev-a")]);

    let plate_id = PlateId::from_raw("plt-1");
    let wf = workflow(&[("s1", "stn-a", "dev-a", 40)]);
    coordinator.spawn_plate(plate_id, wf, vec![], None).await.expect("spawn succeeds");

    let errored = wait_until(&coordinator, plate_id, Duration::from_secs(5), |s| s.phase == PlatePhase::Error).await;
    assert!(errored.last_error.is_some());

    coordinator.control_plate(plate_id, labtrans_engine::PlateControl::RetryStep).await.expect("retry accepted");

    let snapshot = wait_terminal(&coordinator, plate_id, Duration::from_secs(5)).await;
    assert_eq!(snapshot.phase, PlatePhase::Completed);
    let error_entries = snapshot.history.iter().filter(|h| h.phase == PlatePhase::Error).count();
    assert_eq!(error_entries, 1);
}

/// Spec §4.8 Failure clause: a scripted driver fault during device
/// processing (rather than transport) sends the plate to `error` with a
/// `device.error` published on the bus; `RetryStep` recovers it the same
/// way the transport-fault scenario does.
#[tokio::test]
async fn device_processing_failure_sends_plate_to_error_and_retry_recovers() {
    let deck = Arc::new(build_deck(240.0, &[StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 }]));
    let mover_id = MoverId::from_raw("mov-1");
    let positions = vec![(mover_id, Position::new(0.0, 0.0, 0.0))];
    let driver = SimDriver::new(positions.iter().cloned().collect());
    let device_id = DeviceId::from_raw("dev-a");
    driver.fail_device_once(device_id, DriverError::Transient { command: "process".to_string() });
    let driver: Arc<dyn PhysicalDriver> = driver;
    let coordinator = Coordinator::new(deck, driver, SystemClock, positions, vec![device_id]);

    let mut events = coordinator.subscribe("device.error");
    let plate_id = PlateId::from_raw("plt-1");
    let wf = workflow(&[("s1", "stn-a", "dev-a", 40)]);
    coordinator.spawn_plate(plate_id, wf, vec![], None).await.expect("spawn succeeds");

    let errored = wait_until(&coordinator, plate_id, Duration::from_secs(5), |s| s.phase == PlatePhase::Error).await;
    assert!(errored.last_error.is_some());

    let device_error = tokio::time::timeout(Duration::from_secs(5), events.rx.recv())
        .await
        .expect("device.error published before timeout");
    assert!(matches!(device_error, Some(Event::DeviceError { plate_id: Some(pid), .. }) if pid == plate_id));

    coordinator.control_plate(plate_id, labtrans_engine::PlateControl::RetryStep).await.expect("retry accepted");

    let snapshot = wait_terminal(&coordinator, plate_id, Duration::from_secs(5)).await;
    assert_eq!(snapshot.phase, PlatePhase::Completed);
}

/// Quantified invariant (spec §8): a plate in `processing` never holds
/// a mover.
#[tokio::test]
async fn processing_implies_no_assigned_mover() {
    let deck = Arc::new(build_deck(240.0, &[StationSpec { station_id: "stn-a", device_id: "dev-a", x: 120.0, slots: 1 }]));
    let mover_id = MoverId::from_raw("mov-1");
    let positions = vec![(mover_id, Position::new(0.0, 0.0, 0.0))];
    let driver = driver_for(&positions);
    let coordinator = Coordinator::new(deck, driver, SystemClock, positions, vec![DeviceId::from_raw("dev-a")]);

    let plate_id = PlateId::from_raw("plt-1");
    let wf = workflow(&[("s1", "stn-a", "dev-a", 120)]);
    coordinator.spawn_plate(plate_id, wf, vec![], None).await.expect("spawn succeeds");

    let snapshot = wait_until(&coordinator, plate_id, Duration::from_secs(5), |s| s.phase == PlatePhase::Processing).await;
    assert_eq!(snapshot.assigned_mover, None);

    wait_terminal(&coordinator, plate_id, Duration::from_secs(5)).await;
}
