// SPDX-License-Identifier: MIT

//! `labtrans run`: boot a coordinator from a scenario file, spawn its
//! plates, stream the event bus to stdout, and report final plate
//! states once every plate reaches a terminal phase or the deadline
//! elapses. Stands in for the HTTP/WS layer spec §6 describes as the
//! consumer of the coordinator's in-process API — that layer is out of
//! scope here, so this is the thinnest possible driver of it.

use crate::output::{self, OutputFormat};
use crate::scenario::Scenario;
use anyhow::{Context, Result};
use labtrans_core::{PlateId, SystemClock};
use labtrans_engine::{Coordinator, PhysicalDriver, SimDriver};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn handle(scenario_path: &Path, timeout_secs: u64, format: OutputFormat) -> Result<()> {
    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("loading scenario {}", scenario_path.display()))?;

    let mover_positions = scenario.mover_positions();
    let initial_positions = mover_positions.iter().map(|(id, pos)| (*id, *pos)).collect();
    let driver: Arc<dyn PhysicalDriver> = SimDriver::new(initial_positions);

    let deck = Arc::new(scenario.deck.clone());
    let coordinator =
        Coordinator::new(deck, driver, SystemClock, mover_positions, scenario.device_ids());

    let mut events = coordinator.subscribe("**");

    let mut plate_ids = Vec::with_capacity(scenario.plates.len());
    for plate in &scenario.plates {
        let plate_id = plate.plate_id();
        coordinator
            .spawn_plate(plate_id, plate.workflow.clone(), plate.sample_ids.clone(), plate.barcode.clone())
            .await
            .with_context(|| format!("spawning plate {plate_id}"))?;
        plate_ids.push(plate_id);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            Some(event) = events.rx.recv() => {
                output::print_event(format, &event);
            }
            _ = poll.tick() => {
                if all_terminal(&coordinator, &plate_ids).await {
                    break;
                }
            }
            _ = &mut deadline => {
                eprintln!("timed out after {timeout_secs}s with plates still in flight");
                break;
            }
        }
    }

    for snapshot in coordinator.list_plates().await {
        output::print_plate_snapshot(format, &snapshot);
    }
    for snapshot in coordinator.list_movers().await {
        output::print_mover_snapshot(format, &snapshot);
    }

    Ok(())
}

async fn all_terminal(coordinator: &Coordinator<SystemClock>, plate_ids: &[PlateId]) -> bool {
    for plate_id in plate_ids {
        match coordinator.get_plate_state(*plate_id).await {
            Ok(snapshot) if snapshot.phase.is_terminal() => continue,
            _ => return false,
        }
    }
    true
}
