// SPDX-License-Identifier: MIT

//! Text vs. JSON rendering shared across subcommands.

use clap::ValueEnum;
use labtrans_core::{Event, MoverStateSnapshot, PlateStateSnapshot};

#[derive(Clone, Copy, Debug, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn print_event(format: OutputFormat, event: &Event) {
    match format {
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
        }
        OutputFormat::Text => println!("[{}] {:?}", event.name(), event),
    }
}

pub fn print_plate_snapshot(format: OutputFormat, snapshot: &PlateStateSnapshot) {
    match format {
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(snapshot) {
                println!("{line}");
            }
        }
        OutputFormat::Text => {
            println!(
                "plate {}: phase={:?} step={}/{} location={:?}",
                snapshot.plate_id.as_str(),
                snapshot.phase,
                snapshot.step_index,
                snapshot.workflow.len(),
                snapshot.location,
            );
        }
    }
}

pub fn print_mover_snapshot(format: OutputFormat, snapshot: &MoverStateSnapshot) {
    match format {
        OutputFormat::Json => {
            if let Ok(line) = serde_json::to_string(snapshot) {
                println!("{line}");
            }
        }
        OutputFormat::Text => {
            println!(
                "mover {}: state={:?} position=({:.1}, {:.1}) assigned={:?}",
                snapshot.mover_id.as_str(),
                snapshot.physical.state,
                snapshot.physical.position.x,
                snapshot.physical.position.y,
                snapshot.assigned_plate,
            );
        }
    }
}
