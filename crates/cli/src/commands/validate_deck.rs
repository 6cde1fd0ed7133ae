// SPDX-License-Identifier: MIT

//! `labtrans validate-deck`: load a deck configuration and check its
//! referential integrity (stations pointing at real locations, and so
//! on) without booting any actors.

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use labtrans_core::DeckConfig;
use std::path::Path;

pub fn handle(deck_path: &Path, format: OutputFormat) -> Result<()> {
    let raw = std::fs::read_to_string(deck_path)
        .with_context(|| format!("reading {}", deck_path.display()))?;
    let deck: DeckConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", deck_path.display()))?;

    let mut problems = Vec::new();
    for station in &deck.stations {
        if deck.location(station.primary_location).is_none() {
            problems.push(format!(
                "station {} references unknown primary_location {}",
                station.station_id, station.primary_location
            ));
        }
        if deck.location(station.queue_location).is_none() {
            problems.push(format!(
                "station {} references unknown queue_location {}",
                station.station_id, station.queue_location
            ));
        }
    }
    for location in &deck.locations {
        if let Some((track_id, _)) = location.parent_track {
            if deck.track(track_id).is_none() {
                problems.push(format!("location {} references unknown track {}", location.location_id, track_id));
            }
        }
        if let Some(station_id) = location.station_id {
            if deck.station(station_id).is_none() {
                problems.push(format!("location {} references unknown station {}", location.location_id, station_id));
            }
        }
    }

    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "tiles": deck.tiles.len(),
                "tracks": deck.tracks.len(),
                "locations": deck.locations.len(),
                "stations": deck.stations.len(),
                "problems": problems,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            println!(
                "deck: {} tiles, {} tracks, {} locations, {} stations",
                deck.tiles.len(),
                deck.tracks.len(),
                deck.locations.len(),
                deck.stations.len()
            );
            if problems.is_empty() {
                println!("no referential problems found");
            } else {
                for problem in &problems {
                    println!("problem: {problem}");
                }
            }
        }
    }

    if !problems.is_empty() {
        anyhow::bail!("{} referential problem(s) found", problems.len());
    }
    Ok(())
}
