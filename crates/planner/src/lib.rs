// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! labtrans-planner: the pure path-planning service (spec §4.3).
//!
//! `plan()` is a function of a [`DeckConfig`] snapshot and never reads live
//! mover state — callers pass in whatever position they currently hold.

use labtrans_core::{DeckConfig, Location, Position, Track, TrackId, JUNCTION_EPSILON_MM};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// Two points within this many millimeters are the same point for
/// planning purposes; the caller should skip the hop entirely.
pub const TOO_CLOSE_EPSILON_MM: f64 = 1.0;

/// Average mover speed assumed for cost-to-duration conversion, mm/s.
/// Supplemental constant (not in the distilled spec): needed to turn a
/// track-length cost into the `estimated duration` spec §4.3 asks each
/// primitive command to carry.
pub const ASSUMED_SPEED_MM_PER_S: f64 = 500.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlannerError {
    #[error("no route between source and destination in the track graph")]
    NoRoute,
    #[error("destination lies on a disabled or unconfigured tile")]
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveCommand {
    HopOn { track_id: TrackId, distance: f64 },
    Follow { track_id: TrackId, target_distance: f64 },
    Transition { from_track: TrackId, to_track: TrackId },
    HopOff { x: f64, y: f64 },
    FreeMove { x: f64, y: f64, c: f64 },
    Rotate { c: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedCommand {
    pub command: PrimitiveCommand,
    pub estimated: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub commands: Vec<TimedCommand>,
    pub cost_mm: f64,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.commands.iter().map(|c| c.estimated).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanConstraints {
    pub avoid_tracks: HashSet<TrackId>,
    pub prefer_tracks: HashSet<TrackId>,
}

fn duration_for(mm: f64) -> Duration {
    Duration::from_secs_f64((mm.max(0.0) / ASSUMED_SPEED_MM_PER_S).max(0.0))
}

fn timed(command: PrimitiveCommand, mm: f64) -> TimedCommand {
    TimedCommand { command, estimated: duration_for(mm) }
}

/// One graph node: a cluster of track endpoints within [`JUNCTION_EPSILON_MM`]
/// of each other, i.e. a junction (or a lone dead end).
#[derive(Debug, Clone, Copy)]
struct NodeId(usize);

struct Graph<'a> {
    deck: &'a DeckConfig,
    node_points: Vec<(f64, f64)>,
    /// track endpoint (track_id, is_end) -> node id
    endpoint_node: HashMap<(TrackId, bool), NodeId>,
    /// adjacency: node -> Vec<(neighbor, track_id, weight)>
    adjacency: HashMap<usize, Vec<(NodeId, TrackId, f64)>>,
}

impl<'a> Graph<'a> {
    fn build(deck: &'a DeckConfig, constraints: Option<&PlanConstraints>) -> Self {
        let avoid = constraints.map(|c| &c.avoid_tracks);
        let mut node_points: Vec<(f64, f64)> = Vec::new();
        let mut endpoint_node: HashMap<(TrackId, bool), NodeId> = HashMap::new();

        let mut find_or_create = |p: (f64, f64), node_points: &mut Vec<(f64, f64)>| -> NodeId {
            for (i, np) in node_points.iter().enumerate() {
                let d = ((np.0 - p.0).powi(2) + (np.1 - p.1).powi(2)).sqrt();
                if d <= JUNCTION_EPSILON_MM {
                    return NodeId(i);
                }
            }
            node_points.push(p);
            NodeId(node_points.len() - 1)
        };

        // Endpoint nodes are registered for every track, avoided or not —
        // an avoided track still anchors a real junction other tracks may
        // share, and a caller may want to route *to* its endpoint (see
        // the parent_track case in `plan`) without being able to
        // traverse it.
        for track in &deck.tracks {
            let start_node = find_or_create(track.start, &mut node_points);
            let end_node = find_or_create(track.end, &mut node_points);
            endpoint_node.insert((track.track_id, false), start_node);
            endpoint_node.insert((track.track_id, true), end_node);
        }

        let mut adjacency: HashMap<usize, Vec<(NodeId, TrackId, f64)>> = HashMap::new();
        for track in &deck.tracks {
            if avoid.is_some_and(|a| a.contains(&track.track_id)) {
                continue;
            }
            let a = endpoint_node[&(track.track_id, false)];
            let b = endpoint_node[&(track.track_id, true)];
            let mut weight = track.length();
            if constraints.is_some_and(|c| c.prefer_tracks.contains(&track.track_id)) {
                weight *= 0.999;
            }
            adjacency.entry(a.0).or_default().push((b, track.track_id, weight));
            adjacency.entry(b.0).or_default().push((a, track.track_id, weight));
        }

        Self { deck, node_points, endpoint_node, adjacency }
    }

    /// The node nearest `p` that lies within [`JUNCTION_EPSILON_MM`], if any.
    fn node_at(&self, p: (f64, f64)) -> Option<NodeId> {
        self.node_points
            .iter()
            .enumerate()
            .find(|(_, np)| ((np.0 - p.0).powi(2) + (np.1 - p.1).powi(2)).sqrt() <= JUNCTION_EPSILON_MM)
            .map(|(i, _)| NodeId(i))
    }

    /// Cost and track path from `from` to `target`, entering the track
    /// network at `from`'s own junction if it sits on one, otherwise via
    /// the nearest node (mirroring the free-space connector cost, with
    /// no explicit command for that leg).
    fn route_to(&self, from: Position, target: NodeId) -> Option<(f64, Vec<TrackId>)> {
        if let Some(src) = self.node_at((from.x, from.y)) {
            if src.0 == target.0 {
                return Some((0.0, Vec::new()));
            }
            return self.shortest_path(src, target);
        }
        let entry = self.nearest_node((from.x, from.y))?;
        let entry_point = self.node_points[entry.0];
        let entry_cost = from.distance_to(&Position::new(entry_point.0, entry_point.1, 0.0));
        if entry.0 == target.0 {
            return Some((entry_cost, Vec::new()));
        }
        let (cost, path) = self.shortest_path(entry, target)?;
        Some((entry_cost + cost, path))
    }

    /// The globally nearest node to `p`, for hop_on/hop_off connectors.
    fn nearest_node(&self, p: (f64, f64)) -> Option<NodeId> {
        self.node_points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let da = (a.0 - p.0).powi(2) + (a.1 - p.1).powi(2);
                let db = (b.0 - p.0).powi(2) + (b.1 - p.1).powi(2);
                da.total_cmp(&db)
            })
            .map(|(i, _)| NodeId(i))
    }

    /// Dijkstra from `src` to `dst`, tie-breaking ties in total cost by
    /// the lowest minimum track id used along the path (spec §4.3).
    fn shortest_path(&self, src: NodeId, dst: NodeId) -> Option<(f64, Vec<TrackId>)> {
        #[derive(PartialEq)]
        struct Label {
            cost: f64,
            min_track: Option<TrackId>,
            node: usize,
            path: Vec<TrackId>,
        }
        impl Eq for Label {}
        impl Ord for Label {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                // BinaryHeap is a max-heap; invert for a min-heap on (cost, min_track).
                other.cost.total_cmp(&self.cost).then_with(|| other.min_track.cmp(&self.min_track))
            }
        }
        impl PartialOrd for Label {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut best: HashMap<usize, (f64, Option<TrackId>)> = HashMap::new();
        let mut heap = BinaryHeap::new();
        heap.push(Label { cost: 0.0, min_track: None, node: src.0, path: Vec::new() });

        while let Some(Label { cost, min_track, node, path }) = heap.pop() {
            if node == dst.0 {
                return Some((cost, path));
            }
            if let Some((bc, bt)) = best.get(&node) {
                if (*bc, *bt) < (cost, min_track) {
                    continue;
                }
            }
            best.insert(node, (cost, min_track));
            for (neighbor, track_id, weight) in self.adjacency.get(&node).into_iter().flatten() {
                let new_cost = cost + weight;
                let new_min_track = match min_track {
                    Some(t) if t <= *track_id => Some(t),
                    _ => Some(*track_id),
                };
                let better = match best.get(&neighbor.0) {
                    Some((bc, bt)) => (new_cost, new_min_track) < (*bc, *bt),
                    None => true,
                };
                if better {
                    let mut new_path = path.clone();
                    new_path.push(*track_id);
                    heap.push(Label { cost: new_cost, min_track: new_min_track, node: neighbor.0, path: new_path });
                }
            }
        }
        None
    }
}

/// Plan a route for a mover currently at `from` to `destination`.
pub fn plan(
    deck: &DeckConfig,
    from: Position,
    destination: &Location,
    constraints: Option<&PlanConstraints>,
) -> Result<Plan, PlannerError> {
    let dest_pos = destination.position;

    if !deck.is_navigable(dest_pos.x, dest_pos.y) {
        return Err(PlannerError::Unreachable);
    }

    if from.distance_to(&dest_pos) <= TOO_CLOSE_EPSILON_MM {
        return Ok(Plan::default());
    }

    let mut commands: Vec<TimedCommand> = Vec::new();
    let mut total_cost = 0.0;

    if let Some((track_id, dist)) = destination.parent_track {
        // Route onto `track_id` from whichever of its two endpoints is
        // cheaper to reach, then follow the remainder of the track to
        // the exact point `dist` mm from its start. `track_id` itself is
        // excluded while searching for that approach so Dijkstra can't
        // use it to shortcut to the far endpoint instead of stopping at
        // the requested distance.
        let track = deck.track(track_id).ok_or(PlannerError::NoRoute)?;
        let len = track.length();
        let dist = dist.clamp(0.0, len);

        let mut approach_constraints = constraints.cloned().unwrap_or_default();
        approach_constraints.avoid_tracks.insert(track_id);
        let approach_graph = Graph::build(deck, Some(&approach_constraints));

        let mut best: Option<(f64, Vec<TrackId>, f64)> = None;
        for (is_end, remaining) in [(false, dist), (true, len - dist)] {
            let endpoint = match approach_graph.endpoint_node.get(&(track_id, is_end)) {
                Some(e) => *e,
                None => continue,
            };
            let (cost, path) = match approach_graph.route_to(from, endpoint) {
                Some(r) => r,
                None => continue,
            };
            let total = cost + remaining;
            if best.as_ref().map_or(true, |(bc, _, br)| total < bc + br) {
                best = Some((cost, path, remaining));
            }
        }

        let (cost, path, remaining) = best.ok_or(PlannerError::NoRoute)?;
        total_cost += cost;
        emit_track_path(&approach_graph, &path, &mut commands);

        if remaining > TOO_CLOSE_EPSILON_MM {
            match path.last() {
                Some(&prev) => commands.push(timed(PrimitiveCommand::Transition { from_track: prev, to_track: track_id }, 0.0)),
                None => commands.push(timed(PrimitiveCommand::HopOn { track_id, distance: 0.0 }, 0.0)),
            }
            commands.push(timed(PrimitiveCommand::Follow { track_id, target_distance: dist }, remaining));
            total_cost += remaining;
        }
    } else {
        let graph = Graph::build(deck, constraints);
        let src_node = graph.node_at((from.x, from.y));
        let dst_node = graph.node_at((dest_pos.x, dest_pos.y));

        match (src_node, dst_node) {
            (Some(src), Some(dst)) if src.0 == dst.0 => {
                // Already at the destination junction; nothing to traverse.
            }
            (Some(src), Some(dst)) => {
                let (cost, path) = graph.shortest_path(src, dst).ok_or(PlannerError::NoRoute)?;
                total_cost += cost;
                emit_track_path(&graph, &path, &mut commands);
            }
            _ => {
                // Free-space connector: hop onto the nearest track endpoint,
                // route, then hop off near the destination.
                let entry = graph.nearest_node((from.x, from.y)).ok_or(PlannerError::NoRoute)?;
                let entry_point = graph.node_points[entry.0];
                let entry_cost = from.distance_to(&Position::new(entry_point.0, entry_point.1, 0.0));
                total_cost += entry_cost;

                let exit = graph.nearest_node((dest_pos.x, dest_pos.y)).ok_or(PlannerError::NoRoute)?;
                if entry.0 != exit.0 {
                    let (cost, path) = graph.shortest_path(entry, exit).ok_or(PlannerError::NoRoute)?;
                    total_cost += cost;
                    emit_track_path(&graph, &path, &mut commands);
                }
                let exit_point = graph.node_points[exit.0];
                let exit_cost = Position::new(exit_point.0, exit_point.1, 0.0).distance_to(&dest_pos);
                total_cost += exit_cost;
                commands.push(timed(PrimitiveCommand::HopOff { x: dest_pos.x, y: dest_pos.y }, exit_cost));
            }
        }
    }

    commands.push(timed(PrimitiveCommand::Rotate { c: dest_pos.c }, 0.0));

    Ok(Plan { commands, cost_mm: total_cost })
}

fn emit_track_path(graph: &Graph<'_>, path: &[TrackId], commands: &mut Vec<TimedCommand>) {
    let mut prev_track: Option<TrackId> = None;
    for &track_id in path {
        let track: &Track = match graph.deck.track(track_id) {
            Some(t) => t,
            None => continue,
        };
        if let Some(prev) = prev_track {
            commands.push(timed(PrimitiveCommand::Transition { from_track: prev, to_track: track_id }, 0.0));
        } else {
            commands.push(timed(PrimitiveCommand::HopOn { track_id, distance: 0.0 }, 0.0));
        }
        commands.push(timed(PrimitiveCommand::Follow { track_id, target_distance: track.length() }, track.length()));
        prev_track = Some(track_id);
    }
}
