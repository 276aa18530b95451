// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! execution ordering for one iteration
//!
//! Feedback groups are contracted into synthetic units, the contracted
//! graph is ordered with Kahn's algorithm, and each group expands back into
//! its segment sweep at the point its unit is dequeued. The order is
//! computed once per run since the topology is frozen; the schedule keeps a
//! cursor so the controller can resume after a pause.

use itertools::Itertools;
use petgraph::prelude::*;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::design::DesignSpec;
use crate::error::Error;
use crate::feedback::FeedbackGroup;

/// one entry of the total order: a single acyclic block, or a whole
/// feedback group (index into the detected group list)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleUnit {
    Block(NodeIndex),
    Group(usize),
}

/// precomputed execution order with a traversal cursor
///
/// The order is computed once; the cursor is reset every iteration and
/// survives a pause mid-iteration.
#[derive(Clone, Debug)]
pub struct Schedule {
    units: Vec<ScheduleUnit>,
    current_ptr: usize,
}

impl Schedule {
    pub fn units(&self) -> &[ScheduleUnit] {
        &self.units
    }

    pub fn reset(&mut self) {
        self.current_ptr = 0;
    }

    /// the next unit to execute, or None at the end of the iteration
    pub fn next(&mut self) -> Option<ScheduleUnit> {
        let current = self.current_ptr;
        self.current_ptr += 1;
        self.units.get(current).copied()
    }
}

/// every required input port must be fed by a link before anything runs
fn validate_connectivity(design: &DesignSpec) -> Result<(), Error> {
    for node in design.iter_nodes() {
        let connected: HashSet<usize> = design
            .get_input_links(node)
            .map(|e| e.weight().dst_port().index())
            .collect();
        let block = design.get_node(node);
        for port in block.borrow().input_ports() {
            if port.required() && !connected.contains(&port.index()) {
                return Err(Error::PortNotReady {
                    block: block.borrow().name().to_owned(),
                    port,
                });
            }
        }
    }
    Ok(())
}

/// build the total execution order for one iteration
pub fn build_schedule(design: &DesignSpec, groups: &[FeedbackGroup]) -> Result<Schedule, Error> {
    validate_connectivity(design)?;

    // contract each group to one synthetic unit; unit ids follow the first
    // appearance of a member in node-index order, so the result is
    // deterministic for a given design
    let mut units: Vec<ScheduleUnit> = Vec::new();
    let mut group_unit: Vec<Option<usize>> = vec![None; groups.len()];
    let mut unit_of: Vec<usize> = vec![usize::MAX; design.topo.node_count()];
    for node in design.iter_nodes() {
        match groups.iter().position(|g| g.contains(node)) {
            Some(g) => {
                let id = match group_unit[g] {
                    Some(id) => id,
                    None => {
                        let id = units.len();
                        units.push(ScheduleUnit::Group(g));
                        group_unit[g] = Some(id);
                        id
                    }
                };
                unit_of[node.index()] = id;
            }
            None => {
                let id = units.len();
                units.push(ScheduleUnit::Block(node));
                unit_of[node.index()] = id;
            }
        }
    }

    // Kahn's algorithm over the contracted edges; parallel links count once
    // per link, which keeps the in-degree bookkeeping trivially balanced
    let mut indeg = vec![0usize; units.len()];
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    for link in design.iter_links() {
        let (u, v) = design.get_link_endpoints(link);
        let (uu, vv) = (unit_of[u.index()], unit_of[v.index()]);
        if uu != vv {
            adj[uu].push(vv);
            indeg[vv] += 1;
        }
    }

    let mut heap: BinaryHeap<Reverse<usize>> = indeg
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(u, _)| Reverse(u))
        .collect();
    let mut order = Vec::with_capacity(units.len());
    let mut scheduled = vec![false; units.len()];
    while let Some(Reverse(u)) = heap.pop() {
        order.push(units[u]);
        scheduled[u] = true;
        for &v in &adj[u] {
            indeg[v] -= 1;
            if indeg[v] == 0 {
                heap.push(Reverse(v));
            }
        }
    }

    if order.len() != units.len() {
        // a cycle escaped group contraction; list the trapped blocks
        let trapped = design
            .iter_nodes()
            .filter(|n| !scheduled[unit_of[n.index()]])
            .map(|n| design.get_node(n).borrow().name().to_owned())
            .sorted()
            .collect::<Vec<_>>();
        return Err(Error::CyclicDependency(trapped));
    }

    log::debug!("schedule for design {}: {:?}", design.id(), order);
    Ok(Schedule {
        units: order,
        current_ptr: 0,
    })
}
