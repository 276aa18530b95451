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

//! signal routing between block ports
//!
//! Each link holds at most one signal value per scheduling pass. The router
//! owns those values plus the per-port data-ready flags; both are cleared
//! at the start of every iteration. Within a feedback group the slots are
//! deliberately not cleared between segments, which is what lets a segment
//! observe the previous segment's (stale-by-one) feedback values.

use petgraph::prelude::*;
use std::collections::{HashMap, HashSet};

use crate::design::DesignSpec;
use crate::error::Error;
use crate::signal::{Signal, Timebase};

#[derive(Debug, Default)]
pub struct SignalRouter {
    /// the signal last published on each link
    slots: HashMap<EdgeIndex, Signal>,
    /// (destination block, input-port index) pairs with published data
    ready: HashSet<(NodeIndex, usize)>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// clear all slots and ready flags; called at every iteration start
    pub fn reset(&mut self) {
        self.slots.clear();
        self.ready.clear();
    }

    /// deliver a signal to the link's destination port
    pub fn publish(
        &mut self,
        design: &DesignSpec,
        link_id: EdgeIndex,
        signal: Signal,
    ) -> Result<(), Error> {
        let link = design.get_link(link_id);
        let (_, dst) = design.get_link_endpoints(link_id);
        let dst_port = link.dst_port();
        if !dst_port.domain().accepts(signal.domain()) {
            return Err(Error::TypeMismatch {
                block: design.get_node(dst).borrow().name().to_owned(),
                port: dst_port,
                expected: dst_port.domain(),
                found: signal.domain(),
            });
        }
        log::trace!(
            "publish link {} -> block {} port {}",
            link_id.index(),
            dst.index(),
            dst_port
        );
        self.slots.insert(link_id, signal);
        self.ready.insert((dst, dst_port.index()));
        Ok(())
    }

    pub fn is_ready(&self, node: NodeIndex, port_index: usize) -> bool {
        self.ready.contains(&(node, port_index))
    }

    /// the signal currently on a link, if any
    pub fn link_signal(&self, link_id: EdgeIndex) -> Option<&Signal> {
        self.slots.get(&link_id)
    }

    /// positional input vector for a block, in input-port index order
    ///
    /// Unconnected optional ports read as all-zero; a connected port with
    /// no published value is an error.
    pub fn collect(
        &self,
        design: &DesignSpec,
        node: NodeIndex,
        timebase: &Timebase,
    ) -> Result<Vec<Signal>, Error> {
        self.collect_impl(design, node, timebase, false)
    }

    /// like `collect`, but any missing input reads as all-zero; used for
    /// the cold-start segment of a feedback group
    pub fn collect_seeded(
        &self,
        design: &DesignSpec,
        node: NodeIndex,
        timebase: &Timebase,
    ) -> Vec<Signal> {
        // seeding cannot fail
        self.collect_impl(design, node, timebase, true).unwrap()
    }

    fn collect_impl(
        &self,
        design: &DesignSpec,
        node: NodeIndex,
        timebase: &Timebase,
        seed_missing: bool,
    ) -> Result<Vec<Signal>, Error> {
        let inbound: HashMap<usize, EdgeIndex> = design
            .get_input_links(node)
            .map(|e| (e.weight().dst_port().index(), e.id()))
            .collect();
        let block = design.get_node(node);
        let ports = block.borrow().input_ports();
        let mut signals = Vec::with_capacity(ports.len());
        for port in ports {
            let slot = inbound.get(&port.index()).and_then(|id| self.slots.get(id));
            match slot {
                Some(signal) => signals.push(signal.clone()),
                None if seed_missing || (!port.required() && !inbound.contains_key(&port.index())) =>
                {
                    signals.push(Signal::zeros(port.domain(), port.index(), timebase))
                }
                None => {
                    return Err(Error::PortNotReady {
                        block: block.borrow().name().to_owned(),
                        port,
                    })
                }
            }
        }
        Ok(signals)
    }
}
