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

//! design topology
//!
//! A design is a directed multigraph of functional blocks connected by
//! links. The topology is append-only while the user edits the design and
//! frozen for the duration of a simulation run: cycle detection and
//! scheduling are computed once per run, not per iteration.

use itertools::structs::Unique;
use itertools::Itertools;
use petgraph::algo::tarjan_scc;
use petgraph::graph;
use petgraph::graph::{Edges, Neighbors};
use petgraph::prelude::*;
use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::block::Block;
use crate::error::Error;
use crate::feedback::FeedbackGroup;
use crate::ports::Port;
use crate::signal::SignalDomain;

/// Each design graph has a unique ID, so that log lines from concurrent
/// designs in one process can be told apart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphId {
    value: usize,
}

impl Display for GraphId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.value)
    }
}

fn next_design_id() -> GraphId {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let next_value = COUNTER.fetch_add(1, Ordering::Relaxed);
    GraphId { value: next_value }
}

/// directed edge between a source output port and a destination input port
///
/// A link carries exactly one signal value per scheduling pass; its
/// existence is the sole evidence of port connectivity.
#[derive(Clone, Debug)]
pub struct Link {
    src_port: Port,
    dst_port: Port,
}

impl Link {
    pub fn new(src_port: &Port, dst_port: &Port) -> Self {
        assert_eq!(
            src_port.direction(),
            Direction::Outgoing,
            "Link source must be an output port, got {}",
            src_port
        );
        assert_eq!(
            dst_port.direction(),
            Direction::Incoming,
            "Link destination must be an input port, got {}",
            dst_port
        );
        assert!(
            src_port.domain() == dst_port.domain()
                || src_port.domain() == SignalDomain::Any
                || dst_port.domain() == SignalDomain::Any,
            "Mismatched domains for ports {} {:?} -> {} {:?}",
            src_port,
            src_port.domain(),
            dst_port,
            dst_port.domain()
        );
        Self {
            src_port: *src_port,
            dst_port: *dst_port,
        }
    }

    /// constructor for testing.
    ///
    /// Link::new() implies port-declaration boiler plate in tests; this
    /// builds the two ports directly from indices.
    #[cfg(test)]
    pub(crate) fn new_for_testing(src_port: usize, dst_port: usize, domain: SignalDomain) -> Self {
        Self {
            src_port: Port::new_out(src_port, domain),
            dst_port: Port::new_in(dst_port, domain),
        }
    }

    pub fn src_port(&self) -> Port {
        self.src_port
    }

    pub fn dst_port(&self) -> Port {
        self.dst_port
    }
}

#[derive(Clone, Debug)]
pub struct DesignSpec {
    // Blocks are stored through Rc<RefCell<>> so that the controller can
    // hold a reference to a block while traversing the topology. The code
    // is single-threaded; switch to Arc if that ever changes.
    pub(crate) topo: Graph<Rc<RefCell<Block>>, Link>,
    id: GraphId,
}

impl DesignSpec {
    pub fn new() -> Self {
        Self {
            topo: Graph::<Rc<RefCell<Block>>, Link>::new(),
            id: next_design_id(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.topo.node_count() == 0
    }

    /// add a block; block names are the graph keys
    pub fn add_block(&mut self, block: Block) -> Result<NodeIndex, Error> {
        if self.get_node_index_by_name(block.name()).is_some() {
            return Err(Error::DuplicateKey(format!("block '{}'", block.name())));
        }
        Ok(self.topo.add_node(Rc::new(RefCell::new(block))))
    }

    /// unidirectional link between blocks
    ///
    /// Multiple edges are allowed between two blocks, but each output port
    /// drives at most the links explicitly created from it and each input
    /// port is fed by exactly one link.
    pub fn link_simplex(
        &mut self,
        src: NodeIndex,
        dst: NodeIndex,
        link: Link,
    ) -> Result<EdgeIndex, Error> {
        for e in self.topo.edges_connecting(src, dst) {
            if e.weight().src_port() == link.src_port() && e.weight().dst_port() == link.dst_port()
            {
                return Err(Error::DuplicateKey(format!(
                    "link {}:{} -> {}:{}",
                    self.get_node(src).borrow().name(),
                    link.src_port(),
                    self.get_node(dst).borrow().name(),
                    link.dst_port()
                )));
            }
        }
        // an input port accepts a single driver
        for e in self.topo.edges_directed(dst, Direction::Incoming) {
            if e.weight().dst_port() == link.dst_port() {
                return Err(Error::DuplicateKey(format!(
                    "input port {} of block '{}' already connected",
                    link.dst_port(),
                    self.get_node(dst).borrow().name()
                )));
            }
        }
        Ok(self.topo.add_edge(src, dst, link))
    }

    /// return a reference to the block.
    pub fn get_node(&self, node_id: NodeIndex) -> Rc<RefCell<Block>> {
        assert!(node_id.index() < self.topo.node_count());
        Rc::clone(self.topo.node_weight(node_id).unwrap())
    }

    /// Returns the first block index matching name.
    pub fn get_node_index_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.topo
            .node_indices()
            .find(|n| self.get_node(*n).borrow().name() == name)
    }

    /// returns the first block matching name
    pub fn get_node_by_name(&self, name: &str) -> Rc<RefCell<Block>> {
        if let Some(node) = self.get_node_index_by_name(name) {
            self.get_node(node)
        } else {
            panic!("No such block {}", name)
        }
    }

    /// returns the number of inputs and outputs of the block
    pub fn get_node_inout_count(&self, node_id: NodeIndex) -> (usize, usize) {
        (
            self.topo
                .edges_directed(node_id, Direction::Incoming)
                .count(),
            self.topo
                .edges_directed(node_id, Direction::Outgoing)
                .count(),
        )
    }

    /// returns an iterator over all blocks in the topology (their indices)
    pub fn iter_nodes(&self) -> graph::NodeIndices {
        self.topo.node_indices()
    }

    /// return a reference to the link.
    pub fn get_link(&self, link_id: EdgeIndex) -> &Link {
        assert!(link_id.index() < self.topo.edge_count());
        self.topo.edge_weight(link_id).unwrap()
    }

    /// return an iterator over the block's input links
    ///
    /// Note that there is no guarantee that the iterator returns the links
    /// in the order of their dst_ports; callers that depend on positional
    /// order must sort by port index.
    pub fn get_input_links(&self, node_id: NodeIndex) -> Edges<Link, petgraph::Directed> {
        self.topo.edges_directed(node_id, Direction::Incoming)
    }

    /// return an iterator over the block's output links
    pub fn get_output_links(&self, node_id: NodeIndex) -> Edges<Link, petgraph::Directed> {
        self.topo.edges_directed(node_id, Direction::Outgoing)
    }

    /// returns an iterator over all links in the topology (their indices)
    pub fn iter_links(&self) -> graph::EdgeIndices {
        self.topo.edge_indices()
    }

    /// return an iterator over the set of neighbors
    ///
    /// note that petgraph returns a node as a neighbor multiple times, once
    /// for every edge connecting the two nodes; therefore, we filter them
    /// using itertools::Itertools::unique().
    pub fn neighbors(&self, node_id: NodeIndex) -> Unique<Neighbors<Link>> {
        self.topo.neighbors_undirected(node_id).unique()
    }

    pub fn get_link_endpoints(&self, link: EdgeIndex) -> (NodeIndex, NodeIndex) {
        if let Some((src, dst)) = self.topo.edge_endpoints(link) {
            (src, dst)
        } else {
            panic!("missing destination block for link {}", link.index());
        }
    }

    /// partition the cyclic part of the topology into feedback groups
    ///
    /// Every strongly connected component of size > 1, and every single
    /// block with a self-loop, becomes one group. Blocks in no group are
    /// acyclic and scheduled exactly once per iteration. The topology is
    /// static across iterations, so this runs once per simulation run.
    pub fn detect_cycles(&self, segments: usize, feedback_enabled: bool) -> Vec<FeedbackGroup> {
        tarjan_scc(&self.topo)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.topo.find_edge(scc[0], scc[0]).is_some()
            })
            .map(|scc| FeedbackGroup::new(self, scc, segments, feedback_enabled))
            .collect()
    }

    pub fn to_graphviz(&self) -> String {
        use petgraph::dot::{Config, Dot};

        let generator = Dot::with_attr_getters(
            &self.topo,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, edge| {
                format!(
                    "label=\"Link {}\n{:?}\"; headlabel=\"{}\"; taillabel=\"{}\"",
                    edge.id().index(),
                    edge.weight().dst_port().domain(),
                    edge.weight().dst_port(),
                    edge.weight().src_port()
                )
            },
            &|_, node| {
                format!(
                    "label=\"{}\n(id: {})\"",
                    node.1.borrow().name(),
                    node.0.index()
                )
            },
        );
        format!("{:?}", generator)
    }
}

impl Default for DesignSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DesignSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_graphviz())
    }
}
