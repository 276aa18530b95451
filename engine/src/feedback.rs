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

//! feedback groups and segment stepping
//!
//! A cyclic subgraph cannot be topologically ordered, and a per-sample
//! causal solver would re-invoke every block action once per sample. The
//! compromise is segment stepping: the sample axis is split into
//! `segments` contiguous ranges, and within one iteration the whole group
//! is re-invoked once per segment, each pass observing the feedback values
//! produced by the previous pass. The result is exact whenever the loop's
//! physical delay is at least one segment long, and quasi-causal (one
//! segment of lookback error) otherwise.

use petgraph::prelude::*;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

use crate::design::DesignSpec;

/// where a group is within its per-iteration segment sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentState {
    Uninitialized,
    /// 1-based segment currently executing
    Segment(usize),
    Converged,
}

/// a maximal cyclic subgraph scheduled as one unit
#[derive(Clone, Debug)]
pub struct FeedbackGroup {
    /// member blocks in execution order
    members: Vec<NodeIndex>,
    segments: usize,
    /// 1-based cursor; 0 before the first segment of an iteration
    current_segment: usize,
    enabled: bool,
    state: SegmentState,
}

impl FeedbackGroup {
    pub(crate) fn new(
        design: &DesignSpec,
        members: Vec<NodeIndex>,
        segments: usize,
        enabled: bool,
    ) -> Self {
        let members = execution_order(design, members);
        Self {
            members,
            segments,
            current_segment: 0,
            enabled,
            state: SegmentState::Uninitialized,
        }
    }

    pub fn members(&self) -> &[NodeIndex] {
        &self.members
    }

    pub fn contains(&self, node: NodeIndex) -> bool {
        self.members.contains(&node)
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    /// a disabled group degrades to a single pass with zero-pinned feedback
    pub fn effective_segments(&self) -> usize {
        if self.enabled {
            self.segments
        } else {
            1
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn current_segment(&self) -> usize {
        self.current_segment
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub(crate) fn begin_iteration(&mut self) {
        self.current_segment = 0;
        self.state = SegmentState::Uninitialized;
    }

    /// step the segment state machine; returns the next 1-based segment to
    /// execute, or None once the group has converged for this iteration
    pub(crate) fn advance(&mut self) -> Option<usize> {
        let last = self.effective_segments();
        match self.state {
            SegmentState::Uninitialized => {
                self.current_segment = 1;
                self.state = SegmentState::Segment(1);
                Some(1)
            }
            SegmentState::Segment(k) if k < last => {
                self.current_segment = k + 1;
                self.state = SegmentState::Segment(k + 1);
                Some(k + 1)
            }
            SegmentState::Segment(_) => {
                self.state = SegmentState::Converged;
                None
            }
            SegmentState::Converged => None,
        }
    }
}

/// first sample index of a 1-based segment
///
/// Boundaries are round(k * n / segments); with segments <= n consecutive
/// boundaries are strictly increasing, so the ranges partition [0, n)
/// with no gaps and no double-claims.
pub fn segment_start(segment: usize, num_samples: usize, segments: usize) -> usize {
    debug_assert!(segment >= 1 && segment <= segments);
    debug_assert!(segments >= 1 && segments <= num_samples);
    (((segment - 1) * num_samples) as f64 / segments as f64).round() as usize
}

/// the sample range a 1-based segment owns in the converged output
pub fn segment_range(segment: usize, num_samples: usize, segments: usize) -> Range<usize> {
    let start = segment_start(segment, num_samples, segments);
    let end = if segment == segments {
        num_samples
    } else {
        segment_start(segment + 1, num_samples, segments)
    };
    start..end
}

/// deterministic quasi-topological order of the group members: repeatedly
/// pick the member with the fewest unexecuted in-group predecessors,
/// breaking ties by node index. Self-loops do not count. The first member
/// in this order is the one that observes zero-seeded feedback on the
/// cold-start segment.
fn execution_order(design: &DesignSpec, members: Vec<NodeIndex>) -> Vec<NodeIndex> {
    let set: HashSet<NodeIndex> = members.iter().copied().collect();
    let mut indeg: HashMap<NodeIndex, usize> = members
        .iter()
        .map(|&m| {
            let degree = design
                .get_input_links(m)
                .filter(|e| {
                    let (src, _) = design.get_link_endpoints(e.id());
                    src != m && set.contains(&src)
                })
                .count();
            (m, degree)
        })
        .collect();

    let mut remaining = members;
    remaining.sort();
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let (pos, next) = remaining
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|&(_, n)| (indeg[&n], n.index()))
            .unwrap();
        remaining.remove(pos);
        order.push(next);
        for e in design.get_output_links(next) {
            let (_, dst) = design.get_link_endpoints(e.id());
            if dst != next && set.contains(&dst) {
                if let Some(d) = indeg.get_mut(&dst) {
                    *d = d.saturating_sub(1);
                }
            }
        }
    }
    order
}
