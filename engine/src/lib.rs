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

//! dataflow execution engine for multi-domain communication-system designs
//!
//! Functional blocks (lasers, modulators, fibers, detectors -- anything
//! implementing the run contract) are assembled into a directed multigraph
//! and simulated over a fixed-length sampled time window. The engine
//! schedules acyclic blocks topologically, resolves feedback cycles by
//! segmenting the sample axis, and drives outer Monte-Carlo / sweep
//! iterations while accumulating cross-iteration data tables.

mod block;
mod context;
mod design;
mod error;
mod feedback;
mod ports;
mod router;
mod schedule;
mod settings;
mod signal;
mod sim;

// reusable non-physics block actions (sources, gain, probes, ...)
pub mod predefined;

// Public types
// type to use for iteration counters
pub type Iteration = usize;

pub use crate::block::{
    Block, BlockOutput, BlockState, CalculationStatus, LoopbackRef, ParamLookup, ParamRow,
    ParamValue, ParameterTable, ResultRow, RunFn,
};
pub use crate::context::{DataTables, RunContext, SimulationContext, StatusSink};
pub use crate::design::{DesignSpec, GraphId, Link};
pub use crate::error::Error;
pub use crate::feedback::{segment_range, segment_start, FeedbackGroup, SegmentState};
pub use crate::ports::{to_portmap, Port, PortLabel, PortMap, PortProperties};
pub use crate::router::SignalRouter;
pub use crate::schedule::{build_schedule, Schedule, ScheduleUnit};
pub use crate::settings::{Settings, SimulationConfig};
pub use crate::signal::{
    DigitalSignal, ElectricalSignal, GenericSignal, NoiseBin, OpticalChannel, OpticalField,
    OpticalSignal, Signal, SignalDomain, TimeAxis, Timebase,
};
pub use crate::sim::{ControlFlags, RunState, SystemSimulation};
pub use petgraph::graph::{EdgeIndex, NodeIndex};
pub use petgraph::Direction;
