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

//! the iteration controller
//!
//! Drives the whole design through `iterations` sequential passes. Cycle
//! detection and scheduling happen once, at construction; every iteration
//! resets the router (data-ready flags and link slots) and walks the
//! schedule, expanding feedback groups into their segment sweeps. Block
//! parameter tables are deliberately not reset between iterations, so that
//! self-adjusted parameters persist.
//!
//! Execution is single-threaded and cooperative: blocks mutate the shared
//! data-table store through the context, so even independent branches of
//! the graph run strictly sequentially. Stop and pause are flags checked
//! between scheduled units; a block invocation is never preempted.

use petgraph::prelude::*;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::block::CalculationStatus;
use crate::context::{DataTables, RunContext, SimulationContext, StatusSink};
use crate::design::DesignSpec;
use crate::error::Error;
use crate::feedback::FeedbackGroup;
use crate::router::SignalRouter;
use crate::schedule::{build_schedule, Schedule, ScheduleUnit};
use crate::settings::{Settings, SimulationConfig};
use crate::signal::{Signal, Timebase};
use crate::Iteration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// 1-based iteration currently executing
    Running(Iteration),
    Paused,
    Stopped,
    Finished,
}

#[derive(Debug, Default)]
struct ControlInner {
    stop: Cell<bool>,
    pause: Cell<bool>,
}

/// cooperative run control shared with the embedding application
///
/// Clone the handle out of the simulation and set the flags from wherever
/// progress is observed (a GUI callback, a signal handler). Flags are
/// honored between scheduled units; a running block completes first.
#[derive(Clone, Debug, Default)]
pub struct ControlFlags {
    inner: Rc<ControlInner>,
}

impl ControlFlags {
    pub fn request_stop(&self) {
        self.inner.stop.set(true);
    }

    pub fn request_pause(&self) {
        self.inner.pause.set(true);
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.get()
    }

    fn take_pause(&self) -> bool {
        let pause = self.inner.pause.get();
        self.inner.pause.set(false);
        pause
    }

    fn clear(&self) {
        self.inner.stop.set(false);
        self.inner.pause.set(false);
    }
}

/// runs a frozen design for a configured number of iterations
pub struct SystemSimulation {
    config: SimulationConfig,
    timebase: Timebase,
    groups: Vec<FeedbackGroup>,
    schedule: Schedule,
    router: SignalRouter,
    context: RunContext,
    control: ControlFlags,
    state: RunState,
    next_iteration: Iteration,
}

impl std::fmt::Debug for SystemSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SystemSimulation")
            .field("config", &self.config)
            .field("timebase", &self.timebase)
            .field("groups", &self.groups)
            .field("schedule", &self.schedule)
            .field("router", &self.router)
            .field("control", &self.control)
            .field("state", &self.state)
            .field("next_iteration", &self.next_iteration)
            .finish_non_exhaustive()
    }
}

impl SystemSimulation {
    pub fn new(design: &DesignSpec, config: SimulationConfig) -> Result<Self, Error> {
        assert!(!design.is_empty(), "designs must contain at least one block");
        config.validate()?;
        let groups = design.detect_cycles(config.feedback_segments, config.feedback_enabled);
        log::debug!(
            "design {}: {} feedback group(s) detected",
            design.id(),
            groups.len()
        );
        let schedule = build_schedule(design, &groups)?;
        let timebase = config.timebase();
        Ok(Self {
            config,
            timebase,
            groups,
            schedule,
            router: SignalRouter::new(),
            context: RunContext::new(),
            control: ControlFlags::default(),
            state: RunState::Idle,
            next_iteration: 1,
        })
    }

    /// replace the run's RNG seed (defaults to a fixed deterministic seed)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.context = self.context_slot().with_seed(seed);
        self
    }

    // small helper so the builder methods can move the context out
    fn context_slot(&mut self) -> RunContext {
        std::mem::replace(&mut self.context, RunContext::new())
    }

    /// attach a status/echo sink (a GUI status window, a logger adapter)
    pub fn with_status_sink(mut self, sink: Rc<RefCell<dyn StatusSink>>) -> Self {
        self.context = self.context_slot().with_sink(sink);
        self
    }

    pub fn control(&self) -> ControlFlags {
        self.control.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn feedback_groups(&self) -> &[FeedbackGroup] {
        &self.groups
    }

    /// the cross-iteration store; readable after the run (or after an
    /// abort, in which case rows from completed iterations remain)
    pub fn tables(&self) -> &DataTables {
        self.context.tables()
    }

    pub fn into_tables(self) -> DataTables {
        self.context.into_tables()
    }

    /// run all iterations to completion (or until stopped/paused)
    ///
    /// Returns Ok on completion, stop and pause; a paused simulation
    /// resumes from the next scheduled unit when `run` is called again.
    /// Structural errors and block failures return Err and end the run.
    pub fn run(&mut self, design: &DesignSpec) -> Result<(), Error> {
        if self.state != RunState::Paused {
            self.control.clear();
            self.context.clear_tables();
            self.next_iteration = 1;
            self.begin_iteration(design, 1);
        }
        loop {
            let iteration = self.next_iteration;
            self.state = RunState::Running(iteration);
            loop {
                // check the flags before taking a unit off the cursor, so a
                // resumed run picks up exactly where this one left off
                if self.control.stop_requested() {
                    log::info!("run stopped at iteration {}", iteration);
                    self.state = RunState::Stopped;
                    return Ok(());
                }
                if self.control.take_pause() {
                    log::info!("run paused at iteration {}", iteration);
                    self.state = RunState::Paused;
                    return Ok(());
                }
                match self.schedule.next() {
                    Some(ScheduleUnit::Block(node)) => self.run_block(design, node, iteration)?,
                    Some(ScheduleUnit::Group(group)) => self.run_group(design, group, iteration)?,
                    None => break,
                }
            }
            if iteration == self.config.iterations {
                break;
            }
            self.next_iteration = iteration + 1;
            self.begin_iteration(design, self.next_iteration);
        }
        self.state = RunState::Finished;
        log::info!(
            "run finished: {} iteration(s), {} data table(s)",
            self.config.iterations,
            self.context.tables().keys().count()
        );
        Ok(())
    }

    fn begin_iteration(&mut self, design: &DesignSpec, iteration: usize) {
        log::debug!("design {}: starting iteration {}", design.id(), iteration);
        self.router.reset();
        self.schedule.reset();
        self.context.set_iteration(iteration);
        for group in self.groups.iter_mut() {
            group.begin_iteration();
        }
    }

    /// one acyclic block: collect, invoke, publish
    fn run_block(
        &mut self,
        design: &DesignSpec,
        node: NodeIndex,
        iteration: usize,
    ) -> Result<(), Error> {
        let settings = self.config.settings(&self.timebase, iteration, 1);
        let inputs = self.router.collect(design, node, &self.timebase)?;
        self.invoke(design, node, &inputs, &settings, iteration)
    }

    /// one feedback group: sweep the segments, re-invoking every member
    /// once per segment; the router keeps the previous segment's values so
    /// each pass observes stale-by-one feedback, and unpublished feedback
    /// inputs on the cold-start segment read as all-zero
    fn run_group(
        &mut self,
        design: &DesignSpec,
        group_index: usize,
        iteration: usize,
    ) -> Result<(), Error> {
        let members = self.groups[group_index].members().to_vec();
        log::debug!(
            "feedback group {} ({} member(s), {} segment(s))",
            group_index,
            members.len(),
            self.groups[group_index].effective_segments()
        );
        while let Some(segment) = self.groups[group_index].advance() {
            let settings = self.config.settings(&self.timebase, iteration, segment);
            for &node in &members {
                if self.control.stop_requested() {
                    log::info!("run stopped inside feedback group at segment {}", segment);
                    self.state = RunState::Stopped;
                    return Ok(());
                }
                let inputs = self.router.collect_seeded(design, node, &self.timebase);
                self.invoke(design, node, &inputs, &settings, iteration)?;
            }
        }
        Ok(())
    }

    /// invoke a block action, track its status, and deliver its outputs
    fn invoke(
        &mut self,
        design: &DesignSpec,
        node: NodeIndex,
        inputs: &[Signal],
        settings: &Settings,
        iteration: usize,
    ) -> Result<(), Error> {
        let block_rc = design.get_node(node);
        let name = block_rc.borrow().name().to_owned();
        log::trace!(
            "running block '{}' (iteration {}, segment {})",
            name,
            iteration,
            settings.feedback_current_segment
        );
        let outcome = {
            let mut block = block_rc.borrow_mut();
            block.set_status(CalculationStatus::Running);
            block.run_action(inputs, settings, &mut self.context)
        };
        match outcome {
            Ok(output) => {
                let mut block = block_rc.borrow_mut();
                block.set_status(CalculationStatus::Ready);
                block.set_results(output.results);
                drop(block);
                self.publish_outputs(design, node, &name, output.signals, iteration)
            }
            Err(source) => {
                block_rc.borrow_mut().set_status(CalculationStatus::Error);
                let text = format!("block '{}' failed at iteration {}: {:#}", name, iteration, source);
                log::error!("{}", text);
                self.context.status_message(&text);
                self.state = RunState::Stopped;
                Err(Error::BlockExecution {
                    block: name,
                    iteration,
                    source,
                })
            }
        }
    }

    fn publish_outputs(
        &mut self,
        design: &DesignSpec,
        node: NodeIndex,
        name: &str,
        signals: Vec<Signal>,
        iteration: usize,
    ) -> Result<(), Error> {
        let links: Vec<(EdgeIndex, usize)> = design
            .get_output_links(node)
            .map(|e| (e.id(), e.weight().src_port().index()))
            .collect();
        for (link_id, port_index) in links {
            let signal = match signals.iter().find(|s| s.port() == port_index) {
                Some(signal) => signal,
                None => {
                    self.state = RunState::Stopped;
                    return Err(Error::BlockExecution {
                        block: name.to_owned(),
                        iteration,
                        source: anyhow::anyhow!(
                            "no signal produced for connected output port {}",
                            port_index
                        ),
                    });
                }
            };
            // every signal spans the run's fixed sample axis
            if signal.num_samples() != self.timebase.num_samples() {
                self.state = RunState::Stopped;
                return Err(Error::BlockExecution {
                    block: name.to_owned(),
                    iteration,
                    source: anyhow::anyhow!(
                        "output port {} produced {} samples, run has {}",
                        port_index,
                        signal.num_samples(),
                        self.timebase.num_samples()
                    ),
                });
            }
            self.router.publish(design, link_id, signal.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{
        Block, BlockOutput, CalculationStatus, LoopbackRef, ParamLookup, ParamRow, ParameterTable,
    };
    use crate::design::Link;
    use crate::ports::{PortLabel, PortProperties};
    use crate::signal::{ElectricalSignal, SignalDomain};
    use crate::Direction;
    use num::complex::Complex64;

    fn config(iterations: usize) -> SimulationConfig {
        SimulationConfig {
            design_name: "test".into(),
            num_samples: 32,
            sampling_rate: 8e9,
            symbol_rate: 1e9,
            iterations,
            feedback_segments: 1,
            feedback_enabled: true,
            data_path: None,
        }
    }

    fn constant_level(
        _state: LoopbackRef,
        _inputs: &[Signal],
        params: &mut ParameterTable,
        settings: &Settings,
        ctx: &mut dyn SimulationContext,
    ) -> anyhow::Result<BlockOutput> {
        let level = params.param_f64("level").unwrap_or(1.0);
        ctx.append_table_row("order", vec![settings.current_iteration as f64, 0.0]);
        ctx.status_message("laser running");
        Ok(BlockOutput::signals(vec![Signal::Electrical(
            ElectricalSignal {
                port: 0,
                carrier: 0.0,
                sample_rate: settings.sampling_rate,
                time: settings.timebase.time(),
                amplitude: vec![Complex64::new(level, 0.0); settings.num_samples],
                noise: vec![Complex64::new(0.0, 0.0); settings.num_samples],
            },
        )]))
    }

    fn mean_power_probe(
        _state: LoopbackRef,
        inputs: &[Signal],
        _params: &mut ParameterTable,
        settings: &Settings,
        ctx: &mut dyn SimulationContext,
    ) -> anyhow::Result<BlockOutput> {
        let power = match &inputs[0] {
            Signal::Electrical(sig) => {
                sig.amplitude.iter().map(|a| a.norm_sqr()).sum::<f64>() / sig.amplitude.len() as f64
            }
            other => anyhow::bail!("expected electrical input, got {:?}", other.domain()),
        };
        ctx.append_table_row("order", vec![settings.current_iteration as f64, 1.0]);
        ctx.append_table_row("amp", vec![settings.current_iteration as f64, power]);
        Ok(BlockOutput::default())
    }

    fn fails_on_second_iteration(
        state: LoopbackRef,
        inputs: &[Signal],
        params: &mut ParameterTable,
        settings: &Settings,
        ctx: &mut dyn SimulationContext,
    ) -> anyhow::Result<BlockOutput> {
        if settings.current_iteration == 2 {
            anyhow::bail!("photodiode saturated");
        }
        mean_power_probe(state, inputs, params, settings, ctx)
    }

    fn source_block(name: &str) -> Block {
        let mut block = Block::new(name, constant_level)
            .with_params(vec![ParamRow::float("level", 2.0, "a.u.")]);
        block.set_ports_properties(&[(
            PortLabel::from("output"),
            PortProperties {
                direction: Direction::Outgoing,
                domain: SignalDomain::Electrical,
                ..Default::default()
            },
        )]);
        block
    }

    fn sink_block(name: &str, action: crate::block::RunFn) -> Block {
        let mut block = Block::new(name, action);
        block.set_ports_properties(&[(
            PortLabel::from("input"),
            PortProperties {
                direction: Direction::Incoming,
                domain: SignalDomain::Electrical,
                ..Default::default()
            },
        )]);
        block
    }

    fn linked_pair(sink: Block) -> (DesignSpec, NodeIndex, NodeIndex) {
        let mut design = DesignSpec::new();
        let src = design.add_block(source_block("laser")).unwrap();
        let dst = design.add_block(sink).unwrap();
        let out = *design
            .get_node(src)
            .borrow()
            .get_port(&"output".into())
            .unwrap();
        let inp = *design
            .get_node(dst)
            .borrow()
            .get_port(&"input".into())
            .unwrap();
        design.link_simplex(src, dst, Link::new(&out, &inp)).unwrap();
        (design, src, dst)
    }

    #[test]
    fn chain_runs_once_per_iteration_in_order() {
        let (design, _, _) = linked_pair(sink_block("amp", mean_power_probe));
        let mut sim = SystemSimulation::new(&design, config(3)).unwrap();
        sim.run(&design).unwrap();
        assert_eq!(sim.state(), RunState::Finished);

        // one amp row per iteration, tagged with its iteration
        let amp = sim.tables().rows("amp").unwrap();
        assert_eq!(amp.len(), 3);
        assert_eq!(sim.tables().row_iterations("amp").unwrap(), &[1, 2, 3]);
        for (i, row) in amp.iter().enumerate() {
            assert_eq!(row[0], (i + 1) as f64);
            assert!((row[1] - 4.0).abs() < 1e-12);
        }

        // per-iteration order is laser then amp, three times
        let order = sim.tables().rows("order").unwrap();
        let expected: Vec<Vec<f64>> = (1..=3)
            .flat_map(|it| vec![vec![it as f64, 0.0], vec![it as f64, 1.0]])
            .collect();
        assert_eq!(order, expected.as_slice());
    }

    #[test]
    fn failing_block_aborts_and_keeps_prior_rows() {
        let (design, _, dst) = linked_pair(sink_block("flaky", fails_on_second_iteration));
        let mut sim = SystemSimulation::new(&design, config(5)).unwrap();
        let err = sim.run(&design).unwrap_err();
        match err {
            Error::BlockExecution {
                block, iteration, ..
            } => {
                assert_eq!(block, "flaky");
                assert_eq!(iteration, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            design.get_node(dst).borrow().status(),
            CalculationStatus::Error
        );
        // iteration 1 results survive the abort
        assert_eq!(sim.tables().rows("amp").unwrap().len(), 1);
        assert_eq!(sim.tables().row_iterations("amp").unwrap(), &[1]);
    }

    struct StopOnFirstMessage {
        control: ControlFlags,
    }

    impl StatusSink for StopOnFirstMessage {
        fn status_message(&mut self, _text: &str) {
            self.control.request_stop();
        }
        fn display_data(&mut self, _label: &str, _text: &str) {}
    }

    #[test]
    fn stop_is_honored_between_units() {
        let (design, _, _) = linked_pair(sink_block("amp", mean_power_probe));
        let sim = SystemSimulation::new(&design, config(3)).unwrap();
        let control = sim.control();
        let mut sim = sim.with_status_sink(Rc::new(RefCell::new(StopOnFirstMessage { control })));
        sim.run(&design).unwrap();
        assert_eq!(sim.state(), RunState::Stopped);
        // the laser ran, the amp never did
        assert_eq!(sim.tables().rows("order").unwrap().len(), 1);
        assert!(sim.tables().rows("amp").is_none());
    }

    struct PauseOnce {
        control: ControlFlags,
        done: bool,
    }

    impl StatusSink for PauseOnce {
        fn status_message(&mut self, _text: &str) {
            if !self.done {
                self.done = true;
                self.control.request_pause();
            }
        }
        fn display_data(&mut self, _label: &str, _text: &str) {}
    }

    #[test]
    fn pause_resumes_from_the_next_unit() {
        let (design, _, _) = linked_pair(sink_block("amp", mean_power_probe));
        let sim = SystemSimulation::new(&design, config(2)).unwrap();
        let control = sim.control();
        let mut sim = sim.with_status_sink(Rc::new(RefCell::new(PauseOnce {
            control,
            done: false,
        })));
        sim.run(&design).unwrap();
        assert_eq!(sim.state(), RunState::Paused);
        assert_eq!(sim.tables().rows("order").unwrap().len(), 1);

        sim.run(&design).unwrap();
        assert_eq!(sim.state(), RunState::Finished);
        // no unit ran twice: 2 iterations x (laser + amp)
        assert_eq!(sim.tables().rows("order").unwrap().len(), 4);
        assert_eq!(sim.tables().rows("amp").unwrap().len(), 2);
    }
}

