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

//! A small received-power sweep: a swept source through an amplifier and a
//! noise stage into a power monitor, with a feedback ring on the side.
//! Prints the accumulated data tables after the run.

use num::complex::Complex64;

use engine::predefined::{driven_combiner, gain, gaussian_noise, probe, segment_gain};
use engine::{
    Block, BlockOutput, DesignSpec, Direction, ElectricalSignal, Link, LoopbackRef, NodeIndex,
    ParamLookup, ParamRow, ParameterTable, PortLabel, PortProperties, Settings, Signal,
    SignalDomain, SimulationConfig, SimulationContext, SystemSimulation,
};

fn in_port(label: &'static str) -> (PortLabel, PortProperties) {
    (
        PortLabel::from(label),
        PortProperties {
            direction: Direction::Incoming,
            domain: SignalDomain::Electrical,
            ..Default::default()
        },
    )
}

fn out_port(label: &'static str) -> (PortLabel, PortProperties) {
    (
        PortLabel::from(label),
        PortProperties {
            direction: Direction::Outgoing,
            domain: SignalDomain::Electrical,
            ..Default::default()
        },
    )
}

/// source whose level ramps with the iteration: the sweep variable
fn swept_source(
    _state: LoopbackRef,
    _inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    let base = params.param_f64("base_level").unwrap_or(1.0);
    let step = params.param_f64("level_step").unwrap_or(0.5);
    let level = base + step * (settings.current_iteration - 1) as f64;
    ctx.status_message(&format!(
        "iteration {}/{}: source level {:.2}",
        settings.current_iteration, settings.iterations, level
    ));
    let n = settings.num_samples;
    Ok(BlockOutput::signals(vec![Signal::Electrical(
        ElectricalSignal {
            port: 0,
            carrier: 0.0,
            sample_rate: settings.sampling_rate,
            time: settings.timebase.time(),
            amplitude: vec![Complex64::new(level, 0.0); n],
            noise: vec![Complex64::new(0.0, 0.0); n],
        },
    )]))
}

fn connect(
    design: &mut DesignSpec,
    src: NodeIndex,
    src_label: &'static str,
    dst: NodeIndex,
    dst_label: &'static str,
) -> anyhow::Result<()> {
    let src_port = *design
        .get_node(src)
        .borrow()
        .get_port(&src_label.into())
        .ok_or_else(|| anyhow::anyhow!("missing port {}", src_label))?;
    let dst_port = *design
        .get_node(dst)
        .borrow()
        .get_port(&dst_label.into())
        .ok_or_else(|| anyhow::anyhow!("missing port {}", dst_label))?;
    design.link_simplex(src, dst, Link::new(&src_port, &dst_port))?;
    Ok(())
}

fn build_design() -> anyhow::Result<DesignSpec> {
    let mut design = DesignSpec::new();

    let mut source = Block::new("source", swept_source).with_params(vec![
        ParamRow::float("base_level", 1.0, "a.u."),
        ParamRow::float("level_step", 0.5, "a.u."),
    ]);
    source.set_ports_properties(&[out_port("output")]);

    let mut amp =
        Block::new("amp", gain).with_params(vec![ParamRow::float("gain", 0.8, "")]);
    amp.set_ports_properties(&[in_port("input"), out_port("output")]);

    let mut awgn =
        Block::new("awgn", gaussian_noise).with_params(vec![ParamRow::float("sigma", 0.05, "")]);
    awgn.set_ports_properties(&[in_port("input"), out_port("output")]);

    let mut monitor =
        Block::new("monitor", probe).with_params(vec![ParamRow::text("table", "power")]);
    monitor.set_ports_properties(&[in_port("input")]);

    // a short feedback cavity hanging off the amplifier
    let mut cavity = Block::new("cavity", driven_combiner)
        .with_params(vec![
            ParamRow::float("drive", 1.0, "a.u."),
            ParamRow::float("gain", 0.4, ""),
        ])
        .with_state();
    cavity.set_ports_properties(&[in_port("feedback"), out_port("output")]);

    let mut mirror = Block::new("mirror", segment_gain)
        .with_params(vec![ParamRow::float("gain", 0.4, "")])
        .with_state();
    mirror.set_ports_properties(&[in_port("input"), out_port("output")]);

    let mut cavity_monitor =
        Block::new("cavity_monitor", probe).with_params(vec![ParamRow::text("table", "cavity")]);
    cavity_monitor.set_ports_properties(&[in_port("input")]);

    let source = design.add_block(source)?;
    let amp = design.add_block(amp)?;
    let awgn = design.add_block(awgn)?;
    let monitor = design.add_block(monitor)?;
    let cavity = design.add_block(cavity)?;
    let mirror = design.add_block(mirror)?;
    let cavity_monitor = design.add_block(cavity_monitor)?;

    connect(&mut design, source, "output", amp, "input")?;
    connect(&mut design, amp, "output", awgn, "input")?;
    connect(&mut design, awgn, "output", monitor, "input")?;
    connect(&mut design, cavity, "output", mirror, "input")?;
    connect(&mut design, mirror, "output", cavity, "feedback")?;
    connect(&mut design, cavity, "output", cavity_monitor, "input")?;
    Ok(design)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = SimulationConfig::from_yaml(
        "design_name: linkscan\n\
         num_samples: 2048\n\
         sampling_rate: 8.0e9\n\
         symbol_rate: 1.0e9\n\
         iterations: 8\n\
         feedback_segments: 8\n",
    )?;
    let design = build_design()?;
    log::info!("design:\n{}", design.to_graphviz());

    let mut sim = SystemSimulation::new(&design, config)?.with_seed(1);
    sim.run(&design)?;

    let mut keys = sim.tables().keys().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in keys {
        println!("table '{}':", key);
        let rows = sim.tables().rows(key).unwrap();
        let iterations = sim.tables().row_iterations(key).unwrap();
        for (iteration, row) in iterations.iter().zip(rows) {
            println!("  iteration {:>2}: {:?}", iteration, row);
        }
    }
    Ok(())
}
