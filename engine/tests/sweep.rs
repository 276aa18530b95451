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

//! multi-iteration sweeps over an acyclic chain

use engine::predefined::{constant_source, gain, gaussian_noise, probe};
use engine::{
    Block, BlockOutput, DesignSpec, Direction, Link, LoopbackRef, NodeIndex, ParamLookup,
    ParamRow, ParameterTable, PortLabel, PortProperties, RunState, Settings, Signal, SignalDomain,
    SimulationConfig, SimulationContext, SystemSimulation,
};

fn config(iterations: usize) -> SimulationConfig {
    SimulationConfig {
        design_name: "sweep".into(),
        num_samples: 256,
        sampling_rate: 8e9,
        symbol_rate: 1e9,
        iterations,
        feedback_segments: 1,
        feedback_enabled: true,
        data_path: None,
    }
}

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

fn connect(
    design: &mut DesignSpec,
    src: NodeIndex,
    dst: NodeIndex,
) {
    let src_port = *design
        .get_node(src)
        .borrow()
        .get_port(&"output".into())
        .expect("missing source port");
    let dst_port = *design
        .get_node(dst)
        .borrow()
        .get_port(&"input".into())
        .expect("missing destination port");
    design
        .link_simplex(src, dst, Link::new(&src_port, &dst_port))
        .unwrap();
}

fn block(name: &str, action: engine::RunFn, params: ParameterTable, terminal: bool) -> Block {
    let mut block = Block::new(name, action).with_params(params);
    if terminal {
        block.set_ports_properties(&[in_port("input")]);
    } else if name.contains("laser") {
        block.set_ports_properties(&[out_port("output")]);
    } else {
        block.set_ports_properties(&[in_port("input"), out_port("output")]);
    }
    block
}

#[test]
fn chain_accumulates_one_row_per_iteration() -> anyhow::Result<()> {
    let mut design = DesignSpec::new();
    let laser = design
        .add_block(block(
            "laser",
            constant_source,
            vec![ParamRow::float("level", 2.0, "a.u.")],
            false,
        ))
        .unwrap();
    let amp = design
        .add_block(block(
            "amp",
            gain,
            vec![ParamRow::float("gain", 0.5, "")],
            false,
        ))
        .unwrap();
    let monitor = design
        .add_block(block(
            "monitor",
            probe,
            vec![ParamRow::text("table", "power")],
            true,
        ))
        .unwrap();
    connect(&mut design, laser, amp);
    connect(&mut design, amp, monitor);

    let mut sim = SystemSimulation::new(&design, config(3))?;
    sim.run(&design)?;
    assert_eq!(sim.state(), RunState::Finished);

    let rows = sim.tables().rows("power").unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(sim.tables().row_iterations("power").unwrap(), &[1, 2, 3]);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row[0], (i + 1) as f64);
        // |2.0 * 0.5|^2
        assert!((row[1] - 1.0).abs() < 1e-12);
    }

    // the probe reports the same value in its results table
    let results = design.get_node(monitor).borrow().results().to_vec();
    assert!(results.iter().any(|r| r.name == "mean power"));
    Ok(())
}

/// records the mean noise power of its input
fn noise_power_recorder(
    _state: LoopbackRef,
    inputs: &[Signal],
    _params: &mut ParameterTable,
    settings: &Settings,
    ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    let sig = match &inputs[0] {
        Signal::Electrical(sig) => sig,
        other => anyhow::bail!("expected electrical input, got {:?}", other.domain()),
    };
    let power = sig.noise.iter().map(|a| a.norm_sqr()).sum::<f64>() / sig.noise.len() as f64;
    ctx.append_table_row("noise_power", vec![settings.current_iteration as f64, power]);
    Ok(BlockOutput::default())
}

fn noisy_design() -> DesignSpec {
    let mut design = DesignSpec::new();
    let laser = design
        .add_block(block(
            "laser",
            constant_source,
            vec![ParamRow::float("level", 1.0, "a.u.")],
            false,
        ))
        .unwrap();
    let awgn = design
        .add_block(block(
            "awgn",
            gaussian_noise,
            vec![ParamRow::float("sigma", 0.1, "")],
            false,
        ))
        .unwrap();
    let meter = design
        .add_block(block("meter", noise_power_recorder, Vec::new(), true))
        .unwrap();
    connect(&mut design, laser, awgn);
    connect(&mut design, awgn, meter);
    design
}

#[test]
fn identical_seeds_reproduce_the_run() -> anyhow::Result<()> {
    let design_a = noisy_design();
    let mut sim_a = SystemSimulation::new(&design_a, config(4))?.with_seed(42);
    sim_a.run(&design_a)?;

    let design_b = noisy_design();
    let mut sim_b = SystemSimulation::new(&design_b, config(4))?.with_seed(42);
    sim_b.run(&design_b)?;

    assert_eq!(sim_a.tables(), sim_b.tables());

    let design_c = noisy_design();
    let mut sim_c = SystemSimulation::new(&design_c, config(4))?.with_seed(43);
    sim_c.run(&design_c)?;
    assert_ne!(
        sim_a.tables().rows("noise_power"),
        sim_c.tables().rows("noise_power")
    );
    Ok(())
}

/// computes its decision threshold once and keeps it across iterations
fn auto_threshold(
    _state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    let sig = match &inputs[0] {
        Signal::Electrical(sig) => sig,
        other => anyhow::bail!("expected electrical input, got {:?}", other.domain()),
    };
    if params.param_f64("threshold").is_none() {
        let mean = sig.amplitude.iter().map(|a| a.re).sum::<f64>() / sig.amplitude.len() as f64;
        params.set_param_f64("threshold", mean / 2.0);
    }
    let threshold = params.param_f64("threshold").unwrap();
    ctx.append_table_row(
        "threshold",
        vec![settings.current_iteration as f64, threshold],
    );
    Ok(BlockOutput::default())
}

#[test]
fn self_adjusted_parameters_persist_across_iterations() -> anyhow::Result<()> {
    let mut design = DesignSpec::new();
    let laser = design
        .add_block(block(
            "laser",
            constant_source,
            vec![ParamRow::float("level", 2.0, "a.u.")],
            false,
        ))
        .unwrap();
    let slicer = design
        .add_block(block("slicer", auto_threshold, Vec::new(), true))
        .unwrap();
    connect(&mut design, laser, slicer);

    let mut sim = SystemSimulation::new(&design, config(3))?;
    sim.run(&design)?;

    let rows = sim.tables().rows("threshold").unwrap();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert!((row[1] - 1.0).abs() < 1e-12);
    }
    // the adjusted parameter is still on the block after the run
    assert_eq!(
        design
            .get_node(slicer)
            .borrow()
            .params()
            .param_f64("threshold"),
        Some(1.0)
    );
    Ok(())
}
