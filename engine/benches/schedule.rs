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

use bencher::Bencher;
use bencher::{benchmark_group, benchmark_main};

use engine::predefined::{constant_source, driven_combiner, gain, segment_gain};
use engine::{
    build_schedule, Block, DesignSpec, Direction, Link, ParamRow, PortLabel, PortProperties,
    SignalDomain, SimulationConfig, SystemSimulation,
};

fn ports(input: bool, output: bool) -> Vec<(PortLabel, PortProperties)> {
    let mut props = Vec::new();
    if input {
        props.push((
            PortLabel::from("input"),
            PortProperties {
                direction: Direction::Incoming,
                domain: SignalDomain::Electrical,
                ..Default::default()
            },
        ));
    }
    if output {
        props.push((
            PortLabel::from("output"),
            PortProperties {
                direction: Direction::Outgoing,
                domain: SignalDomain::Electrical,
                ..Default::default()
            },
        ));
    }
    props
}

fn connect(design: &mut DesignSpec, src: engine::NodeIndex, dst: engine::NodeIndex) {
    let src_port = *design
        .get_node(src)
        .borrow()
        .get_port(&"output".into())
        .unwrap();
    let dst_port = *design
        .get_node(dst)
        .borrow()
        .get_port(&"input".into())
        .unwrap();
    design
        .link_simplex(src, dst, Link::new(&src_port, &dst_port))
        .unwrap();
}

/// a 64-stage amplifier chain
fn chain_design() -> DesignSpec {
    let mut design = DesignSpec::new();
    let mut head = Block::new("source", constant_source);
    head.set_ports_properties(&ports(false, true));
    let mut prev = design.add_block(head).unwrap();
    for stage in 0..64 {
        let mut block = Block::new(&format!("stage{}", stage), gain)
            .with_params(vec![ParamRow::float("gain", 1.01, "")]);
        block.set_ports_properties(&ports(true, true));
        let node = design.add_block(block).unwrap();
        connect(&mut design, prev, node);
        prev = node;
    }
    design
}

fn schedule_chain(bench: &mut Bencher) {
    let design = chain_design();
    let groups = design.detect_cycles(1, true);
    bench.iter(|| {
        build_schedule(&design, &groups).expect("Failed scheduling");
    });
}

fn segment_solve_ring(bench: &mut Bencher) {
    let mut design = DesignSpec::new();
    let mut cavity = Block::new("cavity", driven_combiner)
        .with_params(vec![
            ParamRow::float("drive", 1.0, "a.u."),
            ParamRow::float("gain", 0.5, ""),
        ])
        .with_state();
    cavity.set_ports_properties(&[
        (
            PortLabel::from("feedback"),
            PortProperties {
                direction: Direction::Incoming,
                domain: SignalDomain::Electrical,
                ..Default::default()
            },
        ),
        (
            PortLabel::from("output"),
            PortProperties {
                direction: Direction::Outgoing,
                domain: SignalDomain::Electrical,
                ..Default::default()
            },
        ),
    ]);
    let mut mirror = Block::new("mirror", segment_gain)
        .with_params(vec![ParamRow::float("gain", 0.5, "")])
        .with_state();
    mirror.set_ports_properties(&ports(true, true));
    let cavity = design.add_block(cavity).unwrap();
    let mirror = design.add_block(mirror).unwrap();
    connect(&mut design, cavity, mirror);
    let mirror_out = *design
        .get_node(mirror)
        .borrow()
        .get_port(&"output".into())
        .unwrap();
    let cavity_fb = *design
        .get_node(cavity)
        .borrow()
        .get_port(&"feedback".into())
        .unwrap();
    design
        .link_simplex(mirror, cavity, Link::new(&mirror_out, &cavity_fb))
        .unwrap();

    let config = SimulationConfig {
        design_name: "bench-ring".into(),
        num_samples: 4096,
        sampling_rate: 8e9,
        symbol_rate: 1e9,
        iterations: 1,
        feedback_segments: 16,
        feedback_enabled: true,
        data_path: None,
    };
    bench.iter(|| {
        let mut sim = SystemSimulation::new(&design, config.clone()).expect("Failed setup");
        sim.run(&design).expect("Failed simulation");
    });
    bench.bytes = (4096 * std::mem::size_of::<f64>() * 2) as u64;
}

benchmark_group!(benches, schedule_chain, segment_solve_ring);
benchmark_main!(benches);
