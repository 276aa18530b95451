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

//! predefined block actions
//!
//! These implement the run contract without any transfer-function physics;
//! they are the building bricks for tests, benches and demo designs. Blocks
//! with real physics live outside the engine and plug in through the same
//! contract.

use anyhow::ensure;
use num::complex::Complex64;
use rand::Rng;

use crate::block::{BlockOutput, LoopbackRef, ParamLookup, ParameterTable, ResultRow};
use crate::context::SimulationContext;
use crate::feedback::segment_start;
use crate::settings::Settings;
use crate::signal::{DigitalSignal, ElectricalSignal, Signal};

fn electrical(inputs: &[Signal], index: usize) -> anyhow::Result<&ElectricalSignal> {
    match inputs.get(index) {
        Some(Signal::Electrical(sig)) => Ok(sig),
        Some(other) => anyhow::bail!(
            "input {} should be electrical, got {:?}",
            index,
            other.domain()
        ),
        None => anyhow::bail!("missing input {}", index),
    }
}

fn emit_electrical(
    port: usize,
    settings: &Settings,
    amplitude: Vec<Complex64>,
    noise: Vec<Complex64>,
) -> Signal {
    Signal::Electrical(ElectricalSignal {
        port,
        carrier: 0.0,
        sample_rate: settings.sampling_rate,
        time: settings.timebase.time(),
        amplitude,
        noise,
    })
}

/**
 * An alternating symbol source: 0101... at the configured symbol rate.
 *
 * One digital output on port 0. Parameter `order` selects the modulation
 * order reported downstream (default binary).
 */
pub fn bit_source(
    _state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    _ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(inputs.is_empty(), "bit_source takes no inputs");
    let order = params.param_f64("order").unwrap_or(2.0) as usize;
    let per_symbol = settings.samples_per_sym.max(1);
    let samples = (0..settings.num_samples)
        .map(|i| ((i / per_symbol) % 2) as i64)
        .collect();
    Ok(BlockOutput::signals(vec![Signal::Digital(DigitalSignal {
        port: 0,
        symbol_rate: settings.symbol_rate,
        bit_rate: settings.symbol_rate * (order as f64).log2(),
        order,
        time: settings.timebase.time(),
        samples,
    })]))
}

/**
 * A constant electrical source: amplitude `level` on every sample.
 */
pub fn constant_source(
    _state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    _ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(inputs.is_empty(), "constant_source takes no inputs");
    let level = params.param_f64("level").unwrap_or(1.0);
    let n = settings.num_samples;
    Ok(BlockOutput::signals(vec![emit_electrical(
        0,
        settings,
        vec![Complex64::new(level, 0.0); n],
        vec![Complex64::new(0.0, 0.0); n],
    )]))
}

/**
 * Scales an electrical signal (and its noise) by the `gain` parameter.
 */
pub fn gain(
    _state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    _ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(inputs.len() == 1, "gain takes exactly one input");
    let g = params.param_f64("gain").unwrap_or(1.0);
    let input = electrical(inputs, 0)?;
    let amplitude = input.amplitude.iter().map(|a| a * g).collect();
    let noise = input.noise.iter().map(|a| a * g).collect();
    Ok(BlockOutput::signals(vec![emit_electrical(
        0, settings, amplitude, noise,
    )]))
}

/**
 * A fan_in sums N electrical inputs sample-by-sample onto one output.
 */
pub fn fan_in(
    _state: LoopbackRef,
    inputs: &[Signal],
    _params: &mut ParameterTable,
    settings: &Settings,
    _ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(!inputs.is_empty(), "fan_in needs at least one input");
    let n = settings.num_samples;
    let mut amplitude = vec![Complex64::new(0.0, 0.0); n];
    let mut noise = vec![Complex64::new(0.0, 0.0); n];
    for index in 0..inputs.len() {
        let input = electrical(inputs, index)?;
        ensure!(
            input.amplitude.len() == n,
            "input {} has {} samples, run has {}",
            index,
            input.amplitude.len(),
            n
        );
        for i in 0..n {
            amplitude[i] += input.amplitude[i];
            noise[i] += input.noise[i];
        }
    }
    Ok(BlockOutput::signals(vec![emit_electrical(
        0, settings, amplitude, noise,
    )]))
}

/**
 * Additive white Gaussian noise on top of the input, standard deviation
 * `sigma` per quadrature. All randomness is drawn from the run context, so
 * a fixed seed reproduces the run exactly.
 */
pub fn gaussian_noise(
    _state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(inputs.len() == 1, "gaussian_noise takes exactly one input");
    let sigma = params.param_f64("sigma").unwrap_or(1.0);
    let input = electrical(inputs, 0)?;
    let amplitude = input.amplitude.clone();
    let noise = input
        .noise
        .iter()
        .map(|prior| {
            // Box-Muller from two uniform draws
            let u1: f64 = ctx.rng().gen::<f64>().max(f64::MIN_POSITIVE);
            let u2: f64 = ctx.rng().gen();
            let radius = (-2.0 * u1.ln()).sqrt();
            let angle = 2.0 * std::f64::consts::PI * u2;
            prior + Complex64::new(sigma * radius * angle.cos(), sigma * radius * angle.sin())
        })
        .collect();
    Ok(BlockOutput::signals(vec![emit_electrical(
        0, settings, amplitude, noise,
    )]))
}

/**
 * A measurement sink: appends one `[iteration, mean power]` row per
 * iteration to the data table named by the `table` parameter and reports
 * the same value in its results.
 */
pub fn probe(
    _state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(inputs.len() == 1, "probe takes exactly one input");
    let input = electrical(inputs, 0)?;
    let power = input.amplitude.iter().map(|a| a.norm_sqr()).sum::<f64>()
        / input.amplitude.len().max(1) as f64;
    let key = params.param_str("table").unwrap_or("probe").to_owned();
    ctx.append_table_row(&key, vec![settings.current_iteration as f64, power]);
    ctx.display_data(&key, &format!("{:.6e}", power));
    Ok(BlockOutput {
        signals: Vec::new(),
        results: vec![
            ResultRow::header("Probe"),
            ResultRow::value("mean power", power, "a.u."),
        ],
    })
}

/**
 * Feedback loop driver: output = drive + gain * feedback.
 *
 * Input 0 is the feedback path. The action honors the segment persistence
 * convention: on segment k it rewrites only the samples at or past the
 * segment start index, keeping the earlier samples from the previous
 * segment pass in its persistent state. On the cold-start segment the
 * feedback input reads all-zero, so the first segment's output is the bare
 * drive level.
 */
pub fn driven_combiner(
    state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    _ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(inputs.len() == 1, "driven_combiner takes the feedback input");
    let state = state.ok_or_else(|| anyhow::anyhow!("driven_combiner needs persistent state"))?;
    let drive = params.param_f64("drive").unwrap_or(1.0);
    let g = params.param_f64("gain").unwrap_or(1.0);
    let feedback = electrical(inputs, 0)?;
    let n = settings.num_samples;
    let start = segment_start(
        settings.feedback_current_segment,
        n,
        settings.feedback_segments,
    );
    let out = state.array_mut("out", n);
    for i in start..n {
        out[i] = Complex64::new(drive, 0.0) + feedback.amplitude[i] * g;
    }
    let amplitude = out.clone();
    Ok(BlockOutput::signals(vec![emit_electrical(
        0,
        settings,
        amplitude,
        vec![Complex64::new(0.0, 0.0); n],
    )]))
}

/**
 * Segment-respecting gain: like `gain`, but rewrites only the samples at
 * or past the current segment start, for use inside feedback loops.
 */
pub fn segment_gain(
    state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    _ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput> {
    ensure!(inputs.len() == 1, "segment_gain takes exactly one input");
    let state = state.ok_or_else(|| anyhow::anyhow!("segment_gain needs persistent state"))?;
    let g = params.param_f64("gain").unwrap_or(1.0);
    let input = electrical(inputs, 0)?;
    let n = settings.num_samples;
    let start = segment_start(
        settings.feedback_current_segment,
        n,
        settings.feedback_segments,
    );
    let out = state.array_mut("out", n);
    for i in start..n {
        out[i] = input.amplitude[i] * g;
    }
    let amplitude = out.clone();
    Ok(BlockOutput::signals(vec![emit_electrical(
        0,
        settings,
        amplitude,
        vec![Complex64::new(0.0, 0.0); n],
    )]))
}
