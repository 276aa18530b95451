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

//! functional blocks: the unit of scheduling
//!
//! A block wraps an action function behind typed ports, a mutable parameter
//! table and a results table. Parameters persist across iterations so that
//! blocks can self-adjust (an auto-computed decision threshold found at
//! iteration 1 is reused afterwards); results are replaced every iteration.

use num::complex::Complex64;
use std::collections::HashMap;

use crate::context::SimulationContext;
use crate::ports::{to_portmap, Port, PortLabel, PortMap, PortProperties};
use crate::settings::Settings;
use crate::signal::Signal;
use crate::Direction;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalculationStatus {
    Ready,
    Running,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Text(String),
    Bool(bool),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// one row of a block's parameter table
#[derive(Clone, Debug, PartialEq)]
pub struct ParamRow {
    pub name: String,
    pub value: ParamValue,
    pub units: String,
    pub notes: String,
}

impl ParamRow {
    pub fn new(name: &str, value: ParamValue, units: &str) -> Self {
        Self {
            name: name.to_owned(),
            value,
            units: units.to_owned(),
            notes: String::new(),
        }
    }

    pub fn float(name: &str, value: f64, units: &str) -> Self {
        Self::new(name, ParamValue::Float(value), units)
    }

    pub fn text(name: &str, value: &str) -> Self {
        Self::new(name, ParamValue::Text(value.to_owned()), "")
    }
}

pub type ParameterTable = Vec<ParamRow>;

/// name-based access into a parameter table
pub trait ParamLookup {
    fn param(&self, name: &str) -> Option<&ParamValue>;
    fn param_f64(&self, name: &str) -> Option<f64>;
    fn param_str(&self, name: &str) -> Option<&str>;
    /// overwrite (or append) a float parameter; used by self-adjusting blocks
    fn set_param_f64(&mut self, name: &str, value: f64);
}

impl ParamLookup for ParameterTable {
    fn param(&self, name: &str) -> Option<&ParamValue> {
        self.iter().find(|row| row.name == name).map(|row| &row.value)
    }

    fn param_f64(&self, name: &str) -> Option<f64> {
        self.param(name).and_then(|v| v.as_f64())
    }

    fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(|v| v.as_str())
    }

    fn set_param_f64(&mut self, name: &str, value: f64) {
        match self.iter_mut().find(|row| row.name == name) {
            Some(row) => row.value = ParamValue::Float(value),
            None => self.push(ParamRow::float(name, value, "")),
        }
    }
}

/// one row of a block's results table, produced fresh each iteration
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRow {
    pub name: String,
    pub value: ParamValue,
    pub units: String,
    pub notes: String,
    pub is_header: bool,
    pub format: String,
}

impl ResultRow {
    pub fn value(name: &str, value: f64, units: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: ParamValue::Float(value),
            units: units.to_owned(),
            notes: String::new(),
            is_header: false,
            format: "0.3E".to_owned(),
        }
    }

    pub fn header(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: ParamValue::Text(String::new()),
            units: String::new(),
            notes: String::new(),
            is_header: true,
            format: String::new(),
        }
    }
}

/// keyed sample-array storage that persists across segments and iterations
///
/// Feedback-aware actions keep their output arrays here so that a segment
/// pass can update only the samples at or past the segment start index,
/// leaving the earlier samples from the previous pass untouched.
#[derive(Clone, Debug, Default)]
pub struct BlockState {
    arrays: HashMap<String, Vec<Complex64>>,
}

impl BlockState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn array(&self, key: &str) -> Option<&[Complex64]> {
        self.arrays.get(key).map(|v| v.as_slice())
    }

    /// the named array, created zero-filled to `len` on first access
    pub fn array_mut(&mut self, key: &str, len: usize) -> &mut Vec<Complex64> {
        let entry = self
            .arrays
            .entry(key.to_owned())
            .or_insert_with(|| vec![Complex64::new(0.0, 0.0); len]);
        if entry.len() != len {
            entry.resize(len, Complex64::new(0.0, 0.0));
        }
        entry
    }
}

/// local persistent state available across invocations
pub type LoopbackRef<'a> = Option<&'a mut BlockState>;

/// what one action invocation hands back to the engine
#[derive(Debug, Default)]
pub struct BlockOutput {
    /// one signal per connected output port, tagged with the port index
    pub signals: Vec<Signal>,
    pub results: Vec<ResultRow>,
}

impl BlockOutput {
    pub fn signals(signals: Vec<Signal>) -> Self {
        Self {
            signals,
            results: Vec::new(),
        }
    }
}

/// the block execution contract
///
/// Inputs arrive positionally in input-port index order. Parameters are
/// mutable and persist; settings are the read-only per-invocation view of
/// the run (sample axis, iteration cursor, feedback segment cursor).
pub type RunFn = fn(
    state: LoopbackRef,
    inputs: &[Signal],
    params: &mut ParameterTable,
    settings: &Settings,
    ctx: &mut dyn SimulationContext,
) -> anyhow::Result<BlockOutput>;

/// a named node in the design graph
#[derive(Clone)]
pub struct Block {
    name: String,
    action: RunFn,
    state: Option<BlockState>,
    params: ParameterTable,
    results: Vec<ResultRow>,
    status: CalculationStatus,
    portmap: PortMap,
}

impl Block {
    pub fn new(name: &str, action: RunFn) -> Self {
        Self {
            name: String::from(name),
            action,
            state: None,
            params: Vec::new(),
            results: Vec::new(),
            status: CalculationStatus::Ready,
            portmap: PortMap::new(),
        }
    }

    pub fn with_params(mut self, params: ParameterTable) -> Self {
        self.params = params;
        self
    }

    pub fn with_state(mut self) -> Self {
        self.state = Some(BlockState::new());
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn status(&self) -> CalculationStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: CalculationStatus) {
        self.status = status;
    }

    pub fn set_ports_properties(&mut self, props: &[(PortLabel, PortProperties)]) {
        self.portmap = to_portmap(props);
    }

    pub fn get_port(&self, label: &PortLabel) -> Option<&Port> {
        self.portmap.get(label)
    }

    /// declared input ports in index order; this order is the positional
    /// contract every action relies on
    pub fn input_ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .portmap
            .values()
            .filter(|p| p.direction() == Direction::Incoming)
            .copied()
            .collect();
        ports.sort_by_key(|p| p.index());
        ports.dedup();
        ports
    }

    pub fn output_ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .portmap
            .values()
            .filter(|p| p.direction() == Direction::Outgoing)
            .copied()
            .collect();
        ports.sort_by_key(|p| p.index());
        ports.dedup();
        ports
    }

    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParameterTable {
        &mut self.params
    }

    pub fn results(&self) -> &[ResultRow] {
        &self.results
    }

    pub(crate) fn set_results(&mut self, results: Vec<ResultRow>) {
        self.results = results;
    }

    pub fn persistent_state(&self) -> Option<&BlockState> {
        self.state.as_ref()
    }

    pub fn persistent_state_mut(&mut self) -> LoopbackRef {
        self.state.as_mut()
    }

    pub fn set_persistent_state(&mut self, state: BlockState) {
        self.state = Some(state);
    }

    /// invoke the action; status tracking and error wrapping are handled by
    /// the iteration controller
    pub(crate) fn run_action(
        &mut self,
        inputs: &[Signal],
        settings: &Settings,
        ctx: &mut dyn SimulationContext,
    ) -> anyhow::Result<BlockOutput> {
        (self.action)(self.state.as_mut(), inputs, &mut self.params, settings, ctx)
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let action_str = format!("@ {:#x}", self.action as usize);
        f.debug_struct("Block")
            .field("name", &self.name)
            .field("action", &action_str)
            .field("status", &self.status)
            .field("params", &self.params)
            .field("portmap", &self.portmap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalDomain;

    fn no_op(
        _state: LoopbackRef,
        _inputs: &[Signal],
        _params: &mut ParameterTable,
        _settings: &Settings,
        _ctx: &mut dyn SimulationContext,
    ) -> anyhow::Result<BlockOutput> {
        Ok(BlockOutput::default())
    }

    #[test]
    fn port_order_is_positional() {
        let mut block = Block::new("b", no_op);
        block.set_ports_properties(&[
            (
                PortLabel::from("in"),
                PortProperties {
                    direction: Direction::Incoming,
                    domain: SignalDomain::Electrical,
                    ..Default::default()
                },
            ),
            (
                PortLabel::from(("taps", 2)),
                PortProperties {
                    direction: Direction::Incoming,
                    domain: SignalDomain::Electrical,
                    ..Default::default()
                },
            ),
            (
                PortLabel::from("out"),
                PortProperties {
                    direction: Direction::Outgoing,
                    domain: SignalDomain::Electrical,
                    ..Default::default()
                },
            ),
        ]);
        let inputs = block.input_ports();
        assert_eq!(
            inputs.iter().map(|p| p.index()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(block.output_ports().len(), 1);
    }

    #[test]
    fn param_lookup_and_self_adjustment() {
        let mut params: ParameterTable = vec![
            ParamRow::float("gain", 2.0, "dB"),
            ParamRow::text("table", "ber"),
        ];
        assert_eq!(params.param_f64("gain"), Some(2.0));
        assert_eq!(params.param_str("table"), Some("ber"));
        assert_eq!(params.param_f64("missing"), None);
        params.set_param_f64("gain", 3.5);
        params.set_param_f64("threshold", 0.25);
        assert_eq!(params.param_f64("gain"), Some(3.5));
        assert_eq!(params.param_f64("threshold"), Some(0.25));
    }

    #[test]
    fn state_arrays_resize_and_persist() {
        let mut state = BlockState::new();
        state.array_mut("out", 4)[2] = Complex64::new(1.0, 0.0);
        assert_eq!(state.array("out").unwrap()[2], Complex64::new(1.0, 0.0));
        // re-request with the same length keeps contents
        assert_eq!(state.array_mut("out", 4)[2], Complex64::new(1.0, 0.0));
    }
}
