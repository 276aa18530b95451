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

//! the owned per-run context handed to every block invocation
//!
//! Blocks see only the sinks they need: a status/echo sink, the
//! cross-iteration data-table accumulator, and the run's random number
//! generator. The context is constructed once per run and torn down when
//! the run finishes; there is no ambient global state.

use rand_core::RngCore;
use rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Note: the RNG seeded here makes block-level randomness reproducible;
/// runs with the same design, parameters and seed produce identical
/// results and data tables.
const DEFAULT_RNG_SEED: u64 = 0x1F2E3D4C5B6A7988u64;

/// sinks for user-visible block chatter; a GUI would implement this
pub trait StatusSink {
    fn status_message(&mut self, text: &str);
    fn display_data(&mut self, label: &str, text: &str);
}

/// cross-iteration accumulator keyed by user-chosen identifiers
///
/// Each block may append one row per iteration under a key of its
/// choosing; reporting tools read the tables after the run. The store
/// lives for exactly one run: cleared at run start, kept after both
/// normal completion and aborts (no rollback of earlier iterations).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataTables {
    tables: HashMap<String, Vec<Vec<f64>>>,
    /// for each key, the 1-based iteration that produced each row
    iterations: HashMap<String, Vec<usize>>,
}

impl DataTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_row(&mut self, key: &str, iteration: usize, row: Vec<f64>) {
        self.tables.entry(key.to_owned()).or_default().push(row);
        self.iterations
            .entry(key.to_owned())
            .or_default()
            .push(iteration);
    }

    pub fn rows(&self, key: &str) -> Option<&[Vec<f64>]> {
        self.tables.get(key).map(|rows| rows.as_slice())
    }

    pub fn row_iterations(&self, key: &str) -> Option<&[usize]> {
        self.iterations.get(key).map(|its| its.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.iterations.clear();
    }
}

/// what a block action is allowed to touch while it runs
pub trait SimulationContext {
    /// 1-based iteration currently executing
    fn current_iteration(&self) -> usize;

    /// user-visible progress text
    fn status_message(&mut self, text: &str);

    /// echo a labelled value to the user
    fn display_data(&mut self, label: &str, text: &str);

    /// append one row to a cross-iteration data table
    fn append_table_row(&mut self, key: &str, row: Vec<f64>);

    /// the run's random number generator; all block randomness goes
    /// through here so that runs are reproducible
    fn rng(&mut self) -> &mut dyn RngCore;
}

/// the concrete context owned by the iteration controller
pub struct RunContext {
    tables: DataTables,
    iteration: usize,
    rng: Box<dyn RngCore>,
    sink: Option<Rc<RefCell<dyn StatusSink>>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            tables: DataTables::new(),
            iteration: 0,
            rng: Box::new(Xoshiro256StarStar::seed_from_u64(DEFAULT_RNG_SEED)),
            sink: None,
        }
    }

    pub fn with_rng(mut self, rng: Box<dyn RngCore>) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(Box::new(Xoshiro256StarStar::seed_from_u64(seed)))
    }

    pub fn with_sink(mut self, sink: Rc<RefCell<dyn StatusSink>>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub(crate) fn set_iteration(&mut self, iteration: usize) {
        self.iteration = iteration;
    }

    pub(crate) fn clear_tables(&mut self) {
        self.tables.clear();
    }

    pub fn tables(&self) -> &DataTables {
        &self.tables
    }

    pub fn into_tables(self) -> DataTables {
        self.tables
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationContext for RunContext {
    fn current_iteration(&self) -> usize {
        self.iteration
    }

    fn status_message(&mut self, text: &str) {
        log::info!("status: {}", text);
        if let Some(sink) = &self.sink {
            sink.borrow_mut().status_message(text);
        }
    }

    fn display_data(&mut self, label: &str, text: &str) {
        log::debug!("display {}: {}", label, text);
        if let Some(sink) = &self.sink {
            sink.borrow_mut().display_data(label, text);
        }
    }

    fn append_table_row(&mut self, key: &str, row: Vec<f64>) {
        log::trace!("table '{}' += {:?} (iteration {})", key, row, self.iteration);
        self.tables.append_row(key, self.iteration, row);
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        self.rng.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_accumulate_per_iteration() {
        let mut ctx = RunContext::new();
        ctx.set_iteration(1);
        ctx.append_table_row("ber", vec![1.0, 1e-3]);
        ctx.set_iteration(2);
        ctx.append_table_row("ber", vec![2.0, 1e-4]);
        assert_eq!(ctx.tables().rows("ber").unwrap().len(), 2);
        assert_eq!(ctx.tables().row_iterations("ber").unwrap(), &[1, 2]);
        assert!(ctx.tables().rows("missing").is_none());
    }

    #[test]
    fn seeded_rngs_agree() {
        let mut a = RunContext::new().with_seed(7);
        let mut b = RunContext::new().with_seed(7);
        let draws_a: Vec<u64> = (0..4).map(|_| a.rng().next_u64()).collect();
        let draws_b: Vec<u64> = (0..4).map(|_| b.rng().next_u64()).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn sink_receives_messages() {
        #[derive(Default)]
        struct Capture {
            lines: Vec<String>,
        }
        impl StatusSink for Capture {
            fn status_message(&mut self, text: &str) {
                self.lines.push(text.to_owned());
            }
            fn display_data(&mut self, label: &str, text: &str) {
                self.lines.push(format!("{}={}", label, text));
            }
        }
        let capture = Rc::new(RefCell::new(Capture::default()));
        let mut ctx = RunContext::new().with_sink(capture.clone());
        ctx.status_message("running laser");
        ctx.display_data("power", "1.0");
        assert_eq!(
            capture.borrow().lines,
            vec!["running laser".to_owned(), "power=1.0".to_owned()]
        );
    }
}
