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

//! run configuration and the per-invocation settings view
//!
//! `SimulationConfig` is what the user writes (typically as YAML);
//! `Settings` is the read-only view the controller derives from it for
//! every block invocation, with the iteration and feedback-segment cursors
//! filled in.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::signal::Timebase;

fn default_segments() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

fn default_iterations() -> usize {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub design_name: String,
    pub num_samples: usize,
    /// samples per second
    pub sampling_rate: f64,
    /// symbols per second
    pub symbol_rate: f64,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_segments")]
    pub feedback_segments: usize,
    #[serde(default = "default_enabled")]
    pub feedback_enabled: bool,
    /// where blocks may read/write auxiliary data files
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

impl SimulationConfig {
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.num_samples == 0 {
            return Err(Error::InvalidConfig("num_samples must be > 0".into()));
        }
        if !(self.sampling_rate > 0.0) {
            return Err(Error::InvalidConfig("sampling_rate must be > 0".into()));
        }
        if !(self.symbol_rate > 0.0) {
            return Err(Error::InvalidConfig("symbol_rate must be > 0".into()));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be > 0".into()));
        }
        if self.feedback_segments == 0 || self.feedback_segments > self.num_samples {
            return Err(Error::InvalidConfig(format!(
                "feedback_segments must be in 1..={}",
                self.num_samples
            )));
        }
        Ok(())
    }

    pub fn timebase(&self) -> Timebase {
        Timebase::new(self.num_samples, self.sampling_rate, self.symbol_rate)
    }

    /// the settings view for one block invocation; the timebase is shared
    /// so that every signal built from these settings reuses one time axis
    pub fn settings(
        &self,
        timebase: &Timebase,
        current_iteration: usize,
        feedback_current_segment: usize,
    ) -> Settings {
        let sampling_period = 1.0 / self.sampling_rate;
        Settings {
            timebase: timebase.clone(),
            num_samples: self.num_samples,
            sampling_rate: self.sampling_rate,
            sampling_period,
            time_window: self.num_samples as f64 * sampling_period,
            symbol_rate: self.symbol_rate,
            samples_per_sym: (self.sampling_rate / self.symbol_rate).round() as usize,
            current_iteration,
            iterations: self.iterations,
            feedback_segments: self.feedback_segments,
            feedback_current_segment,
            feedback_enabled: self.feedback_enabled,
            samples_per_segment: (self.num_samples as f64 / self.feedback_segments as f64).round()
                as usize,
            design_name: self.design_name.clone(),
            data_path: self.data_path.clone(),
        }
    }
}

/// the read-only mapping every block action receives
#[derive(Clone, Debug)]
pub struct Settings {
    /// the run's shared sample axis
    pub timebase: Timebase,
    pub num_samples: usize,
    pub sampling_rate: f64,
    pub sampling_period: f64,
    pub time_window: f64,
    pub symbol_rate: f64,
    pub samples_per_sym: usize,
    /// 1-based iteration currently executing
    pub current_iteration: usize,
    pub iterations: usize,
    pub feedback_segments: usize,
    /// 1-based segment currently executing; 1 outside feedback groups
    pub feedback_current_segment: usize,
    pub feedback_enabled: bool,
    pub samples_per_segment: usize,
    pub design_name: String,
    pub data_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig {
            design_name: "test".into(),
            num_samples: 1000,
            sampling_rate: 1e10,
            symbol_rate: 1e9,
            iterations: 3,
            feedback_segments: 4,
            feedback_enabled: true,
            data_path: None,
        }
    }

    #[test]
    fn derived_settings() {
        let cfg = config();
        let tb = cfg.timebase();
        let s = cfg.settings(&tb, 2, 3);
        assert_eq!(s.timebase.num_samples(), 1000);
        assert_eq!(s.current_iteration, 2);
        assert_eq!(s.feedback_current_segment, 3);
        assert_eq!(s.samples_per_sym, 10);
        assert_eq!(s.samples_per_segment, 250);
        assert!((s.time_window - 1e-7).abs() < 1e-20);
    }

    #[test]
    fn yaml_round_trip_with_defaults() {
        let cfg = SimulationConfig::from_yaml(
            "design_name: ring\nnum_samples: 64\nsampling_rate: 8.0e9\nsymbol_rate: 1.0e9\n",
        )
        .unwrap();
        assert_eq!(cfg.iterations, 1);
        assert_eq!(cfg.feedback_segments, 1);
        assert!(cfg.feedback_enabled);
        assert!(cfg.data_path.is_none());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut cfg = config();
        cfg.feedback_segments = 2000;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        let mut cfg = config();
        cfg.num_samples = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
        let mut cfg = config();
        cfg.iterations = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }
}
