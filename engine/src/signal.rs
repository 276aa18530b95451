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

//! sampled signals exchanged between block ports
//!
//! Every signal carries a fixed-length sample axis shared by the whole run;
//! the [`Timebase`] owns that axis and hands out cheap `Rc` clones of it.
//! Optical channels within one signal share the axis but not necessarily the
//! carrier frequency.

use num::complex::Complex64;
use std::rc::Rc;

/// the sample instants, shared across all signals of a run
pub type TimeAxis = Rc<[f64]>;

/// the fixed axes of one simulation run
#[derive(Clone, Debug)]
pub struct Timebase {
    num_samples: usize,
    sample_rate: f64,
    symbol_rate: f64,
    time: TimeAxis,
}

impl Timebase {
    pub fn new(num_samples: usize, sample_rate: f64, symbol_rate: f64) -> Self {
        let time: Vec<f64> = (0..num_samples).map(|i| i as f64 / sample_rate).collect();
        Self {
            num_samples,
            sample_rate,
            symbol_rate,
            time: time.into(),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn symbol_rate(&self) -> f64 {
        self.symbol_rate
    }

    /// a shared handle on the time axis
    pub fn time(&self) -> TimeAxis {
        Rc::clone(&self.time)
    }
}

/// the domain tag used to type ports and links
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalDomain {
    Digital,
    Electrical,
    Optical,
    Generic,
    /// accepts any signal; used by instrumentation ports
    Any,
}

impl SignalDomain {
    pub fn accepts(&self, other: SignalDomain) -> bool {
        *self == SignalDomain::Any || *self == other
    }
}

/// symbol-valued signal (bit patterns, symbol streams)
#[derive(Clone, Debug, PartialEq)]
pub struct DigitalSignal {
    pub port: usize,
    pub symbol_rate: f64,
    pub bit_rate: f64,
    /// modulation order (2 for binary)
    pub order: usize,
    pub time: TimeAxis,
    pub samples: Vec<i64>,
}

/// complex-baseband electrical signal with a separate noise array
#[derive(Clone, Debug, PartialEq)]
pub struct ElectricalSignal {
    pub port: usize,
    pub carrier: f64,
    pub sample_rate: f64,
    pub time: TimeAxis,
    pub amplitude: Vec<Complex64>,
    pub noise: Vec<Complex64>,
}

/// parametrized noise bin carried alongside the optical channels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseBin {
    pub freq: f64,
    pub psd: f64,
}

/// a single- or dual-polarization sampled field
#[derive(Clone, Debug, PartialEq)]
pub enum OpticalField {
    Single(Vec<Complex64>),
    Dual([Vec<Complex64>; 2]),
}

impl OpticalField {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(field) => field.len(),
            Self::Dual([x, _]) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// one carrier within an optical channel group
#[derive(Clone, Debug, PartialEq)]
pub struct OpticalChannel {
    pub wave_key: usize,
    pub wave_freq: f64,
    pub jones: [Complex64; 2],
    pub field: OpticalField,
    pub noise: Vec<Complex64>,
}

/// an optical channel group; channels share the time axis, not the carrier
#[derive(Clone, Debug, PartialEq)]
pub struct OpticalSignal {
    pub port: usize,
    pub sample_rate: f64,
    pub time: TimeAxis,
    pub noise_groups: Vec<NoiseBin>,
    pub channels: Vec<OpticalChannel>,
}

/// untyped scalar samples for blocks outside the three main domains
#[derive(Clone, Debug, PartialEq)]
pub struct GenericSignal {
    pub port: usize,
    pub sample_rate: f64,
    pub time: TimeAxis,
    pub samples: Vec<f64>,
}

/// the tagged record flowing along a link
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    Digital(DigitalSignal),
    Electrical(ElectricalSignal),
    Optical(OpticalSignal),
    Generic(GenericSignal),
}

impl Signal {
    pub fn domain(&self) -> SignalDomain {
        match self {
            Self::Digital(_) => SignalDomain::Digital,
            Self::Electrical(_) => SignalDomain::Electrical,
            Self::Optical(_) => SignalDomain::Optical,
            Self::Generic(_) => SignalDomain::Generic,
        }
    }

    /// the output-port index this signal was produced on
    pub fn port(&self) -> usize {
        match self {
            Self::Digital(s) => s.port,
            Self::Electrical(s) => s.port,
            Self::Optical(s) => s.port,
            Self::Generic(s) => s.port,
        }
    }

    pub fn num_samples(&self) -> usize {
        match self {
            Self::Digital(s) => s.samples.len(),
            Self::Electrical(s) => s.amplitude.len(),
            Self::Optical(s) => s.channels.first().map(|c| c.field.len()).unwrap_or(0),
            Self::Generic(s) => s.samples.len(),
        }
    }

    /// all-zero signal of the requested domain; the cold-start value for
    /// feedback inputs that have not been produced yet. `Any` ports seed
    /// with a generic signal.
    pub fn zeros(domain: SignalDomain, port: usize, timebase: &Timebase) -> Self {
        let n = timebase.num_samples();
        match domain {
            SignalDomain::Digital => Self::Digital(DigitalSignal {
                port,
                symbol_rate: timebase.symbol_rate(),
                bit_rate: timebase.symbol_rate(),
                order: 2,
                time: timebase.time(),
                samples: vec![0; n],
            }),
            SignalDomain::Electrical => Self::Electrical(ElectricalSignal {
                port,
                carrier: 0.0,
                sample_rate: timebase.sample_rate(),
                time: timebase.time(),
                amplitude: vec![Complex64::new(0.0, 0.0); n],
                noise: vec![Complex64::new(0.0, 0.0); n],
            }),
            SignalDomain::Optical => Self::Optical(OpticalSignal {
                port,
                sample_rate: timebase.sample_rate(),
                time: timebase.time(),
                noise_groups: Vec::new(),
                channels: vec![OpticalChannel {
                    wave_key: 0,
                    wave_freq: 0.0,
                    jones: [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
                    field: OpticalField::Single(vec![Complex64::new(0.0, 0.0); n]),
                    noise: vec![Complex64::new(0.0, 0.0); n],
                }],
            }),
            SignalDomain::Generic | SignalDomain::Any => Self::Generic(GenericSignal {
                port,
                sample_rate: timebase.sample_rate(),
                time: timebase.time(),
                samples: vec![0.0; n],
            }),
        }
    }
}
