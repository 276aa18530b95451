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

use crate::signal::SignalDomain;
use crate::Direction;
use std::collections::HashMap;
use std::convert::{From, Into};

#[derive(Ord, PartialOrd, Eq, PartialEq, Hash, Clone, Copy, Debug)]
pub enum PortLabel {
    Array(&'static str, usize),
    Name(&'static str),
    Number(usize),
}

impl From<&'static str> for PortLabel {
    fn from(name: &'static str) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for PortLabel {
    fn from(number: usize) -> Self {
        Self::Number(number)
    }
}

impl From<(&'static str, usize)> for PortLabel {
    fn from(pair: (&'static str, usize)) -> Self {
        Self::Array(pair.0, pair.1)
    }
}

impl std::fmt::Display for PortLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match &self {
            Self::Array(name, index) => write!(f, "{}[{}]", name, index),
            Self::Name(name) => name.fmt(f),
            Self::Number(number) => number.fmt(f),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PortProperties {
    /// coming or going?
    pub direction: Direction,
    /// actual index for scalar ports, start index for array ports.
    pub index: usize,
    /// the signal domain this port carries
    pub domain: SignalDomain,
    /// required inputs must be connected before scheduling; outputs ignore this.
    pub required: bool,
}

impl Default for PortProperties {
    fn default() -> Self {
        Self {
            direction: Direction::Incoming,
            index: 0,
            domain: SignalDomain::Any,
            required: true,
        }
    }
}

/// A port is an endpoint of a link: an index within its direction plus the
/// properties collected while building the design. Properties do not take
/// part in equality; two ports are the same endpoint if direction and index
/// match.
#[derive(Ord, PartialOrd, Hash, Clone, Copy, Debug)]
pub struct Port {
    index: usize,
    properties: IgnoreEq<PortProperties>,
}

// enable conversion into usize, so that we can index with Ports.
impl Into<usize> for Port {
    fn into(self) -> usize {
        self.index
    }
}

// enable the creation of ports with just a number; although it is better to
// use `new` and give a port direction as well. Default is incoming.
impl From<usize> for Port {
    fn from(index: usize) -> Self {
        Self {
            index,
            properties: IgnoreEq::new(PortProperties::default()),
        }
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Port) -> bool {
        self.direction() == other.direction() && self.index == other.index
    }
}
impl Eq for Port {}

impl Port {
    pub fn new(index: usize, properties: &PortProperties) -> Self {
        Self {
            index,
            properties: IgnoreEq::new(*properties),
        }
    }

    pub fn new_in(index: usize, domain: SignalDomain) -> Self {
        Self {
            index,
            properties: IgnoreEq::new(PortProperties {
                direction: Direction::Incoming,
                domain,
                ..Default::default()
            }),
        }
    }

    pub fn new_out(index: usize, domain: SignalDomain) -> Self {
        Self {
            index,
            properties: IgnoreEq::new(PortProperties {
                direction: Direction::Outgoing,
                domain,
                ..Default::default()
            }),
        }
    }

    pub fn direction(&self) -> Direction {
        self.properties.0.direction
    }

    pub fn domain(&self) -> SignalDomain {
        self.properties.0.domain
    }

    pub fn required(&self) -> bool {
        self.properties.0.required
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl Default for Port {
    fn default() -> Self {
        Port::from(0)
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.index)
    }
}

pub type PortMap = HashMap<PortLabel, Port>;

/// takes an array of port specifications, and turns it into a portmap.
///
/// For each array port, the label has the name and the size of the array,
/// and we expand it to the all individual ports.
/// For all the other ports (named or numbered), we give them the right
/// indices.
pub fn to_portmap(ports: &[(PortLabel, PortProperties)]) -> PortMap {
    let mut input_ports = 0;
    let mut output_ports = 0;
    log::trace!("Port specs: {:#?}", ports);
    ports
        .iter()
        .flat_map(|(label, props)| {
            let base_count = match props.direction {
                Direction::Incoming => &mut input_ports,
                Direction::Outgoing => &mut output_ports,
            };
            match label {
                PortLabel::Array(name, index) => {
                    let mut res = Vec::new();
                    for idx in 0..*index {
                        res.push((
                            PortLabel::from((*name, idx)),
                            Port::new(*base_count + idx, props),
                        ));
                    }
                    *base_count += index;
                    res
                }
                PortLabel::Name(name) => {
                    let res = vec![(PortLabel::from(*name), Port::new(*base_count, props))];
                    *base_count += 1;
                    res
                }
                PortLabel::Number(n) => {
                    let res = vec![(PortLabel::from(*n), Port::new(*base_count, props))];
                    *base_count += 1;
                    res
                }
            }
        })
        .collect::<PortMap>()
}

/**
 * Mark a field as ignored when deriving Eq/PartialEq/Hash.
 *
 * It is passed through unchanged for Debug.
 */
#[derive(Copy, Clone)]
pub struct IgnoreEq<T>(T);
impl<T> IgnoreEq<T> {
    fn new(val: T) -> Self {
        Self(val)
    }
}

impl<T> PartialEq for IgnoreEq<T> {
    fn eq(&self, _other: &IgnoreEq<T>) -> bool {
        true
    }
}
impl<T> Eq for IgnoreEq<T> {}
impl<T> PartialOrd for IgnoreEq<T> {
    fn partial_cmp(&self, _: &Self) -> Option<std::cmp::Ordering> {
        Some(std::cmp::Ordering::Equal)
    }
}
impl<T> Ord for IgnoreEq<T> {
    fn cmp(&self, _: &Self) -> std::cmp::Ordering {
        std::cmp::Ordering::Equal
    }
}
impl<T> std::hash::Hash for IgnoreEq<T> {
    fn hash<H: std::hash::Hasher>(&self, _: &mut H) {}
}
impl<T: std::fmt::Debug> std::fmt::Debug for IgnoreEq<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portmap_indices_per_direction() {
        let props_in = PortProperties {
            direction: Direction::Incoming,
            domain: SignalDomain::Electrical,
            ..Default::default()
        };
        let props_out = PortProperties {
            direction: Direction::Outgoing,
            domain: SignalDomain::Electrical,
            ..Default::default()
        };
        let map = to_portmap(&[
            (PortLabel::from("input"), props_in),
            (PortLabel::from(("fb", 2)), props_in),
            (PortLabel::from("output"), props_out),
        ]);
        // inputs and outputs number independently
        assert_eq!(map.get(&"input".into()).unwrap().index(), 0);
        assert_eq!(map.get(&("fb", 0).into()).unwrap().index(), 1);
        assert_eq!(map.get(&("fb", 1).into()).unwrap().index(), 2);
        assert_eq!(map.get(&"output".into()).unwrap().index(), 0);
    }

    #[test]
    fn port_equality_ignores_properties() {
        let a = Port::new_in(1, SignalDomain::Optical);
        let b = Port::new_in(1, SignalDomain::Electrical);
        let c = Port::new_out(1, SignalDomain::Optical);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
