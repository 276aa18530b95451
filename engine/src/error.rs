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

use std::fmt;

use crate::ports::Port;
use crate::signal::SignalDomain;

#[derive(Debug)]
pub enum Error {
    /// a block name or a (src port, dst port) pair is already taken.
    DuplicateKey(String),

    /// a published signal's domain does not match the destination port.
    TypeMismatch {
        block: String,
        port: Port,
        expected: SignalDomain,
        found: SignalDomain,
    },

    /// a required input has no published signal (or no link at all).
    PortNotReady { block: String, port: Port },

    /// a cycle survived feedback-group contraction; lists the trapped blocks.
    CyclicDependency(Vec<String>),

    /// a block action failed; the run cannot continue past it.
    BlockExecution {
        block: String,
        iteration: usize,
        source: anyhow::Error,
    },

    /// the simulation configuration failed validation.
    InvalidConfig(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DuplicateKey(key) => write!(f, "duplicate key: {}", key),
            Self::TypeMismatch {
                block,
                port,
                expected,
                found,
            } => write!(
                f,
                "type mismatch on block '{}' port {}: expected {:?}, got {:?}",
                block, port, expected, found
            ),
            Self::PortNotReady { block, port } => {
                write!(f, "input port {} of block '{}' is not ready", port, block)
            }
            Self::CyclicDependency(blocks) => write!(
                f,
                "unresolved cycle among blocks: {}",
                blocks.join(", ")
            ),
            Self::BlockExecution {
                block,
                iteration,
                source,
            } => write!(
                f,
                "block '{}' failed at iteration {}: {:#}",
                block, iteration, source
            ),
            Self::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

// allows `anyhow::Result` in binaries and tests to absorb engine errors.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BlockExecution { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
