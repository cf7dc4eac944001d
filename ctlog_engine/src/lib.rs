// SPDX-License-Identifier: Apache-2.0
//! Wires the log client, offset store, leaf parser, suffix classifier
//! and sink into the Worker/Supervisor pipeline.

pub mod config;
pub mod metrics;
pub mod supervisor;
pub mod worker;
