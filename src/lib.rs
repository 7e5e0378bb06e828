// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Spawns and coordinates a fleet of embedded broker processes
//!
//! The orchestrator generates one configuration per instance for the requested topology, spawns a
//! worker process per instance, and uses a private TCP control channel to learn when each worker
//! has started and to tell each one to stop.

pub mod config;
pub mod control;
pub mod fork;
pub mod msg;
pub mod orchestrator;
pub mod pipe;
pub mod procs;
pub mod template;
pub mod topology;

pub mod error;

pub use config::FleetConfig;
pub use error::Error;
pub use orchestrator::Orchestrator;
pub use topology::{InstanceSpec, Role, Topology};
