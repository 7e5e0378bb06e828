// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-instance configuration for each supported broker topology
//!
//! Generation is a pure function of the topology, the port cursor and the naming context.
//! Instances are returned in spawn order, parents (master, hub, main) always before the
//! instances that reference them.

mod flat;
mod hub_spoke;
mod master_slave;
mod mesh;
mod ports;

pub use ports::PortAllocator;

use std::convert::TryFrom;
use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::TemplateNames;
use crate::error::ErrorKind;
use crate::Error;

/// Ordered key to value mapping written into a broker's property file
pub type Properties = IndexMap<String, String>;

/// Property keys understood by the broker templates
pub mod keys {
    pub const KAHADB_DIR: &str = "kahadb.dir";
    pub const KAHADB_PREFIX: &str = "kahadb.prefix";

    pub const ACTIVEMQ_SUFFIX: &str = "activemq.suffix.name";
    pub const HOSTNAME: &str = "hostname";
    pub const PORT: &str = "port.number";

    pub const MASTER_SUFFIX: &str = "master.suffix.name";
    pub const MASTER_HOSTNAME: &str = "master.hostname";
    pub const MASTER_PORT: &str = "master.port.number";
    pub const SLAVE_SUFFIX: &str = "slave.suffix.name";
    pub const SLAVE_HOSTNAME: &str = "slave.hostname";
    pub const SLAVE_PORT: &str = "slave.port.number";

    pub const HUB_SUFFIX: &str = "hub.suffix.name";
    pub const HUB_HOSTNAME: &str = "hub.hostname";
    pub const HUB_PORT: &str = "hub.port.number";
    pub const SPOKE_SUFFIX: &str = "spoke.suffix.name";
    pub const SPOKE_HOSTNAME: &str = "spoke.hostname";
    pub const SPOKE_PORT: &str = "spoke.port.number";

    pub const MAIN_SUFFIX: &str = "main.suffix.name";
    pub const NETWORK_SUFFIX: &str = "network.suffix.name";
    pub const NETWORK_HOSTNAME: &str = "network.hostname";
    pub const NETWORK_PORT: &str = "network.port.number";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Solo,
    Master,
    Slave,
    Hub,
    Spoke,
    Main,
    Networked,
}

impl Role {
    /// Roles whose dependents embed their port, the orchestrator waits a settle delay after spawning these
    pub fn has_dependents(self) -> bool {
        match self {
            Role::Master | Role::Hub => true,
            _ => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Solo => "solo",
            Role::Master => "master",
            Role::Slave => "slave",
            Role::Hub => "hub",
            Role::Spoke => "spoke",
            Role::Main => "main",
            Role::Networked => "networked",
        };

        f.write_str(name)
    }
}

/// The arrangement of brokers, sizes are fixed for the lifetime of a fleet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// Independent brokers with no references to each other
    Flat { count: usize },
    /// Each slave references the master of its pair
    MasterSlave { pairs: usize },
    /// Each spoke references its hub
    HubSpoke { hubs: usize, spokes_per_hub: usize },
    /// Per network one main broker, every other broker in the network references it
    NetworkMesh {
        networks: usize,
        brokers_per_network: usize,
    },
}

impl Topology {
    /// `None` when the count does not fit in a `usize`
    pub fn instance_count(&self) -> Option<usize> {
        match *self {
            Topology::Flat { count } => Some(count),
            Topology::MasterSlave { pairs } => pairs.checked_mul(2),
            Topology::HubSpoke {
                hubs,
                spokes_per_hub,
            } => hubs
                .checked_mul(spokes_per_hub)
                .and_then(|spokes| spokes.checked_add(hubs)),
            Topology::NetworkMesh {
                networks,
                brokers_per_network,
            } => networks.checked_mul(brokers_per_network),
        }
    }

    /// Rejects empty topologies and ones whose ports would not fit above `base_port`
    pub fn validate(&self, base_port: u16) -> Result<(), Error> {
        let empty = match *self {
            Topology::Flat { count } => count == 0,
            Topology::MasterSlave { pairs } => pairs == 0,
            // a hub without spokes is still a usable broker
            Topology::HubSpoke { hubs, .. } => hubs == 0,
            Topology::NetworkMesh {
                networks,
                brokers_per_network,
            } => networks == 0 || brokers_per_network == 0,
        };

        if empty {
            return Err(ErrorKind::InvalidTopology(format!("{} has no instances", self)).into());
        }

        // every count is non-zero past the check above
        let last_port = self
            .instance_count()
            .and_then(|count| u64::try_from(count).ok())
            .and_then(|count| u64::from(base_port).checked_add(count - 1));
        match last_port {
            Some(last_port) if last_port <= u64::from(u16::max_value()) => (),
            Some(last_port) => {
                return Err(ErrorKind::InvalidTopology(format!(
                    "{} needs ports {}..={}, beyond {}",
                    self,
                    base_port,
                    last_port,
                    u16::max_value()
                ))
                .into())
            }
            None => {
                return Err(ErrorKind::InvalidTopology(format!(
                    "{} has more instances than ports",
                    self
                ))
                .into())
            }
        }

        Ok(())
    }

    /// Computes every instance of the topology in spawn order, advancing `ports` once per instance
    pub fn generate(&self, ports: &mut PortAllocator, ctx: &GeneratorContext<'_>) -> Vec<InstanceSpec> {
        match *self {
            Topology::Flat { count } => flat::generate(count, ports, ctx),
            Topology::MasterSlave { pairs } => master_slave::generate(pairs, ports, ctx),
            Topology::HubSpoke {
                hubs,
                spokes_per_hub,
            } => hub_spoke::generate(hubs, spokes_per_hub, ports, ctx),
            Topology::NetworkMesh {
                networks,
                brokers_per_network,
            } => mesh::generate(networks, brokers_per_network, ports, ctx),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Topology::Flat { count } => write!(f, "flat({})", count),
            Topology::MasterSlave { pairs } => write!(f, "master-slave({} pairs)", pairs),
            Topology::HubSpoke {
                hubs,
                spokes_per_hub,
            } => write!(f, "hub-spoke({} hubs x {} spokes)", hubs, spokes_per_hub),
            Topology::NetworkMesh {
                networks,
                brokers_per_network,
            } => write!(
                f,
                "mesh({} networks x {} brokers)",
                networks, brokers_per_network
            ),
        }
    }
}

/// Naming inputs shared by every generator
#[derive(Clone, Copy, Debug)]
pub struct GeneratorContext<'a> {
    pub hostname: &'a str,
    pub templates: &'a TemplateNames,
}

/// The computed configuration of one broker, before it is spawned
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstanceSpec {
    role: Role,
    index: usize,
    group: usize,
    identifier: String,
    listen_port: u16,
    properties: Properties,
    template_id: String,
    artifact_stem: String,
    artifact_path: Option<PathBuf>,
}

impl InstanceSpec {
    pub(crate) fn new(
        role: Role,
        group: usize,
        index: usize,
        template_id: &str,
        suffix: &str,
        listen_port: u16,
        properties: Properties,
    ) -> Self {
        Self {
            role,
            index,
            group,
            identifier: format!("{}-{}", role_label(role), suffix),
            listen_port,
            properties,
            template_id: template_id.to_string(),
            artifact_stem: format!("{}-{}", template_id, suffix),
            artifact_path: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Position of the instance within its group
    pub fn index(&self) -> usize {
        self.index
    }

    /// The pair, hub or network the instance belongs to, equal to `index` for a flat pool
    pub fn group(&self) -> usize {
        self.group
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// File name stem of the artifact, `<template>-<suffix>`
    pub fn artifact_stem(&self) -> &str {
        &self.artifact_stem
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_ref().map(PathBuf::as_path)
    }

    /// Records where the materialized configuration was written
    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifact_path = Some(path);
        self
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Solo => "broker",
        Role::Master => "master",
        Role::Slave => "slave",
        Role::Hub => "hub",
        Role::Spoke => "spoke",
        Role::Main => "main",
        Role::Networked => "network",
    }
}

fn set<V: ToString>(properties: &mut Properties, key: &str, value: V) {
    properties.insert(key.to_string(), value.to_string());
}
