// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Orchestrator configuration, loaded from JSON and then overridden from the command line

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

pub const DEFAULT_BASE_PORT: u16 = 61616;
pub const DEFAULT_HOSTNAME: &str = "localhost";
pub const WORKER_SUBCOMMAND: &str = "worker";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    /// First listening port handed out to a broker
    pub base_port: u16,
    /// Hostname brokers use to reach each other
    pub hostname: String,
    /// Interface the control endpoint binds to, the port is always chosen by the OS
    pub control_host: IpAddr,
    pub template_dir: PathBuf,
    pub output_dir: PathBuf,
    pub templates: TemplateNames,
    pub worker: WorkerCommand,
    /// External broker executable (and leading args) wrapped by each worker
    pub broker_command: Vec<String>,
    pub notify_if_started: bool,
    pub notify_if_stopped: bool,
    pub settle_delay_ms: u64,
    pub start_deadline_ms: Option<u64>,
    pub reclaim_grace_ms: u64,
    pub capture_output: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            hostname: DEFAULT_HOSTNAME.to_string(),
            control_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            template_dir: PathBuf::from("templates"),
            output_dir: PathBuf::from("."),
            templates: TemplateNames::default(),
            worker: WorkerCommand::default(),
            broker_command: Vec::new(),
            notify_if_started: false,
            notify_if_stopped: false,
            settle_delay_ms: 5_000,
            start_deadline_ms: None,
            reclaim_grace_ms: 10_000,
            capture_output: true,
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Wait inserted after spawning a master or hub, before its dependents
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Optional bound on `await_all_started`, `None` waits forever
    pub fn start_deadline(&self) -> Option<Duration> {
        self.start_deadline_ms.map(Duration::from_millis)
    }

    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_millis(self.reclaim_grace_ms)
    }
}

/// Template identifiers per role, resolved against `FleetConfig::template_dir`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateNames {
    pub broker: String,
    pub master: String,
    pub slave: String,
    pub hub: String,
    pub spoke: String,
    pub main: String,
    pub networked: String,
}

impl Default for TemplateNames {
    fn default() -> Self {
        Self {
            broker: "activemq".to_string(),
            master: "master-activemq".to_string(),
            slave: "slave-activemq".to_string(),
            hub: "hub-activemq".to_string(),
            spoke: "spoke-activemq".to_string(),
            main: "main-activemq".to_string(),
            networked: "network-activemq".to_string(),
        }
    }
}

/// The program every child runs
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerCommand {
    /// Defaults to the currently running executable
    pub program: Option<PathBuf>,
    /// Defaults to the `worker` subcommand
    pub args: Option<Vec<String>>,
}

impl WorkerCommand {
    pub fn program(&self) -> Result<PathBuf, Error> {
        match self.program {
            Some(ref program) => Ok(program.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }

    pub fn args(&self) -> Vec<String> {
        self.args
            .clone()
            .unwrap_or_else(|| vec![WORKER_SUBCOMMAND.to_string()])
    }
}
