// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The worker process, which embeds one broker and answers to the orchestrator

mod broker;
mod client;

pub use broker::CommandBroker;
pub use client::{run_worker, LifecycleClient};

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clap::{App, Arg, ArgMatches, SubCommand};

use crate::config::WORKER_SUBCOMMAND;
use crate::error::ErrorKind;
use crate::Error;

pub const CONTROL_ADDR: &str = "control-addr";
pub const CONFIG_FILE: &str = "config-file";
pub const NOTIFY_IF_STARTED: &str = "notify-if-started";
pub const NOTIFY_IF_STOPPED: &str = "notify-if-stopped";
pub const BROKER_COMMAND: &str = "broker-command";

pub const CONTROL_ADDR_ENV: &str = "BROKERFLEET_CONTROL_ADDR";
pub const CONFIG_FILE_ENV: &str = "BROKERFLEET_CONFIG_FILE";

/// The embedded broker engine, driven by the worker
#[async_trait]
pub trait Broker: Send {
    /// Starts the broker from the configuration artifact
    async fn start(&mut self, config_file: &Path) -> Result<(), Error>;

    async fn await_started(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Error>;

    /// Waits for the broker to exit after `stop`, always called before the worker returns
    async fn await_stopped(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Parameters the orchestrator hands to every worker at spawn time
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerParams {
    pub control_addr: SocketAddr,
    pub config_file: PathBuf,
    pub notify_if_started: bool,
    pub notify_if_stopped: bool,
    pub broker_command: Vec<String>,
}

impl WorkerParams {
    /// CLI SubCommand arguments
    pub fn sub_command() -> App<'static, 'static> {
        SubCommand::with_name(WORKER_SUBCOMMAND)
            .about("Runs one embedded broker under the control of an orchestrator")
            .arg(
                Arg::with_name(CONTROL_ADDR)
                    .long(CONTROL_ADDR)
                    .value_name("ADDR")
                    .env(CONTROL_ADDR_ENV)
                    .takes_value(true)
                    .help("address of the orchestrator's control endpoint"),
            )
            .arg(
                Arg::with_name(CONFIG_FILE)
                    .long(CONFIG_FILE)
                    .value_name("PATH")
                    .env(CONFIG_FILE_ENV)
                    .takes_value(true)
                    .help("broker configuration file to start from"),
            )
            .arg(
                Arg::with_name(NOTIFY_IF_STARTED)
                    .long(NOTIFY_IF_STARTED)
                    .help("report to the orchestrator once the broker is started"),
            )
            .arg(
                Arg::with_name(NOTIFY_IF_STOPPED)
                    .long(NOTIFY_IF_STOPPED)
                    .help("report to the orchestrator once the broker is stopped"),
            )
            .arg(
                Arg::with_name(BROKER_COMMAND)
                    .long(BROKER_COMMAND)
                    .value_name("ARG")
                    .takes_value(true)
                    .multiple(true)
                    .number_of_values(1)
                    .allow_hyphen_values(true)
                    .help("broker program and its leading arguments, repeat once per word"),
            )
    }

    /// Missing control address or configuration file is fatal for the worker
    pub fn from_matches(args: &ArgMatches<'_>) -> Result<Self, Error> {
        let control_addr = args
            .value_of(CONTROL_ADDR)
            .ok_or(ErrorKind::MissingParameter(CONTROL_ADDR))?;
        let control_addr = control_addr.parse::<SocketAddr>().map_err(|e| {
            Error::from(format!("{} is not a socket address: {}", control_addr, e))
        })?;

        let config_file = args
            .value_of_os(CONFIG_FILE)
            .map(PathBuf::from)
            .ok_or(ErrorKind::MissingParameter(CONFIG_FILE))?;

        let broker_command = args
            .values_of(BROKER_COMMAND)
            .map(|values| values.map(ToString::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            control_addr,
            config_file,
            notify_if_started: args.is_present(NOTIFY_IF_STARTED),
            notify_if_stopped: args.is_present(NOTIFY_IF_STOPPED),
            broker_command,
        })
    }

    /// Parses the arguments that follow the worker subcommand
    pub fn from_args<I, T>(args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let argv = std::iter::once(OsString::from(WORKER_SUBCOMMAND))
            .chain(args.into_iter().map(Into::into));
        let matches = Self::sub_command()
            .get_matches_from_safe(argv)
            .map_err(|e| Error::from(e.message))?;

        Self::from_matches(&matches)
    }

    /// The arguments that `from_args` accepts
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(format!("--{}={}", CONTROL_ADDR, self.control_addr)),
            long_with_value(CONFIG_FILE, self.config_file.as_os_str()),
        ];

        if self.notify_if_started {
            args.push(OsString::from(format!("--{}", NOTIFY_IF_STARTED)));
        }
        if self.notify_if_stopped {
            args.push(OsString::from(format!("--{}", NOTIFY_IF_STOPPED)));
        }
        for word in &self.broker_command {
            args.push(OsString::from(format!("--{}={}", BROKER_COMMAND, word)));
        }

        args
    }
}

fn long_with_value(name: &str, value: &std::ffi::OsStr) -> OsString {
    let mut arg = OsString::from(format!("--{}=", name));
    arg.push(value);
    arg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WorkerParams {
        WorkerParams {
            control_addr: "127.0.0.1:41234".parse().unwrap(),
            config_file: PathBuf::from("/tmp/fleet/hub-activemq-0.xml"),
            notify_if_started: true,
            notify_if_stopped: false,
            broker_command: vec!["activemq".to_string(), "-Xmx512m".to_string()],
        }
    }

    #[test]
    fn test_args_round_trip() {
        let params = params();
        assert_eq!(WorkerParams::from_args(params.to_args()).unwrap(), params);
    }

    #[test]
    fn test_missing_config_file() {
        let err = WorkerParams::from_args(vec!["--control-addr=127.0.0.1:1"]).unwrap_err();
        match err.kind() {
            ErrorKind::MissingParameter(name) => assert_eq!(*name, CONFIG_FILE),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bad_control_addr() {
        assert!(
            WorkerParams::from_args(vec!["--control-addr=nowhere", "--config-file=a.xml"])
                .is_err()
        );
    }
}
