// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{App, Arg, ArgMatches, SubCommand};
use tokio::runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use brokerfleet::config::WORKER_SUBCOMMAND;
use brokerfleet::procs::{self, CommandBroker, WorkerParams};
use brokerfleet::{Error, FleetConfig, Orchestrator, Topology};

const FLAT: &str = "flat";
const MASTER_SLAVE: &str = "master-slave";
const HUB_SPOKE: &str = "hub-spoke";
const MESH: &str = "mesh";

const COUNT: &str = "count";
const PAIRS: &str = "pairs";
const HUBS: &str = "hubs";
const SPOKES: &str = "spokes";
const NETWORKS: &str = "networks";
const BROKERS: &str = "brokers";

const CONFIG: &str = "config";
const BASE_PORT: &str = "base-port";
const TEMPLATE_DIR: &str = "template-dir";
const OUTPUT_DIR: &str = "output-dir";
const RUN_FOR: &str = "run-for";
const DRY_RUN: &str = "dry-run";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn fleet_opts(self) -> Self;
}

impl<'a, 'b> SetupClapApp for App<'a, 'b> {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn fleet_opts(self) -> Self {
        self.arg(
            Arg::with_name(CONFIG)
                .short("c")
                .long(CONFIG)
                .value_name("FILE")
                .takes_value(true)
                .help("JSON fleet configuration, flags below override it"),
        )
        .arg(number_arg(BASE_PORT, "PORT", "first listening port handed to a broker"))
        .arg(
            Arg::with_name(TEMPLATE_DIR)
                .long(TEMPLATE_DIR)
                .value_name("DIR")
                .takes_value(true)
                .help("directory holding the <template>.xml files"),
        )
        .arg(
            Arg::with_name(OUTPUT_DIR)
                .long(OUTPUT_DIR)
                .value_name("DIR")
                .takes_value(true)
                .help("directory the per-instance configuration is written to"),
        )
        .arg(
            Arg::with_name(procs::NOTIFY_IF_STARTED)
                .long(procs::NOTIFY_IF_STARTED)
                .help("wait for every broker to report started"),
        )
        .arg(
            Arg::with_name(procs::NOTIFY_IF_STOPPED)
                .long(procs::NOTIFY_IF_STOPPED)
                .help("wait for every broker to confirm it stopped"),
        )
        .arg(
            Arg::with_name(procs::BROKER_COMMAND)
                .long(procs::BROKER_COMMAND)
                .value_name("ARG")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .allow_hyphen_values(true)
                .help("broker program and its leading arguments, repeat once per word"),
        )
        .arg(number_arg(
            RUN_FOR,
            "SECONDS",
            "stop the fleet after this long instead of waiting for Ctrl-C",
        ))
        .arg(
            Arg::with_name(DRY_RUN)
                .long(DRY_RUN)
                .help("print the generated instances as JSON and exit"),
        )
    }
}

fn number_arg<'a, 'b>(name: &'static str, value_name: &'static str, help: &'static str) -> Arg<'a, 'b> {
    Arg::with_name(name)
        .long(name)
        .value_name(value_name)
        .takes_value(true)
        .help(help)
}

fn topology_sub_commands() -> Vec<App<'static, 'static>> {
    vec![
        SubCommand::with_name(FLAT)
            .about("independent brokers")
            .arg(number_arg(COUNT, "N", "number of brokers [default: 5]")),
        SubCommand::with_name(MASTER_SLAVE)
            .about("master/slave pairs")
            .arg(number_arg(PAIRS, "N", "number of pairs [default: 5]")),
        SubCommand::with_name(HUB_SPOKE)
            .about("hubs with spokes")
            .arg(number_arg(HUBS, "N", "number of hubs [default: 1]"))
            .arg(number_arg(SPOKES, "N", "spokes per hub [default: 5]")),
        SubCommand::with_name(MESH)
            .about("networks of brokers around a main broker")
            .arg(number_arg(NETWORKS, "N", "number of networks [default: 3]"))
            .arg(number_arg(BROKERS, "N", "brokers per network [default: 5]")),
    ]
}

fn main() -> Result<(), Error> {
    let mut app = App::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand(WorkerParams::sub_command().setup_clap_app());
    for sub_command in topology_sub_commands() {
        app = app.subcommand(sub_command.setup_clap_app().fleet_opts());
    }
    let args = app.get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to initialize Tokio Runtime");

    runtime.block_on(async move {
        match args.subcommand() {
            (WORKER_SUBCOMMAND, Some(args)) => worker(args).await,
            (FLAT, Some(args)) => {
                let count = value_or(args, COUNT, 5)?;
                fleet(Topology::Flat { count }, args).await
            }
            (MASTER_SLAVE, Some(args)) => {
                let pairs = value_or(args, PAIRS, 5)?;
                fleet(Topology::MasterSlave { pairs }, args).await
            }
            (HUB_SPOKE, Some(args)) => {
                let hubs = value_or(args, HUBS, 1)?;
                let spokes_per_hub = value_or(args, SPOKES, 5)?;
                fleet(Topology::HubSpoke { hubs, spokes_per_hub }, args).await
            }
            (MESH, Some(args)) => {
                let networks = value_or(args, NETWORKS, 3)?;
                let brokers_per_network = value_or(args, BROKERS, 5)?;
                fleet(
                    Topology::NetworkMesh {
                        networks,
                        brokers_per_network,
                    },
                    args,
                )
                .await
            }
            ("", None) => {
                println!("command required");
                println!("{}", args.usage());
                std::process::exit(1);
            }
            (arg, _) => {
                println!("unexpected argument: {}", arg);
                println!("{}", args.usage());
                std::process::exit(2);
            }
        }
    })
}

fn value_or<T>(args: &ArgMatches<'_>, name: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Display,
{
    match args.value_of(name) {
        Some(value) => value
            .parse()
            .map_err(|e| Error::from(format!("invalid --{} {}: {}", name, value, e))),
        None => Ok(default),
    }
}

fn load_config(args: &ArgMatches<'_>) -> Result<FleetConfig, Error> {
    let mut config = match args.value_of_os(CONFIG) {
        Some(path) => FleetConfig::from_file(&PathBuf::from(path))?,
        None => FleetConfig::default(),
    };

    config.base_port = value_or(args, BASE_PORT, config.base_port)?;
    if let Some(dir) = args.value_of_os(TEMPLATE_DIR) {
        config.template_dir = PathBuf::from(dir);
    }
    if let Some(dir) = args.value_of_os(OUTPUT_DIR) {
        config.output_dir = PathBuf::from(dir);
    }
    if args.is_present(procs::NOTIFY_IF_STARTED) {
        config.notify_if_started = true;
    }
    if args.is_present(procs::NOTIFY_IF_STOPPED) {
        config.notify_if_stopped = true;
    }
    if let Some(words) = args.values_of(procs::BROKER_COMMAND) {
        config.broker_command = words.map(ToString::to_string).collect();
    }

    Ok(config)
}

async fn fleet(topology: Topology, args: &ArgMatches<'_>) -> Result<(), Error> {
    let config = load_config(args)?;
    let run_for = match args.value_of(RUN_FOR) {
        Some(_) => Some(Duration::from_secs(value_or(args, RUN_FOR, 0)?)),
        None => None,
    };

    let mut orchestrator = Orchestrator::new(topology, config);
    if args.is_present(DRY_RUN) {
        orchestrator
            .topology()
            .validate(orchestrator.config().base_port)?;
        println!("{}", serde_json::to_string_pretty(&orchestrator.plan())?);
        return Ok(());
    }

    match orchestrator.execute().await {
        Ok(launched) => info!(launched, "fleet running"),
        Err(e) => {
            error!("fleet failed to start: {}", e);
            orchestrator.shutdown().await?;
            return Err(e);
        }
    }

    match run_for {
        Some(run_for) => {
            tokio::select! {
                _ = tokio::time::sleep(run_for) => (),
                _ = tokio::signal::ctrl_c() => (),
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    info!("stopping fleet");
    orchestrator.shutdown().await
}

async fn worker(args: &ArgMatches<'_>) -> Result<(), Error> {
    let params = WorkerParams::from_matches(args)?;
    let broker = CommandBroker::new(params.broker_command.clone());

    procs::run_worker(&params, broker).await
}
