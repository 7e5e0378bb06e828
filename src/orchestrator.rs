// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Builds a fleet for one topology and drives its startup and shutdown
//!
//! Failures to materialize or launch a single instance are logged and skipped, the fleet is then
//! simply smaller than requested. Compare `children().len()` with `instances().len()` to detect it.

use std::ffi::OsString;
use std::mem;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::FleetConfig;
use crate::control::Coordinator;
use crate::fork::{ChildHandle, LaunchRequest, ProcessSpawner, Spawner};
use crate::procs::{WorkerParams, CONFIG_FILE_ENV, CONTROL_ADDR_ENV};
use crate::template::{FileMaterializer, Materializer};
use crate::topology::{GeneratorContext, InstanceSpec, PortAllocator, Topology};
use crate::Error;

pub struct Orchestrator<S = ProcessSpawner, M = FileMaterializer> {
    topology: Topology,
    config: FleetConfig,
    spawner: S,
    materializer: M,
    coordinator: Option<Coordinator>,
    instances: Vec<InstanceSpec>,
    children: Vec<ChildHandle>,
}

impl Orchestrator {
    /// Spawns real worker processes from file templates
    pub fn new(topology: Topology, config: FleetConfig) -> Self {
        let spawner = ProcessSpawner::new(config.capture_output);
        let materializer = FileMaterializer::new(&config.template_dir, &config.output_dir);

        Self::with_parts(topology, config, spawner, materializer)
    }
}

impl<S: Spawner, M: Materializer> Orchestrator<S, M> {
    pub fn with_parts(topology: Topology, config: FleetConfig, spawner: S, materializer: M) -> Self {
        Self {
            topology,
            config,
            spawner,
            materializer,
            coordinator: None,
            instances: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Generates the instances without touching the filesystem or spawning anything
    pub fn plan(&self) -> Vec<InstanceSpec> {
        let ctx = GeneratorContext {
            hostname: &self.config.hostname,
            templates: &self.config.templates,
        };

        self.topology
            .generate(&mut PortAllocator::new(self.config.base_port), &ctx)
    }

    /// Every generated instance, with its artifact path once materialized
    pub fn instances(&self) -> &[InstanceSpec] {
        &self.instances
    }

    /// Children that were launched and not yet reclaimed
    pub fn children(&self) -> &[ChildHandle] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [ChildHandle] {
        &mut self.children
    }

    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.coordinator.as_ref()
    }

    /// Launches the fleet and returns the number of children launched
    ///
    /// With `notify_if_started` this only returns once every launched child reported started, or once
    /// the optional start deadline elapsed.
    pub async fn execute(&mut self) -> Result<usize, Error> {
        if self.coordinator.is_some() {
            return Err("fleet was already executed".into());
        }

        self.topology.validate(self.config.base_port)?;

        let coordinator =
            Coordinator::bind(self.config.control_host, self.config.notify_if_started).await?;
        let control_addr = coordinator.local_addr();
        self.coordinator = Some(coordinator);

        let program = self.config.worker.program()?;
        let leading_args = self.config.worker.args();
        let settle_delay = self.config.settle_delay();

        let plan = self.plan();
        let requested = plan.len();
        info!(
            topology = %self.topology,
            instances = requested,
            base_port = self.config.base_port,
            "launching fleet"
        );

        for (i, spec) in plan.iter().enumerate() {
            let artifact = match self.materializer.materialize(spec).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    error!(
                        identifier = spec.identifier(),
                        "skipping instance, could not materialize its configuration: {}", e
                    );
                    self.instances.push(spec.clone());
                    continue;
                }
            };

            let spec = spec.clone().with_artifact(artifact);
            let request = self.launch_request(&spec, control_addr, &program, &leading_args);

            match self.spawner.spawn(&request) {
                Ok(child) => self.children.push(child),
                Err(e) => {
                    error!(identifier = spec.identifier(), "skipping instance, launch failed: {}", e);
                    self.instances.push(spec);
                    continue;
                }
            }

            // dependents embed this instance's port, give it time to start listening
            let has_dependents_next = plan
                .get(i + 1)
                .map_or(false, |next| next.group() == spec.group() && next.role() != spec.role());
            if spec.role().has_dependents() && has_dependents_next && settle_delay.as_nanos() > 0 {
                debug!(identifier = spec.identifier(), ?settle_delay, "waiting for instance to settle");
                tokio::time::sleep(settle_delay).await;
            }

            self.instances.push(spec);
        }

        let launched = self.children.len();
        if launched < requested {
            warn!(launched, requested, "fleet is incomplete");
        }

        if self.config.notify_if_started {
            if let Some(coordinator) = self.coordinator.as_ref() {
                coordinator
                    .await_all_started(launched, self.config.start_deadline())
                    .await?;
            }
        }

        Ok(launched)
    }

    /// Stops every child and releases its handle
    ///
    /// Handles are only reclaimed after every stop confirmation was read. Calling this again is a no-op.
    pub async fn stop_all(&mut self) -> Result<(), Error> {
        if let Some(coordinator) = self.coordinator.as_ref() {
            coordinator.stop_all(self.config.notify_if_stopped).await?;
        }

        let grace = self.config.reclaim_grace();
        let children = mem::take(&mut self.children);
        if children.is_empty() {
            return Ok(());
        }

        let reclaimed = join_all(children.into_iter().map(|child| async move {
            let identifier = child.identifier().to_string();
            (identifier, child.reclaim(grace).await)
        }))
        .await;

        for (identifier, result) in reclaimed {
            match result {
                Ok(status) => info!(identifier = %identifier, %status, "child reclaimed"),
                Err(e) => warn!(identifier = %identifier, "could not reclaim child: {}", e),
            }
        }

        Ok(())
    }

    /// Stops the fleet and closes the control endpoint
    pub async fn shutdown(mut self) -> Result<(), Error> {
        let stopped = self.stop_all().await;
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.shutdown().await;
        }

        stopped
    }

    fn launch_request(
        &self,
        spec: &InstanceSpec,
        control_addr: SocketAddr,
        program: &Path,
        leading_args: &[String],
    ) -> LaunchRequest {
        let config_file = spec
            .artifact_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(PathBuf::new);

        let params = WorkerParams {
            control_addr,
            config_file: config_file.clone(),
            notify_if_started: self.config.notify_if_started,
            notify_if_stopped: self.config.notify_if_stopped,
            broker_command: self.config.broker_command.clone(),
        };

        let mut args: Vec<OsString> = leading_args.iter().map(OsString::from).collect();
        args.extend(params.to_args());

        LaunchRequest {
            identifier: spec.identifier().to_string(),
            program: program.to_path_buf(),
            args,
            envs: vec![
                (
                    OsString::from(CONTROL_ADDR_ENV),
                    OsString::from(control_addr.to_string()),
                ),
                (OsString::from(CONFIG_FILE_ENV), config_file.into_os_string()),
            ],
        }
    }
}
