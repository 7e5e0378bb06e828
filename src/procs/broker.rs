// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::fork::ChildProcess;
use crate::procs::{Broker, BROKER_COMMAND};
use crate::Error;

/// How long a broker gets to exit after SIGTERM before it is killed
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Runs an external broker executable with the configuration file as its last argument
#[derive(Debug)]
pub struct CommandBroker {
    command: Vec<String>,
    child: Option<Child>,
    stop_grace: Duration,
}

impl CommandBroker {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            child: None,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }
}

#[async_trait]
impl Broker for CommandBroker {
    async fn start(&mut self, config_file: &Path) -> Result<(), Error> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(ErrorKind::MissingParameter(BROKER_COMMAND))?;

        // the worker exits once the broker is stopped, never leave it behind
        let child = Command::new(program)
            .args(args)
            .arg(config_file)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ErrorKind::Launch {
                identifier: program.clone(),
                source,
            })?;

        info!(program = %program, pid = ?child.id(), "broker process started");
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Error> {
        match self.child.as_mut() {
            Some(child) => child.terminate(),
            None => Ok(()),
        }
    }

    async fn await_stopped(&mut self) -> Result<(), Error> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };

        let status = match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("broker still running after {:?}, killing", self.stop_grace);
                child.kill().await?;
                child.wait().await?
            }
        };

        info!(%status, "broker process exited");
        Ok(())
    }
}
