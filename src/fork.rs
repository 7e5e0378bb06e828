// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Launching child processes and tracking whether they have exited

use std::ffi::OsString;
use std::fmt::Debug;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::pipe::{self, Stream};
use crate::Error;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

impl StdIoConf {
    /// stdout and stderr are piped back to the orchestrator's log
    pub fn captured() -> Self {
        Self {
            stdin: Stdio::null(),
            stderr: Stdio::piped(),
            stdout: Stdio::piped(),
        }
    }

    pub fn inherited() -> Self {
        Self {
            stdin: Stdio::null(),
            stderr: Stdio::inherit(),
            stdout: Stdio::inherit(),
        }
    }
}

/// Everything needed to start one child
#[derive(Clone, Debug)]
pub struct LaunchRequest {
    pub identifier: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
}

/// A running child, as seen by its owning `ChildHandle`
#[async_trait]
pub trait ChildProcess: Debug + Send {
    fn pid(&self) -> Option<u32>;

    /// Never blocks, `None` while the child is still running
    fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Asks the child to terminate without waiting for it
    fn terminate(&mut self) -> Result<(), Error>;

    fn force_kill(&mut self) -> io::Result<()>;

    async fn wait_exit(&mut self) -> io::Result<ExitStatus>;
}

#[async_trait]
impl ChildProcess for tokio::process::Child {
    fn pid(&self) -> Option<u32> {
        self.id()
    }

    fn poll_exit(&mut self) -> io::Result<Option<ExitStatus>> {
        self.try_wait()
    }

    fn terminate(&mut self) -> Result<(), Error> {
        // no pid means the child was already reaped
        if let Some(pid) = self.id() {
            kill(Pid::from_raw(pid as libc::pid_t), Signal::SIGTERM)?;
        }

        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.start_kill()
    }

    async fn wait_exit(&mut self) -> io::Result<ExitStatus> {
        self.wait().await
    }
}

/// The orchestrator's reference to one spawned instance
#[derive(Debug)]
pub struct ChildHandle {
    identifier: String,
    process: Box<dyn ChildProcess>,
    status: Option<ExitStatus>,
}

impl ChildHandle {
    pub fn new(identifier: impl Into<String>, process: Box<dyn ChildProcess>) -> Self {
        Self {
            identifier: identifier.into(),
            process,
            status: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// The exit status, once `has_exited` has observed it
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Polls the process, never blocks
    pub fn has_exited(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }

        match self.process.poll_exit() {
            Ok(Some(status)) => {
                debug!(identifier = %self.identifier, %status, "child exited");
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(identifier = %self.identifier, "could not poll child: {}", e);
                false
            }
        }
    }

    /// Requests termination without waiting, a no-op once the child has exited
    pub fn terminate(&mut self) -> Result<(), Error> {
        if self.has_exited() {
            return Ok(());
        }

        self.process.terminate()
    }

    /// Waits up to `grace` for the child to exit on its own, then kills it
    pub async fn reclaim(mut self, grace: Duration) -> Result<ExitStatus, Error> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        match tokio::time::timeout(grace, self.process.wait_exit()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    identifier = %self.identifier,
                    "child still running after {:?}, killing", grace
                );
                self.process.force_kill()?;
                Ok(self.process.wait_exit().await?)
            }
        }
    }
}

/// Creates child processes for the orchestrator
pub trait Spawner: Send + Sync {
    fn spawn(&self, request: &LaunchRequest) -> Result<ChildHandle, Error>;
}

/// Spawns real OS processes
#[derive(Clone, Debug, Default)]
pub struct ProcessSpawner {
    capture_output: bool,
}

impl ProcessSpawner {
    pub fn new(capture_output: bool) -> Self {
        Self { capture_output }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, request: &LaunchRequest) -> Result<ChildHandle, Error> {
        let stdio = if self.capture_output {
            StdIoConf::captured()
        } else {
            StdIoConf::inherited()
        };

        let mut child = Command::new(&request.program)
            .args(&request.args)
            .envs(request.envs.iter().map(|(k, v)| (k, v)))
            .kill_on_drop(true)
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr)
            .spawn()
            .map_err(|source| ErrorKind::Launch {
                identifier: request.identifier.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            pipe::forward_output(&request.identifier, Stream::Stdout, stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            pipe::forward_output(&request.identifier, Stream::Stderr, stderr);
        }

        info!(
            identifier = %request.identifier,
            pid = ?child.id(),
            program = %request.program.display(),
            "spawned child"
        );
        Ok(ChildHandle::new(request.identifier.clone(), Box::new(child)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(program: &str, args: &[&str]) -> LaunchRequest {
        LaunchRequest {
            identifier: "test-child".to_string(),
            program: PathBuf::from(program),
            args: args.iter().map(OsString::from).collect(),
            envs: vec![(OsString::from("BROKERFLEET_TEST"), OsString::from("1"))],
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_launch_error() {
        let spawner = ProcessSpawner::new(false);
        let err = spawner
            .spawn(&request("/nonexistent/brokerfleet-worker", &[]))
            .unwrap_err();

        match err.kind() {
            ErrorKind::Launch { identifier, .. } => assert_eq!(identifier, "test-child"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exit_detection() {
        let spawner = ProcessSpawner::new(true);
        let mut child = spawner
            .spawn(&request("/bin/sh", &["-c", "test \"$BROKERFLEET_TEST\" = 1"]))
            .unwrap();
        assert_eq!(child.identifier(), "test-child");

        let status = loop {
            if child.has_exited() {
                break child.exit_status().unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert!(status.success());
        assert!(child.terminate().is_ok());
        assert!(child.reclaim(Duration::from_secs(1)).await.unwrap().success());
    }

    #[tokio::test]
    async fn test_terminate_then_reclaim() {
        let spawner = ProcessSpawner::new(false);
        let mut child = spawner.spawn(&request("/bin/sleep", &["30"])).unwrap();

        assert!(!child.has_exited());
        child.terminate().unwrap();

        let status = child.reclaim(Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_reclaim_kills_after_grace() {
        let spawner = ProcessSpawner::new(false);
        let child = spawner.spawn(&request("/bin/sleep", &["30"])).unwrap();

        let status = child.reclaim(Duration::from_millis(50)).await.unwrap();
        assert!(!status.success());
    }
}
