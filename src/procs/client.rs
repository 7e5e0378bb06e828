// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::msg::{self, Opcode};
use crate::procs::{Broker, WorkerParams};
use crate::Error;

/// Child side of the control channel
#[derive(Debug)]
pub struct LifecycleClient {
    stream: TcpStream,
}

impl LifecycleClient {
    pub async fn connect(control_addr: SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(control_addr).await?;
        stream.set_nodelay(true)?;

        debug!(control = %control_addr, "connected to orchestrator");
        Ok(Self { stream })
    }

    pub async fn notify_started(&mut self) -> Result<(), Error> {
        msg::send_opcode(&mut self.stream, Opcode::Started).await
    }

    /// Blocks until the orchestrator sends `Stop`
    ///
    /// An error means no further signal can arrive on this channel.
    pub async fn await_stop(&mut self) -> Result<(), Error> {
        loop {
            match msg::recv_opcode(&mut self.stream).await {
                Ok(Opcode::Stop) => return Ok(()),
                Ok(other) => warn!(opcode = %other, "ignoring unexpected opcode from orchestrator"),
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn notify_stopped(&mut self) -> Result<(), Error> {
        msg::send_opcode(&mut self.stream, Opcode::Stopped).await
    }

    pub async fn close(mut self) -> Result<(), Error> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Runs one worker to completion: start the broker, report, wait for stop, stop the broker, report
///
/// A lost control channel still leads to an orderly broker stop, the channel error is then returned.
pub async fn run_worker<B: Broker>(params: &WorkerParams, mut broker: B) -> Result<(), Error> {
    let mut client = LifecycleClient::connect(params.control_addr).await?;

    info!(config = %params.config_file.display(), "starting broker");
    broker.start(&params.config_file).await?;

    let mut channel = Ok(());
    if params.notify_if_started {
        channel = client.notify_started().await;
    }

    if channel.is_ok() {
        info!("waiting for the orchestrator to stop the broker");
        channel = client.await_stop().await;
    }

    if let Err(ref e) = channel {
        warn!("control channel lost, stopping broker: {}", e);
    }

    info!("stopping broker");
    broker.stop().await?;
    broker.await_stopped().await?;

    if params.notify_if_stopped && channel.is_ok() {
        channel = client.notify_stopped().await;
    }

    if let Err(e) = client.close().await {
        debug!("error closing control channel: {}", e);
    }

    info!("broker stopped");
    channel
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingBroker(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn start(&mut self, config_file: &Path) -> Result<(), Error> {
            self.0.lock().push(format!("start {}", config_file.display()));
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), Error> {
            self.0.lock().push("stop".to_string());
            Ok(())
        }

        async fn await_stopped(&mut self) -> Result<(), Error> {
            self.0.lock().push("stopped".to_string());
            Ok(())
        }
    }

    async fn listener() -> (TcpListener, WorkerParams) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let params = WorkerParams {
            control_addr: listener.local_addr().unwrap(),
            config_file: PathBuf::from("broker-0.xml"),
            notify_if_started: true,
            notify_if_stopped: true,
            broker_command: Vec::new(),
        };

        (listener, params)
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let (listener, params) = listener().await;
        let broker = RecordingBroker::default();
        let events = broker.0.clone();

        let worker = tokio::spawn(async move { run_worker(&params, broker).await });
        let (mut control, _) = listener.accept().await.unwrap();

        let mut byte = [0u8; 1];
        control.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], Opcode::Started.as_byte());
        assert_eq!(*events.lock(), vec!["start broker-0.xml".to_string()]);

        control.write_all(&[Opcode::Stop.as_byte()]).await.unwrap();
        control.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], Opcode::Stopped.as_byte());

        worker.await.unwrap().unwrap();
        assert_eq!(
            *events.lock(),
            vec!["start broker-0.xml", "stop", "stopped"]
        );
    }

    #[tokio::test]
    async fn test_silent_worker() {
        let (listener, mut params) = listener().await;
        params.notify_if_started = false;
        params.notify_if_stopped = false;
        let broker = RecordingBroker::default();
        let events = broker.0.clone();

        let worker = tokio::spawn(async move { run_worker(&params, broker).await });
        let (mut control, _) = listener.accept().await.unwrap();

        control.write_all(&[Opcode::Stop.as_byte()]).await.unwrap();
        worker.await.unwrap().unwrap();

        // the broker is reaped even when nobody waits for the confirmation
        assert_eq!(
            *events.lock(),
            vec!["start broker-0.xml", "stop", "stopped"]
        );

        let mut rest = Vec::new();
        control.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_lost_channel_still_stops_broker() {
        let (listener, params) = listener().await;
        let broker = RecordingBroker::default();
        let events = broker.0.clone();

        let worker = tokio::spawn(async move { run_worker(&params, broker).await });
        let (control, _) = listener.accept().await.unwrap();
        drop(control);

        assert!(worker.await.unwrap().is_err());
        let events = events.lock();
        assert!(events.contains(&"stop".to_string()));
    }

    #[tokio::test]
    async fn test_no_orchestrator() {
        let (listener, params) = listener().await;
        drop(listener);

        let broker = RecordingBroker::default();
        let events = broker.0.clone();
        assert!(run_worker(&params, broker).await.is_err());
        assert!(events.lock().is_empty());
    }
}
