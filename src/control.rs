// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Orchestrator side of the control channel
//!
//! The `Coordinator` listens on an OS chosen port before any child is spawned. Every child dials back
//! and becomes a `ControlSession`, identified only by the order in which it connected. Sessions
//! report `Started` once, are sent `Stop`, and optionally confirm with `Stopped`.
//!
//! There is no built-in timeout: a child that never reports blocks `await_all_started` forever
//! unless a deadline is passed in.

use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::msg::{self, Opcode};
use crate::Error;

/// Lifecycle of one session, transitions only ever move forward
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connected,
    Started,
    StopSent,
    Stopped,
    /// The channel failed or was closed before the session stopped
    Closed,
}

enum ReaderSlot {
    Idle(OwnedReadHalf),
    /// An observer task owns the read half until the first byte arrives
    Observing(JoinHandle<OwnedReadHalf>),
    Taken,
}

impl ReaderSlot {
    fn take(&mut self) -> ReaderSlot {
        mem::replace(self, ReaderSlot::Taken)
    }
}

pub struct ControlSession {
    id: usize,
    peer: SocketAddr,
    state: SessionState,
    writer: Option<OwnedWriteHalf>,
    reader: ReaderSlot,
}

impl ControlSession {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Applies `next` only if it is later than the current state
    fn advance(&mut self, next: SessionState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Read-only view of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: usize,
    pub peer: SocketAddr,
    pub state: SessionState,
}

struct Shared {
    sessions: Mutex<Vec<ControlSession>>,
    /// Only ever incremented while `sessions` is locked
    started: watch::Sender<usize>,
}

impl Shared {
    fn mark_started(&self, id: usize) {
        let mut sessions = self.sessions.lock();
        let session = match sessions.get_mut(id) {
            Some(session) => session,
            None => return,
        };

        if session.state == SessionState::Connected && session.advance(SessionState::Started) {
            self.started.send_modify(|count| *count += 1);
            info!(session = id, peer = %session.peer, "child started");
        }
    }

    fn mark(&self, id: usize, next: SessionState) {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.advance(next);
        }
    }

    fn state(&self, id: usize) -> Option<SessionState> {
        self.sessions.lock().get(id).map(ControlSession::state)
    }
}

pub struct Coordinator {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    accept: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Opens the control endpoint on an ephemeral port of `host` and starts accepting children
    ///
    /// With `observe_start` every session gets a task that waits for its `Started` byte.
    pub async fn bind(host: IpAddr, observe_start: bool) -> Result<Self, Error> {
        let listener = TcpListener::bind(SocketAddr::new(host, 0)).await?;
        let local_addr = listener.local_addr()?;
        let (started, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            sessions: Mutex::new(Vec::new()),
            started,
        });
        let shutdown = CancellationToken::new();

        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            shutdown.clone(),
            observe_start,
        ));

        info!(control = %local_addr, "control endpoint listening");
        Ok(Self {
            local_addr,
            shared,
            shutdown,
            accept: Some(accept),
        })
    }

    /// The address children must dial back to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn started_count(&self) -> usize {
        *self.shared.started.borrow()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared
            .sessions
            .lock()
            .iter()
            .map(|s| SessionInfo {
                id: s.id,
                peer: s.peer,
                state: s.state,
            })
            .collect()
    }

    /// Blocks until `expected` sessions have reported started
    ///
    /// Never returns early on a subset. Without a `deadline` this waits forever if a child never reports.
    pub async fn await_all_started(
        &self,
        expected: usize,
        deadline: Option<Duration>,
    ) -> Result<(), Error> {
        let mut started = self.shared.started.subscribe();
        let wait = async move {
            // wait_for re-checks the count on every change
            started
                .wait_for(|count| *count >= expected)
                .await
                .map(|_| ())
                .map_err(|_| Error::from("control coordinator shut down"))
        };

        match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, wait).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        expected,
                        started = self.started_count(),
                        "not every child reported started"
                    );
                    return Err(ErrorKind::DeadlineElapsed(deadline).into());
                }
            },
            None => wait.await?,
        }

        info!(expected, "all children started");
        Ok(())
    }

    /// Sends `Stop` to every live session, then with `confirm` reads each `Stopped` in connection order
    ///
    /// Sessions that were already stopped or closed are skipped, so a second call writes nothing.
    pub async fn stop_all(&self, confirm: bool) -> Result<(), Error> {
        let pending: Vec<(usize, OwnedWriteHalf, ReaderSlot)> = {
            let mut sessions = self.shared.sessions.lock();
            sessions
                .iter_mut()
                .filter_map(|s| {
                    let reader = s.reader.take();
                    s.writer.take().map(|writer| (s.id, writer, reader))
                })
                .collect()
        };

        let mut stopping = Vec::with_capacity(pending.len());
        for (id, mut writer, reader) in pending {
            match msg::send_opcode(&mut writer, Opcode::Stop).await {
                Ok(()) => {
                    debug!(session = id, "sent stop");
                    self.shared.mark(id, SessionState::StopSent);
                    stopping.push((id, writer, reader));
                }
                Err(e) => {
                    warn!(session = id, "could not send stop, peer gone: {}", e);
                    self.shared.mark(id, SessionState::Closed);
                    abort_observer(reader);
                }
            }
        }

        for (id, writer, reader) in stopping {
            if confirm {
                self.await_stopped(id, reader).await;
            } else {
                abort_observer(reader);
            }

            drop(writer);
        }

        Ok(())
    }

    async fn await_stopped(&self, id: usize, reader: ReaderSlot) {
        let reader = match reader {
            ReaderSlot::Idle(reader) => reader,
            ReaderSlot::Observing(observer) => match observer.await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(session = id, "start observer failed: {}", e);
                    self.shared.mark(id, SessionState::Closed);
                    return;
                }
            },
            ReaderSlot::Taken => return,
        };

        // the observer may already have consumed the confirmation
        if self.shared.state(id) == Some(SessionState::Stopped) {
            return;
        }

        let mut reader = reader;
        match msg::recv_opcode(&mut reader).await {
            Ok(Opcode::Stopped) => {
                self.shared.mark(id, SessionState::Stopped);
                info!(session = id, "child stopped");
            }
            Ok(other) => {
                warn!(session = id, opcode = %other, "expected stopped confirmation");
                self.shared.mark(id, SessionState::Closed);
            }
            Err(e) => {
                warn!(session = id, "no stopped confirmation: {}", e);
                self.shared.mark(id, SessionState::Closed);
            }
        }
    }

    /// Stops accepting connections and closes every session
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(accept) = self.accept.take() {
            if let Err(e) = accept.await {
                warn!("control accept loop failed: {}", e);
            }
        }

        self.close_sessions();
    }

    fn close_sessions(&self) {
        let mut sessions = self.shared.sessions.lock();
        for session in sessions.iter_mut() {
            session.writer.take();
            abort_observer(session.reader.take());
            if session.state != SessionState::Stopped {
                session.advance(SessionState::Closed);
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.close_sessions();
    }
}

fn abort_observer(reader: ReaderSlot) {
    if let ReaderSlot::Observing(observer) = reader {
        observer.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    observe_start: bool,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => register(&shared, stream, peer, observe_start),
                Err(e) => warn!("failed to accept control connection: {}", e),
            },
        }
    }

    debug!("control accept loop finished");
}

fn register(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr, observe_start: bool) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not set nodelay on control connection: {}", e);
    }

    let (reader, writer) = stream.into_split();
    let mut sessions = shared.sessions.lock();
    let id = sessions.len();

    let reader = if observe_start {
        ReaderSlot::Observing(tokio::spawn(observe(Arc::clone(shared), id, reader)))
    } else {
        ReaderSlot::Idle(reader)
    };

    sessions.push(ControlSession {
        id,
        peer,
        state: SessionState::Connected,
        writer: Some(writer),
        reader,
    });

    debug!(session = id, %peer, "control session connected");
}

/// Waits for the session's first byte, off the accept loop
async fn observe(shared: Arc<Shared>, id: usize, mut reader: OwnedReadHalf) -> OwnedReadHalf {
    match msg::recv_opcode(&mut reader).await {
        Ok(Opcode::Started) => shared.mark_started(id),
        Ok(Opcode::Stopped) => {
            warn!(session = id, "child stopped without reporting started");
            shared.mark(id, SessionState::Stopped);
        }
        Ok(other) => warn!(session = id, opcode = %other, "unexpected opcode from child"),
        Err(e) => warn!(
            session = id,
            "control channel failed before child reported started: {}", e
        ),
    }

    reader
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn coordinator(observe_start: bool) -> Coordinator {
        Coordinator::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), observe_start)
            .await
            .unwrap()
    }

    async fn connect(coordinator: &Coordinator, expected_sessions: usize) -> TcpStream {
        let stream = TcpStream::connect(coordinator.local_addr()).await.unwrap();
        while coordinator.sessions().len() < expected_sessions {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stream
    }

    #[tokio::test]
    async fn test_does_not_release_on_subset() {
        let coordinator = coordinator(true).await;
        let mut first = connect(&coordinator, 1).await;
        let _second = connect(&coordinator, 2).await;

        first.write_all(&[Opcode::Started.as_byte()]).await.unwrap();

        let err = coordinator
            .await_all_started(2, Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DeadlineElapsed(_)));
        assert_eq!(coordinator.started_count(), 1);
    }

    #[tokio::test]
    async fn test_releases_when_all_started() {
        let coordinator = coordinator(true).await;
        let mut children = Vec::new();
        for i in 0..3 {
            children.push(connect(&coordinator, i + 1).await);
        }

        for child in children.iter_mut().rev() {
            child.write_all(&[Opcode::Started.as_byte()]).await.unwrap();
        }

        coordinator
            .await_all_started(3, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(coordinator
            .sessions()
            .iter()
            .all(|s| s.state == SessionState::Started));
    }

    #[tokio::test]
    async fn test_duplicate_started_counts_once() {
        let coordinator = coordinator(true).await;
        let mut child = connect(&coordinator, 1).await;
        let _other = connect(&coordinator, 2).await;

        child.write_all(&[2, 2]).await.unwrap();

        assert!(coordinator
            .await_all_started(2, Some(Duration::from_millis(200)))
            .await
            .is_err());
        assert_eq!(coordinator.started_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_is_not_counted() {
        let coordinator = coordinator(true).await;
        let child = connect(&coordinator, 1).await;
        drop(child);

        assert!(coordinator
            .await_all_started(1, Some(Duration::from_millis(200)))
            .await
            .is_err());
        assert_eq!(coordinator.sessions()[0].state, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_stop_without_confirmation() {
        let coordinator = coordinator(false).await;
        let mut child = connect(&coordinator, 1).await;

        coordinator.stop_all(false).await.unwrap();

        let mut buf = Vec::new();
        child.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![Opcode::Stop.as_byte()]);
        assert_eq!(coordinator.sessions()[0].state, SessionState::StopSent);
    }

    #[tokio::test]
    async fn test_stop_waits_for_confirmation() {
        let coordinator = Arc::new(coordinator(true).await);
        let mut child = connect(&coordinator, 1).await;
        child.write_all(&[Opcode::Started.as_byte()]).await.unwrap();
        coordinator.await_all_started(1, None).await.unwrap();

        let stopping = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.stop_all(true).await })
        };

        let mut byte = [0u8; 1];
        child.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], Opcode::Stop.as_byte());

        // not complete until the confirmation is read
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!stopping.is_finished());
        assert_eq!(coordinator.sessions()[0].state, SessionState::StopSent);

        child.write_all(&[Opcode::Stopped.as_byte()]).await.unwrap();
        stopping.await.unwrap().unwrap();
        assert_eq!(coordinator.sessions()[0].state, SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_second_stop_is_noop() {
        let coordinator = coordinator(false).await;
        let mut child = connect(&coordinator, 1).await;

        coordinator.stop_all(false).await.unwrap();
        coordinator.stop_all(false).await.unwrap();

        let mut buf = Vec::new();
        child.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![Opcode::Stop.as_byte()]);
    }

    #[tokio::test]
    async fn test_confirmation_from_vanished_child() {
        let coordinator = coordinator(false).await;
        let child = connect(&coordinator, 1).await;
        drop(child);

        coordinator.stop_all(true).await.unwrap();
        let state = coordinator.sessions()[0].state;
        assert!(state == SessionState::Closed || state == SessionState::StopSent);
    }

    #[test]
    fn test_state_is_monotonic() {
        assert!(SessionState::Connected < SessionState::Started);
        assert!(SessionState::Started < SessionState::StopSent);
        assert!(SessionState::StopSent < SessionState::Stopped);
    }
}
