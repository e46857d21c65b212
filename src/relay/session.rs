//! A relayed client/remote connection pair.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::event::{EventLog, Flow, RelayEvent};

/// Read buffer size of a pump; also the largest `[data  ]` chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Shut down both directions of a socket, ignoring errors.
///
/// The peer pump blocked on the same socket wakes up with end-of-stream.
pub fn close_socket(stream: &TcpStream) {
    let _ = SockRef::from(stream).shutdown(Shutdown::Both);
}

/// Addresses of an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Client address.
    pub client: SocketAddr,

    /// Local port the client connected to.
    pub listen_port: u16,

    /// Local port of the outbound connection.
    pub outgoing_port: u16,

    /// Remote address of the outbound connection.
    pub remote: SocketAddr,
}

impl SessionInfo {
    /// The client to remote direction.
    #[must_use]
    pub fn upstream(&self) -> Flow {
        Flow {
            src_peer: self.client,
            src_local_port: self.listen_port,
            dst_local_port: self.outgoing_port,
            dst_peer: self.remote,
        }
    }

    /// The remote to client direction.
    #[must_use]
    pub fn downstream(&self) -> Flow {
        self.upstream().reversed()
    }

    /// The `[opened]` event for this session.
    #[must_use]
    pub fn opened_event(&self) -> RelayEvent {
        RelayEvent::Opened {
            client: self.client,
            listen_port: self.listen_port,
            outgoing_port: self.outgoing_port,
            remote: self.remote,
        }
    }
}

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The source sent end-of-stream, or the other pump closed the sockets.
    PeerClosed,

    /// A read or write failed.
    Reset(io::ErrorKind),
}

/// Outcome of one pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    /// Direction the pump served.
    pub flow: Flow,

    /// Bytes written to the destination.
    pub bytes: u64,

    /// Why the pump stopped.
    pub end: PumpEnd,
}

/// Outcome of a whole session.
#[derive(Debug, Clone, Copy)]
pub struct SessionReport {
    /// Session addresses.
    pub info: SessionInfo,

    /// Bytes relayed client to remote.
    pub bytes_up: u64,

    /// Bytes relayed remote to client.
    pub bytes_down: u64,
}

/// Shared socket handles of a session, used to force it closed.
#[derive(Debug, Clone)]
pub struct SessionHandles {
    client: Arc<TcpStream>,
    remote: Arc<TcpStream>,
}

impl SessionHandles {
    /// Shut down both sockets. Both pumps finish shortly after.
    pub fn close(&self) {
        close_socket(&self.client);
        close_socket(&self.remote);
    }
}

/// A client connection paired with its outbound connection.
#[derive(Debug)]
pub struct Session {
    info: SessionInfo,
    handles: SessionHandles,
}

impl Session {
    /// Pair an accepted client with an established remote connection.
    ///
    /// # Errors
    ///
    /// Fails if either socket has already been disconnected and its
    /// addresses can no longer be queried.
    pub fn new(client: TcpStream, remote: TcpStream) -> io::Result<Self> {
        let info = SessionInfo {
            client: client.peer_addr()?,
            listen_port: client.local_addr()?.port(),
            outgoing_port: remote.local_addr()?.port(),
            remote: remote.peer_addr()?,
        };
        Ok(Self {
            info,
            handles: SessionHandles {
                client: Arc::new(client),
                remote: Arc::new(remote),
            },
        })
    }

    /// Session addresses.
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Handles that can close this session from elsewhere.
    #[must_use]
    pub fn handles(&self) -> SessionHandles {
        self.handles.clone()
    }

    /// Close both sockets without relaying anything.
    pub fn close(self) {
        self.handles.close();
    }

    /// Relay in both directions until both pumps have finished.
    ///
    /// Each direction runs on its own task. When either pump stops, it
    /// shuts down both sockets so the other one stops too.
    pub async fn run(self, events: Arc<EventLog>) -> SessionReport {
        let SessionHandles { client, remote } = self.handles;

        let upstream = tokio::spawn(pump(
            Arc::clone(&client),
            Arc::clone(&remote),
            self.info.upstream(),
            Arc::clone(&events),
        ));
        let downstream = tokio::spawn(pump(remote, client, self.info.downstream(), events));

        let (up, down) = tokio::join!(upstream, downstream);
        let bytes = |result: Result<PumpReport, tokio::task::JoinError>| match result {
            Ok(report) => {
                debug!(flow = %report.flow, bytes = report.bytes, end = ?report.end, "Pump finished");
                report.bytes
            },
            Err(e) => {
                warn!(error = %e, "Pump task failed");
                0
            },
        };

        SessionReport {
            info: self.info,
            bytes_up: bytes(up),
            bytes_down: bytes(down),
        }
    }
}

async fn pump(
    src: Arc<TcpStream>,
    dst: Arc<TcpStream>,
    flow: Flow,
    events: Arc<EventLog>,
) -> PumpReport {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        match read_chunk(&src, &mut buf).await {
            Ok(0) => break PumpEnd::PeerClosed,
            Ok(n) => {
                events.emit(&RelayEvent::Data { flow, count: n });
                if let Err(e) = write_all(&dst, &buf[..n]).await {
                    break PumpEnd::Reset(e.kind());
                }
                bytes += n as u64;
            },
            Err(e) => break PumpEnd::Reset(e.kind()),
        }
    };

    close_socket(&src);
    close_socket(&dst);
    events.emit(&RelayEvent::Closed { flow });

    PumpReport { flow, bytes, end }
}

async fn read_chunk(stream: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        stream.readable().await?;
        match stream.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
            Err(e) => return Err(e),
        }
    }
}

async fn write_all(stream: &TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        stream.writable().await?;
        match stream.try_write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
