//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! TCP and Unix socket backend
//!
//! One peer at a time. A listening socket accepts only while disconnected; a
//! connecting socket optionally retries on a fixed interval. Each new stream
//! goes through the optional TLS handshake and telnet bootstrap before the
//! frontend is told [`ChardevEvent::Opened`].

mod reconnect;
mod tls;

pub use self::tls::{TlsCredentials, TlsEndpoint};

use crate::backend::Backend;
use crate::channel::{BoxStream, ChannelWriter, Duplex, SharedReader, flush_driver, shared_reader};
use crate::chardev::BackendContext;
use crate::config::{SocketAddress, SocketOptions};
use crate::watch::{PumpExit, ReadPump};
use crate::{Chardev, ChardevError, ChardevEvent, ChardevInner, Result};
use chario_telnetcodec::TelnetNegotiator;
use metrics::counter;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::Poll;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

/// Connection phase of a socket chardev
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No peer
    Disconnected = 0,
    /// TCP/Unix connect or accept in progress
    Connecting = 1,
    /// TLS handshake in progress
    TlsHandshaking = 2,
    /// Telnet bootstrap being sent
    TelnetNegotiating = 3,
    /// Peer established, data flows
    Connected = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> ConnectionState {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::TlsHandshaking,
            3 => ConnectionState::TelnetNegotiating,
            4 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::TlsHandshaking => write!(f, "tls-handshaking"),
            ConnectionState::TelnetNegotiating => write!(f, "telnet-negotiating"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// A freshly accepted or connected stream, before any protocol setup
struct Peer {
    stream: BoxStream,
    local: Option<SocketAddr>,
    description: String,
}

struct Connection {
    id: u64,
    writer: Arc<ChannelWriter>,
    reader: SharedReader,
    local: Option<SocketAddr>,
    filename: String,
    tasks: Vec<AbortHandle>,
}

#[derive(Default)]
struct SocketState {
    conn: Option<Connection>,
    reconnect: Option<AbortHandle>,
    connect_error_reported: bool,
}

impl SocketState {
    fn reconnect_armed(&self) -> bool {
        matches!(self.reconnect, Some(ref handle) if !handle.is_finished())
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    async fn accept(&self, nodelay: bool) -> io::Result<Peer> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                if nodelay {
                    stream.set_nodelay(true)?;
                }
                Ok(Peer {
                    local: stream.local_addr().ok(),
                    stream: Box::new(stream),
                    description: addr.to_string(),
                })
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Peer {
                    stream: Box::new(stream),
                    local: None,
                    description: String::new(),
                })
            }
        }
    }
}

pub(crate) struct SocketBackend {
    label: String,
    options: SocketOptions,
    tls: Option<Arc<TlsCredentials>>,
    phase: AtomicU8,
    state: Mutex<SocketState>,
    listen_addr: OnceLock<SocketAddr>,
    accept_resume: Arc<Notify>,
    write_ready: Arc<Notify>,
    next_id: AtomicU64,
}

impl SocketBackend {
    pub(crate) fn new(
        context: &BackendContext,
        options: &SocketOptions,
        tls: Option<Arc<TlsCredentials>>,
    ) -> Result<Self> {
        let tls = match options.tls_creds {
            Some(ref name) => {
                let creds = tls.ok_or_else(|| ChardevError::TlsCredentialsNotFound(name.clone()))?;
                creds.check_endpoint(options.server)?;
                Some(creds)
            }
            None => None,
        };
        Ok(Self {
            label: context.label.clone(),
            options: options.clone(),
            tls,
            phase: AtomicU8::new(ConnectionState::Disconnected as u8),
            state: Mutex::new(SocketState::default()),
            listen_addr: OnceLock::new(),
            accept_resume: Arc::new(Notify::new()),
            write_ready: context.write_ready.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Current connection phase
    pub(crate) fn phase(&self) -> ConnectionState {
        ConnectionState::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: ConnectionState) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn scheme(&self) -> &'static str {
        match self.options.address {
            SocketAddress::Unix { .. } => "unix",
            SocketAddress::Inet { .. } if self.options.telnet => "telnet",
            SocketAddress::Inet { .. } => "tcp",
        }
    }

    fn server_suffix(&self) -> &'static str {
        if self.options.server { ",server=on" } else { "" }
    }

    fn endpoint(&self) -> String {
        match (&self.options.address, self.listen_addr.get()) {
            (SocketAddress::Inet { .. }, Some(addr)) => addr.to_string(),
            (address, _) => address.to_string(),
        }
    }

    pub(crate) fn filename(&self) -> String {
        if let Some(ref conn) = self.state.lock().conn {
            return conn.filename.clone();
        }
        format!(
            "disconnected:{}:{}{}",
            self.scheme(),
            self.endpoint(),
            self.server_suffix()
        )
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        if let Some(addr) = self.listen_addr.get() {
            return Some(*addr);
        }
        self.state.lock().conn.as_ref().and_then(|conn| conn.local)
    }

    /// Bind or connect, depending on the mode
    #[instrument(skip(self, chr), fields(label = %self.label))]
    pub(crate) async fn start(&self, chr: &Chardev) -> Result<()> {
        if self.options.server {
            let listener = self.listen().await?;
            let resume = self.accept_resume.clone();
            let nodelay = self.options.nodelay;
            chr.spawn(accept_loop(chr.downgrade(), listener, resume, nodelay));
            if self.options.wait {
                info!("waiting for connection on: {}", self.filename());
                let mut open = chr.open_state();
                open.wait_for(|open| *open)
                    .await
                    .map_err(|_| ChardevError::Closed(self.label.clone()))?;
            }
            return Ok(());
        }

        match self.options.reconnect {
            Some(interval) => {
                let mut state = self.state.lock();
                state.reconnect = Some(chr.spawn(reconnect::run(chr.downgrade(), interval, true)));
                Ok(())
            }
            None => {
                let peer = self.connect().await?;
                self.establish(chr, peer).await
            }
        }
    }

    async fn listen(&self) -> Result<Arc<Listener>> {
        let listener = match self.options.address {
            SocketAddress::Inet { ref host, port } => {
                let addr = tokio::net::lookup_host((host.as_str(), port))
                    .await?
                    .next()
                    .ok_or_else(|| ChardevError::config("host", format!("'{host}' did not resolve")))?;
                let socket = socket2::Socket::new(
                    socket2::Domain::for_address(addr),
                    socket2::Type::STREAM,
                    Some(socket2::Protocol::TCP),
                )?;
                socket.set_reuse_address(true)?;
                socket.set_nonblocking(true)?;
                socket.bind(&addr.into())?;
                socket.listen(1)?;
                let listener = TcpListener::from_std(socket.into())?;
                if let Ok(local) = listener.local_addr() {
                    let _ = self.listen_addr.set(local);
                }
                Listener::Tcp(listener)
            }
            #[cfg(unix)]
            SocketAddress::Unix { ref path } => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "removed stale socket"),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                Listener::Unix(UnixListener::bind(path)?)
            }
            #[cfg(not(unix))]
            SocketAddress::Unix { .. } => {
                return Err(ChardevError::config("path", "unix sockets are not available"));
            }
        };
        info!(endpoint = %self.endpoint(), "listening");
        Ok(Arc::new(listener))
    }

    /// One outgoing connect attempt
    async fn connect(&self) -> Result<Peer> {
        self.set_phase(ConnectionState::Connecting);
        let peer = match self.options.address {
            SocketAddress::Inet { ref host, port } => TcpStream::connect((host.as_str(), port))
                .await
                .and_then(|stream| {
                    if self.options.nodelay {
                        stream.set_nodelay(true)?;
                    }
                    Ok(Peer {
                        local: stream.local_addr().ok(),
                        description: stream.peer_addr()?.to_string(),
                        stream: Box::new(stream),
                    })
                }),
            #[cfg(unix)]
            SocketAddress::Unix { ref path } => UnixStream::connect(path).await.map(|stream| Peer {
                stream: Box::new(stream),
                local: None,
                description: String::new(),
            }),
            #[cfg(not(unix))]
            SocketAddress::Unix { .. } => Err(io::ErrorKind::Unsupported.into()),
        };
        peer.map_err(|err| {
            self.set_phase(ConnectionState::Disconnected);
            counter!("chario.socket.connect_failures").increment(1);
            ChardevError::Io(err)
        })
    }

    fn connected_filename(&self, peer: &Peer) -> String {
        match self.options.address {
            SocketAddress::Inet { .. } => {
                let local = peer
                    .local
                    .map_or_else(|| self.endpoint(), |addr| addr.to_string());
                format!(
                    "{}:{}{} <-> {}",
                    self.scheme(),
                    local,
                    self.server_suffix(),
                    peer.description
                )
            }
            SocketAddress::Unix { ref path } => {
                format!("unix:{}{}", path.display(), self.server_suffix())
            }
        }
    }

    /// TLS, telnet bootstrap, then publish the connection and fire `Opened`
    async fn establish(&self, chr: &Chardev, peer: Peer) -> Result<()> {
        match self.setup(peer).await {
            Ok(conn) => {
                self.activate(chr, conn);
                Ok(())
            }
            Err(err) => {
                self.set_phase(ConnectionState::Disconnected);
                self.accept_resume.notify_one();
                Err(err)
            }
        }
    }

    async fn setup(&self, peer: Peer) -> Result<Connection> {
        let filename = self.connected_filename(&peer);
        let Peer { mut stream, local, .. } = peer;

        if let Some(ref tls) = self.tls {
            self.set_phase(ConnectionState::TlsHandshaking);
            let host = match self.options.address {
                SocketAddress::Inet { ref host, .. } => host.as_str(),
                SocketAddress::Unix { .. } => "",
            };
            stream = tls.handshake(stream, host).await?;
            debug!(label = %self.label, "tls handshake complete");
        }

        if self.options.telnet {
            self.set_phase(ConnectionState::TelnetNegotiating);
            stream.write_all(&TelnetNegotiator::bootstrap()).await?;
            stream.flush().await?;
        }

        let (reader, writer) = tokio::io::split(stream);
        Ok(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            writer: Arc::new(ChannelWriter::new(Box::new(writer), self.write_ready.clone())),
            reader: shared_reader(Box::new(reader)),
            local,
            filename,
            tasks: Vec::new(),
        })
    }

    fn activate(&self, chr: &Chardev, conn: Connection) {
        let id = conn.id;
        let reader = conn.reader.clone();
        let writer = conn.writer.clone();
        {
            let mut state = self.state.lock();
            state.reconnect = None;
            state.connect_error_reported = false;
            state.conn = Some(conn);
        }
        self.set_phase(ConnectionState::Connected);
        counter!("chario.socket.connects").increment(1);
        info!(label = %self.label, filename = %self.filename(), "connected");
        chr.be_event(ChardevEvent::Opened);

        let telnet = self.options.telnet.then(TelnetNegotiator::new);
        let pump = ReadPump::new(chr, reader, telnet);
        let weak = chr.downgrade();
        let mut tasks = vec![chr.spawn(async move {
            let exit = pump.run().await;
            if let Some(chr) = Chardev::upgrade(&weak) {
                if let PumpExit::Error(ref err) = exit {
                    debug!(label = %chr.label(), error = %err, "socket read failed");
                }
                if let Backend::Socket(ref socket) = *chr.backend() {
                    socket.disconnect(&chr, id);
                }
            }
        })];
        if self.tls.is_some() {
            let weak = chr.downgrade();
            let ready = self.write_ready.clone();
            tasks.push(chr.spawn(async move {
                let err = flush_driver(writer, ready).await;
                if let Some(chr) = Chardev::upgrade(&weak) {
                    debug!(label = %chr.label(), error = %err, "tls flush failed");
                    if let Backend::Socket(ref socket) = *chr.backend() {
                        socket.disconnect(&chr, id);
                    }
                }
            }));
        }

        let mut state = self.state.lock();
        match state.conn {
            Some(ref mut conn) if conn.id == id => conn.tasks.extend(tasks),
            _ => tasks.iter().for_each(AbortHandle::abort),
        }
    }

    /// Tear down connection `id`; stale ids are ignored
    pub(crate) fn disconnect(&self, chr: &Chardev, id: u64) {
        let (conn, was_connected, rearm) = {
            let mut state = self.state.lock();
            if state.conn.as_ref().map(|conn| conn.id) != Some(id) {
                return;
            }
            let conn = state.conn.take();
            let was_connected = self.phase() == ConnectionState::Connected;
            self.set_phase(ConnectionState::Disconnected);
            let rearm = !self.options.server
                && self.options.reconnect.is_some()
                && !state.reconnect_armed()
                && !chr.is_closed();
            (conn, was_connected, rearm)
        };
        if let Some(conn) = conn {
            conn.tasks.iter().for_each(AbortHandle::abort);
            conn.writer.release();
        }
        counter!("chario.socket.disconnects").increment(1);
        info!(label = %self.label, "disconnected");
        self.accept_resume.notify_one();
        if was_connected {
            chr.be_event(ChardevEvent::Closed);
        }
        if rearm {
            self.arm_reconnect(chr);
        }
    }

    fn arm_reconnect(&self, chr: &Chardev) {
        let Some(interval) = self.options.reconnect else {
            return;
        };
        let mut state = self.state.lock();
        if !state.reconnect_armed() {
            debug!(label = %self.label, ?interval, "reconnect armed");
            state.reconnect = Some(chr.spawn(reconnect::run(chr.downgrade(), interval, false)));
        }
    }

    /// Record a failed connect; returns whether it should be reported
    fn note_connect_failure(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.connect_error_reported, true)
    }

    /// Called with the chardev write lock held
    pub(crate) fn write(&self, chr: &Chardev, buf: &[u8]) -> Result<usize> {
        let (id, writer) = match self.state.lock().conn {
            Some(ref conn) if self.phase() == ConnectionState::Connected => {
                (conn.id, conn.writer.clone())
            }
            _ => return Err(ChardevError::NotConnected(self.label.clone())),
        };
        writer.try_write(buf).map_err(|err| {
            // A frontend that cannot take input will never see the read side
            // fail, so the disconnect is decided here, off the write lock.
            let weak = chr.downgrade();
            chr.spawn(async move {
                if let Some(chr) = Chardev::upgrade(&weak) {
                    if chr.be_can_receive() == 0 {
                        if let Backend::Socket(ref socket) = *chr.backend() {
                            socket.disconnect(&chr, id);
                        }
                    }
                }
            });
            ChardevError::Io(err)
        })
    }

    pub(crate) async fn read_sync(&self, chr: &Chardev, buf: &mut [u8]) -> Result<usize> {
        let (id, reader) = match self.state.lock().conn {
            Some(ref conn) if self.phase() == ConnectionState::Connected => {
                (conn.id, conn.reader.clone())
            }
            _ => return Err(ChardevError::NotConnected(self.label.clone())),
        };
        let read = {
            let mut reader = reader
                .try_lock()
                .map_err(|_| ChardevError::ReaderBusy(self.label.clone()))?;
            reader.read(buf).await
        };
        match read {
            Ok(0) if !buf.is_empty() => {
                self.disconnect(chr, id);
                Ok(0)
            }
            Ok(len) => Ok(len),
            Err(err) => {
                self.disconnect(chr, id);
                Err(err.into())
            }
        }
    }

    /// `None` while no peer is connected
    pub(crate) fn poll_write_ready(&self) -> Option<Poll<io::Result<()>>> {
        let writer = match self.state.lock().conn {
            Some(ref conn) if self.phase() == ConnectionState::Connected => conn.writer.clone(),
            _ => return None,
        };
        Some(writer.poll_ready())
    }

    pub(crate) fn close(&self, chr: &Chardev) {
        let (conn, reconnect) = {
            let mut state = self.state.lock();
            (state.conn.take(), state.reconnect.take())
        };
        if let Some(reconnect) = reconnect {
            reconnect.abort();
        }
        if let Some(conn) = conn {
            conn.tasks.iter().for_each(AbortHandle::abort);
            conn.writer.release();
        }
        self.set_phase(ConnectionState::Disconnected);
        #[cfg(unix)]
        if let SocketAddress::Unix { ref path } = self.options.address {
            if self.options.server {
                let _ = std::fs::remove_file(path);
            }
        }
        debug!(label = %chr.label(), "socket released");
    }
}

async fn accept_loop(
    weak: Weak<ChardevInner>,
    listener: Arc<Listener>,
    resume: Arc<Notify>,
    nodelay: bool,
) {
    loop {
        loop {
            let notified = resume.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let Some(chr) = Chardev::upgrade(&weak) else {
                return;
            };
            let idle = match *chr.backend() {
                Backend::Socket(ref socket) => socket.phase() == ConnectionState::Disconnected,
                _ => return,
            };
            drop(chr);
            if idle {
                break;
            }
            notified.await;
        }

        let accepted = listener.accept(nodelay).await;
        let Some(chr) = Chardev::upgrade(&weak) else {
            return;
        };
        let Backend::Socket(ref socket) = *chr.backend() else {
            return;
        };
        match accepted {
            Ok(peer) => {
                socket.set_phase(ConnectionState::Connecting);
                debug!(label = %chr.label(), peer = %peer.description, "accepted");
                if let Err(err) = socket.establish(&chr, peer).await {
                    warn!(label = %chr.label(), error = %err, "connection setup failed");
                }
            }
            Err(err) => {
                warn!(label = %chr.label(), error = %err, "accept failed");
                drop(chr);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
