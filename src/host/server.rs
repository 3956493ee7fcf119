//! TCP listener that runs one worker task per client connection.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::host::handler::{handle_frame, HostState};
use crate::host::protocol::{encode_frame, ProtocolError, ServerMessage};

const WELCOME_MESSAGE: &str = "Connected to Remote Host Server";

/// Longest frame accepted from a client, not counting the newline
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Snapshot of the server for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub address: SocketAddr,
    pub running: bool,
    pub active_connections: usize,
    pub connections: Vec<ConnectionInfo>,
}

/// Snapshot of one live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: String,
    pub connected_at: DateTime<Local>,
    pub authenticated: bool,
}

/// A client connection, owned by its worker
#[derive(Debug)]
pub struct Connection {
    key: u64,
    id: String,
    connected_at: DateTime<Local>,
    // Written only by the worker; the registry reads it for status snapshots
    authenticated: Arc<AtomicBool>,
}

impl Connection {
    fn new(key: u64, peer: SocketAddr) -> Self {
        Self {
            key,
            id: peer.to_string(),
            connected_at: Local::now(),
            authenticated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Local> {
        self.connected_at
    }

    /// True once any request on this connection carried a valid token
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    fn mark_authenticated(&mut self, username: &str) {
        if !self.authenticated.swap(true, Ordering::Relaxed) {
            log::info!("Client {} authenticated as '{}'", self.id, username);
        }
    }
}

#[derive(Debug)]
struct Registration {
    id: String,
    connected_at: DateTime<Local>,
    authenticated: Arc<AtomicBool>,
    socket: std::net::TcpStream,
}

impl Registration {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            connected_at: self.connected_at,
            authenticated: self.authenticated.load(Ordering::Relaxed),
        }
    }
}

/// Live connections, keyed by a per-accept serial number.
///
/// Each entry holds a second handle to the worker's socket so shutdown can
/// close it out from under a blocked read.
#[derive(Debug, Default)]
struct ConnectionRegistry {
    next_key: AtomicU64,
    entries: Mutex<HashMap<u64, Registration>>,
}

impl ConnectionRegistry {
    fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    async fn register(&self, connection: &Connection, socket: std::net::TcpStream) {
        let registration = Registration {
            id: connection.id.clone(),
            connected_at: connection.connected_at,
            authenticated: Arc::clone(&connection.authenticated),
            socket,
        };
        self.entries.lock().await.insert(connection.key, registration);
    }

    async fn remove(&self, key: u64) -> bool {
        self.entries.lock().await.remove(&key).is_some()
    }

    async fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<_> = self
            .entries
            .lock()
            .await
            .values()
            .map(Registration::info)
            .collect();
        connections.sort_by(|a, b| a.id.cmp(&b.id));
        connections
    }

    /// Shut down every registered socket; returns how many were closed
    async fn close_all(&self) -> usize {
        let entries = self.entries.lock().await;
        for registration in entries.values() {
            if let Err(e) = registration.socket.shutdown(Shutdown::Both) {
                log::debug!("Closing {}: {}", registration.id, e);
            }
        }
        entries.len()
    }
}

/// Cloneable handle for stopping and inspecting a running server
#[derive(Clone)]
pub struct ServerHandle {
    address: SocketAddr,
    running: Arc<watch::Sender<bool>>,
    registry: Arc<ConnectionRegistry>,
    state: Arc<HostState>,
}

impl ServerHandle {
    /// Stop accepting, close every client socket and drop all sessions.
    /// Commands already running finish (or time out) on their own.
    pub async fn shutdown(&self) {
        if !self.running.send_replace(false) {
            return;
        }

        log::info!("Stopping remote host...");
        let closed = self.registry.close_all().await;
        log::info!("Closed {} client connection(s)", closed);
        self.state.sessions.lock().await.invalidate_all();
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub async fn info(&self) -> ServerInfo {
        let connections = self.registry.snapshot().await;
        ServerInfo {
            address: self.address,
            running: self.is_running(),
            active_connections: connections.len(),
            connections,
        }
    }
}

/// Remote host server accepting protocol connections over TCP
pub struct HostServer {
    listener: TcpListener,
    handle: ServerHandle,
}

impl HostServer {
    /// Bind the listening socket
    pub async fn bind(addr: impl ToSocketAddrs, state: Arc<HostState>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let address = listener.local_addr()?;
        log::info!("Remote host listening on {}", address);

        let (running, _) = watch::channel(true);
        Ok(Self {
            listener,
            handle: ServerHandle {
                address,
                running: Arc::new(running),
                registry: Arc::new(ConnectionRegistry::default()),
                state,
            },
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.address
    }

    /// Accept connections until shut down, then wait for every worker to exit
    pub async fn run(self) -> io::Result<()> {
        let Self { listener, handle } = self;
        let mut running = handle.running.subscribe();
        let mut workers = JoinSet::new();

        while *running.borrow_and_update() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if !handle.is_running() {
                            break;
                        }
                        match admit(stream, peer, &handle).await {
                            Ok((stream, connection)) => {
                                let handle = handle.clone();
                                let shutdown = handle.running.subscribe();
                                workers.spawn(serve_client(stream, connection, handle, shutdown));
                            }
                            Err(e) => log::warn!("Dropping client {}: {}", peer, e),
                        }
                    }
                    Err(e) => {
                        log::error!("Error accepting connection: {}", e);
                    }
                },
                changed = running.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(finished) = workers.join_next() => {
                    if let Err(e) = finished {
                        log::error!("Connection worker failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        log::debug!("Listener closed; waiting for {} worker(s)", workers.len());
        while let Some(finished) = workers.join_next().await {
            if let Err(e) = finished {
                log::error!("Connection worker failed: {}", e);
            }
        }

        log::info!("Remote host stopped");
        Ok(())
    }
}

/// Greet a freshly accepted client and register it
async fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    handle: &ServerHandle,
) -> io::Result<(TcpStream, Connection)> {
    let connection = Connection::new(handle.registry.next_key(), peer);
    log::info!("New client connected: {}", connection.id());

    let std_stream = stream.into_std()?;
    let registration = std_stream.try_clone()?;
    let mut stream = TcpStream::from_std(std_stream)?;

    let welcome = ServerMessage::Welcome {
        message: WELCOME_MESSAGE.to_string(),
        server_time: connection.connected_at().to_rfc3339(),
    };
    write_frame(&mut stream, &welcome).await?;

    handle.registry.register(&connection, registration).await;
    Ok((stream, connection))
}

/// Worker body: run the connection loop, then deregister
async fn serve_client(
    stream: TcpStream,
    mut connection: Connection,
    handle: ServerHandle,
    shutdown: watch::Receiver<bool>,
) {
    match handle_connection(stream, &mut connection, &handle.state, shutdown).await {
        Ok(()) => log::info!("Client {} disconnected", connection.id()),
        Err(e) if is_disconnect(&e) => {
            log::info!("Client {} disconnected: {}", connection.id(), e)
        }
        Err(e) => log::error!("Error handling client {}: {}", connection.id(), e),
    }

    handle.registry.remove(connection.key).await;
    log::info!(
        "Client {} connection closed (authenticated: {})",
        connection.id(),
        connection.is_authenticated()
    );
}

/// Read frames and answer them in order until EOF or shutdown
async fn handle_connection(
    stream: TcpStream,
    connection: &mut Connection,
    state: &HostState,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut frame = Vec::new();

    while *shutdown.borrow_and_update() {
        let read = tokio::select! {
            read = read_frame(&mut reader, &mut frame) => read?,
            _ = shutdown.changed() => break,
        };
        match read {
            FrameRead::Eof => break,
            FrameRead::Oversized => {
                log::warn!(
                    "Client {} sent a frame over {} bytes; discarded",
                    connection.id(),
                    MAX_FRAME_BYTES
                );
                let response = ServerMessage::from(ProtocolError::InvalidJson);
                write_frame(&mut writer, &response).await?;
                continue;
            }
            FrameRead::Frame => {}
        }
        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let handled = handle_frame(&frame, state).await;
        if let Some(username) = &handled.identity {
            connection.mark_authenticated(username);
        }
        write_frame(&mut writer, &handled.response).await?;
    }

    Ok(())
}

enum FrameRead {
    Eof,
    Frame,
    Oversized,
}

/// Read one newline-terminated frame into `frame`, buffering at most
/// `MAX_FRAME_BYTES` of it. The rest of an oversized frame is skipped up to
/// and including its newline.
async fn read_frame<R>(reader: &mut R, frame: &mut Vec<u8>) -> io::Result<FrameRead>
where
    R: AsyncBufRead + Unpin,
{
    frame.clear();
    let limit = MAX_FRAME_BYTES as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', frame).await?;
    if read == 0 {
        return Ok(FrameRead::Eof);
    }
    if frame.len() <= MAX_FRAME_BYTES || frame.last() == Some(&b'\n') {
        return Ok(FrameRead::Frame);
    }

    frame.clear();
    skip_line(reader).await?;
    Ok(FrameRead::Oversized)
}

async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

async fn write_frame<W>(writer: &mut W, message: &ServerMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
