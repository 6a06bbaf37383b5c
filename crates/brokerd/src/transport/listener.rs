//! Accept loop for the broker endpoint.
//!
//! The bound socket is switched to non-blocking mode and polled from a
//! dedicated `brokerd-accept` thread so that shutdown is observed within one
//! backoff interval. Every accepted connection gets its own thread; the
//! listener tracks how many are still open.

use std::io;
#[cfg(test)]
use std::net::SocketAddr;
use std::net::{TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use broker_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

const IDLE_POLL: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
#[cfg(unix)]
const SOCKET_MODE: u32 = 0o600;

/// A bound, not yet accepting, broker socket.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    socket: BoundSocket,
}

#[derive(Debug)]
enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl BoundSocket {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Accepts one pending connection; `None` when nothing is waiting.
    fn poll_accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Tcp(stream))
            }),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let socket = match endpoint {
            SocketEndpoint::Tcp { host, port } => BoundSocket::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => BoundSocket::Unix(bind_unix(path.as_std_path())?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            socket,
        })
    }

    /// Bound TCP address; `None` for Unix sockets.
    #[cfg(test)]
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            BoundSocket::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            BoundSocket::Unix(_) => None,
        }
    }

    /// Starts accepting on a background thread.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.socket.set_nonblocking() {
            self.release();
            return Err(ListenerError::NonBlocking { source });
        }
        let state = Arc::new(AcceptState::default());
        let accept_state = Arc::clone(&state);
        let endpoint = self.endpoint.clone();
        let thread = thread::Builder::new()
            .name(String::from("brokerd-accept"))
            .spawn(move || self.accept_until_shutdown(&accept_state, &handler))
            .map_err(|source| {
                #[cfg(unix)]
                remove_unix_socket(&endpoint);
                ListenerError::Spawn { source }
            })?;
        Ok(ListenerHandle {
            state,
            thread: Some(thread),
        })
    }

    fn accept_until_shutdown(self, state: &AcceptState, handler: &Arc<dyn ConnectionHandler>) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.endpoint,
            "socket listener active"
        );
        let mut repeated = None::<io::ErrorKind>;
        while !state.stopping.load(Ordering::SeqCst) {
            match self.socket.poll_accept() {
                Ok(Some(stream)) => {
                    repeated = None;
                    state.serve(stream, handler);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    if repeated != Some(error.kind()) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "socket accept error"
                        );
                    }
                    repeated = Some(error.kind());
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.endpoint,
            accepted = state.accepted.load(Ordering::Relaxed),
            open = state.open.load(Ordering::SeqCst),
            "socket listener stopped"
        );
        self.release();
    }

    fn release(self) {
        #[cfg(unix)]
        remove_unix_socket(&self.endpoint);
        drop(self.socket);
    }
}

#[derive(Debug, Default)]
struct AcceptState {
    stopping: AtomicBool,
    accepted: AtomicU64,
    open: Arc<AtomicUsize>,
}

impl AcceptState {
    fn serve(&self, stream: ConnectionStream, handler: &Arc<dyn ConnectionHandler>) {
        let id = self.accepted.fetch_add(1, Ordering::Relaxed);
        let open = OpenConnection::track(&self.open);
        let handler = Arc::clone(handler);
        let spawned = thread::Builder::new()
            .name(format!("brokerd-conn-{id}"))
            .spawn(move || {
                let _open = open;
                handler.handle(stream);
            });
        match spawned {
            Ok(_) => debug!(target: LISTENER_TARGET, connection = id, "connection accepted"),
            Err(error) => warn!(
                target: LISTENER_TARGET,
                connection = id,
                error = %error,
                "failed to spawn connection thread; dropping connection"
            ),
        }
    }
}

/// Counts a connection as open until its thread finishes.
struct OpenConnection {
    open: Arc<AtomicUsize>,
}

impl OpenConnection {
    fn track(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            open: Arc::clone(open),
        }
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to the background accept thread.
pub(crate) struct ListenerHandle {
    state: Arc<AcceptState>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stops accepting; connections already open keep running.
    pub(crate) fn shutdown(&self) {
        self.state.stopping.store(true, Ordering::SeqCst);
    }

    /// Connections whose threads are still running.
    pub(crate) fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    reclaim_stale_socket(path)?;
    let display = || path.display().to_string();
    let listener = UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: display(),
        source,
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE)).map_err(|source| {
        ListenerError::UnixPermissions {
            path: display(),
            source,
        }
    })?;
    Ok(listener)
}

/// Removes a socket file left behind by a broker that is no longer
/// listening. A live socket or a non-socket file is an error.
#[cfg(unix)]
fn reclaim_stale_socket(path: &Path) -> Result<(), ListenerError> {
    let display = || path.display().to_string();
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ListenerError::UnixMetadata {
                path: display(),
                source,
            });
        }
    };
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::UnixNotSocket { path: display() });
    }
    match UnixStream::connect(path) {
        Ok(_) => Err(ListenerError::UnixInUse { path: display() }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            warn!(
                target: LISTENER_TARGET,
                path = %path.display(),
                "removing stale unix socket"
            );
            fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                path: display(),
                source,
            })
        }
        Err(source) => Err(ListenerError::UnixConnect {
            path: display(),
            source,
        }),
    }
}

#[cfg(unix)]
fn remove_unix_socket(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}
