use crate::session::{HostKeyPolicy, establish_session};
use crate::TunnelError;
use dmig_core::Tunnel;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A live local-forward. Dropping it signals the forwarder thread to stop;
/// the thread exits on its next loop pass.
pub struct ActiveTunnel {
    shutdown: Arc<AtomicBool>,
    #[allow(dead_code)]
    thread: Option<JoinHandle<()>>,
}

impl ActiveTunnel {
    pub fn new(shutdown: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            thread: Some(thread),
        }
    }

    /// A tunnel handle with no backing thread, for manager tests.
    #[cfg(test)]
    pub(crate) fn idle() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Drop for ActiveTunnel {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Establish the SSH session, verify the remote is reachable through it,
/// bind the local listener, and hand everything to a forwarder thread.
pub fn spawn_forwarder(tunnel: &Tunnel, policy: HostKeyPolicy) -> Result<ActiveTunnel, TunnelError> {
    let session = establish_session(tunnel, policy)?;

    // Fault an unreachable remote now, while the caller can still report it
    // as a setup error.
    session.set_blocking(true);
    let probe = session
        .channel_direct_tcpip(&tunnel.remote.host, tunnel.remote.port, None)
        .map_err(|e| TunnelError::Remote(format!("{}: {}", tunnel.remote, e)))?;
    drop(probe);

    let listener = TcpListener::bind((tunnel.local.host.as_str(), tunnel.local.port))
        .map_err(|e| TunnelError::Bind(format!("{}: {}", tunnel.local, e)))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| TunnelError::Bind(e.to_string()))?;

    log::info!(
        "[ssh] forwarding {} -> {} via {}",
        tunnel.local,
        tunnel.remote,
        tunnel.server
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    let remote_host = tunnel.remote.host.clone();
    let remote_port = tunnel.remote.port;

    let thread = thread::spawn(move || {
        run_tunnel_loop(listener, session, remote_host, remote_port, shutdown_flag);
    });

    Ok(ActiveTunnel::new(shutdown, thread))
}

/// One forwarded connection: a local client stream paired with an SSH
/// channel to the remote endpoint.
struct TunnelConnection {
    client: TcpStream,
    channel: ssh2::Channel,
    client_buf: Vec<u8>,
    channel_buf: Vec<u8>,
    closed: bool,
}

impl TunnelConnection {
    fn new(client: TcpStream, channel: ssh2::Channel) -> std::io::Result<Self> {
        client.set_nodelay(true)?;
        client.set_nonblocking(true)?;

        Ok(Self {
            client,
            channel,
            client_buf: vec![0u8; 8192],
            channel_buf: vec![0u8; 8192],
            closed: false,
        })
    }

    /// Move bytes both ways. Returns true when any data was transferred.
    fn poll(&mut self) -> bool {
        if self.closed {
            return false;
        }

        let mut activity = false;

        match self.client.read(&mut self.client_buf) {
            Ok(0) => {
                self.closed = true;
                return false;
            }
            Ok(n) => {
                if self.channel.write_all(&self.client_buf[..n]).is_err() {
                    self.closed = true;
                    return false;
                }
                activity = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {
                self.closed = true;
                return false;
            }
        }

        match self.channel.read(&mut self.channel_buf) {
            Ok(0) => {
                self.closed = true;
                return false;
            }
            Ok(n) => {
                if self.client.write_all(&self.channel_buf[..n]).is_err() {
                    self.closed = true;
                    return false;
                }
                activity = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {
                self.closed = true;
                return false;
            }
        }

        activity
    }
}

/// Accept and splice on one thread. A failed connection is dropped from the
/// set; the listener keeps accepting until shutdown.
fn run_tunnel_loop(
    listener: TcpListener,
    session: Session,
    remote_host: String,
    remote_port: u16,
    shutdown: Arc<AtomicBool>,
) {
    session.set_blocking(false);

    let mut connections: Vec<TunnelConnection> = Vec::new();

    while !shutdown.load(Ordering::SeqCst) {
        let mut activity = false;

        match listener.accept() {
            Ok((client, addr)) => {
                log::debug!("[ssh] tunnel connection from {}", addr);

                // Channel open needs a blocking session.
                session.set_blocking(true);
                match session.channel_direct_tcpip(&remote_host, remote_port, None) {
                    Ok(channel) => {
                        session.set_blocking(false);
                        match TunnelConnection::new(client, channel) {
                            Ok(conn) => {
                                connections.push(conn);
                                activity = true;
                            }
                            Err(e) => log::error!("[ssh] connection setup failed: {}", e),
                        }
                    }
                    Err(e) => {
                        session.set_blocking(false);
                        log::error!("[ssh] channel open failed: {}", e);
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                log::error!("[ssh] listener error: {}", e);
                break;
            }
        }

        for conn in &mut connections {
            if conn.poll() {
                activity = true;
            }
        }

        connections.retain(|c| !c.closed);

        if !activity {
            thread::sleep(Duration::from_micros(500));
        }
    }

    log::info!("[ssh] forwarder shutting down");
}
