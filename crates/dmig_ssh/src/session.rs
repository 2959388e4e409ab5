use crate::TunnelError;
use dmig_core::Tunnel;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

/// What to do with the server's host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Verify against `~/.ssh/known_hosts`; unknown or mismatched keys fail.
    #[default]
    KnownHosts,
    /// Accept whatever the server presents. Only for environments where the
    /// known-hosts file cannot exist (containerised test runs).
    AcceptAny,
}

fn known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

fn verify_host_key(session: &Session, tunnel: &Tunnel) -> Result<(), TunnelError> {
    let (key, _key_type) = session
        .host_key()
        .ok_or_else(|| TunnelError::HostKey("server presented no host key".to_string()))?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| TunnelError::HostKey(e.to_string()))?;

    let path = known_hosts_path()
        .ok_or_else(|| TunnelError::HostKey("cannot resolve ~/.ssh/known_hosts".to_string()))?;
    known_hosts
        .read_file(&path, KnownHostFileKind::OpenSSH)
        .map_err(|e| TunnelError::HostKey(format!("{}: {}", path.display(), e)))?;

    match known_hosts.check_port(&tunnel.server.host, tunnel.server.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(TunnelError::HostKey(format!(
            "{} is not in {}",
            tunnel.server, path.display()
        ))),
        CheckResult::Mismatch => Err(TunnelError::HostKey(format!(
            "host key for {} has changed",
            tunnel.server
        ))),
        CheckResult::Failure => Err(TunnelError::HostKey(format!(
            "known-hosts check failed for {}",
            tunnel.server
        ))),
    }
}

/// Dial the tunnel's server endpoint, verify its host key per policy, and
/// authenticate the configured user against the local SSH agent.
pub fn establish_session(tunnel: &Tunnel, policy: HostKeyPolicy) -> Result<Session, TunnelError> {
    log::info!("[ssh] connecting to {}", tunnel.server);

    let tcp = TcpStream::connect((tunnel.server.host.as_str(), tunnel.server.port))
        .map_err(|e| TunnelError::Connect(format!("{}: {}", tunnel.server, e)))?;
    tcp.set_nodelay(true).ok();
    tcp.set_read_timeout(Some(Duration::from_secs(30))).ok();
    tcp.set_write_timeout(Some(Duration::from_secs(30))).ok();

    let mut session = Session::new().map_err(|e| TunnelError::Connect(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(30_000);
    session
        .handshake()
        .map_err(|e| TunnelError::Connect(format!("handshake: {}", e)))?;

    match policy {
        HostKeyPolicy::KnownHosts => verify_host_key(&session, tunnel)?,
        HostKeyPolicy::AcceptAny => {
            log::warn!("[ssh] host key verification disabled for {}", tunnel.server);
        }
    }

    log::info!("[ssh] authenticating {} via agent", tunnel.auth.user);
    session
        .userauth_agent(&tunnel.auth.user)
        .map_err(|e| TunnelError::Auth(e.to_string()))?;

    if !session.authenticated() {
        return Err(TunnelError::Auth(format!(
            "agent offered no acceptable key for {}",
            tunnel.auth.user
        )));
    }

    Ok(session)
}
