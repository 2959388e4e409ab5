use crate::forwarder::{ActiveTunnel, spawn_forwarder};
use crate::session::HostKeyPolicy;
use crate::TunnelError;
use dmig_core::Tunnel;
use std::collections::HashMap;
use std::sync::Mutex;

/// How the manager starts a forwarder. The indirection exists so
/// idempotence can be exercised without a live SSH server.
pub type TunnelSpawner =
    Box<dyn Fn(&Tunnel, HostKeyPolicy) -> Result<ActiveTunnel, TunnelError> + Send + Sync>;

/// Keeps at most one live forwarder per tunnel machine name.
///
/// `ensure` is idempotent: the first call for a machine name starts the
/// forwarder, later calls short-circuit. The map lock is held across the
/// spawn, so concurrent callers for the same tunnel serialise and exactly
/// one forwarder wins. Forwarders live until the manager is dropped.
pub struct TunnelManager {
    policy: HostKeyPolicy,
    active: Mutex<HashMap<String, ActiveTunnel>>,
    spawner: TunnelSpawner,
}

impl TunnelManager {
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self::with_spawner(policy, Box::new(spawn_forwarder))
    }

    /// Build a manager with a custom forwarder spawner.
    pub fn with_spawner(policy: HostKeyPolicy, spawner: TunnelSpawner) -> Self {
        Self {
            policy,
            active: Mutex::new(HashMap::new()),
            spawner,
        }
    }

    /// Start the tunnel unless one is already live under its machine name.
    /// Returns `true` when this call started it.
    pub fn ensure(&self, tunnel: &Tunnel) -> Result<bool, TunnelError> {
        let name = tunnel.component.machine_name.clone();
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if active.contains_key(&name) {
            log::debug!("[ssh] tunnel {} already live", name);
            return Ok(false);
        }

        let forwarder = (self.spawner)(tunnel, self.policy)?;
        active.insert(name, forwarder);
        Ok(true)
    }

    pub fn is_active(&self, machine_name: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains_key(machine_name))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmig_core::{Component, Endpoint, TunnelAuth};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn tunnel(machine_name: &str) -> Tunnel {
        Tunnel {
            component: Component::new("Tunnel", machine_name),
            local: Endpoint {
                host: "127.0.0.1".into(),
                port: 15432,
            },
            server: Endpoint {
                host: "bastion.example.com".into(),
                port: 22,
            },
            remote: Endpoint {
                host: "db.internal".into(),
                port: 5432,
            },
            auth: TunnelAuth { user: "deploy".into() },
        }
    }

    fn counting_manager() -> (Arc<AtomicUsize>, TunnelManager) {
        let spawned = Arc::new(AtomicUsize::new(0));
        let counter = spawned.clone();
        let manager = TunnelManager::with_spawner(
            HostKeyPolicy::AcceptAny,
            Box::new(move |_tunnel, _policy| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ActiveTunnel::idle())
            }),
        );
        (spawned, manager)
    }

    #[test]
    fn ensure_is_idempotent_per_machine_name() {
        let (spawned, manager) = counting_manager();
        let cfg = tunnel("prod-db");

        assert!(manager.ensure(&cfg).unwrap());
        assert!(!manager.ensure(&cfg).unwrap());
        assert!(!manager.ensure(&cfg).unwrap());

        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert!(manager.is_active("prod-db"));
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn distinct_machine_names_get_distinct_forwarders() {
        let (spawned, manager) = counting_manager();

        manager.ensure(&tunnel("a")).unwrap();
        manager.ensure(&tunnel("b")).unwrap();

        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn concurrent_ensure_spawns_exactly_once() {
        let (spawned, manager) = counting_manager();
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || manager.ensure(&tunnel("shared")).unwrap())
            })
            .collect();

        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spawn_failure_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let manager = TunnelManager::with_spawner(
            HostKeyPolicy::KnownHosts,
            Box::new(move |_tunnel, _policy| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TunnelError::Connect("first dial refused".into()))
                } else {
                    Ok(ActiveTunnel::idle())
                }
            }),
        );

        let cfg = tunnel("flaky");
        assert!(manager.ensure(&cfg).is_err());
        assert!(!manager.is_active("flaky"));
        assert!(manager.ensure(&cfg).unwrap());
        assert!(manager.is_active("flaky"));
    }
}
