//! Tunnel registry
//!
//! Sole owner of tunnel lifecycle state. Two tables are kept behind a single
//! lock so that every create, join, accept and release is atomic across both:
//! tunnel id -> tunnel, and connection id -> (tunnel id, role).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::connection::{ConnectionId, PeerConnection};
use crate::error::MediatorError;
use crate::gate::{AcceptGate, GateProgress};
use crate::tunnel_id::{RandomTunnelIdGenerator, TunnelId, TunnelIdGenerator};

/// Side of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiator, created the tunnel
    A,
    /// Joiner, attached with the code
    B,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::A => f.write_str("A"),
            Role::B => f.write_str("B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Created, discoverable by its code
    Waiting,
    /// Joined; key and identifier are being exchanged
    Handshaking,
    /// Handshake forwarded; waiting for both sides to accept.
    /// `accepted` is the side that already did, if any.
    AwaitAccept { accepted: Option<Role> },
    /// Both sides accepted; data is relayed
    Connected,
    /// Released, or never existed
    Closed,
}

/// Both connections of a tunnel that has left `Waiting`
#[derive(Debug, Clone)]
pub struct PairedTunnel {
    pub id: TunnelId,
    /// Never reused, unlike `id`
    pub serial: u64,
    pub initiator: Arc<PeerConnection>,
    pub joiner: Arc<PeerConnection>,
}

impl PairedTunnel {
    pub fn peer(&self, role: Role) -> &Arc<PeerConnection> {
        match role {
            Role::A => &self.initiator,
            Role::B => &self.joiner,
        }
    }
}

/// Everything a released tunnel held, handed back for notification
#[derive(Debug)]
pub struct ReleasedTunnel {
    pub id: TunnelId,
    pub serial: u64,
    pub previous_state: TunnelState,
    pub initiator: Arc<PeerConnection>,
    pub joiner: Option<Arc<PeerConnection>>,
    pub lifetime: Duration,
}

impl ReleasedTunnel {
    pub fn peer(&self, role: Role) -> Option<&Arc<PeerConnection>> {
        match role {
            Role::A => Some(&self.initiator),
            Role::B => self.joiner.as_ref(),
        }
    }
}

/// Result of an `accept`
#[derive(Debug)]
pub enum AcceptOutcome {
    /// Not attached, not yet paired, a repeat, or already connected
    Ignored,
    /// First accept recorded; waiting on the other side or the handshake
    Recorded,
    /// Gate opened; the tunnel is now `Connected`
    Opened(PairedTunnel),
}

/// Why a `data` message cannot be relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRefusal {
    NotAttached,
    NotConnected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub waiting: usize,
    pub active: usize,
}

struct TunnelEntry {
    serial: u64,
    state: TunnelState,
    initiator: Arc<PeerConnection>,
    joiner: Option<Arc<PeerConnection>>,
    gate: AcceptGate,
    created_at: Instant,
}

impl TunnelEntry {
    fn paired(&self, id: &TunnelId) -> Option<PairedTunnel> {
        self.joiner.as_ref().map(|joiner| PairedTunnel {
            id: id.clone(),
            serial: self.serial,
            initiator: self.initiator.clone(),
            joiner: joiner.clone(),
        })
    }
}

#[derive(Default)]
struct RegistryInner {
    tunnels: HashMap<TunnelId, TunnelEntry>,
    connections: HashMap<ConnectionId, (TunnelId, Role)>,
    next_serial: u64,
}

impl RegistryInner {
    fn release(&mut self, id: &TunnelId) -> Option<ReleasedTunnel> {
        let entry = self.tunnels.remove(id)?;
        self.connections.remove(entry.initiator.id());
        if let Some(joiner) = &entry.joiner {
            self.connections.remove(joiner.id());
        }
        Some(ReleasedTunnel {
            id: id.clone(),
            serial: entry.serial,
            previous_state: entry.state,
            initiator: entry.initiator,
            joiner: entry.joiner,
            lifetime: entry.created_at.elapsed(),
        })
    }
}

/// Registry of live tunnels
pub struct TunnelRegistry {
    inner: Mutex<RegistryInner>,
    generator: Arc<dyn TunnelIdGenerator>,
    max_id_attempts: usize,
}

impl TunnelRegistry {
    /// Create a registry drawing random ids
    pub fn new(max_id_attempts: usize) -> Self {
        Self::with_generator(Arc::new(RandomTunnelIdGenerator), max_id_attempts)
    }

    pub fn with_generator(generator: Arc<dyn TunnelIdGenerator>, max_id_attempts: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            generator,
            max_id_attempts: max_id_attempts.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a fresh id and register `initiator` as side A of a waiting tunnel
    pub fn create_tunnel(&self, initiator: Arc<PeerConnection>) -> Result<TunnelId, MediatorError> {
        let mut inner = self.lock();

        if inner.connections.contains_key(initiator.id()) {
            return Err(MediatorError::AlreadyAttached);
        }

        for attempt in 1..=self.max_id_attempts {
            let id = self.generator.generate();
            if inner.tunnels.contains_key(&id) {
                tracing::debug!(tunnel_id = %id, attempt, "Tunnel id collision, drawing again");
                continue;
            }

            inner.next_serial += 1;
            let serial = inner.next_serial;
            inner
                .connections
                .insert(initiator.id().clone(), (id.clone(), Role::A));
            inner.tunnels.insert(
                id.clone(),
                TunnelEntry {
                    serial,
                    state: TunnelState::Waiting,
                    initiator,
                    joiner: None,
                    gate: AcceptGate::new(),
                    created_at: Instant::now(),
                },
            );
            return Ok(id);
        }

        tracing::warn!(
            attempts = self.max_id_attempts,
            live_tunnels = inner.tunnels.len(),
            "Tunnel id space exhausted"
        );
        Err(MediatorError::IdSpaceExhausted {
            attempts: self.max_id_attempts,
        })
    }

    /// Attach `joiner` as side B of the waiting tunnel named by `raw_id`
    ///
    /// Unknown, malformed, already paired and closed ids all fail with
    /// `NotFound`. At most one join per tunnel can ever succeed.
    pub fn join_tunnel(
        &self,
        raw_id: &str,
        joiner: Arc<PeerConnection>,
    ) -> Result<PairedTunnel, MediatorError> {
        let mut inner = self.lock();

        if inner.connections.contains_key(joiner.id()) {
            return Err(MediatorError::AlreadyAttached);
        }

        let id = TunnelId::parse(raw_id).ok_or(MediatorError::NotFound)?;
        let entry = inner
            .tunnels
            .get_mut(&id)
            .filter(|entry| entry.state == TunnelState::Waiting)
            .ok_or(MediatorError::NotFound)?;

        entry.state = TunnelState::Handshaking;
        entry.joiner = Some(joiner.clone());
        let paired = PairedTunnel {
            id: id.clone(),
            serial: entry.serial,
            initiator: entry.initiator.clone(),
            joiner: joiner.clone(),
        };

        inner
            .connections
            .insert(joiner.id().clone(), (id, Role::B));
        Ok(paired)
    }

    /// Mark the handshake of `tunnel` as forwarded
    ///
    /// Returns the pair if both sides had already accepted, in which case the
    /// tunnel is now `Connected`. Fails with `TunnelClosed` if the tunnel was
    /// released meanwhile.
    pub fn complete_handshake(
        &self,
        tunnel: &PairedTunnel,
    ) -> Result<Option<PairedTunnel>, MediatorError> {
        let mut inner = self.lock();
        let entry = inner
            .tunnels
            .get_mut(&tunnel.id)
            .filter(|entry| entry.serial == tunnel.serial)
            .filter(|entry| entry.state == TunnelState::Handshaking)
            .ok_or(MediatorError::TunnelClosed)?;

        if entry.gate.is_open() {
            entry.state = TunnelState::Connected;
            return Ok(Some(tunnel.clone()));
        }

        entry.state = TunnelState::AwaitAccept {
            accepted: entry.gate.accepted_side(),
        };
        Ok(None)
    }

    /// Record an `accept` from `conn`
    pub fn accept(&self, conn: &ConnectionId) -> AcceptOutcome {
        let mut inner = self.lock();
        let Some((id, role)) = inner.connections.get(conn).cloned() else {
            return AcceptOutcome::Ignored;
        };
        let Some(entry) = inner.tunnels.get_mut(&id) else {
            return AcceptOutcome::Ignored;
        };

        match entry.state {
            TunnelState::Handshaking => match entry.gate.record(role) {
                GateProgress::Repeated => AcceptOutcome::Ignored,
                // Opening is deferred until the handshake has been forwarded
                GateProgress::First | GateProgress::Opened => AcceptOutcome::Recorded,
            },
            TunnelState::AwaitAccept { .. } => match entry.gate.record(role) {
                GateProgress::Repeated => AcceptOutcome::Ignored,
                GateProgress::First => {
                    entry.state = TunnelState::AwaitAccept {
                        accepted: Some(role),
                    };
                    AcceptOutcome::Recorded
                }
                GateProgress::Opened => {
                    let Some(paired) = entry.paired(&id) else {
                        tracing::debug!(tunnel_id = %id, "Accept gate opened without a joiner");
                        return AcceptOutcome::Ignored;
                    };
                    entry.state = TunnelState::Connected;
                    AcceptOutcome::Opened(paired)
                }
            },
            TunnelState::Waiting | TunnelState::Connected | TunnelState::Closed => {
                AcceptOutcome::Ignored
            }
        }
    }

    /// The connection that `data` from `conn` should be forwarded to
    pub fn relay_target(&self, conn: &ConnectionId) -> Result<Arc<PeerConnection>, RelayRefusal> {
        let inner = self.lock();
        let (id, role) = inner
            .connections
            .get(conn)
            .ok_or(RelayRefusal::NotAttached)?;
        let entry = inner.tunnels.get(id).ok_or(RelayRefusal::NotAttached)?;

        if entry.state != TunnelState::Connected {
            return Err(RelayRefusal::NotConnected);
        }
        match role.other() {
            Role::A => Ok(entry.initiator.clone()),
            Role::B => entry.joiner.clone().ok_or(RelayRefusal::NotConnected),
        }
    }

    /// Tunnel and role `conn` is attached to
    pub fn lookup(&self, conn: &ConnectionId) -> Option<(TunnelId, Role)> {
        self.lock().connections.get(conn).cloned()
    }

    /// Current state; `Closed` for released or unknown ids
    pub fn state(&self, id: &TunnelId) -> TunnelState {
        self.lock()
            .tunnels
            .get(id)
            .map(|entry| entry.state)
            .unwrap_or(TunnelState::Closed)
    }

    /// Whether `tunnel` is still live and handshaking
    pub fn is_handshaking(&self, tunnel: &PairedTunnel) -> bool {
        self.lock()
            .tunnels
            .get(&tunnel.id)
            .is_some_and(|entry| {
                entry.serial == tunnel.serial && entry.state == TunnelState::Handshaking
            })
    }

    /// Remove the tunnel and both connection mappings
    ///
    /// Idempotent: only the first release of a tunnel returns it.
    pub fn release(&self, id: &TunnelId) -> Option<ReleasedTunnel> {
        self.lock().release(id)
    }

    /// Like [`release`](Self::release), but leaves alone a newer tunnel that
    /// drew the same id
    pub fn release_paired(&self, tunnel: &PairedTunnel) -> Option<ReleasedTunnel> {
        let mut inner = self.lock();
        let current = inner.tunnels.get(&tunnel.id)?.serial;
        if current != tunnel.serial {
            return None;
        }
        inner.release(&tunnel.id)
    }

    /// Release whatever tunnel `conn` is attached to, returning its role
    pub fn release_connection(&self, conn: &ConnectionId) -> Option<(Role, ReleasedTunnel)> {
        let mut inner = self.lock();
        let (id, role) = inner.connections.get(conn).cloned()?;
        inner.release(&id).map(|released| (role, released))
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.lock();
        let waiting = inner
            .tunnels
            .values()
            .filter(|entry| entry.state == TunnelState::Waiting)
            .count();
        RegistryStats {
            waiting,
            active: inner.tunnels.len() - waiting,
        }
    }

    /// Number of live tunnels
    pub fn len(&self) -> usize {
        self.lock().tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of connections attached to live tunnels
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new(crate::config::MediatorConfig::default().max_id_attempts)
    }
}
