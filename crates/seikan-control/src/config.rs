//! Mediator tuning knobs

use std::time::Duration;

/// Bounded-wait limits and resource caps for the mediator
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// How long the initiator may take to answer `request-public-key`.
    /// Joining can require a human to approve the request, so this is long.
    pub public_key_timeout: Duration,
    /// How long the joiner may take to return its encrypted identifier
    pub identifier_timeout: Duration,
    /// Tunnel id draws before giving up with `IdSpaceExhausted`
    pub max_id_attempts: usize,
    /// Messages queued per connection before senders are held back
    pub outbound_capacity: usize,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            public_key_timeout: Duration::from_secs(300),
            identifier_timeout: Duration::from_secs(10),
            max_id_attempts: 64,
            outbound_capacity: 64,
        }
    }
}

impl MediatorConfig {
    pub fn with_public_key_timeout(mut self, timeout: Duration) -> Self {
        self.public_key_timeout = timeout;
        self
    }

    pub fn with_identifier_timeout(mut self, timeout: Duration) -> Self {
        self.identifier_timeout = timeout;
        self
    }

    pub fn with_max_id_attempts(mut self, attempts: usize) -> Self {
        self.max_id_attempts = attempts.max(1);
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}
