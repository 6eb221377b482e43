//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use seikan_control::MediatorConfig;

/// Port the mediator listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 9087;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub mediator: MediatorConfig,
    /// Largest accepted WebSocket message, in bytes
    pub max_message_size: usize,
    /// Allow cross-origin requests on every route, not only the probe
    pub enable_cors: bool,
    /// How long a closing socket may take to flush its last frames
    pub close_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            mediator: MediatorConfig::default(),
            max_message_size: seikan_proto::MAX_MESSAGE_SIZE,
            enable_cors: true,
            close_grace: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_mediator(mut self, mediator: MediatorConfig) -> Self {
        self.mediator = mediator;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.max(1);
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.enable_cors = enabled;
        self
    }
}
