//! Manager endpoint identity

use std::fmt;

/// Network identity and access credential of a manager server.
///
/// Immutable once built; the secret is never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    address: String,
    port: u16,
    shared_secret: String,
}

impl ServerEndpoint {
    pub fn new(address: impl Into<String>, port: u16, shared_secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            shared_secret: shared_secret.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn shared_secret(&self) -> &str {
        &self.shared_secret
    }

    /// `host:port` form suitable for connecting or binding
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Same identity on another port (used after binding port 0)
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
