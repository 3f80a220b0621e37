use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("Endpoint cannot be empty")]
    Empty,
    #[error("Invalid endpoint format: {0} (expected IPv4:PORT)")]
    InvalidFormat(String),
    #[error("Invalid port in endpoint: {0}")]
    InvalidPort(String),
}

/// An IPv4 host/port pair, used for both the proxy under test and the
/// CONNECT destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: Ipv4Addr,
    port: u16,
}

impl Endpoint {
    /// Accepts any port, 0 included. Addresses that must be connected to go
    /// through [`Endpoint::require_listening_port`].
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Endpoint { host, port }
    }

    /// Rejects port 0, which no TCP listener can be reached on.
    pub fn require_listening_port(self) -> Result<Self, InputError> {
        if self.port == 0 {
            return Err(InputError::InvalidPort(self.to_string()));
        }
        Ok(self)
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }
}

impl FromStr for Endpoint {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InputError::Empty);
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InputError::InvalidFormat(s.to_string()))?;
        let host = host
            .parse::<Ipv4Addr>()
            .map_err(|_| InputError::InvalidFormat(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| InputError::InvalidPort(s.to_string()))?;

        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
