//! # Endpoint addresses.
//!
//! ```text
//! inproc://name           in-process registry entry
//! ipc:///tmp/app.sock     unix domain socket path
//! tcp://127.0.0.1:5555    stream socket
//! udp://127.0.0.1:5556    datagram socket
//! rmcast://239.1.1.1:7000 reliable multicast group (unicast addresses work too)
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::TransportError;

/// Transport protocol of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Peer wiring inside one runtime context.
    InProcess,
    /// Unix domain stream socket.
    Ipc,
    /// TCP stream.
    Tcp,
    /// Best-effort UDP datagrams.
    Udp,
    /// UDP datagrams with NAK-based retransmission.
    ReliableMulticast,
}

impl Protocol {
    /// URL scheme.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::InProcess => "inproc",
            Protocol::Ipc => "ipc",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::ReliableMulticast => "rmcast",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        Some(match scheme {
            "inproc" => Protocol::InProcess,
            "ipc" => Protocol::Ipc,
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "rmcast" => Protocol::ReliableMulticast,
            _ => return None,
        })
    }

    /// True for protocols addressed by host and port.
    pub fn has_port(&self) -> bool {
        matches!(
            self,
            Protocol::Tcp | Protocol::Udp | Protocol::ReliableMulticast
        )
    }
}

/// Where a channel binds or connects.
///
/// ```rust
/// use chanvisor::{Endpoint, Protocol};
///
/// let ep = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
/// assert_eq!(ep.protocol(), Protocol::Tcp);
/// assert_eq!(ep.port(), 5555);
/// assert_eq!(ep.to_string(), "tcp://127.0.0.1:5555");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    protocol: Protocol,
    address: String,
    port: u16,
}

impl Endpoint {
    /// Builds an endpoint from parts.
    pub fn new(protocol: Protocol, address: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            address: address.into(),
            port,
        }
    }

    /// Endpoint for a resolved socket address (IPv6 hosts are bracketed).
    pub(crate) fn from_socket_addr(protocol: Protocol, addr: SocketAddr) -> Self {
        let host = match addr {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
        };
        Self::new(protocol, host, addr.port())
    }

    /// Parses `scheme://address[:port]`.
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let invalid = |reason| TransportError::InvalidEndpoint {
            endpoint: input.to_string(),
            reason,
        };

        let (scheme, rest) = input.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let protocol = Protocol::from_scheme(scheme).ok_or_else(|| invalid("unknown scheme"))?;
        if rest.is_empty() {
            return Err(invalid("empty address"));
        }
        if !protocol.has_port() {
            return Ok(Self::new(protocol, rest, 0));
        }

        let (host, port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
        Ok(Self::new(protocol, host, port))
    }

    /// Protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Host, in-process name or socket path.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Port (`0` for protocols without one, or "pick any" on bind).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form accepted by socket resolvers.
    pub(crate) fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.protocol.has_port() {
            write!(f, "{}://{}:{}", self.protocol.scheme(), self.address, self.port)
        } else {
            write!(f, "{}://{}", self.protocol.scheme(), self.address)
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

/// Anything [`RuntimeContext::bind`](crate::RuntimeContext::bind) and
/// [`connect`](crate::RuntimeContext::connect) accept as an address.
pub trait IntoEndpoint {
    /// Converts into a parsed endpoint.
    fn into_endpoint(self) -> Result<Endpoint, TransportError>;
}

impl IntoEndpoint for Endpoint {
    fn into_endpoint(self) -> Result<Endpoint, TransportError> {
        Ok(self)
    }
}

impl IntoEndpoint for &Endpoint {
    fn into_endpoint(self) -> Result<Endpoint, TransportError> {
        Ok(self.clone())
    }
}

impl IntoEndpoint for &str {
    fn into_endpoint(self) -> Result<Endpoint, TransportError> {
        Endpoint::parse(self)
    }
}

impl IntoEndpoint for String {
    fn into_endpoint(self) -> Result<Endpoint, TransportError> {
        Endpoint::parse(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips() {
        for input in [
            "inproc://jobs",
            "ipc:///tmp/chanvisor.sock",
            "tcp://127.0.0.1:5555",
            "udp://[::1]:9000",
            "rmcast://239.1.2.3:7000",
        ] {
            let ep = Endpoint::parse(input).unwrap();
            assert_eq!(ep.to_string(), input);
        }
    }

    #[test]
    fn ipc_keeps_absolute_path() {
        let ep: Endpoint = "ipc:///run/app.sock".parse().unwrap();
        assert_eq!(ep.protocol(), Protocol::Ipc);
        assert_eq!(ep.address(), "/run/app.sock");
        assert_eq!(ep.port(), 0);
    }

    #[test]
    fn socket_addresses_keep_brackets() {
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        let ep = Endpoint::from_socket_addr(Protocol::Udp, v6);
        assert_eq!(ep.to_string(), "udp://[::1]:9000");
        assert_eq!(ep.host_port(), "[::1]:9000");
    }

    #[test]
    fn malformed_input_is_rejected() {
        let cases = [
            ("127.0.0.1:80", "missing scheme"),
            ("smtp://host:25", "unknown scheme"),
            ("tcp://", "empty address"),
            ("tcp://localhost", "missing port"),
            ("tcp://:80", "empty host"),
            ("udp://host:99999", "bad port"),
        ];
        for (input, expected) in cases {
            match Endpoint::parse(input) {
                Err(TransportError::InvalidEndpoint { reason, .. }) => assert_eq!(reason, expected),
                other => panic!("{input}: unexpected {other:?}"),
            }
        }
    }
}
