use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use thiserror::Error;

use crate::net::conn::{BufferedConnection, ConnError};
use crate::probe::endpoint::Endpoint;

pub const SOCKS_VERSION: u8 = 0x05;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const RESERVED: u8 = 0x00;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes (RFC 1928 §6)
pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_NOT_ALLOWED: u8 = 0x02;
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_TTL_EXPIRED: u8 = 0x06;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Method-selection message offering only "no authentication":
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
pub fn greeting_request() -> [u8; 3] {
    [SOCKS_VERSION, 0x01, METHOD_NO_AUTH]
}

/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   |    4     |    2     |
/// +----+-----+-------+------+----------+----------+
pub fn connect_request(target: &Endpoint) -> [u8; 10] {
    let addr = target.host().octets();
    let port = target.port().to_be_bytes();
    [
        SOCKS_VERSION,
        CMD_CONNECT,
        RESERVED,
        ATYP_IPV4,
        addr[0],
        addr[1],
        addr[2],
        addr[3],
        port[0],
        port[1],
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreetingReply {
    pub version: u8,
    pub method: u8,
}

impl GreetingReply {
    pub async fn read_from(conn: &mut BufferedConnection) -> Result<Self, ConnError> {
        let header = conn.read_exact_bytes(2).await?;
        Ok(GreetingReply {
            version: header[0],
            method: header[1],
        })
    }
}

/// Reply codes from RFC 1928 §6, keeping the raw byte for unassigned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyCode(pub u8);

impl ReplyCode {
    pub fn is_success(&self) -> bool {
        self.0 == REPLY_SUCCEEDED
    }

    pub fn description(&self) -> &'static str {
        match self.0 {
            REPLY_SUCCEEDED => "succeeded",
            REPLY_GENERAL_FAILURE => "general SOCKS server failure",
            REPLY_NOT_ALLOWED => "connection not allowed by ruleset",
            REPLY_NETWORK_UNREACHABLE => "network unreachable",
            REPLY_HOST_UNREACHABLE => "host unreachable",
            REPLY_CONNECTION_REFUSED => "connection refused",
            REPLY_TTL_EXPIRED => "TTL expired",
            REPLY_COMMAND_NOT_SUPPORTED => "command not supported",
            REPLY_ADDRESS_TYPE_NOT_SUPPORTED => "address type not supported",
            _ => "unassigned",
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.description())
    }
}

/// BND.ADDR/BND.PORT of a successful CONNECT reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddress::Ip(addr) => write!(f, "{}", addr),
            BoundAddress::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub version: u8,
    pub code: ReplyCode,
}

impl ReplyHeader {
    pub async fn read_from(conn: &mut BufferedConnection) -> Result<Self, ConnError> {
        let header = conn.read_exact_bytes(2).await?;
        Ok(ReplyHeader {
            version: header[0],
            code: ReplyCode(header[1]),
        })
    }
}

#[derive(Error, Debug)]
pub enum BoundAddressError {
    #[error(transparent)]
    Conn(#[from] ConnError),
    #[error("Unknown address type: {0:#04x}")]
    UnknownAddressType(u8),
}

/// Reads the remainder of a reply after VER and REP:
/// +-------+------+----------+----------+
/// |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +-------+------+----------+----------+
/// | X'00' |  1   | Variable |    2     |
/// +-------+------+----------+----------+
pub async fn read_bound_address(
    conn: &mut BufferedConnection,
) -> Result<BoundAddress, BoundAddressError> {
    let rest = conn.read_exact_bytes(2).await?;
    let addr_type = rest[1];

    let bound = match addr_type {
        ATYP_IPV4 => {
            let data = conn.read_exact_bytes(4).await?;
            let port = read_port(conn).await?;
            let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
            BoundAddress::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        ATYP_DOMAIN => {
            let domain_len = conn.read_u8().await? as usize;
            let domain_bytes = conn.read_exact_bytes(domain_len).await?;
            let port = read_port(conn).await?;
            BoundAddress::Domain(String::from_utf8_lossy(&domain_bytes).into_owned(), port)
        }
        ATYP_IPV6 => {
            let data = conn.read_exact_bytes(16).await?;
            let port = read_port(conn).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data);
            let ip = Ipv6Addr::from(octets);
            BoundAddress::Ip(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)))
        }
        other => return Err(BoundAddressError::UnknownAddressType(other)),
    };

    Ok(bound)
}

async fn read_port(conn: &mut BufferedConnection) -> Result<u16, ConnError> {
    let port_bytes = conn.read_exact_bytes(2).await?;
    Ok(u16::from_be_bytes([port_bytes[0], port_bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn conn_with_reply(bytes: &[u8]) -> BufferedConnection {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let timeout = Duration::from_secs(5);

        let conn = BufferedConnection::connect(addr, timeout, timeout, 4096)
            .await
            .unwrap();
        let (mut server_stream, _) = listener.accept().await.unwrap();
        server_stream.write_all(bytes).await.unwrap();
        conn
    }

    #[test]
    fn test_connect_request_encoding() {
        let target: Endpoint = "8.8.8.8:53".parse().unwrap();
        assert_eq!(
            connect_request(&target),
            [0x05, 0x01, 0x00, 0x01, 8, 8, 8, 8, 0x00, 0x35]
        );

        let target: Endpoint = "10.0.0.1:10808".parse().unwrap();
        assert_eq!(&connect_request(&target)[4..], &[10, 0, 0, 1, 0x2a, 0x38]);

        let target: Endpoint = "1.2.3.4:0".parse().unwrap();
        assert_eq!(&connect_request(&target)[4..], &[1, 2, 3, 4, 0x00, 0x00]);
        assert_eq!(greeting_request(), [0x05, 0x01, 0x00]);
    }

    #[test]
    fn test_reply_code_description() {
        assert!(ReplyCode(0x00).is_success());
        assert!(!ReplyCode(0x05).is_success());
        assert_eq!(ReplyCode(0x05).description(), "connection refused");
        assert_eq!(ReplyCode(0x42).description(), "unassigned");
        assert_eq!(ReplyCode(0x03).to_string(), "0x03 (network unreachable)");
    }

    #[tokio::test]
    async fn test_read_ipv4_reply() {
        let mut conn = conn_with_reply(b"\x05\x00\x00\x01\x7f\x00\x00\x01\x1f\x90").await;

        let header = ReplyHeader::read_from(&mut conn).await.unwrap();
        assert_eq!(header.version, SOCKS_VERSION);
        assert!(header.code.is_success());

        let bound = read_bound_address(&mut conn).await.unwrap();
        assert_eq!(bound, BoundAddress::Ip("127.0.0.1:8080".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_read_domain_and_ipv6_replies() {
        let mut conn = conn_with_reply(b"\x00\x03\x09localhost\x00\x50").await;
        let bound = read_bound_address(&mut conn).await.unwrap();
        assert_eq!(bound, BoundAddress::Domain("localhost".to_string(), 80));
        assert_eq!(bound.to_string(), "localhost:80");

        let mut reply = vec![0x00, ATYP_IPV6];
        reply.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        reply.extend_from_slice(&443u16.to_be_bytes());
        let mut conn = conn_with_reply(&reply).await;
        let bound = read_bound_address(&mut conn).await.unwrap();
        assert_eq!(bound, BoundAddress::Ip("[::1]:443".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_unknown_address_type() {
        let mut conn = conn_with_reply(b"\x00\x09\x00\x00").await;
        assert!(matches!(
            read_bound_address(&mut conn).await,
            Err(BoundAddressError::UnknownAddressType(0x09))
        ));
    }
}
