use log::{debug, info, trace, warn};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::common::utils::hex_bytes;
use crate::net::conn::{BufferedConnection, ConnError};
use crate::probe::endpoint::Endpoint;
use crate::probe::socks5::{
    self, BoundAddress, BoundAddressError, GreetingReply, ReplyCode, ReplyHeader,
    METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH, SOCKS_VERSION,
};

// Large enough for any single reply, including a 255-byte domain BND.ADDR.
const READ_BUFFER_SIZE: usize = 512;

/// Outcome of one probe run. Exactly one is produced per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The proxy accepted the CONNECT and reported its bound address.
    /// `elapsed` runs from the start of the TCP connect to the decoded reply.
    Success {
        bound: BoundAddress,
        elapsed: Duration,
    },
    /// The proxy answered the CONNECT with a non-zero reply code.
    Failure { code: ReplyCode },
    ProtocolError { message: String },
    ConnectError { message: String },
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeResult::Success { .. })
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Success { bound, elapsed } => write!(
                f,
                "success in {} ms (bound address {})",
                elapsed.as_millis(),
                bound
            ),
            ProbeResult::Failure { code } => write!(f, "proxy replied with failure {}", code),
            ProbeResult::ProtocolError { message } => write!(f, "protocol error: {}", message),
            ProbeResult::ConnectError { message } => write!(f, "connect error: {}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    /// Reject a greeting reply that selects anything but "no authentication".
    pub strict_method: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
            strict_method: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Connected,
    GreetingSent,
    GreetingReplyReceived,
    ConnectSent,
    ConnectReplyReceived,
    Closed,
}

#[derive(Error, Debug)]
enum ExchangeError {
    #[error("{0}")]
    Protocol(String),
    #[error("reply code {0}")]
    Failure(ReplyCode),
}

impl ExchangeError {
    /// Maps a failed read. A peer that goes away mid-read is a short read.
    fn from_read(phase: &str, e: ConnError) -> Self {
        let message = match e {
            ConnError::ShortRead { .. } => format!("short read: {}", phase),
            ConnError::Timeout(_) => format!("timed out: {}", phase),
            ConnError::IoError(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                format!("short read: {}", phase)
            }
            ConnError::IoError(e) => format!("i/o error: {}: {}", phase, e),
        };
        ExchangeError::Protocol(message)
    }

    fn from_write(phase: &str, e: ConnError) -> Self {
        let message = match e {
            ConnError::Timeout(_) => format!("timed out: {}", phase),
            ConnError::IoError(e) => format!("i/o error: {}: {}", phase, e),
            e => format!("i/o error: {}: {}", phase, e),
        };
        ExchangeError::Protocol(message)
    }
}

/// Tracks where a single run is in the handshake, for tracing.
struct ProbeRun {
    target: Endpoint,
    state: ProbeState,
}

impl ProbeRun {
    fn advance(&mut self, next: ProbeState) {
        trace!("Probe {}: {:?} -> {:?}", self.target, self.state, next);
        self.state = next;
    }
}

/// Checks a SOCKS5 listener by running one no-auth greeting and one IPv4
/// CONNECT over a fresh TCP connection.
#[derive(Debug, Clone, Copy)]
pub struct SocksProbe {
    proxy: Endpoint,
    options: ProbeOptions,
}

impl SocksProbe {
    pub fn new(proxy: Endpoint, options: ProbeOptions) -> Self {
        SocksProbe { proxy, options }
    }

    pub async fn run(&self, target: Endpoint) -> ProbeResult {
        let mut run = ProbeRun {
            target,
            state: ProbeState::Idle,
        };

        info!("Connecting to SOCKS5 proxy at {}", self.proxy);
        let started = Instant::now();
        let mut conn = match BufferedConnection::connect(
            self.proxy.socket_addr(),
            self.options.connect_timeout,
            self.options.io_timeout,
            READ_BUFFER_SIZE,
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => {
                run.advance(ProbeState::Closed);
                return ProbeResult::ConnectError {
                    message: format!("{}: {}", self.proxy, e),
                };
            }
        };
        run.advance(ProbeState::Connected);

        let result = match self.exchange(&mut conn, &mut run).await {
            Ok(bound) => ProbeResult::Success {
                bound,
                elapsed: started.elapsed(),
            },
            Err(ExchangeError::Failure(code)) => ProbeResult::Failure { code },
            Err(ExchangeError::Protocol(message)) => ProbeResult::ProtocolError { message },
        };

        if let Err(e) = conn.shutdown().await {
            debug!("Shutdown of connection to {} failed: {}", self.proxy, e);
        }
        drop(conn);
        run.advance(ProbeState::Closed);

        info!("Probe of {} via {}: {}", target, self.proxy, result);
        result
    }

    async fn exchange(
        &self,
        conn: &mut BufferedConnection,
        run: &mut ProbeRun,
    ) -> Result<BoundAddress, ExchangeError> {
        let greeting = socks5::greeting_request();
        conn.write(&greeting)
            .await
            .map_err(|e| ExchangeError::from_write("greeting request", e))?;
        debug!("Greeting sent: {}", hex_bytes(&greeting));
        run.advance(ProbeState::GreetingSent);

        let reply = GreetingReply::read_from(conn)
            .await
            .map_err(|e| ExchangeError::from_read("greeting", e))?;
        debug!(
            "Greeting reply received: {}",
            hex_bytes(&[reply.version, reply.method])
        );
        run.advance(ProbeState::GreetingReplyReceived);

        if reply.version != SOCKS_VERSION {
            return Err(ExchangeError::Protocol("unexpected version".to_string()));
        }
        self.check_method(reply.method)?;

        let request = socks5::connect_request(&run.target);
        conn.write(&request)
            .await
            .map_err(|e| ExchangeError::from_write("connect request", e))?;
        debug!("CONNECT request sent: {}", hex_bytes(&request));
        run.advance(ProbeState::ConnectSent);

        let header = ReplyHeader::read_from(conn)
            .await
            .map_err(|e| ExchangeError::from_read("connect reply", e))?;
        debug!(
            "CONNECT reply header received: {}",
            hex_bytes(&[header.version, header.code.0])
        );
        if header.version != SOCKS_VERSION {
            warn!(
                "CONNECT reply from {} carries version {:#04x}",
                self.proxy, header.version
            );
        }
        if !header.code.is_success() {
            run.advance(ProbeState::ConnectReplyReceived);
            return Err(ExchangeError::Failure(header.code));
        }

        let bound = socks5::read_bound_address(conn)
            .await
            .map_err(|e| match e {
                BoundAddressError::Conn(e) => ExchangeError::from_read("connect reply", e),
                BoundAddressError::UnknownAddressType(atyp) => {
                    ExchangeError::Protocol(format!("unknown address type: {:#04x}", atyp))
                }
            })?;
        run.advance(ProbeState::ConnectReplyReceived);

        Ok(bound)
    }

    fn check_method(&self, method: u8) -> Result<(), ExchangeError> {
        if method == METHOD_NO_AUTH {
            return Ok(());
        }
        if self.options.strict_method {
            return Err(ExchangeError::Protocol(format!(
                "unsupported method: {:#04x}",
                method
            )));
        }
        if method == METHOD_NO_ACCEPTABLE {
            warn!("Proxy {} reported no acceptable methods, continuing", self.proxy);
        } else {
            warn!(
                "Proxy {} selected method {:#04x} instead of no-auth, continuing",
                self.proxy, method
            );
        }
        Ok(())
    }
}

/// Runs a single probe of `proxy`, asking it to CONNECT to `target`.
pub async fn run_probe(proxy: Endpoint, target: Endpoint, options: ProbeOptions) -> ProbeResult {
    SocksProbe::new(proxy, options).run(target).await
}
