//! Transport adapter over the raw socket layer.
//!
//! The server core only ever talks to the [Listener] / [Connection]
//! traits, so tests can drive the whole accept/dispatch path through the
//! in-memory [MemAcceptor] without opening sockets. [TcpAcceptor] is the
//! real thing.

use std::io::{BufRead, Read, Write};

/// How long the tcp acceptor sleeps between non-blocking accept polls.
const ACCEPT_POLL_STEP: std::time::Duration =
    std::time::Duration::from_millis(10);

/// One accepted connection: exactly one request in, lines out.
pub trait Connection: Send {
    /// Read one whole request: header lines up to and including the
    /// blank line, then exactly as many body bytes as the
    /// `Content-Length` header promised (none if absent). Errors on
    /// premature eof while a length was promised.
    fn read_request(&mut self) -> std::io::Result<Vec<u8>>;

    /// Write the string followed by a newline, then flush.
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

/// Trait-object [Connection]. Dropping it closes the connection.
pub type DynConnection = Box<dyn Connection>;

/// A bound listening endpoint.
pub trait Listener: Send {
    /// Block up to `timeout` for an incoming connection. A timeout
    /// yields `Ok(None)` rather than an error so the accept loop can
    /// observe cancellation between polls.
    fn accept(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<DynConnection>>;

    /// The locally bound address.
    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr>;
}

/// Trait-object [Listener]. Dropping it stops listening.
pub type DynListener = Box<dyn Listener>;

/// Tcp implementation of [Listener].
pub struct TcpAcceptor {
    listener: std::net::TcpListener,
    read_timeout: std::time::Duration,
}

impl TcpAcceptor {
    /// Bind the listening socket. Fails if the port is busy.
    pub fn bind(
        addr: std::net::SocketAddr,
        read_timeout: std::time::Duration,
    ) -> std::io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            read_timeout,
        })
    }
}

impl Listener for TcpAcceptor {
    fn accept(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<DynConnection>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    let reader = std::io::BufReader::new(stream.try_clone()?);
                    return Ok(Some(Box::new(TcpConnection {
                        stream,
                        reader,
                    })));
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(ACCEPT_POLL_STEP.min(deadline - now));
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

/// Tcp implementation of [Connection].
struct TcpConnection {
    stream: std::net::TcpStream,
    reader: std::io::BufReader<std::net::TcpStream>,
}

impl Connection for TcpConnection {
    fn read_request(&mut self) -> std::io::Result<Vec<u8>> {
        let mut raw = Vec::new();
        let mut content_length = 0;

        loop {
            let start = raw.len();
            let read = self.reader.read_until(b'\n', &mut raw)?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed inside request headers",
                ));
            }

            let mut line = &raw[start..];
            while let [head @ .., b'\r' | b'\n'] = line {
                line = head;
            }

            // the header name is matched case-sensitively
            if let Some(value) = line.strip_prefix(b"Content-Length:") {
                content_length = String::from_utf8_lossy(value)
                    .trim()
                    .parse()
                    .unwrap_or(0);
            }

            if line.is_empty() {
                break;
            }
        }

        if content_length > 0 {
            let start = raw.len();
            raw.resize(start + content_length, 0);
            self.reader.read_exact(&mut raw[start..])?;
        }

        Ok(raw)
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()
    }
}

/// In-memory implementation of [Listener], for exercising the server
/// loop without sockets.
pub struct MemAcceptor {
    recv: std::sync::mpsc::Receiver<MemConnection>,
}

impl MemAcceptor {
    /// Create an acceptor plus the connector used to dial it.
    pub fn new() -> (Self, MemConnector) {
        let (send, recv) = std::sync::mpsc::channel();
        (Self { recv }, MemConnector { send })
    }
}

impl Listener for MemAcceptor {
    fn accept(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<DynConnection>> {
        match self.recv.recv_timeout(timeout) {
            Ok(conn) => Ok(Some(Box::new(conn))),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                // all connectors gone; behave like an idle socket
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        Ok((std::net::Ipv4Addr::LOCALHOST, 0).into())
    }
}

/// Dials a [MemAcceptor].
#[derive(Clone)]
pub struct MemConnector {
    send: std::sync::mpsc::Sender<MemConnection>,
}

impl MemConnector {
    /// Open a connection carrying one raw request. The returned channel
    /// yields every line the server writes, handshake first.
    pub fn connect(
        &self,
        request: impl Into<Vec<u8>>,
    ) -> std::io::Result<std::sync::mpsc::Receiver<String>> {
        let (lines, recv) = std::sync::mpsc::channel();
        self.send
            .send(MemConnection {
                request: Some(request.into()),
                lines,
            })
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "acceptor is gone",
                )
            })?;
        Ok(recv)
    }
}

/// In-memory implementation of [Connection].
struct MemConnection {
    request: Option<Vec<u8>>,
    lines: std::sync::mpsc::Sender<String>,
}

impl Connection for MemConnection {
    fn read_request(&mut self) -> std::io::Result<Vec<u8>> {
        self.request.take().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "request already consumed",
            )
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.lines.send(line.to_string()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer hung up",
            )
        })
    }
}
