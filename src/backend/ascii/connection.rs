//! One lazily opened connection to a memcached server

use crate::backend::{ServerSpec, Transport};
use crate::behavior::{Behavior, BehaviorSet};
use crate::error::ReturnCode;
use crate::protocol::{ParseResult, Reply, RequestWriter, parse_reply};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::debug;

/// Read chunk size
const READ_CHUNK: usize = 16 * 1024;

/// A failed exchange: the return code plus what went wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Failure {
    pub code: ReturnCode,
    pub message: String,
}

impl Failure {
    pub(crate) fn new(code: ReturnCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Failure for an error reply, or for a reply the command never produces
    pub(crate) fn from_reply(reply: Reply) -> Self {
        match reply {
            Reply::ClientError(msg) => Self::new(ReturnCode::ClientError, msg),
            Reply::ServerError(msg) if msg.contains("too large") => Self::new(ReturnCode::E2Big, msg),
            Reply::ServerError(msg) if msg.contains("out of memory") => {
                Self::new(ReturnCode::ServerMemoryAllocationFailure, msg)
            }
            Reply::ServerError(msg) => Self::new(ReturnCode::ServerError, msg),
            Reply::Error => Self::new(ReturnCode::ProtocolError, "server rejected the command"),
            other => Self::new(ReturnCode::ProtocolError, format!("unexpected reply {other:?}")),
        }
    }
}

/// Socket settings derived from behaviors
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Timeouts {
    pub connect: Option<Duration>,
    pub send: Option<Duration>,
    pub receive: Option<Duration>,
    pub nodelay: bool,
}

impl Timeouts {
    /// connect_timeout and _poll_timeout are milliseconds, send/receive
    /// timeouts microseconds; zero means "unset"
    pub(crate) fn from_behaviors(behaviors: &BehaviorSet) -> Self {
        let millis = |b: Behavior| Some(behaviors.get(b)).filter(|&v| v > 0).map(Duration::from_millis);
        let micros = |b: Behavior| Some(behaviors.get(b)).filter(|&v| v > 0).map(Duration::from_micros);
        let poll = millis(Behavior::PollTimeout);

        Self {
            connect: millis(Behavior::ConnectTimeout),
            send: micros(Behavior::SendTimeout).or(poll),
            receive: micros(Behavior::ReceiveTimeout).or(poll),
            nodelay: behaviors.is_set(Behavior::TcpNodelay),
        }
    }
}

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    fn set_timeouts(&self, timeouts: &Timeouts) -> io::Result<()> {
        match self {
            Self::Tcp(s) => {
                s.set_read_timeout(timeouts.receive)?;
                s.set_write_timeout(timeouts.send)?;
                s.set_nodelay(timeouts.nodelay)
            }
            #[cfg(unix)]
            Self::Unix(s) => {
                s.set_read_timeout(timeouts.receive)?;
                s.set_write_timeout(timeouts.send)
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

pub(crate) struct Connection {
    server: ServerSpec,
    stream: Option<Stream>,
    read_buf: BytesMut,
    request: RequestWriter,
}

impl Connection {
    pub(crate) fn new(server: ServerSpec) -> Self {
        Self {
            server,
            stream: None,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            request: RequestWriter::new(1024),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(server = %self.server, "Connection closed");
        }
        self.read_buf.clear();
    }

    /// Send one request built by `write`, without waiting for the reply
    pub(crate) fn send(
        &mut self,
        timeouts: &Timeouts,
        write: impl FnOnce(&mut RequestWriter),
    ) -> Result<(), Failure> {
        self.request.clear();
        write(&mut self.request);

        if self.stream.is_none() {
            self.stream = Some(self.connect(timeouts)?);
        }
        let result = match self.stream.as_mut() {
            Some(stream) => stream
                .write_all(self.request.buffer())
                .and_then(|()| stream.flush()),
            None => return Err(Failure::new(ReturnCode::ConnectionFailure, "not connected")),
        };

        result.map_err(|e| {
            self.close();
            io_failure(&e, ReturnCode::WriteFailure)
        })
    }

    /// Send a request and read its first reply line (or value block)
    pub(crate) fn request(
        &mut self,
        timeouts: &Timeouts,
        write: impl FnOnce(&mut RequestWriter),
    ) -> Result<Reply, Failure> {
        self.send(timeouts, write)?;
        self.read_reply()
    }

    /// Read the next complete reply from the server
    pub(crate) fn read_reply(&mut self) -> Result<Reply, Failure> {
        loop {
            match parse_reply(&self.read_buf) {
                ParseResult::Complete(reply, consumed) => {
                    self.read_buf.advance(consumed);
                    return Ok(reply);
                }
                ParseResult::NeedMoreData => self.fill()?,
                ParseResult::Error(e) => {
                    self.close();
                    return Err(Failure::new(ReturnCode::ProtocolError, e.to_string()));
                }
            }
        }
    }

    fn fill(&mut self) -> Result<(), Failure> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Failure::new(ReturnCode::ConnectionFailure, "not connected"));
        };

        let mut chunk = [0u8; READ_CHUNK];
        match stream.read(&mut chunk) {
            Ok(0) => {
                self.close();
                Err(Failure::new(
                    ReturnCode::UnknownReadFailure,
                    "connection closed by server",
                ))
            }
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => {
                self.close();
                Err(io_failure(&e, ReturnCode::ReadFailure))
            }
        }
    }

    fn connect(&self, timeouts: &Timeouts) -> Result<Stream, Failure> {
        let stream = match self.server.transport {
            Transport::Tcp => self.connect_tcp(timeouts)?,
            #[cfg(unix)]
            Transport::Unix => Stream::Unix(UnixStream::connect(&self.server.host).map_err(|e| {
                Failure::new(
                    ReturnCode::ConnectionFailure,
                    format!("{}: {e}", self.server.host),
                )
            })?),
            #[cfg(not(unix))]
            Transport::Unix => {
                return Err(Failure::new(
                    ReturnCode::FailUnixSocket,
                    "UNIX sockets are not available on this platform",
                ));
            }
            Transport::Udp => {
                return Err(Failure::new(
                    ReturnCode::NotSupported,
                    "UDP transport is not supported",
                ));
            }
        };

        stream
            .set_timeouts(timeouts)
            .map_err(|e| Failure::new(ReturnCode::ConnectionFailure, e.to_string()))?;
        debug!(server = %self.server, "Connected");
        Ok(stream)
    }

    fn connect_tcp(&self, timeouts: &Timeouts) -> Result<Stream, Failure> {
        let addrs = (self.server.host.as_str(), self.server.port)
            .to_socket_addrs()
            .map_err(|e| {
                Failure::new(
                    ReturnCode::HostLookupFailure,
                    format!("{}: {e}", self.server.host),
                )
            })?;

        let mut last_error = None;
        for addr in addrs {
            let attempt = match timeouts.connect {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(Stream::Tcp(stream)),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) if is_timeout(&e) => Failure::new(ReturnCode::Timeout, e.to_string()),
            Some(e) => Failure::new(ReturnCode::ConnectionFailure, e.to_string()),
            None => Failure::new(
                ReturnCode::HostLookupFailure,
                format!("no addresses for {}", self.server.host),
            ),
        })
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn io_failure(e: &io::Error, code: ReturnCode) -> Failure {
    if is_timeout(e) {
        Failure::new(ReturnCode::Timeout, e.to_string())
    } else {
        Failure::new(code, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_from_behaviors() {
        let mut behaviors = BehaviorSet::new();
        let timeouts = Timeouts::from_behaviors(&behaviors);
        assert_eq!(timeouts.connect, Some(Duration::from_millis(4000)));
        assert_eq!(timeouts.receive, Some(Duration::from_millis(5000)));

        behaviors.apply(Behavior::ReceiveTimeout, 250_000);
        behaviors.apply(Behavior::ConnectTimeout, 0);
        let timeouts = Timeouts::from_behaviors(&behaviors);
        assert_eq!(timeouts.connect, None);
        assert_eq!(timeouts.receive, Some(Duration::from_millis(250)));
        assert_eq!(timeouts.send, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_failure_from_reply() {
        let f = Failure::from_reply(Reply::ServerError("object too large for cache".into()));
        assert_eq!(f.code, ReturnCode::E2Big);

        let f = Failure::from_reply(Reply::ClientError("bad data chunk".into()));
        assert_eq!(f.code, ReturnCode::ClientError);
        assert_eq!(f.message, "bad data chunk");

        let f = Failure::from_reply(Reply::Deleted);
        assert_eq!(f.code, ReturnCode::ProtocolError);
    }

    #[test]
    fn test_unreachable_server() {
        // Port 1 on localhost is essentially never listening
        let mut conn = Connection::new(ServerSpec::tcp("127.0.0.1", 1));
        let timeouts = Timeouts {
            connect: Some(Duration::from_millis(200)),
            ..Timeouts::default()
        };
        let err = conn.request(&timeouts, |w| w.quit()).unwrap_err();
        assert!(matches!(
            err.code,
            ReturnCode::ConnectionFailure | ReturnCode::Timeout
        ));
        assert!(!conn.is_connected());
    }
}
