//! Record transports for handshake sessions.
use crate::tls_record::record_size;
use log::{debug, error, warn};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Yields one complete record, header included, per call.
///
/// A read timeout surfaces as `TimedOut` or `WouldBlock`, an orderly close
/// as `UnexpectedEof`.
pub trait RecordSource {
    fn read_record(&mut self) -> io::Result<Vec<u8>>;
}

pub trait RecordSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// `true` for the error kinds a read timeout produces on the supported platforms.
#[must_use]
pub fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Blocking TCP transport. Bytes are buffered until a full record is available.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TcpTransport {
    /// Connects to the first resolved address of `target`.
    ///
    /// # Errors
    /// Resolution or connection failures, or `NotFound` when nothing resolves.
    pub fn connect<A: ToSocketAddrs>(target: A, read_timeout: Duration) -> io::Result<Self> {
        let address: SocketAddr = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "target did not resolve"))?;
        let stream = TcpStream::connect_timeout(&address, read_timeout)?;
        debug!("Connected to {address}");
        Self::from_stream(stream, read_timeout)
    }

    /// # Errors
    /// When the socket options cannot be set.
    pub fn from_stream(stream: TcpStream, read_timeout: Duration) -> io::Result<Self> {
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buffer: Vec::new(),
        })
    }

    fn take_record(&mut self) -> Option<Vec<u8>> {
        let size = record_size(&self.buffer)?;
        if self.buffer.len() < size {
            return None;
        }
        Some(self.buffer.drain(..size).collect())
    }
}

impl RecordSource for TcpTransport {
    fn read_record(&mut self) -> io::Result<Vec<u8>> {
        let mut chunk = [0; 4096];
        loop {
            if let Some(record) = self.take_record() {
                return Ok(record);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        warn!("Connection closed with {} bytes of a partial record", self.buffer.len());
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ));
                }
                Ok(n) => {
                    debug!("Received {n} bytes of data.");
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_timeout(&e) => {
                    debug!("TCP read blocked longer than the read timeout");
                    return Err(e);
                }
                Err(e) => {
                    error!("Error when reading from the TCP stream: {e}");
                    return Err(e);
                }
            }
        }
    }
}

impl RecordSink for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }
}

/// Replays a fixed list of server records and keeps everything written to it.
#[derive(Debug, Default, Clone)]
pub struct ScriptedTransport {
    incoming: VecDeque<Vec<u8>>,
    closes_when_drained: bool,
    pub written: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    /// Once `records` are drained further reads time out.
    #[must_use]
    pub fn new(records: Vec<Vec<u8>>) -> Self {
        Self {
            incoming: records.into(),
            closes_when_drained: false,
            written: Vec::new(),
        }
    }

    /// Reads after the last record report a closed connection instead of a timeout.
    #[must_use]
    pub fn closing(mut self) -> Self {
        self.closes_when_drained = true;
        self
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.incoming.len()
    }
}

impl RecordSource for ScriptedTransport {
    fn read_record(&mut self) -> io::Result<Vec<u8>> {
        match self.incoming.pop_front() {
            Some(record) => Ok(record),
            None if self.closes_when_drained => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "script finished",
            )),
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "script finished")),
        }
    }
}

impl RecordSink for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_transport_reassembles_split_records() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            // First record split over two writes, second record in the tail
            socket.write_all(&[0x15, 0x03, 0x01, 0x00]).unwrap();
            socket.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            socket
                .write_all(&[0x02, 0x02, 0x28, 0x14, 0x03, 0x01, 0x00, 0x01, 0x01])
                .unwrap();
        });
        let mut transport = TcpTransport::connect(address, Duration::from_secs(2)).unwrap();
        assert_eq!(
            transport.read_record().unwrap(),
            vec![0x15, 0x03, 0x01, 0x00, 0x02, 0x02, 0x28]
        );
        assert_eq!(
            transport.read_record().unwrap(),
            vec![0x14, 0x03, 0x01, 0x00, 0x01, 0x01]
        );
        server.join().unwrap();
        let closed = transport.read_record().unwrap_err();
        assert_eq!(closed.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_tcp_transport_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(address, Duration::from_millis(50)).unwrap();
        let (_socket, _) = listener.accept().unwrap();
        let error = transport.read_record().unwrap_err();
        assert!(is_timeout(&error));
    }

    #[test]
    fn test_scripted_transport() {
        let mut transport = ScriptedTransport::new(vec![vec![1, 2, 3]]);
        transport.write(&[9]).unwrap();
        assert_eq!(transport.read_record().unwrap(), vec![1, 2, 3]);
        assert!(is_timeout(&transport.read_record().unwrap_err()));
        assert_eq!(transport.written, vec![vec![9]]);

        let mut closing = ScriptedTransport::new(Vec::new()).closing();
        assert_eq!(
            closing.read_record().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }
}
