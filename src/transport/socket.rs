//! TCP socket transport (`lan` in connection strings).

use super::{Transport, TransportError};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Default SCPI raw-socket port when the path has no port.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Newline-framed transport over a TCP stream.
pub struct SocketTransport {
    stream: Option<TcpStream>,
    path: String,
    /// Bytes received past the last message terminator.
    pending: Vec<u8>,
}

impl SocketTransport {
    /// Connect to `host[:port]`.
    pub fn connect(path: &str) -> Result<Self, TransportError> {
        let addr_str = if path.contains(':') {
            path.to_string()
        } else {
            format!("{}:{}", path, DEFAULT_SCPI_PORT)
        };
        let addr = addr_str
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::InvalidTarget(path.to_string()))?;

        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;
        tracing::debug!("Connected socket transport to {}", addr);

        Ok(Self {
            stream: Some(stream),
            path: path.to_string(),
            pending: Vec::new(),
        })
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

impl Transport for SocketTransport {
    fn name(&self) -> &str {
        "lan"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes)?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if let Some(line) = self.take_line() {
            return Ok(line);
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(timeout));
            }
            let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
            stream.set_read_timeout(Some(remaining))?;
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(line);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TransportError::Timeout(timeout));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.pending.clear();
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;

    #[test]
    fn test_query_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (conn, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(conn.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "*IDN?\n");
            let mut conn = conn;
            conn.write_all(b"ACME,SCOPE1,42,1.0\r\n").unwrap();
        });

        let mut t = SocketTransport::connect(&format!("127.0.0.1:{}", port)).unwrap();
        let reply = t.query("*IDN?", Duration::from_secs(2)).unwrap();
        assert_eq!(reply, "ACME,SCOPE1,42,1.0");
        server.join().unwrap();
    }

    #[test]
    fn test_receive_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = std::thread::spawn(move || {
            let (_conn, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });

        let mut t = SocketTransport::connect(&format!("127.0.0.1:{}", port)).unwrap();
        let err = t.receive(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn test_send_after_close_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = std::thread::spawn(move || {
            let _ = listener.accept();
        });

        let mut t = SocketTransport::connect(&format!("127.0.0.1:{}", port)).unwrap();
        t.close();
        assert!(!t.is_open());
        assert!(matches!(t.send(b"x\n"), Err(TransportError::Closed)));
    }
}
