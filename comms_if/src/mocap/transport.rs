//! # Transport
//!
//! Byte stream abstraction the client talks to the server through.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A connected byte stream to the motion capture server.
pub trait Transport: Read + Write + Send {
    /// Drop any bytes that have been received but not yet read.
    fn discard_pending(&mut self) -> io::Result<()>;

    /// Set the timeout used by blocking reads, `None` blocks forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Close the stream in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Transport for TcpStream {
    fn discard_pending(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 4096];

        self.set_nonblocking(true)?;

        let res = loop {
            match self.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        self.set_nonblocking(false)?;

        res
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            r => r,
        }
    }
}

/// Returns true if the error means a read timed out rather than the stream failing.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_discard_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        server.write_all(b"stale bytes").unwrap();
        server.flush().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        client.discard_pending().unwrap();

        server.write_all(b"fresh").unwrap();
        let mut buf = [0u8; 5];
        Transport::set_read_timeout(&mut client, Some(Duration::from_secs(1))).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"fresh");
    }
}
