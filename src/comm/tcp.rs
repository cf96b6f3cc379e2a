use std::io::{ErrorKind, Read};
use std::net::{self, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::trace;

use super::{Stream, TcpOptions};
use crate::{Error, Result};

impl Stream for TcpStream {
    /// Drains the data already received without waiting for more
    fn clear_input(&mut self) -> Result<()> {
        self.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        let result = loop {
            match self.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => trace!(bytes = n, "stale input discarded"),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break Err(e.into()),
            }
        };
        self.set_nonblocking(false)?;
        result
    }
    fn shutdown(&mut self) -> Result<()> {
        match TcpStream::shutdown(self, net::Shutdown::Both) {
            Ok(()) => Ok(()),
            // the peer has already gone
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn resolve(options: &TcpOptions) -> Result<SocketAddr> {
    if options.host.is_empty() {
        return Err(Error::invalid_data("TCP host not specified"));
    }
    (options.host.as_str(), options.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            Error::invalid_data(format!("Invalid address: {}:{}", options.host, options.port))
        })
}

/// Opens a TCP stream to a Modbus server. The timeout is applied to connect, read and write
/// operations, a zero timeout blocks indefinitely
pub fn connect(options: &TcpOptions) -> Result<TcpStream> {
    let addr = resolve(options)?;
    let timeout = options.timeout_duration();
    let zero_to = Duration::from_secs(0);
    trace!(%addr, "creating new TCP stream");
    let stream = if timeout > zero_to {
        TcpStream::connect_timeout(&addr, timeout)?
    } else {
        TcpStream::connect(addr)?
    };
    if timeout > zero_to {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
    }
    stream.set_nodelay(true)?;
    trace!(%addr, "TCP session started");
    Ok(stream)
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::connect;
    use crate::comm::{Stream, TcpOptions};

    #[test]
    fn test_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });
        let mut stream = connect(&TcpOptions::new("127.0.0.1").port(port)).unwrap();
        stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        server.join().unwrap();
        Stream::shutdown(&mut stream).unwrap();
    }

    #[test]
    fn test_clear_input() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"stale reply").unwrap();
            let mut buf = [0u8; 2];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(b"fresh").unwrap();
        });
        let mut stream = connect(&TcpOptions::new("127.0.0.1").port(port)).unwrap();
        let mut first = [0u8; 1];
        stream.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"s");
        stream.clear_input().unwrap();
        stream.write_all(b"go").unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"fresh");
        server.join().unwrap();
    }

    #[test]
    fn test_no_host() {
        assert!(connect(&TcpOptions::default()).is_err());
    }
}
