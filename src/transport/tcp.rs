// TCP transport to the loader's listening port
use std::io::{ErrorKind, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use log::{debug, warn};
use crate::common::config::ClientConfig;
use crate::common::error::{Error, Result};
use super::{Connector, TransportSink};

pub struct TcpConnector {
    port: u16,
    connect_timeout: Duration,
    write_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
            write_timeout: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            port: config.port,
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Connector for TcpConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn TransportSink>> {
        let addrs = resolve(host, self.port)?;

        let mut last_error = None;
        for addr in addrs {
            debug!("TcpConnector: trying {}", addr);
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    let transport = TcpTransport::new(stream, addr, self.write_timeout)
                        .map_err(|e| Error::ConnectError {
                            host: addr.to_string(),
                            reason: e.to_string(),
                        })?;
                    return Ok(Box::new(transport));
                }
                Err(e) => {
                    warn!("TcpConnector: {} failed: {}", addr, e);
                    last_error = Some((addr, e));
                }
            }
        }

        let (addr, reason) = match last_error {
            Some((addr, e)) => (addr.to_string(), e.to_string()),
            None => (host.to_string(), "no addresses resolved".to_string()),
        };
        Err(Error::ConnectError { host: addr, reason })
    }
}

/// Resolve a host to candidate socket addresses.
///
/// Accepts a full socket address (`10.0.0.5:4299`, `[::1]:4299`), a bare IP,
/// or a host name; the last two use `port`.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::ConnectError {
            host: String::new(),
            reason: "no host given".to_string(),
        });
    }
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(vec![addr]);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::ConnectError {
            host: format!("{}:{}", host, port),
            reason: e.to_string(),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(Error::ConnectError {
            host: format!("{}:{}", host, port),
            reason: "host resolved to no addresses".to_string(),
        });
    }
    Ok(addrs)
}

/// An established TCP connection to the loader.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    bytes_sent: u64,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, peer: SocketAddr, write_timeout: Option<Duration>) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(write_timeout)?;
        Ok(Self {
            stream,
            peer,
            bytes_sent: 0,
        })
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl TransportSink for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).map_err(Error::ConnectionLost)?;
        self.stream.flush().map_err(Error::ConnectionLost)?;
        self.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Write) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::ConnectionLost(e)),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        debug!("TcpTransport: closing {} after {} bytes", self.peer, self.bytes_sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_resolve_forms() {
        assert_eq!(
            resolve("192.168.1.20", 4299).unwrap(),
            vec!["192.168.1.20:4299".parse().unwrap()]
        );
        assert_eq!(
            resolve("127.0.0.1:5000", 4299).unwrap(),
            vec!["127.0.0.1:5000".parse().unwrap()]
        );
        assert_eq!(
            resolve(" ::1 ", 4299).unwrap(),
            vec!["[::1]:4299".parse().unwrap()]
        );
        assert!(matches!(resolve("", 4299), Err(Error::ConnectError { .. })));
    }

    #[test]
    fn test_send_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut data = Vec::new();
            stream.read_to_end(&mut data).unwrap();
            data
        });

        let connector = TcpConnector::new(addr.port(), Duration::from_secs(5));
        let mut transport = connector.connect("127.0.0.1").unwrap();
        assert_eq!(transport.peer(), addr.to_string());
        transport.send(b"HAXX").unwrap();
        transport.send(b" payload").unwrap();
        transport.close().unwrap();
        drop(transport);

        assert_eq!(peer.join().unwrap(), b"HAXX payload");
    }

    #[test]
    fn test_refused_connection() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector = TcpConnector::new(port, Duration::from_secs(2));
        let result = connector.connect("127.0.0.1");
        assert!(matches!(result, Err(Error::ConnectError { .. })));
    }
}
