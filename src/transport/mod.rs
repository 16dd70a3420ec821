// Outbound connection abstraction

mod tcp;

pub use tcp::{resolve, TcpConnector, TcpTransport};

use crate::common::error::Result;

/// Byte sink for one transfer's framed output.
pub trait TransportSink: Send {
    /// Write every byte of `bytes` and flush before returning.
    ///
    /// Any failure is reported as `Error::ConnectionLost`.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Remote address, for logs and reports.
    fn peer(&self) -> String;

    /// Signal end of stream to the remote side.
    fn close(&mut self) -> Result<()>;
}

/// Opens the single connection a session writes into.
pub trait Connector: Send {
    /// Fails with `Error::ConnectError` if no connection can be made.
    fn connect(&self, host: &str) -> Result<Box<dyn TransportSink>>;
}
