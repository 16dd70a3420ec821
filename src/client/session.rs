// One HAXX transfer: compress, connect, header, payload, file name

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};
use log::{debug, error, info};
use crate::common::config::ClientConfig;
use crate::common::error::{Error, Result};
use crate::common::types::*;
use crate::compress::{CompressedPayload, Compressor};
use crate::protocol::{filename_field, ProtocolHeader};
use crate::source::{FileSource, SourceHandle};
use crate::transport::{Connector, TcpConnector, TransportSink};
use super::progress::{ProgressGate, ProgressSink};

/// What to send and where. Immutable once a session owns it.
pub struct TransferRequest {
    source: Box<dyn SourceHandle>,
    file_name: String,
    remote_host: String,
}

impl TransferRequest {
    pub fn new(
        source: impl SourceHandle + 'static,
        file_name: impl Into<String>,
        remote_host: impl Into<String>,
    ) -> Self {
        Self {
            source: Box::new(source),
            file_name: file_name.into(),
            remote_host: remote_host.into(),
        }
    }

    /// Send a file from disk under its own name (the last path component).
    pub fn from_path(path: impl AsRef<Path>, remote_host: impl Into<String>) -> Result<Self> {
        let source = FileSource::new(path.as_ref());
        let file_name = source.file_name().ok_or(Error::EmptyFileName)?;
        Ok(Self::new(source, file_name, remote_host))
    }

    pub fn source(&self) -> &dyn SourceHandle {
        self.source.as_ref()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("source", &self.source.describe())
            .field("file_name", &self.file_name)
            .field("remote_host", &self.remote_host)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub file_name: String,
    pub peer: String,
    pub original_length: u64,
    pub compressed_length: u64,
    /// Header, payload and file name field together.
    pub bytes_on_wire: u64,
    pub elapsed: Duration,
    /// BLAKE3 of the compressed payload, hex.
    pub fingerprint: String,
}

impl TransferReport {
    /// Compressed size as a fraction of the original; 0 for an empty source.
    pub fn ratio(&self) -> f64 {
        if self.original_length == 0 {
            return 0.0;
        }
        self.compressed_length as f64 / self.original_length as f64
    }
}

#[derive(Debug)]
pub enum TransferOutcome {
    Success(TransferReport),
    Failed(Error),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<TransferReport> {
        match self {
            TransferOutcome::Success(report) => Ok(report),
            TransferOutcome::Failed(e) => Err(e),
        }
    }
}

/// Drives one request through the protocol. Runs once; a retry is a new
/// session.
pub struct TransferSession {
    request: TransferRequest,
    config: ClientConfig,
    connector: Box<dyn Connector>,
    state: SessionState,
    history: Vec<SessionState>,
}

impl TransferSession {
    pub fn new(request: TransferRequest, config: ClientConfig) -> Self {
        let connector = Box::new(TcpConnector::from_config(&config));
        Self::with_connector(request, config, connector)
    }

    pub fn with_connector(
        request: TransferRequest,
        config: ClientConfig,
        connector: Box<dyn Connector>,
    ) -> Self {
        Self {
            request,
            config,
            connector,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// Run the transfer to completion or failure on the calling thread.
    ///
    /// Progress goes to `sink`; the terminal outcome is returned rather than
    /// passed to `sink.on_finished`, which is the caller's job.
    pub fn run(&mut self, sink: &mut dyn ProgressSink) -> TransferOutcome {
        if self.state != SessionState::Idle {
            return TransferOutcome::Failed(Error::SessionAlreadyRan);
        }

        let started = Instant::now();
        let mut progress = ProgressGate::new(sink);
        match self.execute(&mut progress, started) {
            Ok(report) => {
                self.transition(SessionState::Complete);
                info!(
                    "Transfer: sent {} to {} ({} -> {} bytes) in {:.2?}",
                    report.file_name,
                    report.peer,
                    report.original_length,
                    report.compressed_length,
                    report.elapsed
                );
                TransferOutcome::Success(report)
            }
            Err(e) => {
                let failed_in = self.state;
                self.transition(SessionState::Failed);
                error!("Transfer: failed while {:?}: {}", failed_in, e);
                TransferOutcome::Failed(e)
            }
        }
    }

    fn execute(&mut self, progress: &mut ProgressGate<'_>, started: Instant) -> Result<TransferReport> {
        // Name problems surface before the file is even opened.
        let trailer = filename_field(self.request.file_name())?;

        self.transition(SessionState::Compressing);
        info!(
            "Transfer: compressing {} as {:?}",
            self.request.source().describe(),
            self.request.file_name()
        );
        let compressor = Compressor::from_config(&self.config)?;
        let stream = self.request.source().open()?;
        let payload = compressor
            .compress(stream, |percent| progress.emit(Phase::Compressing, percent))?;
        let header = ProtocolHeader::new(
            self.config.magic,
            self.request.file_name(),
            payload.original_length(),
            payload.compressed_length(),
        )?;
        let fingerprint = payload.fingerprint()?;
        debug!(
            "Transfer: payload {} bytes, blake3 {}",
            payload.compressed_length(),
            fingerprint
        );

        self.transition(SessionState::Connecting);
        info!(
            "Transfer: connecting to {} (port {})",
            self.request.remote_host(),
            self.config.port
        );
        let mut transport = self.connector.connect(self.request.remote_host())?;
        let peer = transport.peer();

        self.transition(SessionState::SendingHeader);
        transport.send(&header.to_bytes())?;

        self.transition(SessionState::SendingPayload);
        let sent = send_payload(transport.as_mut(), &payload, self.config.chunk_size, |percent| {
            progress.emit(Phase::Sending, percent)
        })?;

        self.transition(SessionState::SendingFileName);
        transport.send(&trailer)?;
        transport.close()?;

        Ok(TransferReport {
            file_name: self.request.file_name().to_string(),
            peer,
            original_length: payload.original_length(),
            compressed_length: payload.compressed_length(),
            bytes_on_wire: (HEADER_LEN as u64) + sent + trailer.len() as u64,
            elapsed: started.elapsed(),
            fingerprint,
        })
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Transfer: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }
}

/// Write the payload in `chunk_size` pieces, reporting after each one.
fn send_payload<F>(
    transport: &mut dyn TransportSink,
    payload: &CompressedPayload,
    chunk_size: usize,
    mut on_progress: F,
) -> Result<u64>
where
    F: FnMut(u8),
{
    let total = payload.compressed_length();
    let chunk_size = chunk_size.max(1) as u64;
    let total_chunks = (total + chunk_size - 1) / chunk_size;
    if total_chunks == 0 {
        on_progress(100);
        return Ok(0);
    }

    let mut reader = payload
        .reader()
        .map_err(|e| Error::CompressionError(format!("payload unreadable: {}", e)))?;
    let mut buffer = vec![0u8; chunk_size as usize];
    let mut sent: u64 = 0;

    for i in 0..total_chunks {
        let len = std::cmp::min(chunk_size, total - sent) as usize;
        reader.read_exact(&mut buffer[..len]).map_err(|e| {
            Error::CompressionError(format!("payload unreadable at byte {}: {}", sent, e))
        })?;
        transport.send(&buffer[..len])?;
        sent += len as u64;

        debug!("Transfer: chunk {}/{} sent ({} bytes)", i + 1, total_chunks, len);
        on_progress(((i + 1) * 100 / total_chunks) as u8);
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use flate2::read::ZlibDecoder;
    use crate::client::progress::ProgressUpdate;
    use crate::protocol::Magic;
    use crate::source::{MemorySource, SourceStream};

    /// Captures everything written by a session.
    #[derive(Clone, Default)]
    struct Wire {
        bytes: Arc<Mutex<Vec<u8>>>,
        sends: Arc<Mutex<Vec<usize>>>,
        fail_after: Option<usize>,
    }

    struct WireSink(Wire);

    impl TransportSink for WireSink {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            let mut sends = self.0.sends.lock().unwrap();
            if self.0.fail_after.map_or(false, |n| sends.len() >= n) {
                return Err(Error::ConnectionLost(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            sends.push(bytes.len());
            self.0.bytes.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn peer(&self) -> String {
            "loader:4299".to_string()
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl Connector for Wire {
        fn connect(&self, _host: &str) -> Result<Box<dyn TransportSink>> {
            Ok(Box::new(WireSink(self.clone())))
        }
    }

    struct Refusing;

    impl Connector for Refusing {
        fn connect(&self, host: &str) -> Result<Box<dyn TransportSink>> {
            Err(Error::ConnectError {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    /// Advertises `size` bytes but fails once half of them were served.
    struct HalfBroken {
        size: u64,
    }

    struct HalfBrokenStream {
        size: u64,
        served: u64,
    }

    impl Read for HalfBrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served >= self.size / 2 {
                return Err(io::Error::new(io::ErrorKind::Other, "media removed"));
            }
            let n = buf.len().min((self.size / 2 - self.served) as usize);
            buf[..n].fill(1);
            self.served += n as u64;
            Ok(n)
        }
    }

    impl SourceStream for HalfBrokenStream {
        fn size(&self) -> u64 {
            self.size
        }
    }

    impl SourceHandle for HalfBroken {
        fn open(&self) -> Result<Box<dyn SourceStream>> {
            Ok(Box::new(HalfBrokenStream { size: self.size, served: 0 }))
        }

        fn describe(&self) -> String {
            "half broken".to_string()
        }
    }

    /// Incompressible bytes, so the payload spans many chunks.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x9E37_79B9;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    fn run_session(
        request: TransferRequest,
        config: ClientConfig,
        connector: Box<dyn Connector>,
    ) -> (TransferSession, TransferOutcome, Vec<ProgressUpdate>) {
        let mut updates = Vec::new();
        let mut session = TransferSession::with_connector(request, config, connector);
        let outcome = {
            let mut sink = |u: ProgressUpdate| updates.push(u);
            session.run(&mut sink)
        };
        (session, outcome, updates)
    }

    #[test]
    fn test_game_dol_scenario() {
        let wire = Wire::default();
        let request = TransferRequest::new(MemorySource::new(vec![0u8; 1000]), "game.dol", "loader");
        let (session, outcome, _) =
            run_session(request, ClientConfig::default(), Box::new(wire.clone()));

        let report = outcome.into_result().unwrap();
        assert_eq!(session.state(), SessionState::Complete);

        let bytes = wire.bytes.lock().unwrap().clone();
        let header = ProtocolHeader::parse(&bytes).unwrap();
        assert_eq!(header.magic, Magic::HAXX);
        assert_eq!(header.args_length, 9);
        assert_eq!(header.original_length, 1000);
        assert_eq!(header.compressed_length as u64, report.compressed_length);

        let payload_end = HEADER_LEN + header.compressed_length as usize;
        let mut inflated = Vec::new();
        ZlibDecoder::new(&bytes[HEADER_LEN..payload_end])
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, vec![0u8; 1000]);

        let trailer = &bytes[payload_end..];
        assert_eq!(trailer.len(), 9);
        assert_eq!(&trailer[..8], b"game.dol");
        assert_eq!(trailer[8], 0);
        assert_eq!(report.bytes_on_wire, bytes.len() as u64);
    }

    #[test]
    fn test_state_history_on_success() {
        let request = TransferRequest::new(MemorySource::new(&b"abc"[..]), "a.elf", "loader");
        let (session, outcome, _) =
            run_session(request, ClientConfig::default(), Box::new(Wire::default()));
        assert!(outcome.is_success());
        assert_eq!(
            session.history(),
            &[
                SessionState::Idle,
                SessionState::Compressing,
                SessionState::Connecting,
                SessionState::SendingHeader,
                SessionState::SendingPayload,
                SessionState::SendingFileName,
                SessionState::Complete,
            ]
        );
    }

    #[test]
    fn test_header_sent_alone_then_chunks() {
        let wire = Wire::default();
        let data = noise(200_000);
        let config = ClientConfig::default().with_chunk_size(1024).unwrap();
        let request = TransferRequest::new(MemorySource::new(data), "noise.bin", "loader");
        let (_, outcome, _) = run_session(request, config, Box::new(wire.clone()));
        let report = outcome.into_result().unwrap();

        let sends = wire.sends.lock().unwrap().clone();
        assert_eq!(sends[0], HEADER_LEN);
        assert_eq!(*sends.last().unwrap(), "noise.bin".len() + 1);
        let payload_sends = &sends[1..sends.len() - 1];
        assert!(payload_sends.iter().all(|&n| n <= 1024));
        assert_eq!(
            payload_sends.iter().sum::<usize>() as u64,
            report.compressed_length
        );
    }

    #[test]
    fn test_progress_order() {
        let data = noise(100_000);
        let config = ClientConfig::default().with_chunk_size(1024).unwrap();
        let request = TransferRequest::new(MemorySource::new(data), "p.bin", "loader");
        let (_, outcome, updates) = run_session(request, config, Box::new(Wire::default()));
        assert!(outcome.is_success());

        let split = updates
            .iter()
            .position(|u| u.phase == Phase::Sending)
            .unwrap();
        let (compressing, sending) = updates.split_at(split);
        assert!(compressing.iter().all(|u| u.phase == Phase::Compressing));
        assert!(sending.iter().all(|u| u.phase == Phase::Sending));
        assert_eq!(compressing.last().unwrap().percent, 100);
        assert_eq!(sending.last().unwrap().percent, 100);
        assert!(compressing.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(sending.windows(2).all(|w| w[0].percent <= w[1].percent));
    }

    #[test]
    fn test_empty_source_completes() {
        let wire = Wire::default();
        let request = TransferRequest::new(MemorySource::new(Vec::new()), "empty.bin", "loader");
        let (_, outcome, updates) =
            run_session(request, ClientConfig::default(), Box::new(wire.clone()));
        let report = outcome.into_result().unwrap();

        assert_eq!(report.original_length, 0);
        assert!(report.compressed_length > 0);
        let header = ProtocolHeader::parse(&wire.bytes.lock().unwrap()).unwrap();
        assert_eq!(header.original_length, 0);
        assert_eq!(header.compressed_length as u64, report.compressed_length);
        assert_eq!(updates.last().unwrap().percent, 100);
    }

    #[test]
    fn test_refused_connection_writes_nothing() {
        let request = TransferRequest::new(MemorySource::new(vec![1u8; 64]), "a.dol", "10.0.0.9");
        let (session, outcome, _) =
            run_session(request, ClientConfig::default(), Box::new(Refusing));

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(Error::ConnectError { .. })
        ));
        let history = session.history();
        assert_eq!(
            &history[history.len() - 2..],
            &[SessionState::Connecting, SessionState::Failed]
        );
    }

    #[test]
    fn test_read_failure_never_connects() {
        let wire = Wire::default();
        let request = TransferRequest::new(HalfBroken { size: 40_000 }, "broken.dol", "loader");
        let (session, outcome, _) =
            run_session(request, ClientConfig::default(), Box::new(wire.clone()));

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(Error::CompressionError(_))
        ));
        assert!(!session.history().contains(&SessionState::Connecting));
        assert!(wire.bytes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_is_connection_lost() {
        let wire = Wire {
            fail_after: Some(2),
            ..Wire::default()
        };
        let data = noise(50_000);
        let config = ClientConfig::default().with_chunk_size(1024).unwrap();
        let request = TransferRequest::new(MemorySource::new(data), "cut.bin", "loader");
        let (session, outcome, _) = run_session(request, config, Box::new(wire));

        assert!(matches!(outcome, TransferOutcome::Failed(Error::ConnectionLost(_))));
        let history = session.history();
        assert_eq!(
            &history[history.len() - 2..],
            &[SessionState::SendingPayload, SessionState::Failed]
        );
    }

    #[test]
    fn test_bad_name_fails_before_reading() {
        let wire = Wire::default();
        let request = TransferRequest::new(HalfBroken { size: 10 }, "", "loader");
        let (session, outcome, updates) =
            run_session(request, ClientConfig::default(), Box::new(wire.clone()));

        assert!(matches!(outcome, TransferOutcome::Failed(Error::EmptyFileName)));
        assert_eq!(session.history(), &[SessionState::Idle, SessionState::Failed]);
        assert!(updates.is_empty());
    }

    #[test]
    fn test_legacy_magic_on_wire() {
        let wire = Wire::default();
        let config = ClientConfig::default().with_magic(Magic::LEGACY);
        let request = TransferRequest::new(MemorySource::new(&b"x"[..]), "x", "loader");
        let (_, outcome, _) = run_session(request, config, Box::new(wire.clone()));
        assert!(outcome.is_success());
        assert_eq!(&wire.bytes.lock().unwrap()[..4], b"1027");
    }

    #[test]
    fn test_unreadable_payload_is_compression_error() {
        use std::io::Write;
        use crate::compress::PayloadWriter;

        // Spill file holds fewer bytes than the payload claims.
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[7u8; 10]).unwrap();
        let payload = CompressedPayload::new(PayloadWriter::Spill { file, len: 4096 }, 4096);

        let wire = Wire::default();
        let mut transport = wire.connect("loader").unwrap();
        let result = send_payload(transport.as_mut(), &payload, 1024, |_| {});
        assert!(matches!(result, Err(Error::CompressionError(_))));
        assert!(wire.bytes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_session_runs_once() {
        let request = TransferRequest::new(MemorySource::new(&b"x"[..]), "x", "loader");
        let mut session =
            TransferSession::with_connector(request, ClientConfig::default(), Box::new(Wire::default()));
        let mut sink = |_: ProgressUpdate| {};
        assert!(session.run(&mut sink).is_success());
        assert!(matches!(session.run(&mut sink), TransferOutcome::Failed(Error::SessionAlreadyRan)));
    }

    #[test]
    fn test_from_path_uses_last_component() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.dol");
        std::fs::write(&path, b"dol").unwrap();

        let request = TransferRequest::from_path(&path, "192.168.0.7").unwrap();
        assert_eq!(request.file_name(), "boot.dol");
        assert_eq!(request.remote_host(), "192.168.0.7");
    }
}
