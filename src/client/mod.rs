// Client module - runs transfers to a remote loader

mod progress;
mod session;

pub use progress::{ChannelSink, ProgressSink, ProgressUpdate, TransferEvent};
pub use session::{TransferOutcome, TransferReport, TransferRequest, TransferSession};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam_channel::{bounded, Receiver};
use log::{error, info};
use crate::common::config::ClientConfig;
use crate::common::error::{Error, Result};
use crate::transport::{Connector, TcpConnector};

/// Events buffered between the worker and the observer. One transfer emits at
/// most ~200 progress events plus the outcome, so the worker never waits in
/// practice.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Main client interface. Allows one transfer at a time.
pub struct Client {
    config: ClientConfig,
    active: Arc<AtomicBool>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start `request` on a background worker over TCP.
    pub fn send(&self, request: TransferRequest) -> Result<TransferHandle> {
        let connector = Box::new(TcpConnector::from_config(&self.config));
        self.send_with(request, connector)
    }

    /// Start `request` on a background worker using `connector`.
    ///
    /// Fails with `Error::TransferInProgress` while another transfer from
    /// this client is still running.
    pub fn send_with(
        &self,
        request: TransferRequest,
        connector: Box<dyn Connector>,
    ) -> Result<TransferHandle> {
        let guard = ActiveGuard::acquire(&self.active)?;
        let (tx, rx) = bounded(EVENT_QUEUE_DEPTH);
        let config = self.config.clone();

        info!("Client: queued {:?}", request);
        let worker = thread::Builder::new()
            .name("haxxload-transfer".to_string())
            .spawn(move || {
                let outcome = {
                    let _guard = guard;
                    let mut session = TransferSession::with_connector(request, config, connector);
                    let mut sink = ChannelSink::new(tx.clone());
                    session.run(&mut sink)
                };
                // Released before the outcome is published so a caller that
                // saw `Finished` can start the next transfer immediately.
                let _ = tx.send(TransferEvent::Finished(outcome));
            })?;

        Ok(TransferHandle {
            events: rx,
            worker: Some(worker),
        })
    }

    /// Run `request` on the calling thread, reporting to `sink`.
    pub fn send_blocking(&self, request: TransferRequest, sink: &mut dyn ProgressSink) -> TransferOutcome {
        let outcome = match ActiveGuard::acquire(&self.active) {
            Ok(_guard) => TransferSession::new(request, self.config.clone()).run(sink),
            Err(e) => TransferOutcome::Failed(e),
        };
        sink.on_finished(&outcome);
        outcome
    }
}

/// Handle to a transfer running on a worker thread.
pub struct TransferHandle {
    events: Receiver<TransferEvent>,
    worker: Option<JoinHandle<()>>,
}

impl TransferHandle {
    /// Ordered event stream; ends with exactly one `Finished`.
    pub fn events(&self) -> &Receiver<TransferEvent> {
        &self.events
    }

    /// Block until the transfer ends, discarding progress.
    pub fn wait(self) -> TransferOutcome {
        self.wait_with(&mut |_: ProgressUpdate| {})
    }

    /// Block until the transfer ends, forwarding every event to `sink`.
    pub fn wait_with(mut self, sink: &mut dyn ProgressSink) -> TransferOutcome {
        let mut outcome = None;
        for event in self.events.iter() {
            match event {
                TransferEvent::Progress(update) => sink.on_progress(update),
                TransferEvent::Finished(result) => {
                    outcome = Some(result);
                    break;
                }
            }
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Client: transfer worker panicked");
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            TransferOutcome::Failed(Error::Worker("worker exited without an outcome".to_string()))
        });
        sink.on_finished(&outcome);
        outcome
    }
}

/// Marks the client busy for as long as it lives.
struct ActiveGuard {
    flag: Arc<AtomicBool>,
}

impl ActiveGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::TransferInProgress)?;
        Ok(Self { flag: Arc::clone(flag) })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
