// Progress reporting from the transfer worker

use crossbeam_channel::Sender;
use log::debug;
use crate::common::types::Phase;
use super::session::TransferOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub percent: u8,
}

/// Observer of one transfer. Calls arrive from a single thread, in order.
pub trait ProgressSink {
    fn on_progress(&mut self, update: ProgressUpdate);

    /// Terminal notification, delivered exactly once per transfer.
    fn on_finished(&mut self, _outcome: &TransferOutcome) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressUpdate),
{
    fn on_progress(&mut self, update: ProgressUpdate) {
        self(update)
    }
}

/// Everything a background transfer publishes, in emission order.
#[derive(Debug)]
pub enum TransferEvent {
    Progress(ProgressUpdate),
    Finished(TransferOutcome),
}

/// Forwards progress into the worker's event channel. The worker sends the
/// `Finished` event itself since it owns the outcome.
pub struct ChannelSink {
    tx: Sender<TransferEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<TransferEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&mut self, update: ProgressUpdate) {
        if self.tx.send(TransferEvent::Progress(update)).is_err() {
            debug!("ChannelSink: receiver dropped, {:?} not delivered", update);
        }
    }
}

/// Enforces the ordering observers rely on: phases only move forward,
/// percentages never decrease within a phase, and a phase is closed at 100
/// before the next one opens.
pub(crate) struct ProgressGate<'a> {
    sink: &'a mut dyn ProgressSink,
    current: Option<ProgressUpdate>,
}

impl<'a> ProgressGate<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink, current: None }
    }

    pub(crate) fn emit(&mut self, phase: Phase, percent: u8) {
        let percent = percent.min(100);

        if let Some(current) = self.current {
            if phase < current.phase {
                return;
            }
            if phase == current.phase && percent <= current.percent {
                return;
            }
            if phase > current.phase && current.percent < 100 {
                self.deliver(ProgressUpdate { phase: current.phase, percent: 100 });
            }
        }
        self.deliver(ProgressUpdate { phase, percent });
    }

    fn deliver(&mut self, update: ProgressUpdate) {
        self.current = Some(update);
        self.sink.on_progress(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_output(inputs: &[(Phase, u8)]) -> Vec<(Phase, u8)> {
        let mut seen = Vec::new();
        {
            let mut sink = |u: ProgressUpdate| seen.push((u.phase, u.percent));
            let mut gate = ProgressGate::new(&mut sink);
            for &(phase, percent) in inputs {
                gate.emit(phase, percent);
            }
        }
        seen
    }

    #[test]
    fn test_gate_drops_regressions_and_duplicates() {
        let out = gate_output(&[
            (Phase::Compressing, 10),
            (Phase::Compressing, 10),
            (Phase::Compressing, 5),
            (Phase::Compressing, 100),
        ]);
        assert_eq!(out, vec![(Phase::Compressing, 10), (Phase::Compressing, 100)]);
    }

    #[test]
    fn test_gate_closes_phase_before_next() {
        let out = gate_output(&[(Phase::Compressing, 40), (Phase::Sending, 50)]);
        assert_eq!(
            out,
            vec![
                (Phase::Compressing, 40),
                (Phase::Compressing, 100),
                (Phase::Sending, 50),
            ]
        );
    }

    #[test]
    fn test_gate_never_goes_back_a_phase() {
        let out = gate_output(&[(Phase::Sending, 20), (Phase::Compressing, 100)]);
        assert_eq!(out, vec![(Phase::Sending, 20)]);
    }

    #[test]
    fn test_gate_clamps_percent() {
        let out = gate_output(&[(Phase::Sending, 250)]);
        assert_eq!(out, vec![(Phase::Sending, 100)]);
    }

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.on_progress(ProgressUpdate { phase: Phase::Compressing, percent: 100 });
        sink.on_progress(ProgressUpdate { phase: Phase::Sending, percent: 7 });
        drop(sink);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            TransferEvent::Progress(ProgressUpdate { phase: Phase::Sending, percent: 7 })
        ));
    }
}
