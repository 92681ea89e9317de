//! Drives one session from a recorded JSON-lines log of gateway and agent messages.

use crate::alert::{Alert, AlertAssessor, FraudAnalysis};
use crate::error::{CallguardError, Result};
use crate::pipeline::orchestrator::Relay;
use crate::pipeline::router::ChannelInterruptSink;
use crate::pipeline::session::{Session, ShutdownReport};
use crate::pipeline::types::{ControlEvent, PlaybackInterrupt, ScoreRecord};
use crate::protocol::{self, AgentEvent, Inbound};
use std::io::BufRead;
use std::sync::Arc;

/// What happened during a replay.
#[derive(Debug)]
pub struct ReplaySummary {
    /// Events handed to the session.
    pub events_accepted: u64,
    /// Lines skipped as malformed or arriving after the session stopped.
    pub lines_dropped: u64,
    /// Score records in window order.
    pub scores: Vec<ScoreRecord>,
    pub interrupts: Vec<PlaybackInterrupt>,
    pub alerts: Vec<Alert>,
    pub report: ShutdownReport,
}

/// Replays `reader` into a new session of `relay`.
///
/// End of input counts as the connection closing. Malformed lines are logged
/// and skipped; an I/O error while reading is returned after the session is closed.
pub fn run<R: BufRead>(reader: R, relay: &Relay, assessor: AlertAssessor) -> Result<ReplaySummary> {
    let (sink, interrupt_rx) = ChannelInterruptSink::new();
    let mut session = relay.open_session(Arc::new(sink))?;

    let mut events_accepted = 0u64;
    let mut lines_dropped = 0u64;
    let mut scores = Vec::new();
    let mut alerts = Vec::new();
    let mut read_error = None;

    for (number, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let inbound = match protocol::decode_line(&line) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(line = number + 1, error = %e, "dropping malformed message");
                lines_dropped += 1;
                continue;
            }
        };

        let event = match inbound {
            Inbound::Gateway(event) => event,
            Inbound::Agent(AgentEvent::SpeechStarted) => ControlEvent::SpeechStarted,
            Inbound::Agent(AgentEvent::Analysis(text)) => {
                match FraudAnalysis::parse(&text) {
                    Ok(analysis) => alerts.push(assessor.assess(&analysis, &session.assess_latest())),
                    Err(e) => {
                        tracing::warn!(line = number + 1, error = %e, "dropping analysis");
                        lines_dropped += 1;
                    }
                }
                continue;
            }
        };

        match session.accept(event) {
            Ok(()) => events_accepted += 1,
            Err(CallguardError::SessionClosed) => {
                tracing::warn!(line = number + 1, "event after stop dropped");
                lines_dropped += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "session aborted, stopping replay");
                break;
            }
        }
        scores.extend(session.scores().try_iter());
    }

    let report = finish(&mut session);
    scores.extend(session.scores().try_iter());
    let interrupts = interrupt_rx.try_iter().collect();

    if let Some(e) = read_error {
        return Err(CallguardError::Io(e));
    }

    Ok(ReplaySummary {
        events_accepted,
        lines_dropped,
        scores,
        interrupts,
        alerts,
        report,
    })
}

fn finish(session: &mut Session) -> ShutdownReport {
    session.connection_closed();
    let report = session.close();
    tracing::info!(
        session = ?report.session_id.as_ref().map(|id| id.as_str()),
        complete = report.complete,
        interrupts = report.interrupts,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "replay finished"
    );
    report
}
