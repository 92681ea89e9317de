//! Per-call session: owns the queues and station threads of one call and
//! drives the termination handshake.

use crate::error::{CallguardError, Result};
use crate::pipeline::accumulator::WindowAccumulator;
use crate::pipeline::converter::SampleConverter;
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::orchestrator::PipelineConfig;
use crate::pipeline::reassembler::{FrameReassembler, IngestWatermark};
use crate::pipeline::router::{
    Freshness, InterruptDispatcher, InterruptSink, LatestScore, RouterStation, ScoreCache,
    SessionIdSlot, SpeechSignal,
};
use crate::pipeline::scoring_station::ScoringStation;
use crate::pipeline::station::{StationOutcome, StationRunner};
use crate::pipeline::types::{ControlEvent, Flow, ScoreRecord, SessionId};
use crate::recording::WindowRecorder;
use crate::scoring::Scorer;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Threads are running, no event received yet.
    Created,
    /// Events are flowing.
    Active,
    /// Stop or connection close seen; stations are draining.
    Draining,
    /// Every station has exited or was abandoned after the grace period.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Active) | (Created, Draining) | (Active, Draining) | (Draining, Closed)
        )
    }
}

/// How a session shut down.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub session_id: Option<SessionId>,
    /// True when every station drained within the grace period.
    pub complete: bool,
    /// Stations still running when the grace period ran out.
    pub stuck: Vec<&'static str>,
    pub outcomes: Vec<(&'static str, StationOutcome)>,
    /// First fatal station error, if the session was aborted.
    pub aborted: Option<String>,
    /// Playback interrupts delivered over the session's lifetime.
    pub interrupts: u64,
    pub elapsed: Duration,
}

/// Reporter wrapper remembering the first fatal error of a session.
struct SessionReporter {
    inner: Arc<dyn ErrorReporter>,
    fatal: Arc<OnceLock<String>>,
}

impl ErrorReporter for SessionReporter {
    fn report(&self, station: &str, error: &StationError) {
        if let StationError::Fatal(msg) = error
            && self.fatal.set(format!("{station}: {msg}")).is_err()
        {
            tracing::debug!(station, "later fatal error after abort");
        }
        self.inner.report(station, error);
    }
}

/// One live call.
///
/// Events are pushed with [`Session::accept`]; ingestion blocks only when the
/// bounded event queue is full. Speech-start events skip every queue and go
/// straight to the interrupt dispatcher.
pub struct Session {
    state: SessionState,
    events_tx: Option<Sender<Flow<ControlEvent>>>,
    runners: Vec<StationRunner>,
    dispatcher: Option<InterruptDispatcher>,
    speech: SpeechSignal,
    cache: ScoreCache,
    id_slot: SessionIdSlot,
    watermark: IngestWatermark,
    scores_rx: Receiver<ScoreRecord>,
    fatal: Arc<OnceLock<String>>,
    grace: Duration,
    created_at: Instant,
    span: tracing::Span,
}

impl Session {
    /// Creates the session's queues and spawns its station threads.
    pub fn start(
        config: &PipelineConfig,
        scorer: Arc<dyn Scorer>,
        error_reporter: Arc<dyn ErrorReporter>,
        interrupt_sink: Arc<dyn InterruptSink>,
    ) -> Result<Self> {
        let span = tracing::info_span!("session", id = tracing::field::Empty);
        let enter = span.enter();

        let fatal = Arc::new(OnceLock::new());
        let reporter: Arc<dyn ErrorReporter> = Arc::new(SessionReporter {
            inner: error_reporter,
            fatal: fatal.clone(),
        });

        let (id_slot, id_rx) = SessionIdSlot::new();
        let watermark = IngestWatermark::new(config.source_rate, config.working_rate);
        let cache = ScoreCache::new(config.freshness_tolerance_samples);

        let recorder = match &config.dump_dir {
            Some(dir) => Some(WindowRecorder::new(dir, config.working_rate, id_slot.clone())?),
            None => None,
        };

        // Create channels between stations
        let (events_tx, events_rx) = bounded(config.event_buffer);
        let (frame_tx, frame_rx) = bounded(config.frame_buffer);
        let (sample_tx, sample_rx) = bounded(config.sample_buffer);
        let (window_tx, window_rx) = bounded(config.window_buffer);
        let (score_tx, score_rx) = bounded(config.score_buffer);
        let (subscriber_tx, scores_rx) = bounded(config.score_buffer);

        // Create stations
        let reassembler =
            FrameReassembler::new(config.frame_bytes, id_slot.clone(), watermark.clone());
        let converter =
            SampleConverter::new(config.frame_bytes, config.source_rate, config.working_rate)
                .with_encoding(config.encoding)
                .with_epsilon(config.normalize_epsilon);
        let accumulator = WindowAccumulator::new(config.window_samples, config.overflow);
        let scoring_len = scorer.input_len().unwrap_or(config.window_samples);
        let scoring = ScoringStation::new(scorer.clone(), scoring_len, config.working_rate)
            .with_recorder(recorder);
        let router = RouterStation::new(cache.clone()).with_score_sender(subscriber_tx);

        // Spawn station runners
        let runners = vec![
            StationRunner::spawn(reassembler, events_rx, Some(frame_tx), reporter.clone()),
            StationRunner::spawn(converter, frame_rx, Some(sample_tx), reporter.clone()),
            StationRunner::spawn(accumulator, sample_rx, Some(window_tx), reporter.clone()),
            StationRunner::spawn(scoring, window_rx, Some(score_tx), reporter.clone()),
            StationRunner::spawn(router, score_rx, None, reporter),
        ];
        let (dispatcher, speech) = InterruptDispatcher::spawn(id_rx, interrupt_sink);

        tracing::info!(
            model = scorer.model_name(),
            window_samples = config.window_samples,
            "session started"
        );
        drop(enter);

        Ok(Self {
            state: SessionState::Created,
            events_tx: Some(events_tx),
            runners,
            dispatcher: Some(dispatcher),
            speech,
            cache,
            id_slot,
            watermark,
            scores_rx,
            fatal,
            grace: config.drain_grace,
            created_at: Instant::now(),
            span,
        })
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(CallguardError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::info!(parent: &self.span, from = %self.state, to = %next, "session state");
        self.state = next;
        Ok(())
    }

    /// Accepts one event from the gateway, in arrival order.
    ///
    /// Fails with `SessionClosed` after `Stop` or close, and with
    /// `SessionAborted` once a station hit a fatal error.
    pub fn accept(&mut self, event: ControlEvent) -> Result<()> {
        match self.state {
            SessionState::Draining | SessionState::Closed => {
                return Err(CallguardError::SessionClosed);
            }
            SessionState::Created => self.transition(SessionState::Active)?,
            SessionState::Active => {}
        }

        match &event {
            ControlEvent::SpeechStarted => {
                if !self.speech.signal() {
                    tracing::warn!(parent: &self.span, "interrupt dispatcher gone");
                }
                return Ok(());
            }
            ControlEvent::SessionStart { id } if self.id_slot.get().is_none() => {
                self.span.record("id", id.as_str());
            }
            _ => {}
        }

        if matches!(event, ControlEvent::Stop) {
            // The reassembler finishes on Stop and forwards the sentinel itself
            let deadline = Instant::now() + self.grace;
            self.finish_input(Flow::Item(event), deadline)?;
            return self.transition(SessionState::Draining);
        }

        let Some(tx) = &self.events_tx else {
            return Err(CallguardError::SessionClosed);
        };
        if tx.send(Flow::Item(event)).is_err() {
            self.events_tx = None;
            return Err(self.aborted_error());
        }
        Ok(())
    }

    /// Sends the last inbound item and releases the event queue.
    ///
    /// Waits for queue space until `deadline` at most. If the queue is still
    /// full the sender is dropped instead: the reassembler drains what is
    /// queued and then sees the disconnect.
    fn finish_input(&mut self, last: Flow<ControlEvent>, deadline: Instant) -> Result<()> {
        let Some(tx) = self.events_tx.take() else {
            return Err(CallguardError::SessionClosed);
        };
        match tx.send_timeout(last, deadline.saturating_duration_since(Instant::now())) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(parent: &self.span, "event queue full at shutdown, disconnecting");
                Ok(())
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(self.aborted_error()),
        }
    }

    fn aborted_error(&self) -> CallguardError {
        CallguardError::SessionAborted {
            reason: self
                .fatal
                .get()
                .cloned()
                .unwrap_or_else(|| "pipeline stopped consuming events".to_string()),
        }
    }

    /// The inbound connection closed; starts draining if not already.
    ///
    /// Blocks for at most the grace period while the event queue is full.
    pub fn connection_closed(&mut self) {
        let deadline = Instant::now() + self.grace;
        self.close_input(deadline);
    }

    fn close_input(&mut self, deadline: Instant) {
        if !matches!(self.state, SessionState::Created | SessionState::Active) {
            return;
        }
        if let Err(e) = self.finish_input(Flow::End, deadline) {
            tracing::debug!(parent: &self.span, error = %e, "event queue already closed");
        }
        if let Err(e) = self.transition(SessionState::Draining) {
            tracing::warn!(parent: &self.span, error = %e, "connection close ignored");
        }
    }

    /// Drains the session and releases its threads.
    ///
    /// Waits up to the grace period for every station to exit. Stations still
    /// running after that are detached and listed in the report.
    pub fn close(&mut self) -> ShutdownReport {
        let deadline = Instant::now() + self.grace;
        self.close_input(deadline);

        let poll_interval = Duration::from_millis(10);
        while self.runners.iter().any(|r| !r.is_finished()) && Instant::now() < deadline {
            thread::sleep(poll_interval);
        }

        let mut outcomes = Vec::new();
        let mut stuck = Vec::new();
        for runner in std::mem::take(&mut self.runners) {
            let name = runner.name();
            if !runner.is_finished() {
                // Dropping the runner detaches its thread
                stuck.push(name);
                continue;
            }
            match runner.join() {
                Ok(outcome) => outcomes.push((name, outcome)),
                Err(msg) => {
                    tracing::error!(parent: &self.span, station = name, error = %msg, "station thread panicked");
                    outcomes.push((name, StationOutcome::Aborted(msg)));
                }
            }
        }

        let interrupts = self.dispatcher.take().map_or(0, InterruptDispatcher::stop);
        let complete = stuck.is_empty();
        if complete {
            tracing::info!(parent: &self.span, "session drained");
        } else {
            tracing::error!(parent: &self.span, stuck = ?stuck, "session force-closed after grace period");
        }
        if let Err(e) = self.transition(SessionState::Closed) {
            tracing::debug!(parent: &self.span, error = %e, "already closed");
        }

        ShutdownReport {
            session_id: self.id_slot.get(),
            complete,
            stuck,
            outcomes,
            aborted: self.fatal.get().cloned(),
            interrupts,
            elapsed: self.created_at.elapsed(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id, once the gateway announced it.
    pub fn session_id(&self) -> Option<SessionId> {
        self.id_slot.get()
    }

    /// Handle for raising speech-start from another thread.
    pub fn speech_signal(&self) -> SpeechSignal {
        self.speech.clone()
    }

    /// Every score record, in window order. Records are dropped if the
    /// receiver falls behind; the cache always holds the latest.
    pub fn scores(&self) -> &Receiver<ScoreRecord> {
        &self.scores_rx
    }

    pub fn latest_score(&self) -> LatestScore {
        self.cache.latest()
    }

    /// Freshness of the latest score relative to the audio received so far.
    pub fn assess_latest(&self) -> Freshness {
        self.cache.assess(self.watermark.samples_through())
    }

    pub fn score_cache(&self) -> &ScoreCache {
        &self.cache
    }

    /// Inbound audio received so far.
    pub fn watermark(&self) -> &IngestWatermark {
        &self.watermark
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            // Remaining threads drain in the background
            self.close_input(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::LogReporter;
    use crate::pipeline::router::ChannelInterruptSink;
    use crate::pipeline::types::MediaTrack;
    use crate::scoring::MockScorer;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            frame_bytes: 100,
            window_samples: 400,
            drain_grace: Duration::from_secs(5),
            ..PipelineConfig::default()
        }
    }

    fn start(config: &PipelineConfig, scorer: MockScorer) -> Session {
        let (sink, _rx) = ChannelInterruptSink::new();
        Session::start(config, Arc::new(scorer), Arc::new(LogReporter), Arc::new(sink)).unwrap()
    }

    fn media(len: usize) -> ControlEvent {
        ControlEvent::Media {
            track: MediaTrack::Inbound,
            payload: (0..len).map(|i| (128 + (i % 40) as i32 - 20) as u8).collect(),
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(SessionState::Created.can_become(SessionState::Active));
        assert!(SessionState::Active.can_become(SessionState::Draining));
        assert!(SessionState::Draining.can_become(SessionState::Closed));
        assert!(!SessionState::Closed.can_become(SessionState::Active));
        assert!(!SessionState::Active.can_become(SessionState::Closed));
    }

    #[test]
    fn test_first_event_activates_and_stop_drains() {
        let mut session = start(&small_config(), MockScorer::new("mock"));
        assert_eq!(session.state(), SessionState::Created);

        session
            .accept(ControlEvent::SessionStart {
                id: SessionId::new("MZ1"),
            })
            .unwrap();
        assert_eq!(session.state(), SessionState::Active);

        session.accept(ControlEvent::Stop).unwrap();
        assert_eq!(session.state(), SessionState::Draining);
        assert!(matches!(
            session.accept(media(10)),
            Err(CallguardError::SessionClosed)
        ));

        let report = session.close();
        assert!(report.complete);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(report.session_id, Some(SessionId::new("MZ1")));
        assert_eq!(report.outcomes.len(), 5);
        assert!(
            report
                .outcomes
                .iter()
                .all(|(_, o)| *o == StationOutcome::Drained)
        );
    }

    #[test]
    fn test_scores_flow_to_cache() {
        let mut session = start(&small_config(), MockScorer::new("mock"));
        assert_eq!(session.latest_score(), LatestScore::Unavailable);

        // 400 window samples = 200 source bytes = 2 frames
        for _ in 0..4 {
            session.accept(media(100)).unwrap();
        }
        let first = session.scores().recv_timeout(Duration::from_secs(5)).unwrap();
        let second = session.scores().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.covers_through, 400);
        assert_eq!(second.covers_through, 800);

        let report = session.close();
        assert!(report.complete);
        assert!(matches!(session.latest_score(), LatestScore::Available(r) if r.window_index == 1));
        assert!(matches!(session.assess_latest(), Freshness::Fresh(_)));
    }

    #[test]
    fn test_close_without_events() {
        let mut session = start(&small_config(), MockScorer::new("mock"));
        let report = session.close();
        assert!(report.complete);
        assert_eq!(report.session_id, None);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.accept(ControlEvent::Connected),
            Err(CallguardError::SessionClosed)
        ));
    }

    #[test]
    fn test_stuck_scorer_is_force_closed() {
        let config = PipelineConfig {
            drain_grace: Duration::from_millis(100),
            ..small_config()
        };
        let mut session = start(&config, MockScorer::new("slow").with_delay(Duration::from_secs(2)));
        session.accept(media(200)).unwrap();
        // Give the window time to reach the scorer
        thread::sleep(Duration::from_millis(200));

        let report = session.close();
        assert!(!report.complete);
        assert!(report.stuck.contains(&"scoring"));
        assert_eq!(session.state(), SessionState::Closed);
    }
    fn single_slot_config(grace: Duration) -> PipelineConfig {
        PipelineConfig {
            event_buffer: 1,
            frame_buffer: 1,
            sample_buffer: 1,
            window_buffer: 1,
            score_buffer: 1,
            drain_grace: grace,
            ..small_config()
        }
    }

    /// Fills every queue behind a scorer stuck on the first window.
    fn backed_up_session(grace: Duration) -> Session {
        let config = single_slot_config(grace);
        let mut session = start(&config, MockScorer::new("slow").with_delay(Duration::from_secs(3)));
        session.accept(media(200)).unwrap();
        thread::sleep(Duration::from_millis(200));
        for _ in 0..5 {
            session.accept(media(200)).unwrap();
        }
        session
    }

    #[test]
    fn test_stop_on_full_queue_returns_within_grace() {
        let mut session = backed_up_session(Duration::from_millis(100));

        let started = Instant::now();
        session.accept(ControlEvent::Stop).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(session.state(), SessionState::Draining);
        assert!(matches!(
            session.accept(media(10)),
            Err(CallguardError::SessionClosed)
        ));

        let report = session.close();
        assert!(!report.complete);
        assert!(report.stuck.contains(&"scoring"));
    }

    #[test]
    fn test_drop_with_full_queue_does_not_block() {
        let session = backed_up_session(Duration::from_secs(10));
        let started = Instant::now();
        drop(session);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
