//! Fan-out of scores and speech-start signals to session consumers.
//!
//! Two independent paths leave the pipeline here:
//! - scores flow through [`RouterStation`] into a single-slot [`ScoreCache`]
//!   (and optionally a subscriber channel)
//! - speech-start signals go through an unbounded channel straight to the
//!   interrupt dispatcher thread, never touching a queue that scoring can block

use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{PlaybackInterrupt, ScoreRecord, SessionId};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, unbounded};
use std::sync::{Arc, OnceLock, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Single-assignment holder for the session id announced by the gateway.
///
/// The first `publish` wins and is also sent once on the notify channel, so
/// consumers that need the id can block on it instead of polling.
#[derive(Debug, Clone)]
pub struct SessionIdSlot {
    cell: Arc<OnceLock<SessionId>>,
    notify: Sender<SessionId>,
}

impl SessionIdSlot {
    /// Create an empty slot and the receiver notified on first publish.
    pub fn new() -> (Self, Receiver<SessionId>) {
        let (notify, rx) = bounded(1);
        (
            Self {
                cell: Arc::new(OnceLock::new()),
                notify,
            },
            rx,
        )
    }

    /// Stores the id. Returns false if an id was already set.
    pub fn publish(&self, id: SessionId) -> bool {
        if self.cell.set(id.clone()).is_err() {
            return false;
        }
        if self.notify.try_send(id).is_err() {
            tracing::debug!("session id listener gone");
        }
        true
    }

    pub fn get(&self) -> Option<SessionId> {
        self.cell.get().cloned()
    }
}

/// Result of a bare read of the score cache.
#[derive(Debug, Clone, PartialEq)]
pub enum LatestScore {
    /// No window has been scored yet.
    Unavailable,
    Available(ScoreRecord),
}

/// Result of correlating the latest score with an utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    NoScore,
    /// The score covers audio up to within the tolerance of the utterance end.
    Fresh(ScoreRecord),
    /// The score trails the utterance end by `lag` working-rate samples.
    Stale { record: ScoreRecord, lag: u64 },
}

/// Last-write-wins cache of the most recent score of one session.
#[derive(Debug, Clone)]
pub struct ScoreCache {
    slot: Arc<RwLock<Option<ScoreRecord>>>,
    tolerance_samples: u64,
}

impl ScoreCache {
    /// `tolerance_samples` is how far `covers_through` may trail an utterance
    /// end while the score still counts as fresh.
    pub fn new(tolerance_samples: u64) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            tolerance_samples,
        }
    }

    pub fn update(&self, record: ScoreRecord) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(record);
    }

    /// Never blocks on scoring; returns `Unavailable` until the first score.
    pub fn latest(&self) -> LatestScore {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(record) => LatestScore::Available(record.clone()),
            None => LatestScore::Unavailable,
        }
    }

    /// Checks whether the latest score covers audio close enough to `utterance_end`.
    pub fn assess(&self, utterance_end: u64) -> Freshness {
        match self.latest() {
            LatestScore::Unavailable => Freshness::NoScore,
            LatestScore::Available(record) => {
                let lag = utterance_end.saturating_sub(record.covers_through);
                if lag <= self.tolerance_samples {
                    Freshness::Fresh(record)
                } else {
                    Freshness::Stale { record, lag }
                }
            }
        }
    }

    pub fn tolerance_samples(&self) -> u64 {
        self.tolerance_samples
    }
}

/// Terminal station that publishes score records.
pub struct RouterStation {
    cache: ScoreCache,
    score_tx: Option<Sender<ScoreRecord>>,
    last_covers_through: Option<u64>,
    routed: u64,
}

impl RouterStation {
    pub fn new(cache: ScoreCache) -> Self {
        Self {
            cache,
            score_tx: None,
            last_covers_through: None,
            routed: 0,
        }
    }

    /// Also push every record into `tx`; records are dropped if it is full.
    pub fn with_score_sender(mut self, tx: Sender<ScoreRecord>) -> Self {
        self.score_tx = Some(tx);
        self
    }

    pub fn route(&mut self, record: ScoreRecord) -> Result<(), StationError> {
        if let Some(last) = self.last_covers_through
            && record.covers_through <= last
        {
            return Err(StationError::Fatal(format!(
                "score watermark went from {} to {} at window {}",
                last, record.covers_through, record.window_index
            )));
        }
        self.last_covers_through = Some(record.covers_through);
        self.routed += 1;
        self.cache.update(record.clone());

        if let Some(tx) = &self.score_tx {
            match tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    tracing::warn!(index = record.window_index, "score subscriber lagging, record dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!("score subscriber gone");
                    self.score_tx = None;
                }
            }
        }
        Ok(())
    }
}

impl Station for RouterStation {
    type Input = ScoreRecord;
    type Output = ();

    fn name(&self) -> &'static str {
        "router"
    }

    fn process(&mut self, record: ScoreRecord) -> Result<Vec<()>, StationError> {
        self.route(record)?;
        Ok(Vec::new())
    }

    fn shutdown(&mut self) {
        tracing::debug!(routed = self.routed, "router finished");
    }
}

/// Receives playback interrupts for the outbound media relay.
///
/// Delivery is fire-and-forget; implementations must not block.
pub trait InterruptSink: Send + Sync {
    fn interrupt(&self, interrupt: PlaybackInterrupt);
}

/// Sink forwarding interrupts into a channel.
#[derive(Debug, Clone)]
pub struct ChannelInterruptSink {
    tx: Sender<PlaybackInterrupt>,
}

impl ChannelInterruptSink {
    pub fn new() -> (Self, Receiver<PlaybackInterrupt>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl InterruptSink for ChannelInterruptSink {
    fn interrupt(&self, interrupt: PlaybackInterrupt) {
        if self.tx.send(interrupt).is_err() {
            tracing::debug!("interrupt receiver gone");
        }
    }
}

/// Sink that drops interrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInterruptSink;

impl InterruptSink for NullInterruptSink {
    fn interrupt(&self, _interrupt: PlaybackInterrupt) {}
}

/// Handle raising speech-start signals for one session.
#[derive(Debug, Clone)]
pub struct SpeechSignal {
    tx: Sender<Instant>,
}

impl SpeechSignal {
    /// Signals that the remote party started speaking.
    ///
    /// Returns false once the session has closed.
    pub fn signal(&self) -> bool {
        self.tx.send(Instant::now()).is_ok()
    }
}

/// Thread turning speech-start signals into playback interrupts.
///
/// Signals raised before the session id is known are held and delivered as
/// soon as the id is published.
pub struct InterruptDispatcher {
    handle: Option<JoinHandle<u64>>,
    shutdown_tx: Option<Sender<()>>,
}

impl InterruptDispatcher {
    pub fn spawn(id_rx: Receiver<SessionId>, sink: Arc<dyn InterruptSink>) -> (Self, SpeechSignal) {
        let (tx, interrupt_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let parent = tracing::Span::current();

        let handle = thread::spawn(move || {
            let span = tracing::info_span!(parent: &parent, "interrupts");
            let _guard = span.enter();
            run_dispatcher(id_rx, interrupt_rx, shutdown_rx, sink.as_ref())
        });

        (
            Self {
                handle: Some(handle),
                shutdown_tx: Some(shutdown_tx),
            },
            SpeechSignal { tx },
        )
    }

    /// Stops the dispatcher after delivering signals already raised.
    /// Returns the number of interrupts delivered.
    pub fn stop(mut self) -> u64 {
        self.shutdown_tx.take();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                tracing::error!("interrupt dispatcher panicked");
                0
            }),
            None => 0,
        }
    }
}

fn run_dispatcher(
    id_rx: Receiver<SessionId>,
    interrupt_rx: Receiver<Instant>,
    shutdown_rx: Receiver<()>,
    sink: &dyn InterruptSink,
) -> u64 {
    let mut session_id: Option<SessionId> = None;
    let mut pending: Vec<Instant> = Vec::new();
    let mut delivered = 0u64;

    let deliver = |id: &SessionId, requested_at: Instant, delivered: &mut u64| {
        tracing::debug!(session = %id, "playback interrupt");
        sink.interrupt(PlaybackInterrupt {
            session_id: id.clone(),
            requested_at,
        });
        *delivered += 1;
    };

    loop {
        select! {
            recv(id_rx) -> msg => match msg {
                Ok(id) => {
                    for requested_at in pending.drain(..) {
                        deliver(&id, requested_at, &mut delivered);
                    }
                    session_id = Some(id);
                }
                Err(_) => break,
            },
            recv(interrupt_rx) -> msg => match msg {
                Ok(requested_at) => match &session_id {
                    Some(id) => deliver(id, requested_at, &mut delivered),
                    None => pending.push(requested_at),
                },
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }

    // Id and signals raised just before shutdown
    if session_id.is_none()
        && let Ok(id) = id_rx.try_recv()
    {
        for requested_at in pending.drain(..) {
            deliver(&id, requested_at, &mut delivered);
        }
        session_id = Some(id);
    }
    for requested_at in interrupt_rx.try_iter() {
        match &session_id {
            Some(id) => deliver(id, requested_at, &mut delivered),
            None => pending.push(requested_at),
        }
    }
    if !pending.is_empty() {
        tracing::warn!(count = pending.len(), "interrupts dropped, session id never announced");
    }
    delivered
}
