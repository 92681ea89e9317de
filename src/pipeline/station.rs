//! Core station abstraction and runner for the call pipeline.

use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::types::Flow;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A processing station in the call pipeline.
///
/// Each station receives input, processes it, and produces output.
/// Stations run in their own threads and are connected by channels.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(outputs)` - Successfully processed; `outputs` may be empty
    /// - `Err(StationError)` - Processing failed
    fn process(&mut self, input: Self::Input) -> Result<Vec<Self::Output>, StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Returns true once the station will accept no further input.
    ///
    /// Checked after every `process` call; the runner then forwards the
    /// termination sentinel and exits as if it had received one.
    fn is_finished(&self) -> bool {
        false
    }

    /// Called when the station is shutting down.
    ///
    /// Override this to perform cleanup operations.
    fn shutdown(&mut self) {}
}

/// How a station's consumption loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StationOutcome {
    /// Observed the termination sentinel (or finished itself) and forwarded it.
    Drained,
    /// A fatal error stopped the station.
    Aborted(String),
    /// Input closed without a sentinel, or the downstream station went away.
    Disconnected,
}

/// Runs a station in a dedicated thread.
pub struct StationRunner {
    /// Handle to the spawned thread.
    handle: Option<JoinHandle<StationOutcome>>,
    /// Name of the station (cached for error reporting).
    station_name: &'static str,
}

impl StationRunner {
    /// Spawns a new station in a dedicated thread.
    ///
    /// # Arguments
    /// * `station` - The station implementation to run
    /// * `input_rx` - Channel to receive inputs from
    /// * `output_tx` - Channel to send outputs to (`None` for a terminal station)
    /// * `error_reporter` - Reporter for handling errors
    pub fn spawn<S: Station>(
        mut station: S,
        input_rx: Receiver<Flow<S::Input>>,
        output_tx: Option<Sender<Flow<S::Output>>>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let station_name = station.name();
        let parent = tracing::Span::current();

        let handle = thread::spawn(move || {
            let span = tracing::info_span!(parent: &parent, "station", name = station_name);
            let _guard = span.enter();
            Self::run_station(&mut station, input_rx, output_tx, error_reporter)
        });

        Self {
            handle: Some(handle),
            station_name,
        }
    }

    /// Main processing loop for the station.
    fn run_station<S: Station>(
        station: &mut S,
        input_rx: Receiver<Flow<S::Input>>,
        output_tx: Option<Sender<Flow<S::Output>>>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> StationOutcome {
        let station_name = station.name();

        let outcome = loop {
            let input = match input_rx.recv() {
                Ok(Flow::Item(input)) => input,
                Ok(Flow::End) => {
                    tracing::debug!("termination sentinel received");
                    break StationOutcome::Drained;
                }
                Err(_) => {
                    // Upstream went away without a sentinel: treat as connection loss
                    tracing::debug!("input closed without sentinel");
                    break StationOutcome::Disconnected;
                }
            };

            match station.process(input) {
                Ok(outputs) => {
                    if let Some(tx) = &output_tx
                        && outputs
                            .into_iter()
                            .any(|output| tx.send(Flow::Item(output)).is_err())
                    {
                        // Output channel closed, downstream is gone
                        station.shutdown();
                        return StationOutcome::Disconnected;
                    }
                }
                Err(StationError::Recoverable(msg)) => {
                    // Report but continue processing
                    error_reporter.report(station_name, &StationError::Recoverable(msg));
                }
                Err(StationError::Fatal(msg)) => {
                    // Report and shutdown
                    error_reporter.report(station_name, &StationError::Fatal(msg.clone()));
                    break StationOutcome::Aborted(msg);
                }
            }

            if station.is_finished() {
                break StationOutcome::Drained;
            }
        };

        // Propagate the sentinel so downstream drains in pipeline order
        if let Some(tx) = &output_tx
            && tx.send(Flow::End).is_err()
        {
            tracing::debug!("downstream already closed, sentinel not delivered");
        }

        // Cleanup on shutdown
        station.shutdown();
        outcome
    }

    /// Returns true once the station thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> Result<StationOutcome, String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name))
        } else {
            Ok(StationOutcome::Drained)
        }
    }

    /// Returns the name of the station.
    pub fn name(&self) -> &'static str {
        self.station_name
    }
}
