//! Reassembles variable-length inbound media payloads into fixed-size frames.

use crate::pipeline::error::StationError;
use crate::pipeline::router::SessionIdSlot;
use crate::pipeline::station::Station;
use crate::pipeline::types::{ControlEvent, MediaTrack, RawFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Count of inbound audio received so far, readable from any thread.
///
/// Consumers use it as the "utterance end" when correlating a finalized
/// transcript with the latest score.
#[derive(Debug, Clone)]
pub struct IngestWatermark {
    bytes: Arc<AtomicU64>,
    source_rate: u32,
    working_rate: u32,
}

impl IngestWatermark {
    pub fn new(source_rate: u32, working_rate: u32) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(0)),
            source_rate,
            working_rate,
        }
    }

    fn advance(&self, bytes: usize) {
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Inbound bytes received (one byte per source sample).
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Inbound audio received, expressed in working-rate samples.
    pub fn samples_through(&self) -> u64 {
        self.bytes() * self.working_rate as u64 / self.source_rate as u64
    }
}

/// Accumulates inbound payload bytes and slices off fixed-size frames.
///
/// This station:
/// - Publishes the session id from `SessionStart` into the single-assignment slot
/// - Appends `inbound` media payloads to a byte buffer
/// - Emits one `RawFrame` per `frame_bytes`, keeping the remainder for the next frame
/// - Finishes on `Stop`, after which the runner forwards the termination sentinel
pub struct FrameReassembler {
    frame_bytes: usize,
    buffer: Vec<u8>,
    sequence: u64,
    id_slot: SessionIdSlot,
    watermark: IngestWatermark,
    stopped: bool,
}

impl FrameReassembler {
    /// Creates a reassembler emitting frames of `frame_bytes`.
    pub fn new(frame_bytes: usize, id_slot: SessionIdSlot, watermark: IngestWatermark) -> Self {
        Self {
            frame_bytes,
            buffer: Vec::with_capacity(frame_bytes * 2),
            sequence: 0,
            id_slot,
            watermark,
            stopped: false,
        }
    }

    /// Accepts one event and returns the frames it completed, in order.
    pub fn accept(&mut self, event: ControlEvent) -> Result<Vec<RawFrame>, StationError> {
        if self.stopped {
            tracing::warn!(event = event.kind(), "event after stop ignored");
            return Ok(Vec::new());
        }

        match event {
            ControlEvent::SessionStart { id } => {
                if id.as_str().is_empty() {
                    return Err(StationError::Recoverable(
                        "session start without a session id".to_string(),
                    ));
                }
                if !self.id_slot.publish(id.clone()) {
                    tracing::warn!(session = %id, "duplicate session start ignored");
                }
                Ok(Vec::new())
            }
            ControlEvent::Media {
                track: MediaTrack::Inbound,
                payload,
            } => {
                self.watermark.advance(payload.len());
                self.buffer.extend_from_slice(&payload);
                Ok(self.drain_frames())
            }
            ControlEvent::Media { .. } | ControlEvent::Connected => Ok(Vec::new()),
            ControlEvent::SpeechStarted => {
                // Routed on the interrupt path before it reaches the media queue
                tracing::debug!("speech start on media queue ignored");
                Ok(Vec::new())
            }
            ControlEvent::Stop => {
                self.stopped = true;
                if !self.buffer.is_empty() {
                    tracing::debug!(bytes = self.buffer.len(), "partial frame left at stop");
                }
                Ok(Vec::new())
            }
        }
    }

    /// Slices every complete frame off the front of the buffer.
    fn drain_frames(&mut self) -> Vec<RawFrame> {
        let count = self.buffer.len() / self.frame_bytes;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let bytes: Vec<u8> = self.buffer.drain(..self.frame_bytes).collect();
            frames.push(RawFrame::new(bytes, self.sequence));
            self.sequence += 1;
        }
        frames
    }

    /// Bytes waiting for the next frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Station for FrameReassembler {
    type Input = ControlEvent;
    type Output = RawFrame;

    fn name(&self) -> &'static str {
        "reassembler"
    }

    fn process(&mut self, event: ControlEvent) -> Result<Vec<RawFrame>, StationError> {
        self.accept(event)
    }

    fn is_finished(&self) -> bool {
        self.stopped
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            frames = self.sequence,
            leftover_bytes = self.buffer.len(),
            "reassembler finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SessionId;

    fn reassembler(frame_bytes: usize) -> (FrameReassembler, SessionIdSlot, IngestWatermark) {
        let (slot, _rx) = SessionIdSlot::new();
        let watermark = IngestWatermark::new(8000, 16000);
        (
            FrameReassembler::new(frame_bytes, slot.clone(), watermark.clone()),
            slot,
            watermark,
        )
    }

    fn inbound(payload: Vec<u8>) -> ControlEvent {
        ControlEvent::Media {
            track: MediaTrack::Inbound,
            payload,
        }
    }

    #[test]
    fn test_small_payloads_accumulate_into_one_frame() {
        let (mut r, _, _) = reassembler(320);
        for i in 0..2u8 {
            let frames = r.accept(inbound(vec![i; 160])).unwrap();
            if i == 0 {
                assert!(frames.is_empty());
            } else {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].len(), 320);
                assert_eq!(&frames[0].bytes()[..160], &[0u8; 160][..]);
                assert_eq!(&frames[0].bytes()[160..], &[1u8; 160][..]);
            }
        }
        assert_eq!(r.pending_bytes(), 0);
    }

    #[test]
    fn test_remainder_is_kept_for_next_frame() {
        let (mut r, _, _) = reassembler(100);
        let payload: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let frames = r.accept(inbound(payload)).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(frames[1].bytes()[0], 100);
        assert_eq!(r.pending_bytes(), 50);

        let frames = r.accept(inbound(vec![0; 50])).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes()[0], 200);
        assert_eq!(frames[0].sequence, 2);
    }

    #[test]
    fn test_frame_count_matches_total_bytes() {
        let (mut r, _, _) = reassembler(3200);
        let sizes = [160usize, 17, 3000, 4000, 1, 6422, 160, 1000];
        let total: usize = sizes.iter().sum();
        assert_eq!(total % 3200, 0);

        let mut all = Vec::new();
        let mut expected = Vec::new();
        let mut next = 0u8;
        for size in sizes {
            let payload: Vec<u8> = (0..size)
                .map(|_| {
                    next = next.wrapping_add(1);
                    next
                })
                .collect();
            expected.extend_from_slice(&payload);
            all.extend(r.accept(inbound(payload)).unwrap());
        }

        assert_eq!(all.len(), total / 3200);
        assert!(all.iter().all(|f| f.len() == 3200));
        let joined: Vec<u8> = all.iter().flat_map(|f| f.bytes().to_vec()).collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn test_non_inbound_and_connected_produce_nothing() {
        let (mut r, _, watermark) = reassembler(10);
        let outbound = ControlEvent::Media {
            track: MediaTrack::Outbound,
            payload: vec![0; 100],
        };
        assert!(r.accept(outbound).unwrap().is_empty());
        assert!(r.accept(ControlEvent::Connected).unwrap().is_empty());
        assert_eq!(r.pending_bytes(), 0);
        assert_eq!(watermark.bytes(), 0);
    }

    #[test]
    fn test_session_start_publishes_id_once() {
        let (mut r, slot, _) = reassembler(10);
        r.accept(ControlEvent::SessionStart {
            id: SessionId::new("MZ1"),
        })
        .unwrap();
        r.accept(ControlEvent::SessionStart {
            id: SessionId::new("MZ2"),
        })
        .unwrap();
        assert_eq!(slot.get(), Some(SessionId::new("MZ1")));
    }

    #[test]
    fn test_empty_session_id_is_recoverable() {
        let (mut r, slot, _) = reassembler(10);
        let result = r.accept(ControlEvent::SessionStart {
            id: SessionId::new(""),
        });
        assert!(matches!(result, Err(StationError::Recoverable(_))));
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_stop_finishes_and_ignores_later_events() {
        let (mut r, _, _) = reassembler(10);
        r.accept(inbound(vec![1; 5])).unwrap();
        r.accept(ControlEvent::Stop).unwrap();
        assert!(r.is_stopped());
        assert!(Station::is_finished(&r));

        let frames = r.accept(inbound(vec![1; 20])).unwrap();
        assert!(frames.is_empty());
        assert_eq!(r.pending_bytes(), 5);
    }

    #[test]
    fn test_watermark_counts_working_rate_samples() {
        let (mut r, _, watermark) = reassembler(3200);
        r.accept(inbound(vec![128; 1000])).unwrap();
        assert_eq!(watermark.bytes(), 1000);
        assert_eq!(watermark.samples_through(), 2000);
    }
}
