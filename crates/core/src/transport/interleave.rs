//! Reassembly of RTSP interleaved binary frames (RFC 2326 §10.12).
//!
//! When media rides the RTSP TCP connection, every packet is wrapped in a
//! 4-byte header:
//!
//! ```text
//!  0        1          2        3
//! +--------+----------+-----------------+----------------------+
//! |  0x24  | channel  |  length (u16 BE) |  payload (length B)  |
//! +--------+----------+-----------------+----------------------+
//! ```
//!
//! TCP delivers those frames in arbitrary chunks, so [`InterleaveFramer`]
//! keeps the trailing incomplete frame between calls and classifies every
//! byte it is given as either part of a [`FrameEvent::Data`] frame or a
//! [`FrameEvent::Skip`] span.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// Leading byte of every interleaved frame (`$`).
pub const MARKER: u8 = 0x24;

/// Size of the interleaved frame header.
pub const HEADER_LEN: usize = 4;

/// Why a span of bytes was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Bytes preceding a frame marker.
    Garbage,
    /// A marker whose length field was zero, up to the next marker.
    InvalidLength,
}

/// Output of the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete frame, header included.
    Data(Bytes),
    /// Bytes that are not part of any frame.
    Skip { reason: SkipReason, bytes: Bytes },
}

/// Stateful interleaved-frame reassembler.
///
/// Chunks are queued by [`append`](Self::append) and processed strictly in
/// append order by [`drain`](Self::drain); [`feed`](Self::feed) does both.
/// `&mut self` serializes passes: only one reassembly pass can run at a time.
#[derive(Debug, Default)]
pub struct InterleaveFramer {
    queue: VecDeque<Bytes>,
    pending: BytesMut,
}

impl InterleaveFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk for the next [`drain`](Self::drain). Empty chunks are ignored.
    pub fn append(&mut self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.queue.push_back(Bytes::copy_from_slice(chunk));
        }
    }

    /// Process every queued chunk and return the events in stream order.
    pub fn drain(&mut self) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        while let Some(chunk) = self.queue.pop_front() {
            self.pending.extend_from_slice(&chunk);
            self.scan(&mut events);
        }
        events
    }

    /// Append one chunk and drain.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<FrameEvent> {
        self.append(chunk);
        self.drain()
    }

    /// Bytes held back as an incomplete trailing frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop the incomplete tail and anything queued.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    /// Extract frames from `pending` until it is empty or holds only an
    /// incomplete frame starting at a marker.
    fn scan(&mut self, events: &mut Vec<FrameEvent>) {
        loop {
            if self.pending.is_empty() {
                return;
            }

            let Some(start) = self.pending.iter().position(|&b| b == MARKER) else {
                let bytes = self.pending.split().freeze();
                tracing::trace!(len = bytes.len(), "no frame marker, skipping");
                events.push(FrameEvent::Skip {
                    reason: SkipReason::Garbage,
                    bytes,
                });
                return;
            };

            if start > 0 {
                let bytes = self.pending.split_to(start).freeze();
                tracing::trace!(len = bytes.len(), "garbage before frame marker");
                events.push(FrameEvent::Skip {
                    reason: SkipReason::Garbage,
                    bytes,
                });
            }

            if self.pending.len() < HEADER_LEN {
                // Header split across reads; wait for the rest.
                return;
            }

            let length = u16::from_be_bytes([self.pending[2], self.pending[3]]) as usize;
            if length == 0 {
                let next = self.pending[1..]
                    .iter()
                    .position(|&b| b == MARKER)
                    .map(|p| p + 1)
                    .unwrap_or(self.pending.len());
                let bytes = self.pending.split_to(next).freeze();
                tracing::trace!(len = bytes.len(), "zero frame length, resyncing");
                events.push(FrameEvent::Skip {
                    reason: SkipReason::InvalidLength,
                    bytes,
                });
                continue;
            }

            let total = HEADER_LEN + length;
            if total > self.pending.len() {
                return;
            }

            events.push(FrameEvent::Data(self.pending.split_to(total).freeze()));
        }
    }
}

/// Wrap `payload` in an interleaved frame header for `channel`.
///
/// Returns `None` when the payload does not fit the 16-bit length field.
pub fn encode_frame(channel: u8, payload: &[u8]) -> Option<Bytes> {
    let length = u16::try_from(payload.len()).ok()?;
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&[MARKER, channel]);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    Some(frame.freeze())
}

/// Channel number and payload of a complete frame.
pub fn split_frame(frame: &Bytes) -> Option<(u8, Bytes)> {
    if frame.len() < HEADER_LEN || frame[0] != MARKER {
        return None;
    }
    let mut payload = frame.clone();
    let channel = payload[1];
    payload.advance(HEADER_LEN);
    Some((channel, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(channel: u8, payload: &[u8]) -> Vec<u8> {
        encode_frame(channel, payload).unwrap().to_vec()
    }

    fn data_frames(events: &[FrameEvent]) -> Vec<Vec<u8>> {
        events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Data(b) => Some(b.to_vec()),
                FrameEvent::Skip { .. } => None,
            })
            .collect()
    }

    fn skipped(events: &[FrameEvent]) -> Vec<(SkipReason, Vec<u8>)> {
        events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Skip { reason, bytes } => Some((*reason, bytes.to_vec())),
                FrameEvent::Data(_) => None,
            })
            .collect()
    }

    #[test]
    fn single_complete_frame() {
        let mut framer = InterleaveFramer::new();
        let f = frame(0, b"hello");
        let events = framer.feed(&f);
        assert_eq!(events, vec![FrameEvent::Data(Bytes::from(f))]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let mut framer = InterleaveFramer::new();
        let mut stream = frame(0, b"abc");
        stream.extend(frame(1, b"defg"));
        stream.extend(frame(2, &[9; 300]));

        let events = framer.feed(&stream);
        assert_eq!(
            data_frames(&events),
            vec![frame(0, b"abc"), frame(1, b"defg"), frame(2, &[9; 300])]
        );
    }

    #[test]
    fn frame_split_across_chunks_is_reassembled() {
        let mut framer = InterleaveFramer::new();
        let f = frame(3, &[7; 100]);

        assert!(framer.feed(&f[..40]).is_empty());
        assert_eq!(framer.pending_len(), 40);
        let events = framer.feed(&f[40..]);
        assert_eq!(data_frames(&events), vec![f]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn header_split_across_chunks() {
        let mut framer = InterleaveFramer::new();
        let f = frame(0, b"xyz");
        assert!(framer.feed(&f[..2]).is_empty());
        assert_eq!(data_frames(&framer.feed(&f[2..])), vec![f]);
    }

    #[test]
    fn any_split_yields_same_frames() {
        let mut stream = Vec::new();
        for i in 0..20u8 {
            stream.extend(frame(i % 4, &vec![i; 10 + i as usize * 7]));
        }
        let mut whole = InterleaveFramer::new();
        let expected = data_frames(&whole.feed(&stream));
        assert_eq!(expected.len(), 20);

        for chunk_size in [1, 2, 3, 5, 17, 64, 255] {
            let mut framer = InterleaveFramer::new();
            for chunk in stream.chunks(chunk_size) {
                framer.append(chunk);
            }
            let events = framer.drain();
            assert!(skipped(&events).is_empty(), "chunk size {chunk_size}");
            assert_eq!(data_frames(&events), expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn leading_garbage_is_skipped_once() {
        let mut framer = InterleaveFramer::new();
        let mut stream = b"junk".to_vec();
        let f = frame(0, b"payload");
        stream.extend(&f);

        let events = framer.feed(&stream);
        assert_eq!(skipped(&events), vec![(SkipReason::Garbage, b"junk".to_vec())]);
        assert_eq!(data_frames(&events), vec![f]);
    }

    #[test]
    fn chunk_without_marker_is_skipped() {
        let mut framer = InterleaveFramer::new();
        let events = framer.feed(b"no marker here");
        assert_eq!(
            skipped(&events),
            vec![(SkipReason::Garbage, b"no marker here".to_vec())]
        );
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn zero_length_resyncs_to_next_marker() {
        let mut framer = InterleaveFramer::new();
        let mut stream = vec![MARKER, 0, 0, 0, 0xAA, 0xBB];
        let f = frame(1, b"ok");
        stream.extend(&f);

        let events = framer.feed(&stream);
        assert_eq!(
            skipped(&events),
            vec![(SkipReason::InvalidLength, vec![MARKER, 0, 0, 0, 0xAA, 0xBB])]
        );
        assert_eq!(data_frames(&events), vec![f]);
    }

    #[test]
    fn zero_length_without_next_marker_skips_everything() {
        let mut framer = InterleaveFramer::new();
        let events = framer.feed(&[MARKER, 0, 0, 0, 1, 2, 3]);
        assert_eq!(events.len(), 1);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn persistent_garbage_does_not_grow_state() {
        let mut framer = InterleaveFramer::new();
        for _ in 0..1000 {
            framer.feed(&[1, 2, 3, MARKER, 0, 0, 0, 4, 5]);
        }
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn every_byte_is_accounted_for() {
        let mut stream = b"xx".to_vec();
        stream.extend(frame(0, b"abcd"));
        stream.extend([MARKER, 5, 0, 0]);
        stream.extend(b"garbage");
        stream.extend(frame(2, &[1; 50]));

        let mut framer = InterleaveFramer::new();
        let mut total = 0;
        for chunk in stream.chunks(7) {
            for event in framer.feed(chunk) {
                total += match event {
                    FrameEvent::Data(b) => b.len(),
                    FrameEvent::Skip { bytes, .. } => bytes.len(),
                };
            }
        }
        assert_eq!(total + framer.pending_len(), stream.len());
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn split_frame_returns_channel_and_payload() {
        let f = encode_frame(2, b"rtp").unwrap();
        let (channel, payload) = split_frame(&f).unwrap();
        assert_eq!(channel, 2);
        assert_eq!(&payload[..], b"rtp");
        assert!(split_frame(&Bytes::from_static(b"$\x00")).is_none());
    }

    #[test]
    fn oversized_payload_is_not_encoded() {
        assert!(encode_frame(0, &vec![0; 70_000]).is_none());
    }
}
