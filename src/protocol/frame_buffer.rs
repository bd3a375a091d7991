//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Before anything is decoded,
//! the markers at the front of the buffer are walked to find where the first
//! value ends:
//! - complete value: decode exactly those bytes and yield a [`Frame`]
//! - truncated value: remember how far the walk got and wait for more data
//! - corrupt bytes: drop them up to the next probable envelope start
//!
//! The walk resumes where it stopped, so a large frame arriving in many
//! reads is scanned once and decoded once.
//!
//! # Example
//!
//! ```
//! use vimwire::codec::Envelope;
//! use vimwire::protocol::FrameBuffer;
//!
//! let bytes = Envelope::notification("redraw", vec![]).encode().unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the child's stdout
//! assert!(buffer.push(&bytes[..3]).is_empty());
//! let frames = buffer.push(&bytes[3..]);
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::BytesMut;
use rmp::Marker;

use super::Frame;
use crate::error::ProtocolError;

/// Default ceiling for a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Envelopes are fixarrays of 3 (notification) or 4 (request, response) elements.
#[inline]
fn is_envelope_start(byte: u8) -> bool {
    byte == 0x93 || byte == 0x94
}

/// How far the size walk over the value at the front of the buffer got.
///
/// A msgpack value is a flat run of markers: every array or map header only
/// adds to the number of values still to read, so an offset and a count are
/// all it takes to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scan {
    offset: usize,
    remaining: usize,
}

impl Scan {
    const START: Scan = Scan {
        offset: 0,
        remaining: 1,
    };
}

enum Measure {
    Complete(usize),
    Incomplete,
    Invalid(String),
}

/// Big-endian length field of `width` bytes at `at`.
fn length_at(buf: &[u8], at: usize, width: usize) -> Option<usize> {
    let field = buf.get(at..at + width)?;
    Some(field.iter().fold(0usize, |n, &b| (n << 8) | b as usize))
}

/// Advance `scan` over `buf` until the first value is complete or the data
/// runs out. Nothing is allocated.
fn measure(buf: &[u8], scan: &mut Scan, max_frame_size: usize) -> Measure {
    while scan.remaining > 0 {
        let Some(&byte) = buf.get(scan.offset) else {
            return Measure::Incomplete;
        };
        let at = scan.offset + 1;

        // (length field width, payload bytes, child values)
        let sized = |width: usize, extra: usize| {
            length_at(buf, at, width).map(|len| (width, len.saturating_add(extra), 0usize))
        };
        let counted = |width: usize, per_entry: usize| {
            length_at(buf, at, width).map(|len| (width, 0, len.saturating_mul(per_entry)))
        };
        let step = match Marker::from_u8(byte) {
            Marker::Reserved => {
                return Measure::Invalid(format!("reserved marker 0x{:02x}", byte));
            }
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
                Some((0, 0, 0))
            }
            Marker::U8 | Marker::I8 => Some((0, 1, 0)),
            Marker::U16 | Marker::I16 => Some((0, 2, 0)),
            Marker::U32 | Marker::I32 | Marker::F32 => Some((0, 4, 0)),
            Marker::U64 | Marker::I64 | Marker::F64 => Some((0, 8, 0)),
            Marker::FixStr(len) => Some((0, len as usize, 0)),
            Marker::Str8 | Marker::Bin8 => sized(1, 0),
            Marker::Str16 | Marker::Bin16 => sized(2, 0),
            Marker::Str32 | Marker::Bin32 => sized(4, 0),
            Marker::FixArray(len) => Some((0, 0, len as usize)),
            Marker::Array16 => counted(2, 1),
            Marker::Array32 => counted(4, 1),
            Marker::FixMap(len) => Some((0, 0, 2 * len as usize)),
            Marker::Map16 => counted(2, 2),
            Marker::Map32 => counted(4, 2),
            // One type byte before the data.
            Marker::FixExt1 => Some((0, 2, 0)),
            Marker::FixExt2 => Some((0, 3, 0)),
            Marker::FixExt4 => Some((0, 5, 0)),
            Marker::FixExt8 => Some((0, 9, 0)),
            Marker::FixExt16 => Some((0, 17, 0)),
            Marker::Ext8 => sized(1, 1),
            Marker::Ext16 => sized(2, 1),
            Marker::Ext32 => sized(4, 1),
        };
        let Some((header, payload, children)) = step else {
            return Measure::Incomplete;
        };

        let end = at.saturating_add(header).saturating_add(payload);
        let remaining = (scan.remaining - 1).saturating_add(children);
        // Every value still to come takes at least one byte.
        if end.saturating_add(remaining) > max_frame_size {
            return Measure::Invalid(format!(
                "frame exceeds maximum of {} bytes",
                max_frame_size
            ));
        }
        if end > buf.len() {
            return Measure::Incomplete;
        }

        scan.offset = end;
        scan.remaining = remaining;
    }

    Measure::Complete(scan.offset)
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from pipe reads.
    buffer: BytesMut,
    /// Largest frame accepted; a header announcing more is treated as corrupt.
    max_frame_size: usize,
    /// Bytes discarded by resynchronization over the buffer's lifetime.
    dropped_total: usize,
    /// Progress over the frame at the front of the buffer.
    scan: Scan,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 64MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom frame size ceiling.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_size,
            dropped_total: 0,
            scan: Scan::START,
        }
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Lazily extract frames from the buffered bytes.
    ///
    /// Stopping iteration early leaves the remaining bytes buffered, the
    /// next call to `frames()` resumes at the same offset.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { buffer: self }
    }

    /// Push data into the buffer and extract every complete frame.
    ///
    /// Corrupt regions show up as `Err` items in stream order; frames after
    /// them are still returned.
    pub fn push(&mut self, data: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
        self.extend(data);
        self.frames().collect()
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Some(Ok(frame))` if a complete frame was extracted
    /// - `Some(Err(..))` if bytes were dropped to resynchronize
    /// - `None` if more data is needed
    fn try_extract_one(&mut self) -> Option<Result<Frame, ProtocolError>> {
        if self.buffer.is_empty() {
            return None;
        }

        let size = match measure(&self.buffer, &mut self.scan, self.max_frame_size) {
            Measure::Complete(size) => size,
            Measure::Incomplete => return None,
            Measure::Invalid(reason) => return Some(Err(self.resync(reason))),
        };

        let mut rd: &[u8] = &self.buffer[..size];
        match rmpv::decode::read_value(&mut rd) {
            Ok(value) => {
                let _ = self.buffer.split_to(size);
                self.scan = Scan::START;
                Some(Ok(Frame::new(value, size)))
            }
            Err(e) => Some(Err(self.resync(e.to_string()))),
        }
    }

    /// Drop the offending byte and everything up to the next envelope start.
    fn resync(&mut self, reason: String) -> ProtocolError {
        let skip = 1 + self.buffer[1..]
            .iter()
            .position(|&b| is_envelope_start(b))
            .unwrap_or(self.buffer.len() - 1);

        let _ = self.buffer.split_to(skip);
        self.dropped_total += skip;
        self.scan = Scan::START;

        tracing::warn!("Dropped {} undecodable bytes: {}", skip, reason);
        ProtocolError::Decode {
            dropped: skip,
            reason,
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes discarded while resynchronizing.
    pub fn dropped_total(&self) -> usize {
        self.dropped_total
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan = Scan::START;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over the complete frames currently buffered.
pub struct Frames<'a> {
    buffer: &'a mut FrameBuffer,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.try_extract_one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Envelope;
    use rmpv::Value;

    fn sample_stream() -> Vec<u8> {
        let mut bytes = Vec::new();
        let messages = vec![
            Envelope::request(1, "nvim_get_api_info", vec![]),
            Envelope::notification(
                "redraw",
                vec![Value::Array(vec![
                    Value::from("put"),
                    Value::Array(vec![Value::from("héllo wörld")]),
                ])],
            ),
            Envelope::response(1, None, Value::Array(vec![Value::from(3)])),
            Envelope::notification("vimwire_custom", vec![Value::Binary(vec![0; 300])]),
        ];
        for msg in messages {
            bytes.extend_from_slice(&msg.encode().unwrap());
        }
        bytes
    }

    fn values(results: Vec<Result<Frame, ProtocolError>>) -> Vec<Value> {
        results
            .into_iter()
            .map(|r| r.unwrap().into_value())
            .collect()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = Envelope::notification("redraw", vec![]).encode().unwrap();

        let frames = buffer.push(&bytes);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().size(), bytes.len());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&sample_stream());

        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.is_ok()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_chunking_invariance_all_split_points() {
        let stream = sample_stream();
        let whole = values(FrameBuffer::new().push(&stream));

        for split in 0..=stream.len() {
            let mut buffer = FrameBuffer::new();
            let mut got = values(buffer.push(&stream[..split]));
            got.extend(values(buffer.push(&stream[split..])));
            assert_eq!(got, whole, "split at {}", split);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let stream = sample_stream();
        let whole = values(FrameBuffer::new().push(&stream));

        let mut buffer = FrameBuffer::new();
        let mut got = Vec::new();
        for byte in &stream {
            got.extend(values(buffer.push(&[*byte])));
        }

        assert_eq!(got, whole);
    }

    #[test]
    fn test_uneven_chunks() {
        let stream = sample_stream();
        let whole = values(FrameBuffer::new().push(&stream));

        for chunk_size in [2, 3, 7, 64, 129] {
            let mut buffer = FrameBuffer::new();
            let mut got = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                got.extend(values(buffer.push(chunk)));
            }
            assert_eq!(got, whole, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_large_frame_in_small_reads_is_scanned_once() {
        let calls: Vec<Value> = (0..40_000)
            .map(|i| Value::Array(vec![Value::from(format!("cell{}", i % 10))]))
            .collect();
        let mut batch = vec![Value::from("put")];
        batch.extend(calls);
        let bytes = Envelope::notification("redraw", vec![Value::Array(batch)])
            .encode()
            .unwrap();
        assert!(bytes.len() > 200_000);

        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        let mut last_offset = 0;
        for chunk in bytes.chunks(8 * 1024) {
            frames.extend(buffer.push(chunk));
            if frames.is_empty() {
                // The walk picks up where it stopped and keeps up with the data.
                assert!(buffer.scan.offset >= last_offset);
                assert!(buffer.len() - buffer.scan.offset < 64);
                last_offset = buffer.scan.offset;
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().size(), bytes.len());
        assert_eq!(buffer.scan, Scan::START);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let bytes = Envelope::notification("redraw", vec![]).encode().unwrap();
        let mut buffer = FrameBuffer::new();

        assert!(buffer.push(&bytes[..bytes.len() - 1]).is_empty());
        assert_eq!(buffer.len(), bytes.len() - 1);

        let frames = buffer.push(&bytes[bytes.len() - 1..]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_frames_iterator_is_restartable() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&sample_stream());

        let first: Vec<_> = buffer.frames().take(1).collect();
        assert_eq!(first.len(), 1);

        let rest: Vec<_> = buffer.frames().collect();
        assert_eq!(rest.len(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_garbage_is_dropped_and_stream_recovers() {
        let good = Envelope::notification("redraw", vec![]).encode().unwrap();
        let mut data = vec![0xc1, 0xc1];
        data.extend_from_slice(&good);

        let mut buffer = FrameBuffer::new();
        let results = buffer.push(&data);

        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(ProtocolError::Decode { dropped, .. }) => assert_eq!(*dropped, 2),
            other => panic!("expected decode error, got {:?}", other),
        }
        assert!(results[1].is_ok());
        assert_eq!(buffer.dropped_total(), 2);
    }

    #[test]
    fn test_garbage_without_resync_point_is_fully_dropped() {
        let mut buffer = FrameBuffer::new();
        let results = buffer.push(&[0xc1, 0x01, 0x02]);

        assert!(matches!(
            results[0],
            Err(ProtocolError::Decode { dropped: 3, .. })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_incomplete_frame_is_dropped() {
        let mut buffer = FrameBuffer::with_max_frame_size(16);
        // str32 header announcing 1MB, followed by too little data
        let mut data = vec![0xdb, 0x00, 0x10, 0x00, 0x00];
        data.extend_from_slice(&[b'a'; 20]);

        let results = buffer.push(&data);

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ProtocolError::Decode { .. })));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_resets_buffer() {
        let bytes = Envelope::notification("redraw", vec![]).encode().unwrap();
        let mut buffer = FrameBuffer::new();
        buffer.push(&bytes[..2]);
        assert!(!buffer.is_empty());

        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.push(&bytes).len(), 1);
    }
}
