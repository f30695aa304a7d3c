// src/io/serial/framer.rs
//
// Sentinel framing for the accelerometer stream.
//
// The device emits one record per frame:
//
//     <2-byte prefix><x1>,<y1>,<z1>,<x2>,<y2>,<z2>E
//
// Bytes accumulate in a partial line until the terminator arrives. The prefix
// is then dropped and the remainder split on the separator. The terminator is
// never stored, so a terminator inside a field simply ends the frame early;
// the device never sends one there.

use crate::samples::{Record, FIELD_COUNT};

// =============================================================================
// Types
// =============================================================================

/// Byte-level framing parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    /// Byte that ends a frame
    pub terminator: u8,
    /// Byte between fields
    pub separator: u8,
    /// Number of leading bytes dropped from every frame
    pub prefix_len: usize,
    /// Fields a well-formed frame splits into
    pub field_count: usize,
    /// Partial lines longer than this are discarded without waiting for a terminator
    pub max_length: usize,
}

impl Default for FrameFormat {
    fn default() -> Self {
        FrameFormat {
            terminator: b'E',
            separator: b',',
            prefix_len: 2,
            field_count: FIELD_COUNT,
            max_length: 256,
        }
    }
}

/// Why a frame could not become a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// Frame ended before the prefix was complete
    MissingPrefix,
    /// Payload split into the wrong number of fields
    FieldCount { expected: usize, actual: usize },
    /// No terminator within `max_length` bytes
    Overlong,
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::MissingPrefix => write!(f, "frame shorter than its prefix"),
            MalformedReason::FieldCount { expected, actual } => {
                write!(f, "expected {} fields, got {}", expected, actual)
            }
            MalformedReason::Overlong => write!(f, "no terminator before max frame length"),
        }
    }
}

/// One completed frame
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    Record(Record),
    Malformed {
        /// Raw frame bytes (terminator excluded)
        bytes: Vec<u8>,
        reason: MalformedReason,
    },
}

// =============================================================================
// Framer
// =============================================================================

/// Stateful framer for a byte stream that may split frames across reads.
pub struct SentinelFramer {
    format: FrameFormat,
    line: Vec<u8>,
    /// Dropping the tail of an overlong frame until the next terminator
    skipping: bool,
}

impl SentinelFramer {
    pub fn new(format: FrameFormat) -> Self {
        SentinelFramer {
            line: Vec::with_capacity(format.max_length.min(256)),
            skipping: false,
            format,
        }
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    /// Bytes of the frame currently being assembled
    pub fn pending(&self) -> &[u8] {
        &self.line
    }

    /// Push one byte. Returns a frame when `byte` completes one.
    /// After an overlong frame, bytes up to the next terminator are dropped.
    pub fn push(&mut self, byte: u8) -> Option<ParsedFrame> {
        if self.skipping {
            if byte == self.format.terminator {
                self.skipping = false;
            }
            return None;
        }

        if byte == self.format.terminator {
            let frame: Vec<u8> = self.line.drain(..).collect();
            return Some(self.parse(frame));
        }

        self.line.push(byte);

        if self.line.len() > self.format.max_length {
            self.skipping = true;
            let frame: Vec<u8> = self.line.drain(..).collect();
            return Some(ParsedFrame::Malformed {
                bytes: frame,
                reason: MalformedReason::Overlong,
            });
        }

        None
    }

    /// Feed raw bytes into the framer.
    /// Returns any frames completed by them, in stream order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<ParsedFrame> {
        data.iter().filter_map(|&byte| self.push(byte)).collect()
    }

    /// Drop the unterminated partial line, returning it if non-empty.
    /// Call when the stream ends.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        self.skipping = false;
        if self.line.is_empty() {
            None
        } else {
            Some(self.line.drain(..).collect())
        }
    }

    fn parse(&self, frame: Vec<u8>) -> ParsedFrame {
        if frame.len() < self.format.prefix_len {
            return ParsedFrame::Malformed {
                bytes: frame,
                reason: MalformedReason::MissingPrefix,
            };
        }

        let fields: Vec<String> = frame[self.format.prefix_len..]
            .split(|&b| b == self.format.separator)
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();

        if fields.len() != self.format.field_count {
            return ParsedFrame::Malformed {
                reason: MalformedReason::FieldCount {
                    expected: self.format.field_count,
                    actual: fields.len(),
                },
                bytes: frame,
            };
        }

        match Record::try_from(fields) {
            Ok(record) => ParsedFrame::Record(record),
            Err(actual) => ParsedFrame::Malformed {
                bytes: frame,
                reason: MalformedReason::FieldCount {
                    expected: FIELD_COUNT,
                    actual,
                },
            },
        }
    }
}
