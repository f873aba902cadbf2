//! Length-prefix frame codec.
//!
//! Wire format:
//! ```text
//! ┌─────────────┬──────────────┬────────────────────┐
//! │ Type (1B)   │ Length (2B)  │ Payload (N bytes)  │
//! │ u8          │ LE u16       │                    │
//! └─────────────┴──────────────┴────────────────────┘
//! ```
//!
//! `Type` 1 carries API request/response payloads. The decoder is fed one
//! byte at a time straight off the serial poll loop; the dispatcher owns the
//! inter-byte timeout and resets the decoder on truncation.

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 256;

/// Frame type for API request/response payloads.
pub const API_MESSAGE: u8 = 1;

/// Frame type for test-harness payloads (reserved; only emitted by test
/// builds of client tooling).
pub const TEST_MESSAGE: u8 = 2;

// ── Decoder ──────────────────────────────────────────────────

enum DecoderState {
    ReadingType,
    ReadingLength { collected: usize },
    ReadingPayload { expected: usize, collected: usize },
    Complete,
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    message_type: u8,
    length_buf: [u8; 2],
    payload_buf: [u8; MAX_FRAME_SIZE],
    payload_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingType,
            message_type: 0,
            length_buf: [0; 2],
            payload_buf: [0; MAX_FRAME_SIZE],
            payload_len: 0,
        }
    }

    /// Feed one byte. Returns `true` when a complete frame is buffered;
    /// read it through [`message_type`](Self::message_type) and
    /// [`payload`](Self::payload), then call [`reset`](Self::reset).
    ///
    /// A declared length beyond [`MAX_FRAME_SIZE`] discards the frame and
    /// restarts header hunting — a desync costs at most one frame.
    pub fn feed(&mut self, byte: u8) -> bool {
        match &mut self.state {
            DecoderState::ReadingType => {
                self.message_type = byte;
                self.state = DecoderState::ReadingLength { collected: 0 };
                false
            }
            DecoderState::ReadingLength { collected } => {
                self.length_buf[*collected] = byte;
                *collected += 1;
                if *collected == 2 {
                    let expected = u16::from_le_bytes(self.length_buf) as usize;
                    if expected > MAX_FRAME_SIZE {
                        self.state = DecoderState::ReadingType;
                    } else if expected == 0 {
                        self.payload_len = 0;
                        self.state = DecoderState::Complete;
                        return true;
                    } else {
                        self.state = DecoderState::ReadingPayload {
                            expected,
                            collected: 0,
                        };
                    }
                }
                false
            }
            DecoderState::ReadingPayload {
                expected,
                collected,
            } => {
                self.payload_buf[*collected] = byte;
                *collected += 1;
                if *collected == *expected {
                    self.payload_len = *expected;
                    self.state = DecoderState::Complete;
                    return true;
                }
                false
            }
            DecoderState::Complete => false,
        }
    }

    pub const fn message_type(&self) -> u8 {
        self.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload_buf[..self.payload_len]
    }

    /// A frame header or partial payload is pending.
    pub const fn is_partial(&self) -> bool {
        matches!(
            self.state,
            DecoderState::ReadingLength { .. } | DecoderState::ReadingPayload { .. }
        )
    }

    /// Drop any partial state and hunt for the next frame header.
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingType;
        self.payload_len = 0;
    }
}

// ── Encoder ──────────────────────────────────────────────────

/// Write `[type][LE-u16 length][payload]` into `out`.
/// Returns the total number of bytes written.
pub fn encode_frame(message_type: u8, payload: &[u8], out: &mut [u8]) -> Option<usize> {
    let wire_len = 3 + payload.len();
    if payload.len() > MAX_FRAME_SIZE || wire_len > out.len() {
        return None;
    }
    out[0] = message_type;
    out[1..3].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    out[3..wire_len].copy_from_slice(payload);
    Some(wire_len)
}

// ── Tests ────────────────────────────────────────────────────
