//! Wire framing for the serial link
//!
//! Every message between the host and the microcontroller travels as one
//! frame:
//!
//! ```text
//! +------+-----+-----+-----------------+----------+------+
//! | STX  | TAG | LEN | PAYLOAD (LEN B) | CHECKSUM | ETX  |
//! | 0x02 | u8  | u8  | UTF-8 text      | u8       | 0x03 |
//! +------+-----+-----+-----------------+----------+------+
//! ```
//!
//! The checksum is the XOR of TAG, LEN and every payload byte.
//!
//! Between STX and ETX the bytes STX, ETX and DLE never appear bare: each is
//! sent as DLE followed by the byte XOR 0x20 (the SLIP escaping scheme with
//! different marker bytes). A bare STX therefore always starts a frame and a
//! bare ETX always ends one.
//!
//! [`FrameParser`] decodes an unbounded, possibly fragmented byte stream.
//! Corrupt frames are dropped silently. Whatever a corrupt header announced,
//! the next STX restarts decoding, so a valid frame right after line noise
//! is decoded as soon as its own ETX arrives.

use crate::error::FrameError;
use std::collections::VecDeque;

/// Start-of-frame marker
pub const STX: u8 = 0x02;

/// End-of-frame marker
pub const ETX: u8 = 0x03;

/// Escape marker for STX, ETX and DLE inside a frame
pub const DLE: u8 = 0x10;

/// XORed into an escaped byte
const ESCAPE_MASK: u8 = 0x20;

/// Largest payload a single frame can carry
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Header bytes before the payload (STX, TAG, LEN)
const HEADER_LEN: usize = 3;

/// Kind of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// The device sensed motion or sound near it
    ActivityDetected,
    /// The device executed a command
    Acknowledge,
    /// The device rejected a command
    Error,
    /// A command for the device to execute
    Command,
}

impl PacketType {
    /// Wire tag for this packet type
    pub fn tag(self) -> u8 {
        match self {
            PacketType::ActivityDetected => b'A',
            PacketType::Acknowledge => b'K',
            PacketType::Error => b'E',
            PacketType::Command => b'C',
        }
    }

    /// Look up a packet type by its wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'A' => Some(PacketType::ActivityDetected),
            b'K' => Some(PacketType::Acknowledge),
            b'E' => Some(PacketType::Error),
            b'C' => Some(PacketType::Command),
            _ => None,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::ActivityDetected => write!(f, "ActivityDetected"),
            PacketType::Acknowledge => write!(f, "Acknowledge"),
            PacketType::Error => write!(f, "Error"),
            PacketType::Command => write!(f, "Command"),
        }
    }
}

/// A decoded application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub payload: String,
}

impl Packet {
    pub fn new(packet_type: PacketType, payload: impl Into<String>) -> Self {
        Self {
            packet_type,
            payload: payload.into(),
        }
    }

    /// Encode this packet into a wire frame
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.packet_type, &self.payload)
    }
}

/// Encode a payload into a complete wire frame
pub fn encode(packet_type: PacketType, payload: &str) -> Result<Vec<u8>, FrameError> {
    let body = payload.as_bytes();
    if body.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(body.len()));
    }
    Ok(encode_raw(packet_type.tag(), body))
}

/// Frame and escape a tag and body; `body` must fit in a LEN byte
fn encode_raw(tag: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len() as u8;
    let sum = checksum(tag, len, body);

    let mut frame = Vec::with_capacity(2 * (HEADER_LEN + body.len()) + 2);
    frame.push(STX);
    for &byte in [tag, len].iter().chain(body).chain([sum].iter()) {
        if matches!(byte, STX | ETX | DLE) {
            frame.push(DLE);
            frame.push(byte ^ ESCAPE_MASK);
        } else {
            frame.push(byte);
        }
    }
    frame.push(ETX);
    frame
}

fn checksum(tag: u8, len: u8, body: &[u8]) -> u8 {
    body.iter().fold(tag ^ len, |acc, b| acc ^ b)
}


/// Where the parser is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Scanning for STX
    Idle,
    /// Reading TAG and LEN
    AccumulatingHeader,
    /// Reading LEN payload bytes
    AccumulatingBody,
    /// Reading CHECKSUM and ETX
    AwaitingTerminator,
}

/// Incremental frame decoder
///
/// Owns all partial-frame state. Not shared: one parser per connection,
/// driven only by the connection's read task.
#[derive(Debug)]
pub struct FrameParser {
    /// Bytes received but not yet examined
    pending: VecDeque<u8>,
    /// Unescaped bytes of the frame in progress, starting with STX
    frame: Vec<u8>,
    state: ParserState,
    /// Payload length announced by the current header
    body_len: usize,
    /// The previous byte was DLE
    escaped: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            frame: Vec::with_capacity(HEADER_LEN + MAX_PAYLOAD + 1),
            state: ParserState::Idle,
            body_len: 0,
            escaped: false,
        }
    }

    /// Queue bytes from the transport and return the packets they complete.
    ///
    /// Decoding is lazy: packets are produced as the iterator is advanced.
    /// Bytes left unexamined when the iterator is dropped stay queued and
    /// are decoded by the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Packets<'_> {
        self.pending.extend(bytes);
        Packets { parser: self }
    }

    /// Current position within a frame
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Number of bytes held that have not yet formed a packet
    pub fn buffered(&self) -> usize {
        self.pending.len() + self.frame.len()
    }

    /// Drop all buffered bytes and return to scanning for STX
    pub fn reset(&mut self) {
        self.pending.clear();
        self.clear_frame();
    }

    fn clear_frame(&mut self) {
        self.frame.clear();
        self.state = ParserState::Idle;
        self.body_len = 0;
        self.escaped = false;
    }

    /// Decode the next packet from queued bytes, if one completes
    fn next_packet(&mut self) -> Option<Packet> {
        while let Some(byte) = self.pending.pop_front() {
            if let Some(packet) = self.step(byte) {
                return Some(packet);
            }
        }
        None
    }

    fn step(&mut self, byte: u8) -> Option<Packet> {
        if byte == STX {
            if self.state != ParserState::Idle {
                self.drop_frame("restarted before ETX");
            }
            self.frame.push(STX);
            self.state = ParserState::AccumulatingHeader;
            return None;
        }

        if self.state == ParserState::Idle {
            tracing::trace!("Skipping stray byte 0x{:02X}", byte);
            return None;
        }

        if byte == ETX {
            if self.escaped {
                self.drop_frame("escaped ETX");
                return None;
            }
            return self.finish_frame();
        }

        if self.escaped {
            self.escaped = false;
            let unescaped = byte ^ ESCAPE_MASK;
            if !matches!(unescaped, STX | ETX | DLE) {
                self.drop_frame("invalid escape");
                return None;
            }
            self.accept(unescaped);
        } else if byte == DLE {
            self.escaped = true;
        } else {
            self.accept(byte);
        }
        None
    }

    /// Append one unescaped byte to the frame in progress
    fn accept(&mut self, byte: u8) {
        self.frame.push(byte);
        match self.state {
            ParserState::Idle => {}
            ParserState::AccumulatingHeader => {
                if self.frame.len() == 2 {
                    if PacketType::from_tag(byte).is_none() {
                        self.drop_frame("unknown type tag");
                    }
                } else {
                    self.body_len = byte as usize;
                    self.state = if self.body_len == 0 {
                        ParserState::AwaitingTerminator
                    } else {
                        ParserState::AccumulatingBody
                    };
                }
            }
            ParserState::AccumulatingBody => {
                if self.frame.len() == HEADER_LEN + self.body_len {
                    self.state = ParserState::AwaitingTerminator;
                }
            }
            ParserState::AwaitingTerminator => {
                // Only the checksum may follow the payload
                if self.frame.len() > HEADER_LEN + self.body_len + 1 {
                    self.drop_frame("longer than announced");
                }
            }
        }
    }

    /// Validate the frame in progress on its ETX
    fn finish_frame(&mut self) -> Option<Packet> {
        let end = HEADER_LEN + self.body_len;
        if self.state != ParserState::AwaitingTerminator || self.frame.len() != end + 1 {
            self.drop_frame("shorter than announced");
            return None;
        }

        let tag = self.frame[1];
        let len = self.frame[2];
        let body = &self.frame[HEADER_LEN..end];
        if self.frame[end] != checksum(tag, len, body) {
            self.drop_frame("checksum mismatch");
            return None;
        }

        let Some(packet_type) = PacketType::from_tag(tag) else {
            self.drop_frame("unknown type tag");
            return None;
        };

        let payload = match std::str::from_utf8(body) {
            Ok(text) => text.to_string(),
            Err(_) => {
                self.drop_frame("payload is not UTF-8");
                return None;
            }
        };

        self.clear_frame();
        tracing::trace!("Decoded {} frame ({} bytes)", packet_type, payload.len());
        Some(Packet::new(packet_type, payload))
    }

    /// Abandon the frame in progress and scan for the next STX
    fn drop_frame(&mut self, reason: &str) {
        tracing::debug!(
            "Dropping malformed frame ({}), {} bytes discarded",
            reason,
            self.frame.len()
        );
        self.clear_frame();
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of packets decoded from queued bytes
pub struct Packets<'a> {
    parser: &'a mut FrameParser,
}

impl Iterator for Packets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        self.parser.next_packet()
    }
}
