use crate::compression::DeflateContext;
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, OpCode, Role};
use bytes::{Buf, BytesMut};
use std::sync::{Arc, Mutex};

/// Incremental frame parser.
///
/// Bytes are pushed in whatever chunks the transport produces; complete
/// frames come out with payloads unmasked, inflated and validated. The
/// parser keeps everything it could not consume yet in an internal buffer
/// and resumes exactly where it stopped on the next push.
///
/// Header-level violations are reported as soon as the header bytes are
/// buffered, without waiting for the payload to arrive.
pub struct Parser {
    role: Role,
    compression: Option<Arc<Mutex<DeflateContext>>>,
    // The RSV bits the negotiated extension claims; zero without one.
    compression_rsv: u8,
    frame_size_limit: usize,
    message_size_limit: usize,
    text_only: bool,
    validate_utf8: bool,
    buffer: BytesMut,
    // Fragmentation state of the in-progress data message, if any.
    message_opcode: Option<OpCode>,
    message_length: usize,
    message_compressed: bool,
    utf8: Utf8Validator,
}

impl Parser {
    pub fn new(
        role: Role,
        config: &WebSocketConfig,
        compression: Option<Arc<Mutex<DeflateContext>>>,
    ) -> Self {
        let compression_rsv = compression
            .as_ref()
            .map(|context| {
                context
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .rsv()
            })
            .unwrap_or(0);
        Self {
            role,
            compression,
            compression_rsv,
            frame_size_limit: config.frame_size_limit,
            message_size_limit: config.message_size_limit,
            text_only: config.text_only,
            validate_utf8: config.validate_utf8,
            buffer: BytesMut::with_capacity(8192),
            message_opcode: None,
            message_length: 0,
            message_compressed: false,
            utf8: Utf8Validator::default(),
        }
    }

    /// Consumes one chunk from the transport and returns every frame that
    /// completed. Any error is fatal for the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>, Error> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// True while a fragmented message is waiting for its continuation.
    pub fn mid_message(&self) -> bool {
        self.message_opcode.is_some()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let final_fragment = (self.buffer[0] & 0b10000000) != 0;
        let rsv = (self.buffer[0] >> 4) & 0b0111;
        let opcode = OpCode::from(self.buffer[0] & 0b00001111)?;
        let masked = (self.buffer[1] & 0b10000000) != 0;
        let length7 = (self.buffer[1] & 0b01111111) as usize;

        // Only the initial frame of a data message may carry the negotiated
        // compression bit; control and continuation frames keep RSV clear.
        let allowed_rsv = if opcode.is_data() { self.compression_rsv } else { 0 };
        if rsv & !allowed_rsv != 0 {
            return Err(Error::RSVNotZero);
        }

        if opcode.is_control() {
            if !final_fragment {
                return Err(Error::ControlFramesFragmented);
            }
            if length7 > 125 {
                return Err(Error::ControlFramePayloadSize);
            }
        }

        let (header_length, length) = match length7 {
            126 => {
                if self.buffer.len() < 4 {
                    return Ok(None);
                }
                let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
                (4, length)
            }
            127 => {
                if self.buffer.len() < 10 {
                    return Ok(None);
                }
                if self.buffer[2] & 0b10000000 != 0 {
                    return Err(Error::FrameLengthOverflow);
                }
                let mut be_bytes = [0u8; 8];
                be_bytes.copy_from_slice(&self.buffer[2..10]);
                (10, u64::from_be_bytes(be_bytes) as usize)
            }
            literal => (2, literal),
        };

        if length > self.frame_size_limit {
            return Err(Error::MaxFrameSize);
        }

        // Clients must send masked frames, servers unmasked ones; receiving
        // our own masking mode back means the peer has the roles confused.
        // Empty payloads are exempt since there is nothing to unmask.
        if length > 0 && masked == self.role.masks_output() {
            return Err(Error::PayloadMask);
        }

        let mask_length = if masked { 4 } else { 0 };
        if self.buffer.len() < header_length + mask_length + length {
            return Ok(None);
        }

        self.buffer.advance(header_length);
        let mask = if masked {
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&self.buffer[..4]);
            self.buffer.advance(4);
            Some(mask)
        } else {
            None
        };

        let mut payload = self.buffer.split_to(length).to_vec();
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        if opcode.is_control() {
            return Ok(Some(Frame::control(opcode, payload)));
        }

        self.data_frame(opcode, final_fragment, rsv & self.compression_rsv != 0, payload)
            .map(Some)
    }

    fn data_frame(
        &mut self,
        opcode: OpCode,
        final_fragment: bool,
        compressed: bool,
        mut payload: Vec<u8>,
    ) -> Result<Frame, Error> {
        if self.text_only && opcode == OpCode::Binary {
            return Err(Error::UnexpectedBinaryFrame);
        }

        let message_kind = match opcode {
            OpCode::Continue => self
                .message_opcode
                .ok_or(Error::InvalidContinuationFrame)?,
            _ => {
                if self.message_opcode.is_some() {
                    // A fresh data frame may not preempt an unfinished
                    // fragmented message.
                    if final_fragment {
                        return Err(Error::InvalidFrameFragmentation);
                    }
                    return Err(Error::FragmentedInProgress);
                }
                self.message_compressed = compressed;
                opcode
            }
        };

        // The aggregate limit counts wire bytes so that a high-ratio
        // compressed message cannot blow past it before inflation.
        self.message_length += payload.len();
        if self.message_length > self.message_size_limit {
            return Err(Error::MaxMessageSize);
        }

        if self.message_compressed {
            let context = self
                .compression
                .as_ref()
                .ok_or(Error::RSVNotZero)?
                .clone();
            payload = context
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .decompress(&payload, final_fragment)?;
        }

        if message_kind == OpCode::Text && self.validate_utf8
            && !self.utf8.push(&payload, final_fragment)
        {
            return Err(Error::InvalidTextData);
        }

        if final_fragment {
            self.message_opcode = None;
            self.message_length = 0;
            self.message_compressed = false;
        } else if self.message_opcode.is_none() {
            self.message_opcode = Some(opcode);
        }

        Ok(Frame::data(opcode, payload, final_fragment))
    }
}

/// Streaming UTF-8 validation that tolerates multi-byte sequences split
/// across fragment boundaries by carrying the incomplete tail (at most
/// three bytes) into the next fragment.
#[derive(Default)]
struct Utf8Validator {
    pending: Vec<u8>,
}

impl Utf8Validator {
    fn push(&mut self, data: &[u8], is_final: bool) -> bool {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(data);

        match std::str::from_utf8(&input) {
            Ok(_) => true,
            Err(error) => {
                if error.error_len().is_some() {
                    // A sequence that is wrong, not merely truncated.
                    return false;
                }
                if is_final {
                    return false;
                }
                self.pending = input[error.valid_up_to()..].to_vec();
                true
            }
        }
    }
}
