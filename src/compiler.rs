use crate::compression::DeflateContext;
use crate::error::Error;
use crate::frame::{Frame, OpCode, Role};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Stateful frame builder for the outgoing direction.
///
/// The compiler owns the fragmentation bookkeeping for the send side:
/// exactly one data message may be in flight, control frames may interleave
/// freely, and misuse surfaces as a synchronous error without touching the
/// connection. Payload masking and the per-message compression latch happen
/// here so every writer goes through one place.
pub struct FrameCompiler {
    role: Role,
    compression: Option<Arc<Mutex<DeflateContext>>>,
    // The RSV bits the negotiated extension claims; zero without one.
    compression_rsv: u8,
    message_opcode: Option<OpCode>,
    compress_message: bool,
}

impl FrameCompiler {
    pub fn new(role: Role, compression: Option<Arc<Mutex<DeflateContext>>>) -> Self {
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
            message_opcode: None,
            compress_message: false,
        }
    }

    /// True while a fragmented outgoing message still awaits its final
    /// continuation frame.
    pub fn mid_message(&self) -> bool {
        self.message_opcode.is_some()
    }

    /// Turns one frame into wire bytes: header, extended length, masking
    /// key and (possibly deflated) payload.
    pub fn compile(&mut self, frame: Frame) -> Result<Vec<u8>, Error> {
        let Frame {
            opcode,
            mut payload,
            final_fragment,
        } = frame;

        let mut rsv = 0;

        if opcode.is_control() {
            if payload.len() > 125 {
                return Err(Error::ControlFramePayloadSize);
            }
        } else {
            match opcode {
                OpCode::Continue => {
                    if self.message_opcode.is_none() {
                        return Err(Error::InvalidContinuationFrame);
                    }
                }
                _ => {
                    if self.message_opcode.is_some() {
                        return Err(Error::FragmentedInProgress);
                    }
                    // Decide once per message: compress when worthwhile
                    // (or when streaming, where the total size is unknown).
                    self.compress_message = match &self.compression {
                        Some(context) => {
                            let threshold = context
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner())
                                .compression_threshold();
                            !final_fragment || payload.len() > threshold
                        }
                        None => false,
                    };
                    // The extension's RSV bit travels on the initial frame
                    // only.
                    if self.compress_message {
                        rsv = self.compression_rsv;
                    }
                }
            }

            if self.compress_message {
                let context = self.compression.as_ref().ok_or(Error::InvalidCompressedData)?;
                payload = context
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .compress(&payload, final_fragment)?;
            }

            if final_fragment {
                self.message_opcode = None;
                self.compress_message = false;
            } else if self.message_opcode.is_none() {
                self.message_opcode = Some(opcode);
            }
        }

        Ok(self.encode(final_fragment, opcode, rsv, payload))
    }

    fn encode(&self, final_fragment: bool, opcode: OpCode, rsv: u8, payload: Vec<u8>) -> Vec<u8> {
        let first_byte = (final_fragment as u8) << 7 | rsv << 4 | opcode.as_u8();

        let payload_len = payload.len();
        let mut bytes = Vec::with_capacity(payload_len + 14);
        bytes.push(first_byte);

        let mask_flag = if self.role.masks_output() { 0b1000_0000 } else { 0 };
        if payload_len <= 125 {
            bytes.push(mask_flag | payload_len as u8);
        } else if payload_len <= 65535 {
            bytes.push(mask_flag | 126);
            bytes.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            bytes.push(mask_flag | 127);
            bytes.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        if self.role.masks_output() {
            let mut rng = StdRng::from_rng(&mut rand::thread_rng());
            let mask = [
                rng.random::<u8>(),
                rng.random::<u8>(),
                rng.random::<u8>(),
                rng.random::<u8>(),
            ];
            bytes.extend_from_slice(&mask);
            bytes.extend(
                payload
                    .iter()
                    .enumerate()
                    .map(|(i, &byte)| byte ^ mask[i % 4]),
            );
        } else {
            bytes.extend_from_slice(&payload);
        }

        bytes
    }
}
