use crate::error::Error;
use crate::extensions::{self, Extensions};
use crate::frame::Role;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::io;

const DEFLATE_TRAILER: [u8; 4] = [0, 0, 255, 255];

// Messages at or below this many bytes aren't worth the deflate overhead
// and are sent uncompressed.
const COMPRESSION_THRESHOLD: usize = 32;

/// Per-connection permessage-deflate state: one deflate stream for the
/// frames we send and one inflate stream for the frames we receive.
///
/// When context takeover is negotiated, each fragment is flushed with a
/// SYNC flush and the sliding window carries over between messages; without
/// takeover a FULL flush is used and the matching stream is reset at every
/// message boundary.
pub struct DeflateContext {
    compressor: Compress,
    decompressor: Decompress,
    compress_flush: FlushCompress,
    compress_reset: bool,
    decompress_reset: bool,
}

impl DeflateContext {
    pub fn new(role: Role, extensions: &Extensions) -> Self {
        // Each side compresses with its own negotiated window and inflates
        // with the peer's.
        let (compress_bits, decompress_bits, compress_reset, decompress_reset) = match role {
            Role::Server => (
                extensions.server_max_window_bits,
                extensions.client_max_window_bits,
                extensions.server_no_context_takeover,
                extensions.client_no_context_takeover,
            ),
            Role::Client => (
                extensions.client_max_window_bits,
                extensions.server_max_window_bits,
                extensions.client_no_context_takeover,
                extensions.server_no_context_takeover,
            ),
        };

        let compress_flush = if compress_reset {
            FlushCompress::Full
        } else {
            FlushCompress::Sync
        };

        DeflateContext {
            compressor: Compress::new_with_window_bits(
                Compression::default(),
                false,
                compress_bits,
            ),
            decompressor: Decompress::new_with_window_bits(false, decompress_bits),
            compress_flush,
            compress_reset,
            decompress_reset,
        }
    }

    /// Server side: accept a client's `Sec-WebSocket-Extensions` offer and
    /// produce the context together with the response header to send back.
    pub fn from_client_header(header: &str) -> Option<(DeflateContext, String)> {
        let extensions = extensions::parse_client_offer(header)?;
        let response = extensions::create_response_header(&extensions);
        Some((DeflateContext::new(Role::Server, &extensions), response))
    }

    /// Client side: accept the server's reply header.
    pub fn from_server_header(header: &str) -> Option<DeflateContext> {
        let extensions = extensions::parse_server_reply(header)?;
        Some(DeflateContext::new(Role::Client, &extensions))
    }

    /// The offer header a client places in its upgrade request.
    pub fn create_request_header() -> String {
        extensions::create_request_header()
    }

    /// The RSV bit pattern this extension claims (RSV1).
    pub fn rsv(&self) -> u8 {
        0b100
    }

    /// Minimum payload size for which compressing a message pays off.
    pub fn compression_threshold(&self) -> usize {
        COMPRESSION_THRESHOLD
    }

    /// Deflates one fragment of an outgoing message. On the final fragment
    /// the trailing empty block is stripped per RFC 7692.
    pub fn compress(&mut self, data: &[u8], is_final: bool) -> Result<Vec<u8>, Error> {
        let mut output = Vec::with_capacity(data.len() + 64);
        let before_in = self.compressor.total_in();

        loop {
            let consumed = (self.compressor.total_in() - before_in) as usize;
            if output.len() == output.capacity() {
                output.reserve(data.len().max(4096));
            }
            self.compressor
                .compress_vec(&data[consumed..], &mut output, self.compress_flush)
                .map_err(|e| Error::IOError {
                    source: io::Error::from(e),
                })?;

            // Spare capacity left after a call means the flush ran to
            // completion with nothing more to emit.
            let all_consumed = (self.compressor.total_in() - before_in) as usize == data.len();
            if all_consumed && output.len() < output.capacity() {
                break;
            }
        }

        if is_final {
            if output.ends_with(&DEFLATE_TRAILER) {
                output.truncate(output.len() - DEFLATE_TRAILER.len());
            }
            if self.compress_reset {
                self.compressor.reset();
            }
        }

        Ok(output)
    }

    /// Inflates one fragment of an incoming message, re-appending the empty
    /// block the sender stripped when the fragment is final. Any zlib
    /// failure invalidates the whole connection.
    pub fn decompress(&mut self, data: &[u8], is_final: bool) -> Result<Vec<u8>, Error> {
        let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(data);
        if is_final {
            input.extend_from_slice(&DEFLATE_TRAILER);
        }

        let mut output = Vec::with_capacity((input.len() * 2).max(4096));
        let before_in = self.decompressor.total_in();

        loop {
            let consumed = (self.decompressor.total_in() - before_in) as usize;
            if output.len() == output.capacity() {
                output.reserve(output.capacity().max(4096));
            }
            let status = self
                .decompressor
                .decompress_vec(&input[consumed..], &mut output, FlushDecompress::Sync)
                .map_err(|_| Error::InvalidCompressedData)?;

            if status == Status::StreamEnd {
                break;
            }
            let all_consumed =
                (self.decompressor.total_in() - before_in) as usize == input.len();
            if all_consumed && output.len() < output.capacity() {
                break;
            }
        }

        if is_final && self.decompress_reset {
            self.decompressor.reset(false);
        }

        Ok(output)
    }
}
