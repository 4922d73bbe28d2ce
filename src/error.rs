use crate::close::CloseCode;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Framing errors
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame payload must be of maximum 125 bytes or less")]
    ControlFramePayloadSize,

    #[error("Payload mask error")]
    PayloadMask,

    #[error("Most significant bit of a 64-bit frame length must be zero")]
    FrameLengthOverflow,

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,

    // Fragmentation errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    // Data validation errors
    #[error("Invalid UTF-8 in text message")]
    InvalidTextData,

    #[error("Unexpected binary frame on a text-only endpoint")]
    UnexpectedBinaryFrame,

    // Compression errors
    #[error("Invalid compressed data")]
    InvalidCompressedData,

    // Close handshake errors
    #[error("Close code must be two bytes")]
    InvalidClosePayload,

    #[error("Invalid close code")]
    InvalidCloseCode,

    /// The connection has already failed or closed; carries the recorded
    /// close code and reason.
    #[error("Connection closed ({code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },
}

impl Error {
    /// The RFC 6455 close code a connection failing with this error should
    /// report to the peer.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::InvalidOpcode(_)
            | Error::RSVNotZero
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::PayloadMask
            | Error::FrameLengthOverflow
            | Error::InvalidFrameFragmentation
            | Error::FragmentedInProgress
            | Error::InvalidContinuationFrame
            | Error::InvalidCompressedData
            | Error::InvalidClosePayload
            | Error::InvalidCloseCode => CloseCode::PROTOCOL_ERROR,
            Error::MaxFrameSize | Error::MaxMessageSize => CloseCode::MESSAGE_TOO_LARGE,
            Error::InvalidTextData | Error::FromUtf8Error { .. } => {
                CloseCode::INCONSISTENT_FRAME_DATA_TYPE
            }
            Error::UnexpectedBinaryFrame => CloseCode::UNACCEPTABLE_TYPE,
            Error::ConnectionClosed { code, .. } => CloseCode::new(*code),
            Error::IOError { .. } => CloseCode::ABNORMAL_CLOSE,
        }
    }

    pub(crate) fn closed(code: CloseCode, reason: impl Into<String>) -> Self {
        Error::ConnectionClosed {
            code: code.code(),
            reason: reason.into(),
        }
    }
}
