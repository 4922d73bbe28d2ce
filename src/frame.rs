use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            // 0x3..=0x7 are reserved data opcodes, 0xB..=0xF reserved control opcodes
            other => Err(Error::InvalidOpcode(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    /// Control opcodes occupy the upper half of the opcode space (>= 0x8).
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

/// One frame with its payload already in usable form: the parser emits
/// frames unmasked and inflated, and the compiler turns them back into wire
/// bytes. Masking keys and RSV bits live in those two components, not here.
#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    pub final_fragment: bool,
}

impl Frame {
    pub fn data(opcode: OpCode, payload: Vec<u8>, final_fragment: bool) -> Self {
        Self {
            opcode,
            payload,
            final_fragment,
        }
    }

    /// Control frames are never fragmented.
    pub fn control(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            payload,
            final_fragment: true,
        }
    }
}

/// Which side of the connection this endpoint plays. Clients mask every
/// outgoing frame and expect unmasked input; servers are the inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub(crate) fn masks_output(&self) -> bool {
        matches!(self, Role::Client)
    }
}
