use time::OffsetDateTime;

/// An RFC 6455 close status code.
///
/// The constants cover the registered codes from the protocol plus the
/// reserved sentinels (`NONE`, `ABNORMAL_CLOSE`, `TLS_ERROR`) that may only
/// appear in locally recorded close info, never on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    pub const NORMAL_CLOSE: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    pub const UNACCEPTABLE_TYPE: CloseCode = CloseCode(1003);
    pub const NONE: CloseCode = CloseCode(1005);
    pub const ABNORMAL_CLOSE: CloseCode = CloseCode(1006);
    pub const INCONSISTENT_FRAME_DATA_TYPE: CloseCode = CloseCode(1007);
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    pub const MESSAGE_TOO_LARGE: CloseCode = CloseCode(1009);
    pub const EXPECTED_EXTENSION_MISSING: CloseCode = CloseCode(1010);
    pub const UNEXPECTED_SERVER_ERROR: CloseCode = CloseCode(1011);
    pub const SERVICE_RESTARTING: CloseCode = CloseCode(1012);
    pub const TRY_AGAIN_LATER: CloseCode = CloseCode(1013);
    pub const BAD_GATEWAY: CloseCode = CloseCode(1014);
    pub const TLS_ERROR: CloseCode = CloseCode(1015);

    pub const fn new(code: u16) -> Self {
        CloseCode(code)
    }

    pub const fn code(self) -> u16 {
        self.0
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            1000 => "normal closure",
            1001 => "going away",
            1002 => "protocol error",
            1003 => "unacceptable data type",
            1005 => "no status code",
            1006 => "abnormal closure",
            1007 => "inconsistent frame data type",
            1008 => "policy violation",
            1009 => "message too large",
            1010 => "expected extension missing",
            1011 => "unexpected server error",
            1012 => "service restarting",
            1013 => "try again later",
            1014 => "bad gateway",
            1015 => "TLS handshake failure",
            3000..=3999 => "registered",
            4000..=4999 => "application-defined",
            _ => "unknown",
        }
    }

    /// Whether a peer closing with this code counts as an anticipated
    /// shutdown rather than a failure.
    pub fn is_expected(self) -> bool {
        matches!(self.0, 1000 | 1001)
    }

    /// Whether the code may be carried in a close frame payload. The
    /// reserved ranges must never appear on the wire.
    pub fn is_valid_on_wire(code: u16) -> bool {
        match code {
            0..=999 => false,
            1004..=1006 => false,
            1014..=1015 => false,
            1016..=2999 => false,
            5000..=u16::MAX => false,
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode(code)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Close reasons travel in the close frame payload after the two code
/// bytes, and control payloads are capped at 125 bytes overall.
pub const MAX_CLOSE_REASON_LENGTH: usize = 123;

#[derive(Debug, Clone)]
pub struct CloseInfo {
    pub code: CloseCode,
    pub reason: String,
    pub timestamp: OffsetDateTime,
    pub by_peer: bool,
}

impl CloseInfo {
    pub fn new(code: CloseCode, reason: impl Into<String>, by_peer: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            timestamp: OffsetDateTime::now_utc(),
            by_peer,
        }
    }

    pub fn is_expected(&self) -> bool {
        self.code.is_expected()
    }
}
