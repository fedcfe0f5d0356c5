//! Codes defined in RFC 6455

use std::fmt::Display;

/// WebSocket message opcode as in RFC 6455.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpCode {
    /// Data (text or binary).
    Data(Data),
    /// Control (close, ping, pong).
    Control(Control),
}

/// Data opcodes as in RFC 6455
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Data {
    /// A continuation frame
    Continuation,
    /// A text frame
    Text,
    /// A binary frame
    Binary,
    /// 0x3-7 are reserved for further non-control frames
    Reserved(u8),
}

/// Control opcodes as in RFC 6455
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Control {
    /// A close frame
    Close,
    /// A ping frame
    Ping,
    /// A pong frame
    Pong,
    /// 0xb-f are reserved for further control frames
    Reserved(u8),
}

impl OpCode {
    /// Whether this is one of Close, Ping or Pong (or a reserved control code).
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Control(_))
    }

    /// Whether this opcode is reserved and therefore invalid on the wire.
    #[inline]
    pub fn is_reserved(self) -> bool {
        matches!(self, OpCode::Data(Data::Reserved(_)) | OpCode::Control(Control::Reserved(_)))
    }
}

impl Display for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Continuation => write!(f, "CONTINUE"),
            Self::Text => write!(f, "TEXT"),
            Self::Binary => write!(f, "BINARY"),
            Self::Reserved(other) => write!(f, "RESERVED_DATA_{other}"),
        }
    }
}

impl Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Close => write!(f, "CLOSE"),
            Self::Ping => write!(f, "PING"),
            Self::Pong => write!(f, "PONG"),
            Self::Reserved(other) => write!(f, "RESERVED_CONTROL_{other}"),
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Data(d) => d.fmt(f),
            Self::Control(c) => c.fmt(f),
        }
    }
}

impl From<Control> for u8 {
    fn from(value: Control) -> Self {
        u8::from(OpCode::Control(value))
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Data(Data::Continuation) => 0x0,
            OpCode::Data(Data::Text) => 0x1,
            OpCode::Data(Data::Binary) => 0x2,
            OpCode::Data(Data::Reserved(i)) => i,

            OpCode::Control(Control::Close) => 0x8,
            OpCode::Control(Control::Ping) => 0x9,
            OpCode::Control(Control::Pong) => 0xA,
            OpCode::Control(Control::Reserved(i)) => i,
        }
    }
}

impl From<u8> for OpCode {
    /// Only the low nibble is significant.
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Data(Data::Continuation),
            0x1 => Self::Data(Data::Text),
            0x2 => Self::Data(Data::Binary),
            i @ 0x3..=0x7 => Self::Data(Data::Reserved(i)),
            0x8 => Self::Control(Control::Close),
            0x9 => Self::Control(Control::Ping),
            0xA => Self::Control(Control::Pong),
            i => Self::Control(Control::Reserved(i)),
        }
    }
}

/// Status code used to indicate why an endpoint is closing the WebSocket connection.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,

    /// 1001: an endpoint is going away, such as a server going down.
    Away,

    /// 1002: an endpoint is terminating the connection due to a protocol error.
    Protocol,

    /// 1003: an endpoint received a type of data it cannot accept.
    Unsupported,

    /// 1005: no status code was present. Never sent on the wire.
    NoStatusReceived,

    /// 1006: the connection was closed without a closing handshake. Never sent on the wire.
    Abnormal,

    /// 1007: data within a message was not consistent with the type of the message.
    Invalid,

    /// 1008: a message violated the endpoint's policy.
    Policy,

    /// 1009: a message was too big to process.
    Size,

    /// 1010: the client expected the server to negotiate an extension.
    Extension,

    /// 1011: the server encountered an unexpected condition.
    Error,

    /// 1015: the TLS handshake failed. Never sent on the wire.
    Tls,

    /// 3000-4999: registered or private application codes.
    Application(u16),

    /// Anything else.
    Other(u16),
}

impl CloseCode {
    /// Lowest code an application may choose.
    pub const MIN_USER_DEFINED: u16 = 3000;
    /// Highest code an application may choose.
    pub const MAX_USER_DEFINED: u16 = 4999;

    /// Codes that only exist to report local conditions and must never appear in a close frame.
    #[inline]
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::NoStatusReceived | Self::Abnormal | Self::Tls)
    }

    /// Codes a consumer may pass to `close()`: 1000 or the 3000-4999 range.
    #[inline]
    pub fn is_user_sendable(self) -> bool {
        matches!(self, Self::Normal | Self::Application(_))
    }
}

impl Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code: u16 = (*self).into();
        write!(f, "{code}")
    }
}

impl From<CloseCode> for u16 {
    fn from(value: CloseCode) -> u16 {
        match value {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Tls => 1015,
            CloseCode::Application(code) | CloseCode::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(value: u16) -> Self {
        match value {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::NoStatusReceived,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1015 => Self::Tls,
            Self::MIN_USER_DEFINED..=Self::MAX_USER_DEFINED => Self::Application(value),
            _ => Self::Other(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_from_byte() {
        assert_eq!(OpCode::from(0x1), OpCode::Data(Data::Text));
        assert_eq!(OpCode::from(0x8), OpCode::Control(Control::Close));
        assert_eq!(OpCode::from(0x3), OpCode::Data(Data::Reserved(3)));
        assert_eq!(OpCode::from(0xF), OpCode::Control(Control::Reserved(0xF)));
        assert!(OpCode::from(0xB).is_reserved());
        assert!(OpCode::from(0x9).is_control());
        assert!(!OpCode::from(0x0).is_control());
    }

    #[test]
    fn user_sendable_codes() {
        for code in [1000u16, 3000, 3005, 4999] {
            assert!(CloseCode::from(code).is_user_sendable(), "{code}");
        }
        for code in [999u16, 1001, 2999, 5000, 1005] {
            assert!(!CloseCode::from(code).is_user_sendable(), "{code}");
        }
    }

    #[test]
    fn reserved_codes() {
        assert!(CloseCode::from(1005).is_reserved());
        assert!(CloseCode::from(1006).is_reserved());
        assert!(CloseCode::from(1015).is_reserved());
        assert!(!CloseCode::from(1000).is_reserved());
        assert_eq!(u16::from(CloseCode::from(4321)), 4321);
    }
}
