use std::io;

use thiserror::Error;

use super::packet::PacketType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("packet body of {0} bytes exceeds the remaining-length limit")]
    PacketTooLarge(usize),
    #[error("string of {0} bytes does not fit a 16-bit length prefix")]
    StringTooLong(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),
    #[error("reserved flags set in fixed header {0:#04x}")]
    MalformedHeader(u8),
    #[error("remaining length uses more than four bytes")]
    RemainingLength,
    #[error("packet body of {0} bytes exceeds the inbound limit")]
    BodyTooLarge(usize),
    #[error("packet body ended early")]
    Truncated,
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("unsupported qos {0}")]
    UnsupportedQos(u8),
    #[error("packet identifier 0 is reserved")]
    ZeroPacketId,
    #[error("unsupported protocol `{name}` level {level}")]
    UnsupportedProtocol { name: String, level: u8 },
    #[error("unexpected {0:?} packet")]
    UnexpectedPacket(PacketType),
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("broker rejected request with code {0:#04x}")]
    Rejected(u8),
    #[error("timed out waiting for acknowledgement")]
    Timeout,
    #[error("malformed packet from broker: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] EncodeError),
    #[error("not connected")]
    NotConnected,
    #[error("packet {0} is still awaiting acknowledgement")]
    Outstanding(u16),
}

impl MqttError {
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}
