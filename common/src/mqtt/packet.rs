use super::error::{DecodeError, EncodeError};

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

// Four-byte remaining length ceiling.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
const SUBSCRIBE_FLAGS: u8 = 0x02;
const PUBLISH_FLAG_DUP: u8 = 0x08;
const PUBLISH_FLAG_RETAIN: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    Subscribe = 8,
    SubAck = 9,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_header(header: u8) -> Result<Self, DecodeError> {
        let kind = header >> 4;
        match kind {
            1 => Ok(Self::Connect),
            2 => Ok(Self::ConnAck),
            3 => Ok(Self::Publish),
            4 => Ok(Self::PubAck),
            8 => Ok(Self::Subscribe),
            9 => Ok(Self::SubAck),
            12 => Ok(Self::PingReq),
            13 => Ok(Self::PingResp),
            14 => Ok(Self::Disconnect),
            other => Err(DecodeError::UnknownPacketType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, DecodeError> {
        match bits {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            other => Err(DecodeError::UnsupportedQos(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck { session_present: bool, return_code: u8 },
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe(Subscribe),
    SubAck { packet_id: u16, return_codes: Vec<u8> },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck { .. } => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck { .. } => PacketType::PubAck,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck { .. } => PacketType::SubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut body = Vec::new();
        let flags = match self {
            Self::Connect(connect) => {
                put_str(&mut body, PROTOCOL_NAME)?;
                body.push(PROTOCOL_LEVEL);
                body.push(if connect.clean_session {
                    CONNECT_FLAG_CLEAN_SESSION
                } else {
                    0
                });
                body.extend_from_slice(&connect.keep_alive_secs.to_be_bytes());
                put_str(&mut body, &connect.client_id)?;
                0
            }
            Self::ConnAck {
                session_present,
                return_code,
            } => {
                body.push(u8::from(*session_present));
                body.push(*return_code);
                0
            }
            Self::Publish(publish) => {
                put_str(&mut body, &publish.topic)?;
                if let Some(packet_id) = publish.packet_id {
                    body.extend_from_slice(&packet_id.to_be_bytes());
                }
                body.extend_from_slice(&publish.payload);

                let mut flags = (publish.qos as u8) << 1;
                if publish.dup {
                    flags |= PUBLISH_FLAG_DUP;
                }
                if publish.retain {
                    flags |= PUBLISH_FLAG_RETAIN;
                }
                flags
            }
            Self::PubAck { packet_id } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                0
            }
            Self::Subscribe(subscribe) => {
                body.extend_from_slice(&subscribe.packet_id.to_be_bytes());
                for (filter, qos) in &subscribe.filters {
                    put_str(&mut body, filter)?;
                    body.push(*qos as u8);
                }
                SUBSCRIBE_FLAGS
            }
            Self::SubAck {
                packet_id,
                return_codes,
            } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                body.extend_from_slice(return_codes);
                0
            }
            Self::PingReq | Self::PingResp | Self::Disconnect => 0,
        };

        let mut packet = Vec::with_capacity(body.len() + 5);
        packet.push(((self.packet_type() as u8) << 4) | flags);
        encode_remaining_length(body.len(), &mut packet)?;
        packet.extend_from_slice(&body);
        Ok(packet)
    }

    pub fn decode(header: u8, body: &[u8]) -> Result<Self, DecodeError> {
        let kind = PacketType::from_header(header)?;
        let flags = header & 0x0f;
        let expected_flags = match kind {
            PacketType::Publish => flags,
            PacketType::Subscribe => SUBSCRIBE_FLAGS,
            _ => 0,
        };
        if flags != expected_flags {
            return Err(DecodeError::MalformedHeader(header));
        }

        let mut reader = BodyReader::new(body);
        let packet = match kind {
            PacketType::Connect => {
                let name = reader.string()?;
                let level = reader.u8()?;
                if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                    return Err(DecodeError::UnsupportedProtocol { name, level });
                }
                let connect_flags = reader.u8()?;
                let keep_alive_secs = reader.u16()?;
                let client_id = reader.string()?;
                // Will and credential fields are never produced by this client.
                reader.skip_rest();
                Self::Connect(Connect {
                    client_id,
                    keep_alive_secs,
                    clean_session: connect_flags & CONNECT_FLAG_CLEAN_SESSION != 0,
                })
            }
            PacketType::ConnAck => {
                let ack_flags = reader.u8()?;
                let return_code = reader.u8()?;
                Self::ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    return_code,
                }
            }
            PacketType::Publish => {
                let qos = QoS::from_bits((flags >> 1) & 0x03)?;
                let topic = reader.string()?;
                let packet_id = match qos {
                    QoS::AtMostOnce => None,
                    QoS::AtLeastOnce => Some(reader.packet_id()?),
                };
                Self::Publish(Publish {
                    topic,
                    payload: reader.rest().to_vec(),
                    qos,
                    retain: flags & PUBLISH_FLAG_RETAIN != 0,
                    dup: flags & PUBLISH_FLAG_DUP != 0,
                    packet_id,
                })
            }
            PacketType::PubAck => Self::PubAck {
                packet_id: reader.packet_id()?,
            },
            PacketType::Subscribe => {
                let packet_id = reader.packet_id()?;
                let mut filters = Vec::new();
                while !reader.is_empty() {
                    let filter = reader.string()?;
                    let qos = QoS::from_bits(reader.u8()?)?;
                    filters.push((filter, qos));
                }
                Self::Subscribe(Subscribe { packet_id, filters })
            }
            PacketType::SubAck => Self::SubAck {
                packet_id: reader.packet_id()?,
                return_codes: reader.rest().to_vec(),
            },
            PacketType::PingReq => Self::PingReq,
            PacketType::PingResp => Self::PingResp,
            PacketType::Disconnect => Self::Disconnect,
        };

        reader.finish()?;
        Ok(packet)
    }
}

pub fn encode_remaining_length(len: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge(len));
    }

    let mut remaining = len;
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if remaining == 0 {
            return Ok(());
        }
    }
}

pub fn decode_remaining_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (index, byte) in bytes.iter().enumerate() {
        if index == 4 {
            return Err(DecodeError::RemainingLength);
        }
        value += usize::from(byte & 0x7f) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        return Err(DecodeError::RemainingLength);
    }
    Ok(None)
}

fn put_str(out: &mut Vec<u8>, value: &str) -> Result<(), EncodeError> {
    let len = u16::try_from(value.len()).map_err(|_| EncodeError::StringTooLong(value.len()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn packet_id(&mut self) -> Result<u16, DecodeError> {
        match self.u16()? {
            0 => Err(DecodeError::ZeroPacketId),
            id => Ok(id),
        }
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = usize::from(self.u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }

    fn skip_rest(&mut self) {
        self.pos = self.buf.len();
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.buf.len().saturating_sub(self.pos) {
            0 => Ok(()),
            extra => Err(DecodeError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(encoded: &[u8]) -> (u8, &[u8]) {
        let (len, used) = decode_remaining_length(&encoded[1..]).unwrap().unwrap();
        let body = &encoded[1 + used..];
        assert_eq!(body.len(), len);
        (encoded[0], body)
    }

    #[test]
    fn remaining_length_boundaries() {
        let cases: [(usize, &[u8]); 6] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xff, 0x7f]),
            (16_384, &[0x80, 0x80, 0x01]),
            (MAX_REMAINING_LENGTH, &[0xff, 0xff, 0xff, 0x7f]),
        ];

        for (len, expected) in cases {
            let mut out = Vec::new();
            encode_remaining_length(len, &mut out).unwrap();
            assert_eq!(out, expected);
            assert_eq!(
                decode_remaining_length(expected).unwrap(),
                Some((len, expected.len()))
            );
        }
    }

    #[test]
    fn remaining_length_rejects_oversize() {
        let mut out = Vec::new();
        assert_eq!(
            encode_remaining_length(MAX_REMAINING_LENGTH + 1, &mut out),
            Err(EncodeError::PacketTooLarge(MAX_REMAINING_LENGTH + 1))
        );
        assert_eq!(
            decode_remaining_length(&[0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(DecodeError::RemainingLength)
        );
        assert_eq!(decode_remaining_length(&[0x80, 0x80]), Ok(None));
    }

    #[test]
    fn connect_matches_reference_bytes() {
        let packet = Packet::Connect(Connect {
            client_id: "shower".to_string(),
            keep_alive_secs: 60,
            clean_session: false,
        });

        let encoded = packet.encode().unwrap();

        assert_eq!(
            encoded,
            vec![
                0x10, 18, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // level
                0x00, // flags
                0x00, 0x3c, // keep alive
                0x00, 0x06, b's', b'h', b'o', b'w', b'e', b'r',
            ]
        );
    }

    #[test]
    fn clean_session_sets_connect_flag() {
        let packet = Packet::Connect(Connect {
            client_id: "x".to_string(),
            keep_alive_secs: 0,
            clean_session: true,
        });
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[9], CONNECT_FLAG_CLEAN_SESSION);

        let (header, body) = split(&encoded);
        assert_eq!(Packet::decode(header, body).unwrap(), packet);
    }

    #[test]
    fn publish_header_carries_qos_and_retain() {
        let packet = Packet::Publish(Publish {
            topic: "shower/current/state".to_string(),
            payload: b"idle".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
            dup: false,
            packet_id: Some(0x0102),
        });

        let encoded = packet.encode().unwrap();

        assert_eq!(encoded[0], 0x33);
        assert_eq!(usize::from(encoded[1]), 2 + 20 + 2 + 4);
        assert_eq!(&encoded[24..26], &[0x01, 0x02]);
        assert_eq!(&encoded[26..], b"idle");
    }

    #[test]
    fn publish_survives_wire_format() {
        let original = Publish {
            topic: "shower/update-settings".to_string(),
            payload: br#"{"on-rate": 12}"#.to_vec(),
            qos: QoS::AtLeastOnce,
            retain: false,
            dup: true,
            packet_id: Some(65_535),
        };

        let encoded = Packet::Publish(original.clone()).encode().unwrap();
        let (header, body) = split(&encoded);

        assert_eq!(Packet::decode(header, body).unwrap(), Packet::Publish(original));
    }

    #[test]
    fn large_publish_uses_multi_byte_length() {
        let packet = Packet::Publish(Publish {
            topic: "t".to_string(),
            payload: vec![0xaa; 300],
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        });

        let encoded = packet.encode().unwrap();
        let (header, body) = split(&encoded);

        assert_eq!(&encoded[1..3], &[0xaf, 0x02]);
        assert_eq!(Packet::decode(header, body).unwrap(), packet);
    }

    #[test]
    fn disconnect_is_two_bytes() {
        assert_eq!(Packet::Disconnect.encode().unwrap(), vec![0xe0, 0x00]);
        assert_eq!(Packet::PingReq.encode().unwrap(), vec![0xc0, 0x00]);
    }

    #[test]
    fn subscribe_uses_reserved_flags() {
        let packet = Packet::Subscribe(Subscribe {
            packet_id: 7,
            filters: vec![("shower/update-state".to_string(), QoS::AtLeastOnce)],
        });

        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0], 0x82);

        let (header, body) = split(&encoded);
        assert_eq!(Packet::decode(header, body).unwrap(), packet);
    }

    #[test]
    fn decodes_connack_and_puback() {
        assert_eq!(
            Packet::decode(0x20, &[0x01, 0x05]).unwrap(),
            Packet::ConnAck {
                session_present: true,
                return_code: 5
            }
        );
        assert_eq!(
            Packet::decode(0x40, &[0x12, 0x34]).unwrap(),
            Packet::PubAck { packet_id: 0x1234 }
        );
    }

    #[test]
    fn rejects_malformed_packets() {
        assert_eq!(
            Packet::decode(0x00, &[]),
            Err(DecodeError::UnknownPacketType(0))
        );
        assert_eq!(
            Packet::decode(0x41, &[0x00, 0x01]),
            Err(DecodeError::MalformedHeader(0x41))
        );
        assert_eq!(Packet::decode(0x40, &[0x00]), Err(DecodeError::Truncated));
        assert_eq!(
            Packet::decode(0x40, &[0x00, 0x00]),
            Err(DecodeError::ZeroPacketId)
        );
        assert_eq!(
            Packet::decode(0x20, &[0x00, 0x00, 0x00]),
            Err(DecodeError::TrailingBytes(1))
        );
        assert_eq!(
            Packet::decode(0x34, &[0x00, 0x01, b't', 0x00, 0x01]),
            Err(DecodeError::UnsupportedQos(2))
        );
        assert_eq!(
            Packet::decode(0x30, &[0x00, 0x02, 0xc3, 0x28]),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn topic_longer_than_u16_is_rejected() {
        let packet = Packet::Publish(Publish {
            topic: "a".repeat(70_000),
            payload: Vec::new(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        });

        assert_eq!(packet.encode(), Err(EncodeError::StringTooLong(70_000)));
    }
}
