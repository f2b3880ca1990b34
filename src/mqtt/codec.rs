//! MQTT v3.1.1 Packet Codec
//!
//! Encodes and decodes the packets exchanged between the bridge client and
//! a broker. Both directions of every packet are supported so the same
//! codec can play the broker's part in tests.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::packet::{
    ConnAck, Connect, ConnectReturnCode, Packet, Publish, QoS, SubAck, Subscribe,
};

/// Maximum remaining length (268,435,455 bytes = ~256 MB)
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Default packet size limit for inbound packets
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Errors that can occur during packet decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("insufficient data in buffer")]
    InsufficientData,
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),
    #[error("invalid remaining length encoding")]
    InvalidRemainingLength,
    #[error("invalid protocol name")]
    InvalidProtocolName,
    #[error("invalid QoS value: {0}")]
    InvalidQoS(u8),
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
    #[error("invalid packet flags")]
    InvalidFlags,
    #[error("invalid CONNACK return code: {0}")]
    InvalidReturnCode(u8),
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
    #[error("packet too large")]
    PacketTooLarge,
}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("packet too large")]
    PacketTooLarge,
    #[error("string exceeds maximum length")]
    StringTooLong,
    #[error("packet identifier must be non-zero")]
    MissingPacketId,
}

/// Read a Variable Byte Integer from buffer
/// Returns (value, bytes_consumed) or error
pub fn read_variable_int(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut value: u32 = 0;
    for (pos, byte) in buf.iter().enumerate() {
        if pos >= 4 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        value |= ((byte & 0x7F) as u32) << (7 * pos);
        if byte & 0x80 == 0 {
            return Ok((value, pos + 1));
        }
    }
    if buf.len() >= 4 {
        Err(DecodeError::InvalidRemainingLength)
    } else {
        Err(DecodeError::InsufficientData)
    }
}

/// Write a Variable Byte Integer to buffer
pub fn write_variable_int(buf: &mut BytesMut, mut value: usize) -> Result<(), EncodeError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(EncodeError::PacketTooLarge);
    }
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    write_binary(buf, s.as_bytes())
}

fn write_binary(buf: &mut BytesMut, data: &[u8]) -> Result<(), EncodeError> {
    let len = u16::try_from(data.len()).map_err(|_| EncodeError::StringTooLong)?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

/// Cursor over a packet's variable header and payload
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, DecodeError> {
        if self.buf.is_empty() {
            return Err(DecodeError::MalformedPacket("truncated packet"));
        }
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        if self.buf.len() < 2 {
            return Err(DecodeError::MalformedPacket("truncated packet"));
        }
        Ok(self.buf.get_u16())
    }

    fn binary(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u16()? as usize;
        if self.buf.len() < len {
            return Err(DecodeError::MalformedPacket("length prefix exceeds packet"));
        }
        let (data, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(data)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let data = self.binary()?;
        let s = std::str::from_utf8(data).map_err(|_| DecodeError::InvalidUtf8)?;
        if s.contains('\0') {
            return Err(DecodeError::MalformedPacket("string contains null character"));
        }
        Ok(s.to_string())
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// MQTT Packet Decoder
pub struct Decoder {
    max_packet_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_REMAINING_LENGTH);
        self
    }

    /// Decode a packet from the buffer
    /// Returns (packet, bytes_consumed), or `None` until a whole packet is buffered
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first_byte = buf[0];
        let packet_type = first_byte >> 4;
        let flags = first_byte & 0x0F;

        let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
            Ok(r) => r,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };
        let remaining_length = remaining_length as usize;
        if remaining_length > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }

        let total_len = 1 + len_bytes + remaining_length;
        if buf.len() < total_len {
            return Ok(None);
        }

        let mut body = Reader {
            buf: &buf[1 + len_bytes..total_len],
        };

        let packet = match packet_type {
            1 => Self::decode_connect(flags, &mut body)?,
            2 => Self::decode_connack(flags, &mut body)?,
            3 => Self::decode_publish(flags, &mut body)?,
            4 => Packet::PubAck {
                packet_id: Self::decode_ack(flags, 0x00, &mut body)?,
            },
            5 => Packet::PubRec {
                packet_id: Self::decode_ack(flags, 0x00, &mut body)?,
            },
            6 => Packet::PubRel {
                packet_id: Self::decode_ack(flags, 0x02, &mut body)?,
            },
            7 => Packet::PubComp {
                packet_id: Self::decode_ack(flags, 0x00, &mut body)?,
            },
            8 => Self::decode_subscribe(flags, &mut body)?,
            9 => Self::decode_suback(flags, &mut body)?,
            12 | 13 | 14 => {
                if flags != 0 || !body.is_empty() {
                    return Err(DecodeError::InvalidFlags);
                }
                match packet_type {
                    12 => Packet::PingReq,
                    13 => Packet::PingResp,
                    _ => Packet::Disconnect,
                }
            }
            _ => return Err(DecodeError::InvalidPacketType(packet_type)),
        };

        Ok(Some((packet, total_len)))
    }

    fn decode_connect(flags: u8, body: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let protocol_name = body.string()?;
        let level = body.u8()?;
        if protocol_name != "MQTT" || level != 4 {
            return Err(DecodeError::InvalidProtocolName);
        }

        let connect_flags = body.u8()?;
        if connect_flags & 0x01 != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        // Will messages are never sent by the bridge
        if connect_flags & 0x04 != 0 {
            return Err(DecodeError::MalformedPacket("will message not supported"));
        }
        let clean_session = connect_flags & 0x02 != 0;
        let password_flag = connect_flags & 0x40 != 0;
        let username_flag = connect_flags & 0x80 != 0;

        let keep_alive = body.u16()?;
        let client_id = body.string()?;
        let username = if username_flag {
            Some(body.string()?)
        } else {
            None
        };
        let password = if password_flag {
            Some(Bytes::copy_from_slice(body.binary()?))
        } else {
            None
        };

        Ok(Packet::Connect(Connect {
            client_id,
            clean_session,
            keep_alive,
            username,
            password,
        }))
    }

    fn decode_connack(flags: u8, body: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let ack_flags = body.u8()?;
        let code = body.u8()?;
        let return_code =
            ConnectReturnCode::from_u8(code).ok_or(DecodeError::InvalidReturnCode(code))?;
        Ok(Packet::ConnAck(ConnAck {
            session_present: ack_flags & 0x01 != 0,
            return_code,
        }))
    }

    fn decode_publish(flags: u8, body: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        let dup = flags & 0x08 != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;
        let retain = flags & 0x01 != 0;

        let topic = body.string()?;
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            match body.u16()? {
                0 => return Err(DecodeError::MalformedPacket("zero packet identifier")),
                id => Some(id),
            }
        };
        let payload = Bytes::copy_from_slice(body.rest());

        Ok(Packet::Publish(Publish {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        }))
    }

    fn decode_ack(flags: u8, expected: u8, body: &mut Reader<'_>) -> Result<u16, DecodeError> {
        if flags != expected {
            return Err(DecodeError::InvalidFlags);
        }
        body.u16()
    }

    fn decode_subscribe(flags: u8, body: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        if flags != 0x02 {
            return Err(DecodeError::InvalidFlags);
        }
        let packet_id = body.u16()?;
        let mut filters = Vec::new();
        while !body.is_empty() {
            let filter = body.string()?;
            let options = body.u8()?;
            let qos = QoS::from_u8(options & 0x03).ok_or(DecodeError::InvalidQoS(options))?;
            filters.push((filter, qos));
        }
        if filters.is_empty() {
            return Err(DecodeError::MalformedPacket("SUBSCRIBE without filters"));
        }
        Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
    }

    fn decode_suback(flags: u8, body: &mut Reader<'_>) -> Result<Packet, DecodeError> {
        if flags != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let packet_id = body.u16()?;
        let return_codes = body.rest().to_vec();
        Ok(Packet::SubAck(SubAck {
            packet_id,
            return_codes,
        }))
    }
}

/// MQTT Packet Encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a packet to the buffer
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
        match packet {
            Packet::Connect(p) => self.encode_connect(p, buf),
            Packet::ConnAck(p) => {
                buf.put_u8(0x20);
                buf.put_u8(0x02);
                buf.put_u8(p.session_present as u8);
                buf.put_u8(p.return_code as u8);
                Ok(())
            }
            Packet::Publish(p) => self.encode_publish(p, buf),
            Packet::PubAck { packet_id } => Self::encode_ack(0x40, *packet_id, buf),
            Packet::PubRec { packet_id } => Self::encode_ack(0x50, *packet_id, buf),
            Packet::PubRel { packet_id } => Self::encode_ack(0x62, *packet_id, buf),
            Packet::PubComp { packet_id } => Self::encode_ack(0x70, *packet_id, buf),
            Packet::Subscribe(p) => self.encode_subscribe(p, buf),
            Packet::SubAck(p) => {
                buf.put_u8(0x90);
                write_variable_int(buf, 2 + p.return_codes.len())?;
                buf.put_u16(p.packet_id);
                buf.put_slice(&p.return_codes);
                Ok(())
            }
            Packet::PingReq => {
                buf.put_u8(0xC0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::PingResp => {
                buf.put_u8(0xD0);
                buf.put_u8(0x00);
                Ok(())
            }
            Packet::Disconnect => {
                buf.put_u8(0xE0);
                buf.put_u8(0x00);
                Ok(())
            }
        }
    }

    fn encode_connect(&self, packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
        // Protocol name (2 + 4) + level + flags + keep alive
        let mut remaining_length = 10 + 2 + packet.client_id.len();
        if let Some(ref username) = packet.username {
            remaining_length += 2 + username.len();
        }
        if let Some(ref password) = packet.password {
            remaining_length += 2 + password.len();
        }

        buf.put_u8(0x10);
        write_variable_int(buf, remaining_length)?;
        write_string(buf, "MQTT")?;
        buf.put_u8(4);

        let mut connect_flags: u8 = 0;
        if packet.clean_session {
            connect_flags |= 0x02;
        }
        if packet.password.is_some() {
            connect_flags |= 0x40;
        }
        if packet.username.is_some() {
            connect_flags |= 0x80;
        }
        buf.put_u8(connect_flags);
        buf.put_u16(packet.keep_alive);

        write_string(buf, &packet.client_id)?;
        if let Some(ref username) = packet.username {
            write_string(buf, username)?;
        }
        if let Some(ref password) = packet.password {
            write_binary(buf, password)?;
        }
        Ok(())
    }

    fn encode_publish(&self, packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let packet_id = match (packet.qos, packet.packet_id) {
            (QoS::AtMostOnce, _) => None,
            (_, Some(id)) if id != 0 => Some(id),
            _ => return Err(EncodeError::MissingPacketId),
        };

        let mut remaining_length = 2 + packet.topic.len() + packet.payload.len();
        if packet_id.is_some() {
            remaining_length += 2;
        }

        let mut first_byte = 0x30 | ((packet.qos as u8) << 1);
        if packet.dup {
            first_byte |= 0x08;
        }
        if packet.retain {
            first_byte |= 0x01;
        }
        buf.put_u8(first_byte);
        write_variable_int(buf, remaining_length)?;
        write_string(buf, &packet.topic)?;
        if let Some(id) = packet_id {
            buf.put_u16(id);
        }
        buf.put_slice(&packet.payload);
        Ok(())
    }

    fn encode_ack(first_byte: u8, packet_id: u16, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_u8(first_byte);
        buf.put_u8(0x02);
        buf.put_u16(packet_id);
        Ok(())
    }

    fn encode_subscribe(&self, packet: &Subscribe, buf: &mut BytesMut) -> Result<(), EncodeError> {
        if packet.packet_id == 0 {
            return Err(EncodeError::MissingPacketId);
        }
        let remaining_length = 2 + packet
            .filters
            .iter()
            .map(|(filter, _)| 2 + filter.len() + 1)
            .sum::<usize>();

        buf.put_u8(0x82);
        write_variable_int(buf, remaining_length)?;
        buf.put_u16(packet.packet_id);
        for (filter, qos) in &packet.filters {
            write_string(buf, filter)?;
            buf.put_u8(*qos as u8);
        }
        Ok(())
    }
}
