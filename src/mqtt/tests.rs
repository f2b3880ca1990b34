//! MQTT v3.1.1 codec tests

use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;

use super::codec::{read_variable_int, write_variable_int};
use super::*;

// ============================================================================
// Helpers
// ============================================================================

fn encode_packet(packet: &Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    Encoder::new().encode(packet, &mut buf).unwrap();
    buf
}

fn decode_packet(buf: &[u8]) -> Result<Packet, DecodeError> {
    match Decoder::new().decode(buf)? {
        Some((packet, consumed)) => {
            assert_eq!(consumed, buf.len());
            Ok(packet)
        }
        None => Err(DecodeError::InsufficientData),
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[test]
fn test_connect_wire_bytes() {
    let packet = Packet::Connect(Connect {
        client_id: "bridge".to_string(),
        clean_session: true,
        keep_alive: 10,
        username: None,
        password: None,
    });

    let encoded = encode_packet(&packet);
    let expected: &[u8] = &[
        0x10, 18, // fixed header
        0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
        0x04, // level 4 = v3.1.1
        0x02, // clean session
        0x00, 0x0A, // keep alive
        0x00, 0x06, b'b', b'r', b'i', b'd', b'g', b'e',
    ];
    assert_eq!(&encoded[..], expected);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_connect_with_credentials() {
    let packet = Packet::Connect(Connect {
        client_id: "bridge".to_string(),
        clean_session: true,
        keep_alive: 30,
        username: Some("relay".to_string()),
        password: Some(Bytes::from_static(b"hunter2")),
    });

    let encoded = encode_packet(&packet);
    // username + password flags on top of clean session
    assert_eq!(encoded[9], 0xC2);
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_publish_exactly_once_header() {
    let packet = Packet::Publish(Publish {
        dup: false,
        qos: QoS::ExactlyOnce,
        retain: false,
        topic: "a/b".to_string(),
        packet_id: Some(7),
        payload: Bytes::from_static(b"hi"),
    });

    let encoded = encode_packet(&packet);
    assert_eq!(
        &encoded[..],
        &[0x34, 9, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x07, b'h', b'i']
    );
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_publish_at_most_once_has_no_packet_id() {
    let encoded = [0x31, 5, 0x00, 0x01, b't', b'o', b'k'];
    let packet = decode_packet(&encoded).unwrap();
    assert_eq!(
        packet,
        Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: true,
            topic: "t".to_string(),
            packet_id: None,
            payload: Bytes::from_static(b"ok"),
        })
    );
}

#[test]
fn test_publish_empty_payload() {
    let packet = Packet::Publish(Publish {
        dup: true,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: "t".to_string(),
        packet_id: Some(1),
        payload: Bytes::new(),
    });
    assert_eq!(decode_packet(&encode_packet(&packet)).unwrap(), packet);
}

#[test]
fn test_publish_requires_packet_id_above_qos0() {
    let packet = Packet::Publish(Publish {
        dup: false,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: "t".to_string(),
        packet_id: None,
        payload: Bytes::new(),
    });
    let mut buf = BytesMut::new();
    assert_eq!(
        Encoder::new().encode(&packet, &mut buf),
        Err(EncodeError::MissingPacketId)
    );
}

#[test]
fn test_publish_zero_packet_id_rejected() {
    let encoded = [0x32, 5, 0x00, 0x01, b't', 0x00, 0x00];
    assert!(matches!(
        decode_packet(&encoded),
        Err(DecodeError::MalformedPacket(_))
    ));
}

#[test]
fn test_publish_invalid_qos() {
    let encoded = [0x36, 5, 0x00, 0x01, b't', 0x00, 0x01];
    assert_eq!(decode_packet(&encoded), Err(DecodeError::InvalidQoS(3)));
}

#[test]
fn test_ack_packets() {
    assert_eq!(
        &encode_packet(&Packet::PubAck { packet_id: 258 })[..],
        &[0x40, 2, 0x01, 0x02]
    );
    assert_eq!(
        &encode_packet(&Packet::PubRel { packet_id: 1 })[..],
        &[0x62, 2, 0x00, 0x01]
    );
    assert_eq!(
        decode_packet(&[0x50, 2, 0x00, 0x09]).unwrap(),
        Packet::PubRec { packet_id: 9 }
    );
    assert_eq!(
        decode_packet(&[0x70, 2, 0x00, 0x09]).unwrap(),
        Packet::PubComp { packet_id: 9 }
    );
}

#[test]
fn test_pubrel_requires_reserved_flags() {
    assert_eq!(
        decode_packet(&[0x60, 2, 0x00, 0x01]),
        Err(DecodeError::InvalidFlags)
    );
}

#[test]
fn test_subscribe_wire_bytes() {
    let packet = Packet::Subscribe(Subscribe {
        packet_id: 1,
        filters: vec![("chat".to_string(), QoS::ExactlyOnce)],
    });
    let encoded = encode_packet(&packet);
    assert_eq!(
        &encoded[..],
        &[0x82, 9, 0x00, 0x01, 0x00, 0x04, b'c', b'h', b'a', b't', 0x02]
    );
    assert_eq!(decode_packet(&encoded).unwrap(), packet);
}

#[test]
fn test_suback_granted_and_failure() {
    let packet = decode_packet(&[0x90, 4, 0x00, 0x05, 0x01, SUBACK_FAILURE]).unwrap();
    let Packet::SubAck(suback) = packet else {
        panic!("expected SUBACK, got {:?}", packet);
    };
    assert_eq!(suback.packet_id, 5);
    assert_eq!(suback.granted(), vec![Some(QoS::AtLeastOnce), None]);
}

#[test]
fn test_connack_return_codes() {
    assert_eq!(
        decode_packet(&[0x20, 2, 0x01, 0x00]).unwrap(),
        Packet::ConnAck(ConnAck {
            session_present: true,
            return_code: ConnectReturnCode::Accepted,
        })
    );
    assert_eq!(
        decode_packet(&[0x20, 2, 0x00, 0x05]).unwrap(),
        Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        })
    );
    assert_eq!(
        decode_packet(&[0x20, 2, 0x00, 0x06]),
        Err(DecodeError::InvalidReturnCode(6))
    );
}

#[test]
fn test_ping_and_disconnect() {
    assert_eq!(&encode_packet(&Packet::PingReq)[..], &[0xC0, 0]);
    assert_eq!(decode_packet(&[0xD0, 0]).unwrap(), Packet::PingResp);
    assert_eq!(decode_packet(&[0xE0, 0]).unwrap(), Packet::Disconnect);
    assert_eq!(decode_packet(&[0xD1, 0]), Err(DecodeError::InvalidFlags));
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn test_partial_buffer_needs_more_data() {
    let encoded = encode_packet(&Packet::PubAck { packet_id: 3 });
    let decoder = Decoder::new();
    for len in 0..encoded.len() {
        assert_eq!(decoder.decode(&encoded[..len]), Ok(None), "prefix {}", len);
    }
}

#[test]
fn test_decode_consumes_one_packet() {
    let mut buf = encode_packet(&Packet::PingResp);
    buf.extend_from_slice(&encode_packet(&Packet::PubAck { packet_id: 4 }));

    let decoder = Decoder::new();
    let (first, consumed) = decoder.decode(&buf).unwrap().unwrap();
    assert_eq!(first, Packet::PingResp);
    assert_eq!(consumed, 2);

    let (second, _) = decoder.decode(&buf[consumed..]).unwrap().unwrap();
    assert_eq!(second, Packet::PubAck { packet_id: 4 });
}

#[test]
fn test_reserved_packet_types_rejected() {
    assert_eq!(decode_packet(&[0x00, 0]), Err(DecodeError::InvalidPacketType(0)));
    assert_eq!(decode_packet(&[0xF0, 0]), Err(DecodeError::InvalidPacketType(15)));
}

#[test]
fn test_packet_size_limit() {
    let decoder = Decoder::new().with_max_packet_size(4);
    let encoded = [0x30, 5, 0x00, 0x01, b't', b'x', b'y'];
    assert_eq!(decoder.decode(&encoded), Err(DecodeError::PacketTooLarge));
}

#[test]
fn test_variable_int_boundaries() {
    for value in [0usize, 127, 128, 16_383, 16_384, 2_097_151, 268_435_455] {
        let mut buf = BytesMut::new();
        write_variable_int(&mut buf, value).unwrap();
        let (decoded, len) = read_variable_int(&buf).unwrap();
        assert_eq!(decoded as usize, value);
        assert_eq!(len, buf.len());
    }

    let mut buf = BytesMut::new();
    assert_eq!(
        write_variable_int(&mut buf, 268_435_456),
        Err(EncodeError::PacketTooLarge)
    );
    assert_eq!(
        read_variable_int(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
        Err(DecodeError::InvalidRemainingLength)
    );
    assert_eq!(read_variable_int(&[0x80]), Err(DecodeError::InsufficientData));
}
