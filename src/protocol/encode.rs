//! Protocol message encoding

use super::constants::{client, datatypes, wire, HEADER_LEN};
use super::message::ClientMessage;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a client message into a complete frame
pub fn encode_message(msg: &ClientMessage) -> io::Result<BytesMut> {
    let mut payload = BytesMut::new();

    let msg_type = match msg {
        ClientMessage::CapabilitiesSet { capabilities } => {
            encode_capabilities_set(&mut payload, capabilities);
            client::CON_CAPABILITIES_SET
        }
        ClientMessage::AuthenticateStart {
            mechanism,
            auth_data,
        } => {
            put_bytes_field(&mut payload, 1, mechanism.as_bytes());
            if !auth_data.is_empty() {
                put_bytes_field(&mut payload, 2, auth_data);
            }
            client::SESS_AUTHENTICATE_START
        }
        ClientMessage::AuthenticateContinue { auth_data } => {
            put_bytes_field(&mut payload, 1, auth_data);
            client::SESS_AUTHENTICATE_CONTINUE
        }
        ClientMessage::StmtExecute { stmt } => {
            put_bytes_field(&mut payload, 1, stmt.as_bytes());
            put_bytes_field(&mut payload, 3, b"sql");
            client::SQL_STMT_EXECUTE
        }
        ClientMessage::SessionClose => client::SESS_CLOSE,
        ClientMessage::ConnectionClose => client::CON_CLOSE,
    };

    // Length covers the type byte and the payload
    let len = u32::try_from(payload.len() + 1).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "message too large for a frame")
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32_le(len);
    buf.put_u8(msg_type);
    buf.put(payload);
    Ok(buf)
}

// CapabilitiesSet { Capabilities { repeated Capability { name, Any { SCALAR, Scalar { V_BOOL } } } } }
fn encode_capabilities_set(buf: &mut BytesMut, capabilities: &[(String, bool)]) {
    let mut caps = BytesMut::new();
    for (name, value) in capabilities {
        let mut scalar = BytesMut::new();
        put_varint_field(&mut scalar, 1, datatypes::SCALAR_V_BOOL);
        put_varint_field(&mut scalar, 8, u64::from(*value));

        let mut any = BytesMut::new();
        put_varint_field(&mut any, 1, datatypes::ANY_SCALAR);
        put_bytes_field(&mut any, 2, &scalar);

        let mut capability = BytesMut::new();
        put_bytes_field(&mut capability, 1, name.as_bytes());
        put_bytes_field(&mut capability, 2, &any);

        put_bytes_field(&mut caps, 1, &capability);
    }
    put_bytes_field(buf, 1, &caps);
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_tag(buf: &mut BytesMut, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

fn put_varint_field(buf: &mut BytesMut, field: u32, value: u64) {
    put_tag(buf, field, wire::VARINT);
    put_varint(buf, value);
}

fn put_bytes_field(buf: &mut BytesMut, field: u32, data: &[u8]) {
    put_tag(buf, field, wire::LEN);
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tls_capability_request() {
        let msg = ClientMessage::CapabilitiesSet {
            capabilities: vec![("tls".to_string(), true)],
        };
        let buf = encode_message(&msg).unwrap();

        let expected: &[u8] = &[
            0x14, 0x00, 0x00, 0x00, // length = 20
            0x02, // CapabilitiesSet
            0x0A, 0x11, // capabilities
            0x0A, 0x0F, // capability
            0x0A, 0x03, b't', b'l', b's', // name
            0x12, 0x08, // value: Any
            0x08, 0x01, // Any.type = SCALAR
            0x12, 0x04, // Any.scalar
            0x08, 0x07, // Scalar.type = V_BOOL
            0x40, 0x01, // Scalar.v_bool = true
        ];
        assert_eq!(&buf[..], expected);
    }

    #[test]
    fn test_encode_session_close() {
        let buf = encode_message(&ClientMessage::SessionClose).unwrap();
        assert_eq!(&buf[..], &[0x01, 0x00, 0x00, 0x00, client::SESS_CLOSE]);
    }

    #[test]
    fn test_encode_stmt_execute() {
        let msg = ClientMessage::StmtExecute {
            stmt: "ROLLBACK".to_string(),
        };
        let buf = encode_message(&msg).unwrap();

        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);
        assert_eq!(buf[4], client::SQL_STMT_EXECUTE);
        assert_eq!(&buf[5..7], &[0x0A, 8]);
        assert_eq!(&buf[7..15], b"ROLLBACK");
        assert_eq!(&buf[15..], &[0x1A, 3, b's', b'q', b'l']);
    }

    #[test]
    fn test_encode_authenticate_start_without_data() {
        let msg = ClientMessage::AuthenticateStart {
            mechanism: "SHA256_MEMORY".to_string(),
            auth_data: Vec::new(),
        };
        let buf = encode_message(&msg).unwrap();
        assert_eq!(buf[4], client::SESS_AUTHENTICATE_START);
        assert_eq!(buf.len(), 5 + 2 + "SHA256_MEMORY".len());
    }

    #[test]
    fn test_varint_multibyte() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 300);
        assert_eq!(&buf[..], &[0xAC, 0x02]);
    }
}
