//! Protocol message decoding

use super::constants::{server, wire, HEADER_LEN};
use super::message::{ServerError, ServerMessage, Severity};
use std::io;

/// Maximum frame length (1 GiB), matching the server's own upper bound for
/// `mysqlx_max_allowed_packet`.
///
/// Any frame whose length field exceeds this value is rejected before the
/// body is buffered.
const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Decode one server message from the front of `data`
///
/// # Returns
/// `Ok((msg, consumed))` - Message and number of bytes consumed
/// `Err(e)` - `UnexpectedEof` if the frame is incomplete, `InvalidData` if it
/// is malformed
pub fn decode_message(data: &[u8]) -> io::Result<(ServerMessage, usize)> {
    if data.len() < HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message header",
        ));
    }

    let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame length must include the message type",
        ));
    }

    if len > MAX_MESSAGE_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "message length {} exceeds maximum allowed {}",
                len, MAX_MESSAGE_LENGTH
            ),
        ));
    }

    if data.len() < len + 4 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete message body",
        ));
    }

    let msg_type = data[4];
    let payload = &data[HEADER_LEN..len + 4];

    let msg = match msg_type {
        server::OK => decode_ok(payload)?,
        server::ERROR => ServerMessage::Error(decode_error(payload)?),
        server::SESS_AUTHENTICATE_CONTINUE => decode_authenticate_continue(payload)?,
        server::SESS_AUTHENTICATE_OK => {
            check_fields(payload)?;
            ServerMessage::AuthenticateOk
        }
        server::NOTICE => {
            check_fields(payload)?;
            ServerMessage::Notice
        }
        server::SQL_STMT_EXECUTE_OK => ServerMessage::StmtExecuteOk,
        other => ServerMessage::Other { msg_type: other },
    };

    Ok((msg, len + 4))
}

fn decode_ok(payload: &[u8]) -> io::Result<ServerMessage> {
    let mut msg = String::new();
    let mut reader = FieldReader::new(payload);
    while let Some((field, value)) = reader.next_field()? {
        if field == 1 {
            msg = value.into_string("Ok.msg")?;
        }
    }
    Ok(ServerMessage::Ok(msg))
}

fn decode_error(payload: &[u8]) -> io::Result<ServerError> {
    let mut err = ServerError::default();
    let mut reader = FieldReader::new(payload);
    while let Some((field, value)) = reader.next_field()? {
        match field {
            1 => err.severity = Severity::from_wire(value.into_varint("Error.severity")?),
            2 => {
                let code = value.into_varint("Error.code")?;
                err.code = u32::try_from(code).map_err(|_| invalid("Error.code out of range"))?;
            }
            3 => err.message = value.into_string("Error.msg")?,
            4 => err.sql_state = value.into_string("Error.sql_state")?,
            _ => {} // Ignore unknown fields
        }
    }
    Ok(err)
}

fn decode_authenticate_continue(payload: &[u8]) -> io::Result<ServerMessage> {
    let mut auth_data = Vec::new();
    let mut reader = FieldReader::new(payload);
    while let Some((field, value)) = reader.next_field()? {
        if field == 1 {
            auth_data = value.into_bytes("AuthenticateContinue.auth_data")?.to_vec();
        }
    }
    Ok(ServerMessage::AuthenticateContinue { auth_data })
}

/// Walk a payload only to validate its framing
fn check_fields(payload: &[u8]) -> io::Result<()> {
    let mut reader = FieldReader::new(payload);
    while reader.next_field()?.is_some() {}
    Ok(())
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    Fixed,
}

impl<'a> FieldValue<'a> {
    fn into_varint(self, name: &str) -> io::Result<u64> {
        match self {
            FieldValue::Varint(v) => Ok(v),
            _ => Err(invalid(&format!("{} has wrong wire type", name))),
        }
    }

    fn into_bytes(self, name: &str) -> io::Result<&'a [u8]> {
        match self {
            FieldValue::Bytes(b) => Ok(b),
            _ => Err(invalid(&format!("{} has wrong wire type", name))),
        }
    }

    fn into_string(self, name: &str) -> io::Result<String> {
        let bytes = self.into_bytes(name)?;
        Ok(String::from_utf8_lossy(bytes).to_string())
    }
}

/// Minimal protobuf field iterator
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_varint(&mut self) -> io::Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| invalid("truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(invalid("varint too long"))
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| invalid("truncated field"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn next_field(&mut self) -> io::Result<Option<(u32, FieldValue<'a>)>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }

        let key = self.read_varint()?;
        let field = u32::try_from(key >> 3).map_err(|_| invalid("field number out of range"))?;
        if field == 0 {
            return Err(invalid("field number 0"));
        }

        let value = match (key & 0x07) as u8 {
            wire::VARINT => FieldValue::Varint(self.read_varint()?),
            wire::FIXED64 => {
                self.take(8)?;
                FieldValue::Fixed
            }
            wire::LEN => {
                let len = usize::try_from(self.read_varint()?)
                    .map_err(|_| invalid("length out of range"))?;
                FieldValue::Bytes(self.take(len)?)
            }
            wire::FIXED32 => {
                self.take(4)?;
                FieldValue::Fixed
            }
            other => return Err(invalid(&format!("unsupported wire type {}", other))),
        };

        Ok(Some((field, value)))
    }
}
