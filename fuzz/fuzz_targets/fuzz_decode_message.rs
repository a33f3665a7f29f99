#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use mysqlx_wire::protocol::decode::decode_message;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // Several frames may arrive in one read
    while !buf.is_empty() {
        match decode_message(&buf) {
            Ok((_, consumed)) => {
                assert!(consumed >= 5 && consumed <= buf.len());
                buf.advance(consumed);
            }
            Err(_) => break,
        }
    }
});
