#![no_main]

use bytes::BytesMut;
use chat_protocol::core::codec::{decode_datagram, BinaryCodec};
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Stream framing: drain every frame the input holds, stop at the first error.
    let mut codec = BinaryCodec::new();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}

    let _ = decode_datagram(data);
});
