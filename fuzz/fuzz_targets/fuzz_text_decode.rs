#![no_main]

use chat_protocol::core::text::{decode_line, unescape};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let _ = decode_line(line);
        let _ = unescape(line);
    }
});
