#![no_main]

use libfuzzer_sys::fuzz_target;
use signaling_protocol::codec::decode_server_event;

fuzz_target!(|data: &[u8]| {
    // Inbound frames arrive as text; non-UTF-8 input never reaches the decoder.
    if let Ok(text) = std::str::from_utf8(data) {
        // Must only ever return Err for malformed frames, never panic.
        let _ = decode_server_event(text);
    }
});
