#![no_main]

use libfuzzer_sys::fuzz_target;
use room_sync_client::protocol::{decode_server_frame, ServerMessage};

fuzz_target!(|data: &[u8]| {
    // Raw bytes straight into the typed enum, UTF-8 validation included.
    let _ = serde_json::from_slice::<ServerMessage>(data);

    // The session's decode path: typed message, unhandled type or error,
    // never a panic.
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_server_frame(text);
    }
});
