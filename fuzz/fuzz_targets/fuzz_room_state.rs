#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use room_sync_client::config::SyncConfig;
use room_sync_client::membership::MembershipController;
use room_sync_client::protocol::{decode_server_frame, InboundFrame};
use room_sync_client::queue::{rank, QueueProjector};
use room_sync_client::reconciler::Reconciler;
use tokio::time::Instant;

// Newline-separated frames fed through the same components the room loop
// drives. Positions must stay finite and the queue must stay ranked.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let config = SyncConfig::new();
    let mut now = Instant::now();
    let mut membership = MembershipController::new("fuzz-user", &config);
    let mut reconciler = Reconciler::new(&config, now);
    let mut queue = QueueProjector::new();
    membership.join("abc", None, now);

    for line in text.lines() {
        now += Duration::from_millis(250);
        let Ok(InboundFrame::Message(msg)) = decode_server_frame(line) else {
            continue;
        };
        membership.handle(&msg, now);
        membership.on_tick(now);
        queue.apply(&msg);
        reconciler.handle(&msg, now);
        reconciler.on_tick(now);

        let position = reconciler.position(now);
        assert!(position.is_finite() && position >= 0.0);
        for pair in queue.entries().windows(2) {
            if let [a, b] = pair {
                assert_ne!(rank(a, b), std::cmp::Ordering::Greater);
            }
        }
    }
});
