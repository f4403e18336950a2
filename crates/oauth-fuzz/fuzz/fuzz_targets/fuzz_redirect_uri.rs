#![no_main]

use libfuzzer_sys::fuzz_target;
use mcp_oauth_broker::storage::{is_loopback_uri, matches_redirect_uri};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let (registered, requested) = input.split_once('\n').unwrap_or((input, input));

    // A match that is not exact equality must be a loopback match
    if matches_redirect_uri(registered, requested) && registered != requested {
        assert!(is_loopback_uri(registered) && is_loopback_uri(requested));
    }
    assert!(matches_redirect_uri(requested, requested));
});
