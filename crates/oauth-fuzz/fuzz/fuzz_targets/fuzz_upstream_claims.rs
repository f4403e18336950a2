#![no_main]

use libfuzzer_sys::fuzz_target;
use mcp_oauth_broker::upstream::{
    UNKNOWN_USER, UpstreamTokenResponse, decode_jwt_claims, extract_user,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(token) = std::str::from_utf8(data) {
        let _ = decode_jwt_claims(token);
    }

    // Token responses straight from the wire
    if let Ok(response) = serde_json::from_slice::<UpstreamTokenResponse>(data) {
        let (user_id, _claims) = extract_user(&response);
        if response.id_token.is_none() && response.access_token.is_empty() {
            assert_eq!(user_id, UNKNOWN_USER);
        }
    }
});
