#![no_main]

use libfuzzer_sys::fuzz_target;
use mcp_oauth_broker::pkce::{self, PkceMethod};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    // Split into verifier and challenge at the first newline
    let (verifier, challenge) = input.split_once('\n').unwrap_or((input, input));

    let _ = pkce::validate_code_challenge(challenge);
    for method in [PkceMethod::S256, PkceMethod::Plain] {
        if let Ok(computed) = pkce::generate_code_challenge(verifier, method) {
            assert_eq!(pkce::verify_code_challenge(verifier, &computed, method), Ok(true));
        }
        let _ = pkce::verify_code_challenge(verifier, challenge, method);
    }
});
