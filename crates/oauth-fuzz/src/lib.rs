//! Fuzzing targets for mcp-oauth-broker.
//!
//! The targets feed untrusted input to the parsers that sit on the request path:
//! PKCE verifiers, redirect URIs and upstream JWT payloads.
//!
//! # Usage
//!
//! ```bash
//! cd crates/oauth-fuzz
//! cargo +nightly fuzz run fuzz_upstream_claims -- -max_total_time=60
//! ```

pub use mcp_oauth_broker::{pkce, storage, upstream};
