//! Property-based tests for PKCE verification.

use mcp_oauth_broker::pkce::{
    PkceMethod, generate_code_challenge, generate_code_verifier, validate_code_challenge,
    validate_code_verifier, verify_code_challenge,
};
use proptest::prelude::*;

fn arb_verifier() -> impl Strategy<Value = String> {
    "[A-Za-z0-9._~-]{43,128}"
}

fn arb_method() -> impl Strategy<Value = PkceMethod> {
    prop_oneof![Just(PkceMethod::S256), Just(PkceMethod::Plain)]
}

proptest! {
    /// Any well-formed verifier verifies against its own challenge.
    #[test]
    fn verifier_matches_own_challenge(verifier in arb_verifier(), method in arb_method()) {
        prop_assert!(validate_code_verifier(&verifier).is_ok());
        let challenge = generate_code_challenge(&verifier, method).unwrap();
        prop_assert_eq!(verify_code_challenge(&verifier, &challenge, method), Ok(true));
    }

    /// S256 challenges are always 43 base64url characters.
    #[test]
    fn s256_challenge_shape(verifier in arb_verifier()) {
        let challenge = generate_code_challenge(&verifier, PkceMethod::S256).unwrap();
        prop_assert_eq!(challenge.len(), 43);
        prop_assert!(validate_code_challenge(&challenge).is_ok());
    }

    /// Changing a single character of the verifier breaks verification.
    #[test]
    fn mutated_verifier_fails(
        verifier in arb_verifier(),
        method in arb_method(),
        index in any::<prop::sample::Index>(),
    ) {
        let challenge = generate_code_challenge(&verifier, method).unwrap();

        let mut bytes = verifier.into_bytes();
        let i = index.index(bytes.len());
        bytes[i] = if bytes[i] == b'a' { b'b' } else { b'a' };
        let mutated = String::from_utf8(bytes).unwrap();

        prop_assert_eq!(verify_code_challenge(&mutated, &challenge, method), Ok(false));
    }

    /// Too-short or too-long verifiers are rejected, never verified.
    #[test]
    fn out_of_range_lengths_rejected(
        short in "[A-Za-z0-9]{0,42}",
        long in "[A-Za-z0-9]{129,200}",
    ) {
        prop_assert!(validate_code_verifier(&short).is_err());
        prop_assert!(validate_code_verifier(&long).is_err());
        prop_assert!(verify_code_challenge(&short, &short, PkceMethod::Plain).is_err());
    }

    /// Arbitrary input never panics.
    #[test]
    fn arbitrary_input_never_panics(verifier in ".{0,200}", challenge in ".{0,200}") {
        let _ = validate_code_verifier(&verifier);
        let _ = validate_code_challenge(&challenge);
        let _ = verify_code_challenge(&verifier, &challenge, PkceMethod::S256);
        let _ = verify_code_challenge(&verifier, &challenge, PkceMethod::Plain);
    }
}

#[test]
fn test_generated_verifiers_are_valid_and_distinct() {
    let a = generate_code_verifier();
    let b = generate_code_verifier();
    assert_eq!(a.len(), 43);
    assert!(validate_code_verifier(&a).is_ok());
    assert_ne!(a, b);
}

#[test]
fn test_method_parsing() {
    assert_eq!("S256".parse::<PkceMethod>(), Ok(PkceMethod::S256));
    assert_eq!("plain".parse::<PkceMethod>(), Ok(PkceMethod::Plain));
    assert!("s256".parse::<PkceMethod>().is_err());
    assert!("".parse::<PkceMethod>().is_err());
    assert_eq!(PkceMethod::default(), PkceMethod::S256);
}
