//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements verifier/challenge handling per RFC 7636 for the `S256` and `plain` methods.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::PkceError;

/// Unreserved characters allowed in a code verifier (RFC 7636 §4.1).
static VERIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-._~]+$").expect("valid verifier pattern"));

/// Base64url alphabet used by S256 challenges.
static CHALLENGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-_]+$").expect("valid challenge pattern"));

const MIN_LENGTH: usize = 43;
const MAX_LENGTH: usize = 128;

/// Code challenge method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PkceMethod {
    /// Challenge equals the verifier (not recommended).
    #[serde(rename = "plain")]
    Plain,
    /// Challenge is `BASE64URL(SHA256(verifier))`.
    #[default]
    S256,
}

impl PkceMethod {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl FromStr for PkceMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_owned())),
        }
    }
}

impl fmt::Display for PkceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a code verifier: 43-128 characters of `[A-Za-z0-9-._~]`.
pub fn validate_code_verifier(verifier: &str) -> Result<(), PkceError> {
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&verifier.len()) {
        return Err(PkceError::VerifierLength);
    }
    if !VERIFIER_PATTERN.is_match(verifier) {
        return Err(PkceError::VerifierCharacters);
    }
    Ok(())
}

/// Validate a code challenge: 43-128 characters of the base64url alphabet.
pub fn validate_code_challenge(challenge: &str) -> Result<(), PkceError> {
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&challenge.len()) {
        return Err(PkceError::ChallengeLength);
    }
    if !CHALLENGE_PATTERN.is_match(challenge) {
        return Err(PkceError::ChallengeCharacters);
    }
    Ok(())
}

/// Compute the challenge for a verifier.
pub fn generate_code_challenge(verifier: &str, method: PkceMethod) -> Result<String, PkceError> {
    validate_code_verifier(verifier)?;

    Ok(match method {
        PkceMethod::Plain => verifier.to_owned(),
        PkceMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
    })
}

/// Verify a code verifier against a stored challenge.
///
/// An invalid verifier is reported as `Err`, never as a panic; callers treat both
/// `Err` and `Ok(false)` as a failed verification.
pub fn verify_code_challenge(
    verifier: &str,
    challenge: &str,
    method: PkceMethod,
) -> Result<bool, PkceError> {
    let computed = generate_code_challenge(verifier, method)?;
    Ok(computed == challenge)
}

/// Generate a fresh random verifier (32 random bytes, base64url: 43 characters).
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B test vector
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_valid() {
        assert_eq!(generate_code_challenge(VERIFIER, PkceMethod::S256).unwrap(), CHALLENGE);
        assert!(verify_code_challenge(VERIFIER, CHALLENGE, PkceMethod::S256).unwrap());
    }

    #[test]
    fn test_s256_invalid_challenge() {
        assert!(!verify_code_challenge(VERIFIER, "wrong-challenge", PkceMethod::S256).unwrap());
    }

    #[test]
    fn test_plain_returns_verifier() {
        assert_eq!(generate_code_challenge(VERIFIER, PkceMethod::Plain).unwrap(), VERIFIER);
    }

    #[test]
    fn test_short_verifier_is_error_not_panic() {
        assert_eq!(
            verify_code_challenge("wrong-verifier", CHALLENGE, PkceMethod::S256),
            Err(PkceError::VerifierLength)
        );
    }

    #[test]
    fn test_verifier_bounds() {
        assert!(validate_code_verifier(&"a".repeat(43)).is_ok());
        assert!(validate_code_verifier(&"a".repeat(128)).is_ok());
        assert_eq!(validate_code_verifier(&"a".repeat(42)), Err(PkceError::VerifierLength));
        assert_eq!(validate_code_verifier(&"a".repeat(129)), Err(PkceError::VerifierLength));
        let with_space = format!("{} ", "a".repeat(43));
        assert_eq!(validate_code_verifier(&with_space), Err(PkceError::VerifierCharacters));
    }

    #[test]
    fn test_challenge_rejects_verifier_only_characters() {
        assert!(validate_code_challenge(CHALLENGE).is_ok());
        let dotted = format!("{}.~", "a".repeat(43));
        assert_eq!(validate_code_challenge(&dotted), Err(PkceError::ChallengeCharacters));
        assert_eq!(validate_code_challenge("short"), Err(PkceError::ChallengeLength));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("S256".parse::<PkceMethod>().unwrap(), PkceMethod::S256);
        assert_eq!("plain".parse::<PkceMethod>().unwrap(), PkceMethod::Plain);
        assert_eq!(
            "s256".parse::<PkceMethod>(),
            Err(PkceError::UnsupportedMethod("s256".into()))
        );
        assert_eq!(PkceMethod::default(), PkceMethod::S256);
    }

    #[test]
    fn test_generated_verifier_is_valid() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 43);
        assert!(validate_code_verifier(&verifier).is_ok());
        assert_ne!(verifier, generate_code_verifier());
    }
}
