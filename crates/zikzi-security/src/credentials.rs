// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Password hashing and HTTP Basic credential decoding.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::rand::{SecureRandom, SystemRandom};

use zikzi_core::error::{Result, ZikziError};

/// Salt length in bytes (128 bits).
const SALT_BYTES: usize = 16;

/// Hash `password` with Argon2id default parameters into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; SALT_BYTES];
    SystemRandom::new()
        .fill(&mut salt_bytes)
        .map_err(|_| ZikziError::Random)?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| ZikziError::Credential(format!("salt encoding: {e}")))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ZikziError::Credential(format!("hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verify `password` against a PHC string.  A malformed hash never verifies.
pub fn verify_password(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Decode the payload of `Authorization: Basic <payload>` into
/// `(username, credential)`, splitting once on the first `:`.
pub fn decode_basic(payload: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, cred) = text.split_once(':')?;
    Some((user.to_owned(), cred.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let phc = hash_password("hunter2").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &phc));
        assert!(!verify_password("hunter3", &phc));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn basic_payload_splits_on_first_colon() {
        let payload = STANDARD.encode("alice:pa:ss");
        assert_eq!(
            decode_basic(&payload),
            Some(("alice".to_owned(), "pa:ss".to_owned()))
        );
    }

    #[test]
    fn basic_payload_without_colon_is_rejected() {
        assert_eq!(decode_basic(&STANDARD.encode("alice")), None);
        assert_eq!(decode_basic("!!not base64!!"), None);
    }
}
