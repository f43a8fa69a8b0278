// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication primitives: password hash verification, TOTP, and the
//! constant-time comparisons CSRF and bearer-token checks both need.

use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};

/// Constant-time byte comparison, shared by CSRF and bearer-token checks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Verify `candidate` against an Argon2 PHC-formatted hash. Returns `false` on any parse or mismatch error —
/// never distinguishes "bad hash" from "wrong password" to the caller.
pub fn verify_password(password_hash: &str, candidate: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        tracing::error!("configured password hash is not a valid Argon2 PHC string");
        return false;
    };
    Argon2::default().verify_password(candidate.as_bytes(), &parsed).is_ok()
}

/// Verify a 6-digit TOTP code against a base32 secret.
/// Uses the default 30s step and a one-step skew window, the common
/// authenticator-app default.
pub fn verify_totp(secret_base32: &str, code: &str) -> bool {
    let Ok(secret) = totp_rs::Secret::Encoded(secret_base32.to_owned()).to_bytes() else {
        tracing::error!("configured TOTP secret is not valid base32");
        return false;
    };
    let Ok(totp) = totp_rs::TOTP::new(totp_rs::Algorithm::SHA1, 6, 1, 30, secret) else {
        tracing::error!("failed to construct TOTP verifier");
        return false;
    };
    totp.check_current(code).unwrap_or(false)
}

/// Mint a fresh opaque session/CSRF token. 128 bits of randomness encoded
/// as a UUID string.
pub fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("abc123", "abc123"));
    }

    #[test]
    fn constant_time_eq_rejects_different_length() {
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn constant_time_eq_rejects_different_content() {
        assert!(!constant_time_eq("abc123", "abc124"));
    }

    #[test]
    fn verify_password_rejects_malformed_hash() {
        assert!(!verify_password("not-a-phc-hash", "whatever"));
    }

    #[test]
    fn verify_totp_rejects_malformed_secret() {
        assert!(!verify_totp("not valid base32!!", "123456"));
    }

    #[test]
    fn verify_totp_accepts_current_code() {
        let secret = totp_rs::Secret::generate_secret();
        let encoded = secret.to_encoded().to_string();
        let bytes = secret.to_bytes().unwrap();
        let totp = totp_rs::TOTP::new(totp_rs::Algorithm::SHA1, 6, 1, 30, bytes).unwrap();
        let code = totp.generate_current().unwrap();
        assert!(verify_totp(&encoded, &code));
    }
}
