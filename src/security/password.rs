//! Password hashing and verification.
//!
//! Centralizes Argon2id handling for accounts and operator blocks. Policy:
//! `m=65536, t=3, p=4`, PHC strings on disk, constant-time verification via
//! the `argon2` crate.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

/// Current parameter policy.
fn current_params() -> Params {
    Params::new(65536, 3, 4, None).expect("static argon2 params are valid")
}

fn hasher() -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, current_params())
}

/// Verify a password against a stored PHC hash (non-blocking).
#[must_use = "password verification result must be checked"]
pub async fn verify_password(
    password: String,
    hash: String,
) -> Result<bool, argon2::password_hash::Error> {
    tokio::task::spawn_blocking(move || {
        let parsed_hash = PasswordHash::new(&hash)?;
        Ok(hasher()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    })
    .await
    .expect("spawn_blocking failed")
}

/// Hash a password under the current policy (non-blocking).
#[must_use = "password hash must be used"]
pub async fn hash_password(password: String) -> Result<String, argon2::password_hash::Error> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Ok(hasher().hash_password(password.as_bytes(), &salt)?.to_string())
    })
    .await
    .expect("spawn_blocking failed")
}

/// Whether a stored hash should be recomputed because its parameters
/// diverge from the current policy.
pub fn needs_rehash(hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return true;
    };
    if parsed.algorithm.as_str() != "argon2id" {
        return true;
    }
    let Ok(params) = Params::try_from(&parsed) else {
        return true;
    };
    params != current_params()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify_roundtrip() {
        let hash = hash_password("hunter2".into()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter2".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn current_policy_does_not_need_rehash() {
        let hash = hash_password("pw".into()).await.unwrap();
        assert!(!needs_rehash(&hash));
    }

    #[test]
    fn foreign_or_garbage_hash_needs_rehash() {
        assert!(needs_rehash("not-a-phc-string"));
        // Different parameters (m=19456).
        assert!(needs_rehash(
            "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$xyz"
        ));
    }
}
