use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::error::TenantError;

/// Algorithm recorded alongside every stored hash.
pub const ALGORITHM: &str = "argon2id";

const SECRET_BYTES: usize = 24; // 24 bytes → 32 url-safe base64 chars

/// Derive the secret prefix from a tenant name: first letter of each
/// hyphen-separated word, padded with `x` to 4 characters.
pub fn derive_prefix(name: &str) -> String {
    let mut prefix: String = name
        .split('-')
        .filter_map(|word| word.chars().next())
        .take(4)
        .collect();
    while prefix.len() < 4 {
        prefix.push('x');
    }
    prefix
}

/// Generate a fresh plaintext secret: `<prefix>_<32 url-safe base64 chars>`.
pub fn generate_secret(name: &str) -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    format!("{}_{}", derive_prefix(name), URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a plaintext secret with Argon2id and a fresh salt. Returns the PHC
/// string that gets stored in the registry.
pub fn hash_secret(secret: &str) -> Result<String, TenantError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| TenantError::Hash(e.to_string()))
}

/// Compare a plaintext secret against a stored PHC hash.
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool, TenantError> {
    let parsed = PasswordHash::new(hash).map_err(|e| TenantError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}
