use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::constants::{KDF_CONTEXT_PASSWORD, PASSWORD_SALT_LEN};
use crate::error::PasswordError;

pub fn generate_salt() -> [u8; PASSWORD_SALT_LEN] {
    let mut salt = [0u8; PASSWORD_SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

// BLAKE3 KDF with domain separation, salt || password
fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_PASSWORD);
    hasher.update(salt);
    hasher.update(password.as_bytes());
    *hasher.finalize().as_bytes()
}

// Returns "hex(salt)$hex(digest)"
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }
    let salt = generate_salt();
    Ok(format!(
        "{}${}",
        hex::encode(salt),
        hex::encode(digest(&salt, password))
    ))
}

pub fn verify_password(password: &str, record: &str) -> Result<bool, PasswordError> {
    let (salt_hex, digest_hex) = record
        .split_once('$')
        .ok_or(PasswordError::MalformedRecord)?;
    let salt = hex::decode(salt_hex).map_err(|_| PasswordError::MalformedRecord)?;
    let expected = hex::decode(digest_hex).map_err(|_| PasswordError::MalformedRecord)?;

    let actual = digest(&salt, password);
    if expected.len() != actual.len() {
        return Err(PasswordError::MalformedRecord);
    }
    Ok(actual.ct_eq(&expected).unwrap_u8() == 1)
}
