use anyhow::{Result, anyhow};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Seals a TOTP seed for storage on the user row.
/// Output layout: `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if the key has the wrong length or encryption fails.
#[allow(deprecated)]
pub fn seal_seed(key: &[u8], seed: &[u8], user_id: Uuid) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let aad = seed_aad(user_id);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: seed,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow!("seed encryption failed: {e}"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Reverses [`seal_seed`]. Fails if the blob was sealed for another user.
///
/// # Errors
/// Returns an error on a short blob, wrong key, or authentication failure.
#[allow(deprecated)]
pub fn open_seed(key: &[u8], sealed: &[u8], user_id: Uuid) -> Result<Vec<u8>> {
    if sealed.len() <= NONCE_LEN {
        return Err(anyhow!("sealed seed too short"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let aad = seed_aad(user_id);

    cipher(key)?
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow!("seed decryption failed: {e}"))
}

#[allow(deprecated)]
fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305> {
    if key.len() != KEY_LEN {
        return Err(anyhow!("seed key must be {KEY_LEN} bytes"));
    }
    Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
}

fn seed_aad(user_id: Uuid) -> Vec<u8> {
    format!("totp-seed:v1|{user_id}").into_bytes()
}
