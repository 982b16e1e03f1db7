//! Compiled-playbook artifact sealing.
//!
//! A playbook that declares a password is compiled after its first successful
//! plain run into a binary sidecar: a magic header, a random 96-bit nonce,
//! and the AES-256-GCM ciphertext of the resolved document under a
//! SHA-256(password) key. The layout is private to this module; callers only
//! rely on "seal once, unseal with the same password".

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use anyhow::{Context, Result, anyhow};
use runbook_types::RunbookError;
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"RBC1";
const NONCE_LEN: usize = 12;

/// True when `bytes` look like a sealed artifact rather than YAML source.
pub fn is_sealed(bytes: &[u8]) -> bool {
    bytes.len() > MAGIC.len() + NONCE_LEN && bytes.starts_with(MAGIC)
}

/// Encrypts `plaintext` under `password`.
pub fn seal(plaintext: &[u8], password: &str) -> Result<Vec<u8>> {
    let cipher = cipher_for(password)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| anyhow!("failed to encrypt playbook artifact"))?;

    let mut sealed = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(MAGIC);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts a sealed artifact.
///
/// A missing or wrong password fails with [`RunbookError::Decryption`].
pub fn unseal(sealed: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
    if !is_sealed(sealed) {
        return Err(RunbookError::Decryption("input is not a sealed playbook artifact".into()).into());
    }
    let Some(password) = password else {
        return Err(RunbookError::Decryption("a password is required to open this artifact".into()).into());
    };

    let cipher = cipher_for(password)?;
    let nonce = Nonce::from_slice(&sealed[MAGIC.len()..MAGIC.len() + NONCE_LEN]);
    cipher
        .decrypt(nonce, &sealed[MAGIC.len() + NONCE_LEN..])
        .map_err(|_| RunbookError::Decryption("incorrect password or corrupted artifact".into()).into())
}

fn cipher_for(password: &str) -> Result<Aes256Gcm> {
    let key = Sha256::digest(password.as_bytes());
    Aes256Gcm::new_from_slice(&key).context("derived key has the wrong length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_types::RunbookError;

    #[test]
    fn round_trips_under_the_same_password() {
        let sealed = seal(b"runs:\n  - echo: hi\n", "example").expect("seal");
        assert!(is_sealed(&sealed));
        let opened = unseal(&sealed, Some("example")).expect("unseal");
        assert_eq!(opened, b"runs:\n  - echo: hi\n");
    }

    #[test]
    fn wrong_or_missing_password_is_a_decryption_error() {
        let sealed = seal(b"payload", "right").expect("seal");

        let wrong = unseal(&sealed, Some("wrong")).expect_err("wrong password fails");
        assert!(matches!(wrong.downcast_ref::<RunbookError>(), Some(RunbookError::Decryption(_))));

        let missing = unseal(&sealed, None).expect_err("missing password fails");
        assert!(matches!(missing.downcast_ref::<RunbookError>(), Some(RunbookError::Decryption(_))));
    }

    #[test]
    fn nonces_differ_between_seals() {
        let first = seal(b"payload", "pw").expect("seal");
        let second = seal(b"payload", "pw").expect("seal");
        assert_ne!(first, second);
    }
}
