//! Passphrase encryption for private keys at rest.
//!
//! Keys are sealed with AES-256-GCM under a key derived from the passphrase with
//! PBKDF2-HMAC-SHA256 and a per-wallet random salt. A sealed blob is
//! `nonce(12) || ciphertext || tag(16)`.

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use std::fmt;
use std::num::NonZeroU32;

/// Name recorded in the wallet file for the key derivation function
pub const KDF_PBKDF2_SHA256: &str = "pbkdf2-sha256";

/// Iterations used when a new encrypted wallet is created
pub const DEFAULT_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = aead::NONCE_LEN;
const TAG_LEN: usize = 16;

/// Errors that can occur while sealing or opening key material
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("System random generator failed")]
    Random,

    #[error("Unsupported key derivation function: {0}")]
    UnsupportedKdf(String),

    #[error("Invalid key derivation parameters: {0}")]
    InvalidParams(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed: wrong passphrase or corrupt key material")]
    Decrypt,
}

/// Key derivation settings persisted next to the encrypted keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub kdf: String,
    pub iterations: u32,
    /// Hex encoded salt
    pub salt: String,
}

/// Seals and opens private keys under one passphrase-derived key
pub struct Vault {
    key: LessSafeKey,
    params: KdfParams,
    rng: SystemRandom,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault").field("params", &self.params).finish_non_exhaustive()
    }
}

impl Vault {
    /// Creates a vault with a fresh random salt
    pub fn create(passphrase: &str, iterations: u32) -> Result<Self, VaultError> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt).map_err(|_| VaultError::Random)?;

        let params = KdfParams {
            kdf: KDF_PBKDF2_SHA256.to_string(),
            iterations: iterations.max(1),
            salt: hex::encode(salt),
        };
        Self::open(passphrase, &params)
    }

    /// Re-derives the vault key from stored parameters
    pub fn open(passphrase: &str, params: &KdfParams) -> Result<Self, VaultError> {
        if params.kdf != KDF_PBKDF2_SHA256 {
            return Err(VaultError::UnsupportedKdf(params.kdf.clone()));
        }
        let iterations = NonZeroU32::new(params.iterations)
            .ok_or_else(|| VaultError::InvalidParams("iterations must be non-zero".to_string()))?;
        let salt = hex::decode(&params.salt)
            .map_err(|e| VaultError::InvalidParams(format!("salt: {}", e)))?;

        let mut key_bytes = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &salt,
            passphrase.as_bytes(),
            &mut key_bytes,
        );
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &key_bytes);
        key_bytes.zeroize();
        let key = LessSafeKey::new(unbound.map_err(|_| VaultError::Encrypt)?);

        Ok(Vault {
            key,
            params: params.clone(),
            rng: SystemRandom::new(),
        })
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Encrypts `plaintext` under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| VaultError::Random)?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| VaultError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    /// Decrypts a blob produced by [`Vault::seal`]; the result is wiped on drop
    pub fn unseal(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| VaultError::Decrypt)?;

        let mut in_out = Zeroizing::new(ciphertext.to_vec());
        let plain_len = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Decrypt)?
            .len();
        in_out.truncate(plain_len);
        Ok(in_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ITERATIONS: u32 = 1_000;

    #[test]
    fn test_seal_and_unseal() {
        let vault = Vault::create("correct horse", TEST_ITERATIONS).unwrap();
        let sealed = vault.seal(b"secret key bytes").unwrap();

        assert_ne!(&sealed[NONCE_LEN..], b"secret key bytes");
        assert_eq!(&vault.unseal(&sealed).unwrap()[..], b"secret key bytes");
    }

    #[test]
    fn test_reopened_vault_reads_old_blobs() {
        let vault = Vault::create("correct horse", TEST_ITERATIONS).unwrap();
        let sealed = vault.seal(b"key").unwrap();

        let reopened = Vault::open("correct horse", vault.params()).unwrap();
        assert_eq!(&reopened.unseal(&sealed).unwrap()[..], b"key");
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let vault = Vault::create("correct horse", TEST_ITERATIONS).unwrap();
        let sealed = vault.seal(b"key").unwrap();

        let wrong = Vault::open("battery staple", vault.params()).unwrap();
        assert!(matches!(wrong.unseal(&sealed), Err(VaultError::Decrypt)));
    }

    #[test]
    fn test_tampered_blob_fails() {
        let vault = Vault::create("pass", TEST_ITERATIONS).unwrap();
        let mut sealed = vault.seal(b"key").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;

        assert!(matches!(vault.unseal(&sealed), Err(VaultError::Decrypt)));
        assert!(matches!(vault.unseal(&[0u8; 4]), Err(VaultError::Decrypt)));
    }

    #[test]
    fn test_unknown_kdf_is_rejected() {
        let params = KdfParams {
            kdf: "rot13".to_string(),
            iterations: 1,
            salt: String::new(),
        };
        assert!(matches!(
            Vault::open("pass", &params),
            Err(VaultError::UnsupportedKdf(_))
        ));
    }
}
