use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;
use zeroize::Zeroizing;

use std::fmt;
use std::str::FromStr;

/// Version byte prepended to every address payload
pub const ADDRESS_VERSION: u8 = 0x42;

/// Length of the public key hash embedded in an address
pub const KEY_HASH_LEN: usize = 20;

/// Length of the address checksum
pub const CHECKSUM_LEN: usize = 4;

/// Length of a decoded address: version || key hash || checksum
pub const ADDRESS_LEN: usize = 1 + KEY_HASH_LEN + CHECKSUM_LEN;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Invalid address length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid address version: {0:#04x}")]
    InvalidVersion(u8),

    #[error("Address checksum mismatch")]
    ChecksumMismatch,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

/// A chain address: base58 of `version || SHA-256(pubkey)[..20] || checksum`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address owned by a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        derive_address(public_key.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the address and checks its length, version byte and checksum
    pub fn decode(&self) -> Result<[u8; ADDRESS_LEN], CryptoError> {
        decode_address(&self.0)
    }

    /// Returns the public key hash carried by the address
    pub fn key_hash(&self) -> Result<[u8; KEY_HASH_LEN], CryptoError> {
        let bytes = self.decode()?;
        let mut key_hash = [0u8; KEY_HASH_LEN];
        key_hash.copy_from_slice(&bytes[1..1 + KEY_HASH_LEN]);
        Ok(key_hash)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        decode_address(s)?;
        Ok(Address(s.to_string()))
    }
}

/// Derives an address from the canonical (32-byte) encoding of a public key.
///
/// SHA-256 is used for every step: the key hash is the first 20 bytes of
/// SHA-256(pubkey) and the checksum is the first 4 bytes of
/// SHA-256(SHA-256(version || key hash)).
pub fn derive_address(public_key: &[u8]) -> Address {
    let digest = Sha256::digest(public_key);

    let mut payload = Vec::with_capacity(ADDRESS_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&digest[..KEY_HASH_LEN]);

    let checksum = checksum(&payload);
    payload.extend_from_slice(&checksum);

    Address(bs58::encode(payload).into_string())
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let second = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}

fn decode_address(encoded: &str) -> Result<[u8; ADDRESS_LEN], CryptoError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    let bytes: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::InvalidLength {
            expected: ADDRESS_LEN,
            got: b.len(),
        }
    })?;

    if bytes[0] != ADDRESS_VERSION {
        return Err(CryptoError::InvalidVersion(bytes[0]));
    }

    let (payload, check) = bytes.split_at(1 + KEY_HASH_LEN);
    if checksum(payload) != check {
        return Err(CryptoError::ChecksumMismatch);
    }

    Ok(bytes)
}

/// Represents a digital signature (base58 of the 64 signature bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        let bytes = signature.to_bytes();
        let encoded = bs58::encode(bytes).into_string();
        DigitalSignature(encoded)
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DigitalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An Ed25519 keypair
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key().as_bytes()))
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Creates a new random keypair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        KeyPair {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Restores a keypair from its 32-byte secret
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SECRET_KEY_LENGTH] = secret.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;
        let bytes = Zeroizing::new(bytes);

        Ok(KeyPair {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    /// Signs a message with the private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature::from_signature(&self.signing_key.sign(message))
    }

    /// Exports the secret key bytes; the buffer is wiped on drop
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LENGTH]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }
}

/// Parses a public key from its canonical 32-byte encoding
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("Invalid public key length".to_string()))?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verifies a signature against a message and public key.
///
/// Undecodable signatures verify as `false`.
pub fn verify_signature(message: &[u8], signature: &DigitalSignature, public_key: &VerifyingKey) -> bool {
    match signature.to_signature() {
        Ok(signature) => public_key.verify(message, &signature).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_address_is_deterministic() {
        let keypair = KeyPair::generate();
        let first = Address::from_public_key(&keypair.public_key());
        let second = derive_address(keypair.public_key().as_bytes());

        assert_eq!(first, second);
        assert_eq!(keypair.address(), first);
    }

    #[test]
    fn test_address_layout() {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        let bytes = address.decode().unwrap();

        assert_eq!(bytes[0], ADDRESS_VERSION);
        let digest = Sha256::digest(keypair.public_key().as_bytes());
        assert_eq!(&address.key_hash().unwrap()[..], &digest[..KEY_HASH_LEN]);
        assert_eq!(address.to_string().parse::<Address>().unwrap(), address);
    }

    #[test]
    fn test_any_single_byte_flip_is_rejected() {
        let address = KeyPair::generate().address();
        let bytes = address.decode().unwrap();

        for position in 0..ADDRESS_LEN {
            let mut tampered = bytes;
            tampered[position] ^= 0x01;
            let encoded = bs58::encode(tampered).into_string();
            assert!(
                encoded.parse::<Address>().is_err(),
                "flip at byte {} was accepted",
                position
            );
        }
    }

    #[test]
    fn test_malformed_addresses_are_rejected() {
        assert!(matches!(
            "0OIl".parse::<Address>(),
            Err(CryptoError::DecodingError(_))
        ));
        assert!(matches!(
            bs58::encode([ADDRESS_VERSION; 10]).into_string().parse::<Address>(),
            Err(CryptoError::InvalidLength { expected: ADDRESS_LEN, got: 10 })
        ));
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate();
        let message = b"Hello, world!";

        let signature = keypair.sign(message);
        assert!(verify_signature(message, &signature, &keypair.public_key()));

        // Verify with wrong message
        assert!(!verify_signature(b"Wrong message", &signature, &keypair.public_key()));

        // Verify with another key
        let other = KeyPair::generate();
        assert!(!verify_signature(message, &signature, &other.public_key()));

        // Garbage never verifies
        let garbage = DigitalSignature("not-base58-0OIl".to_string());
        assert!(!verify_signature(message, &garbage, &keypair.public_key()));
    }

    #[test]
    fn test_secret_roundtrip_restores_same_address() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(&keypair.secret_bytes()[..]).unwrap();
        assert_eq!(restored.address(), keypair.address());
        assert!(KeyPair::from_secret_bytes(&[1u8; 31]).is_err());
    }

    proptest! {
        #[test]
        fn prop_derivation_is_stable(key in proptest::array::uniform32(any::<u8>())) {
            let a = derive_address(&key);
            let b = derive_address(&key);
            prop_assert_eq!(&a, &b);
            prop_assert!(a.decode().is_ok());
        }
    }
}
