use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::crypto::{self, Address, DigitalSignature, KeyPair};
use super::vault::{KdfParams, Vault, VaultError, DEFAULT_ITERATIONS};

/// Version tag written into every wallet file
pub const WALLET_VERSION: &str = "bitscoin-wallet-v1";

/// Errors that can occur during wallet operations
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Address {0} not found in wallet")]
    UnknownAddress(Address),

    #[error("Wallet I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Wallet serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported wallet version: {0}")]
    UnsupportedVersion(String),

    #[error("Corrupt wallet record {address}: {reason}")]
    CorruptRecord { address: String, reason: String },

    #[error("Wallet is encrypted; a passphrase is required")]
    PassphraseRequired,

    #[error("Wallet encryption error: {0}")]
    Vault(#[from] VaultError),
}

/// Public view of a wallet address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AddressInfo {
    pub address: Address,
    pub label: String,
    #[schema(value_type = String, example = "2025-01-01T12:00:00Z")]
    pub created_at: DateTime<Utc>,
}

/// A wallet entry: one keypair and its derived address
#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub address: Address,
    pub label: String,
    pub created_at: DateTime<Utc>,
    keypair: KeyPair,
}

impl WalletRecord {
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public_key().as_bytes())
    }

    pub fn info(&self) -> AddressInfo {
        AddressInfo {
            address: self.address.clone(),
            label: self.label.clone(),
            created_at: self.created_at,
        }
    }
}

/// On-disk form of a single record; key material is hex
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKey {
    public_key: String,
    private_key: String,
    label: String,
    created_at: DateTime<Utc>,
}

/// On-disk wallet layout
#[derive(Debug, Serialize, Deserialize)]
struct WalletFile {
    version: String,
    #[serde(default)]
    encryption: Option<KdfParams>,
    #[serde(with = "ordered_map")]
    addresses: Vec<(String, StoredKey)>,
}

/// Keypairs owned by this node, persisted as one JSON file.
///
/// Every mutation rewrites the whole file atomically (temp file, fsync, rename).
#[derive(Debug)]
pub struct WalletStore {
    path: PathBuf,
    order: Vec<Address>,
    records: HashMap<Address, WalletRecord>,
    vault: Option<Vault>,
}

impl WalletStore {
    /// Opens the wallet at `path`, or starts an empty one if the file is missing
    pub fn open<P: AsRef<Path>>(path: P, passphrase: Option<&str>) -> Result<Self, WalletError> {
        Self::open_with_iterations(path, passphrase, DEFAULT_ITERATIONS)
    }

    /// Like [`WalletStore::open`]; `iterations` applies only when new encryption
    /// parameters are generated
    pub fn open_with_iterations<P: AsRef<Path>>(
        path: P,
        passphrase: Option<&str>,
        iterations: u32,
    ) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            info!("No wallet found at {}, starting a new one", path.display());
            let vault = passphrase
                .map(|p| Vault::create(p, iterations))
                .transpose()?;
            return Ok(WalletStore {
                path,
                order: Vec::new(),
                records: HashMap::new(),
                vault,
            });
        }

        let contents = fs::read(&path).map_err(|source| WalletError::Io {
            path: path.clone(),
            source,
        })?;
        let file: WalletFile = serde_json::from_slice(&contents)?;
        if file.version != WALLET_VERSION {
            return Err(WalletError::UnsupportedVersion(file.version));
        }

        let (vault, migrate) = match (&file.encryption, passphrase) {
            (Some(params), Some(p)) => (Some(Vault::open(p, params)?), false),
            (Some(_), None) => return Err(WalletError::PassphraseRequired),
            (None, Some(p)) => (Some(Vault::create(p, iterations)?), true),
            (None, None) => (None, false),
        };

        let mut store = WalletStore {
            path,
            order: Vec::with_capacity(file.addresses.len()),
            records: HashMap::with_capacity(file.addresses.len()),
            vault,
        };

        let source_encrypted = file.encryption.is_some();
        for (address, stored) in file.addresses {
            let record = store.restore_record(address, stored, source_encrypted)?;
            store.order.push(record.address.clone());
            store.records.insert(record.address.clone(), record);
        }

        info!(
            "Wallet loaded from {} ({} addresses)",
            store.path.display(),
            store.order.len()
        );

        if migrate {
            warn!("Encrypting previously unencrypted wallet keys");
            store.save()?;
        } else if store.vault.is_none() && !store.order.is_empty() {
            warn!("Wallet private keys are stored unencrypted; set a passphrase to encrypt them");
        }

        Ok(store)
    }

    fn restore_record(
        &self,
        address: String,
        stored: StoredKey,
        encrypted: bool,
    ) -> Result<WalletRecord, WalletError> {
        let corrupt = |reason: String| WalletError::CorruptRecord {
            address: address.clone(),
            reason,
        };

        let raw = hex::decode(&stored.private_key).map_err(|e| corrupt(e.to_string()))?;
        let restored = if encrypted {
            let vault = self.vault.as_ref().ok_or(WalletError::PassphraseRequired)?;
            let secret = vault.unseal(&raw)?;
            KeyPair::from_secret_bytes(&secret[..])
        } else {
            KeyPair::from_secret_bytes(&raw)
        };
        let keypair = restored.map_err(|e| corrupt(e.to_string()))?;

        let public_key = hex::decode(&stored.public_key).map_err(|e| corrupt(e.to_string()))?;
        let public_key = crypto::public_key_from_bytes(&public_key).map_err(|e| corrupt(e.to_string()))?;
        if public_key != keypair.public_key() {
            return Err(corrupt("public key does not match private key".to_string()));
        }

        let derived = Address::from_public_key(&public_key);
        if derived.0 != address {
            return Err(corrupt(format!("address derives to {}", derived)));
        }

        Ok(WalletRecord {
            address: derived,
            label: stored.label,
            created_at: stored.created_at,
            keypair,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.vault.is_some()
    }

    /// Generates a fresh keypair
    pub fn generate_keypair() -> KeyPair {
        KeyPair::generate()
    }

    /// Derives the address of a public key
    pub fn derive_address(keypair: &KeyPair) -> Address {
        Address::from_public_key(&keypair.public_key())
    }

    /// Creates a new address and flushes the whole wallet before returning.
    ///
    /// If the flush fails the new record is discarded.
    pub fn create_address(&mut self, label: &str) -> Result<Address, WalletError> {
        let keypair = Self::generate_keypair();
        let address = Self::derive_address(&keypair);

        let record = WalletRecord {
            address: address.clone(),
            label: label.to_string(),
            created_at: Utc::now(),
            keypair,
        };
        self.order.push(address.clone());
        self.records.insert(address.clone(), record);

        if let Err(err) = self.save() {
            self.order.pop();
            self.records.remove(&address);
            return Err(err);
        }

        info!("Created address {} ({})", address, label);
        Ok(address)
    }

    /// Signs `message` with the key behind `address`
    pub fn sign(&self, address: &Address, message: &[u8]) -> Result<DigitalSignature, WalletError> {
        let record = self
            .records
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.clone()))?;
        Ok(record.keypair.sign(message))
    }

    /// Checks a signature made by `address`. Any failure, including an unknown
    /// address or an undecodable signature, is `false`.
    pub fn verify(&self, address: &Address, message: &[u8], signature: &DigitalSignature) -> bool {
        match self.records.get(address) {
            Some(record) => crypto::verify_signature(message, signature, &record.keypair.public_key()),
            None => false,
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.records.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&WalletRecord> {
        self.records.get(address)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Addresses in creation order
    pub fn addresses(&self) -> Vec<Address> {
        self.order.clone()
    }

    pub fn list_addresses(&self) -> Vec<AddressInfo> {
        self.order
            .iter()
            .filter_map(|address| self.records.get(address))
            .map(WalletRecord::info)
            .collect()
    }

    fn to_file(&self) -> Result<WalletFile, WalletError> {
        let mut addresses = Vec::with_capacity(self.order.len());

        for address in &self.order {
            let Some(record) = self.records.get(address) else {
                continue;
            };
            let secret = record.keypair.secret_bytes();
            let private_key = match &self.vault {
                Some(vault) => hex::encode(vault.seal(&secret[..])?),
                None => hex::encode(&secret[..]),
            };

            addresses.push((
                address.0.clone(),
                StoredKey {
                    public_key: record.public_key_hex(),
                    private_key,
                    label: record.label.clone(),
                    created_at: record.created_at,
                },
            ));
        }

        Ok(WalletFile {
            version: WALLET_VERSION.to_string(),
            encryption: self.vault.as_ref().map(|v| v.params().clone()),
            addresses,
        })
    }

    /// Rewrites the wallet file atomically
    pub fn save(&self) -> Result<(), WalletError> {
        let bytes = serde_json::to_vec_pretty(&self.to_file()?)?;
        atomic_write(&self.path, &bytes).map_err(|source| WalletError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!("Wallet saved to {}", self.path.display());
        Ok(())
    }
}

/// Writes `bytes` to a sibling temp file, syncs it, then renames it over `path`
fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)?;
        set_private_permissions(&tmp);
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }
    sync_parent_dir(path)
}

/// Flushes the directory entry written by a rename
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::File::open(parent)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn set_private_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Serializes `(address, record)` pairs as a JSON object, keeping their order
mod ordered_map {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of addresses to key records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if entries.iter().any(|(existing, _): &(String, V)| *existing == key) {
                        return Err(serde::de::Error::custom(format!("duplicate address {}", key)));
                    }
                    entries.push((key, value));
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_ITERATIONS: u32 = 1_000;

    fn wallet_path(dir: &TempDir) -> PathBuf {
        dir.path().join("bitscoin.dat")
    }

    #[test]
    fn test_create_address_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let mut wallet = WalletStore::open(wallet_path(&dir), None).unwrap();

        let first = wallet.create_address("Main Address").unwrap();
        let second = wallet.create_address("Secondary Address").unwrap();
        assert!(wallet_path(&dir).exists());

        let reloaded = WalletStore::open(wallet_path(&dir), None).unwrap();
        assert_eq!(reloaded.addresses(), vec![first.clone(), second]);
        assert_eq!(reloaded.list_addresses()[0].label, "Main Address");
        assert_eq!(reloaded.get(&first).unwrap().public_key_hex(), wallet.get(&first).unwrap().public_key_hex());
    }

    #[test]
    fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let mut wallet = WalletStore::open(wallet_path(&dir), None).unwrap();
        let address = wallet.create_address("Mining Address").unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(wallet_path(&dir)).unwrap()).unwrap();
        assert_eq!(json["version"], WALLET_VERSION);
        let record = &json["addresses"][address.as_str()];
        assert_eq!(record["label"], "Mining Address");
        assert_eq!(record["public_key"].as_str().unwrap().len(), 64);
        assert_eq!(record["private_key"].as_str().unwrap().len(), 64);
        assert!(!dir.path().join("bitscoin.dat.tmp").exists());
    }

    #[test]
    fn test_sign_and_verify() {
        let dir = TempDir::new().unwrap();
        let mut wallet = WalletStore::open(wallet_path(&dir), None).unwrap();
        let a = wallet.create_address("a").unwrap();
        let b = wallet.create_address("b").unwrap();

        let message = b"Test transaction: send 10 BSC";
        let signature = wallet.sign(&a, message).unwrap();

        assert!(wallet.verify(&a, message, &signature));
        assert!(!wallet.verify(&a, b"Test transaction: send 11 BSC", &signature));
        assert!(!wallet.verify(&b, message, &signature));
        assert!(!wallet.verify(&a, message, &DigitalSignature("???".to_string())));
    }

    #[test]
    fn test_unknown_address() {
        let dir = TempDir::new().unwrap();
        let wallet = WalletStore::open(wallet_path(&dir), None).unwrap();
        let stranger = KeyPair::generate().address();

        assert!(matches!(
            wallet.sign(&stranger, b"msg"),
            Err(WalletError::UnknownAddress(_))
        ));
        assert!(!wallet.verify(&stranger, b"msg", &DigitalSignature(String::new())));
    }

    #[test]
    fn test_atomic_write_creates_and_replaces_in_new_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("wallets").join("bitscoin.dat");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("dat.tmp").exists());
        assert!(sync_parent_dir(&path).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_parent_dir_reports_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone").join("bitscoin.dat");

        assert!(sync_parent_dir(&path).is_err());
    }

    #[test]
    fn test_failed_flush_leaves_wallet_unchanged() {
        let dir = TempDir::new().unwrap();
        // The wallet path is a directory, so the final rename must fail.
        let blocked = dir.path().join("blocked");
        fs::create_dir_all(blocked.join("child")).unwrap();

        let mut wallet = WalletStore {
            path: blocked,
            order: Vec::new(),
            records: HashMap::new(),
            vault: None,
        };
        assert!(matches!(
            wallet.create_address("lost"),
            Err(WalletError::Io { .. })
        ));
        assert!(wallet.is_empty());
    }

    #[test]
    fn test_encrypted_wallet_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = wallet_path(&dir);
        let mut wallet = WalletStore::open_with_iterations(&path, Some("hunter2"), TEST_ITERATIONS).unwrap();
        let address = wallet.create_address("cold").unwrap();
        assert!(wallet.is_encrypted());

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["encryption"]["kdf"], "pbkdf2-sha256");
        let stored = json["addresses"][address.as_str()]["private_key"].as_str().unwrap();
        assert_ne!(stored, hex::encode(&wallet.get(&address).unwrap().keypair.secret_bytes()[..]));

        let reloaded = WalletStore::open(&path, Some("hunter2")).unwrap();
        let signature = reloaded.sign(&address, b"hello").unwrap();
        assert!(wallet.verify(&address, b"hello", &signature));

        assert!(matches!(
            WalletStore::open(&path, None),
            Err(WalletError::PassphraseRequired)
        ));
        assert!(matches!(
            WalletStore::open(&path, Some("wrong")),
            Err(WalletError::Vault(VaultError::Decrypt))
        ));
    }

    #[test]
    fn test_plaintext_wallet_is_migrated_when_passphrase_given() {
        let dir = TempDir::new().unwrap();
        let path = wallet_path(&dir);
        let mut wallet = WalletStore::open(&path, None).unwrap();
        let address = wallet.create_address("legacy").unwrap();

        let migrated = WalletStore::open_with_iterations(&path, Some("pw"), TEST_ITERATIONS).unwrap();
        assert!(migrated.contains(&address));

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(json["encryption"].is_object());
        assert!(WalletStore::open(&path, Some("pw")).unwrap().contains(&address));
    }

    #[test]
    fn test_tampered_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = wallet_path(&dir);
        let mut wallet = WalletStore::open(&path, None).unwrap();
        wallet.create_address("a").unwrap();

        let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let other = KeyPair::generate();
        let record = json["addresses"].as_object_mut().unwrap().values_mut().next().unwrap();
        record["public_key"] = serde_json::Value::String(hex::encode(other.public_key().as_bytes()));
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        assert!(matches!(
            WalletStore::open(&path, None),
            Err(WalletError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = wallet_path(&dir);
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            WalletStore::open(&path, None),
            Err(WalletError::Serialization(_))
        ));
    }
}
