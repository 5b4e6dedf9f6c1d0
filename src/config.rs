//! Node configuration read from `BITSCOIN_*` environment variables.

use thiserror::Error;

use std::fmt;
use std::path::PathBuf;

use crate::blockchain::{Address, Amount, DEFAULT_ITERATIONS};

/// Highest accepted difficulty (leading zero hex digits)
pub const MAX_DIFFICULTY: u32 = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone)]
pub struct NodeConfig {
    /// Required leading zero hex digits in non-genesis block hashes
    pub difficulty: u32,
    /// Reward paid to the miner of each block
    pub reward: Amount,
    pub data_dir: PathBuf,
    pub wallet_file: PathBuf,
    pub wallet_passphrase: Option<String>,
    /// PBKDF2 iterations used when a wallet is first encrypted
    pub kdf_iterations: u32,
    pub host: String,
    pub port: u16,
    /// Starts the background miner at boot when set
    pub miner_address: Option<Address>,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("difficulty", &self.difficulty)
            .field("reward", &self.reward)
            .field("data_dir", &self.data_dir)
            .field("wallet_file", &self.wallet_file)
            .field("wallet_passphrase", &self.wallet_passphrase.as_ref().map(|_| "<redacted>"))
            .field("kdf_iterations", &self.kdf_iterations)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("miner_address", &self.miner_address)
            .finish()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        NodeConfig {
            difficulty: 4,
            reward: Amount::from_base_units(50 * crate::blockchain::amount::BASE_UNITS_PER_COIN),
            wallet_file: data_dir.join("bitscoin.dat"),
            data_dir,
            wallet_passphrase: None,
            kdf_iterations: DEFAULT_ITERATIONS,
            host: "127.0.0.1".to_string(),
            port: 8080,
            miner_address: None,
        }
    }
}

impl NodeConfig {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = NodeConfig::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(value) = get("BITSCOIN_DIFFICULTY") {
            let difficulty = value
                .parse::<u32>()
                .map_err(|e| invalid("BITSCOIN_DIFFICULTY", &value, e))?;
            if !(1..=MAX_DIFFICULTY).contains(&difficulty) {
                return Err(invalid(
                    "BITSCOIN_DIFFICULTY",
                    &value,
                    format!("must be between 1 and {}", MAX_DIFFICULTY),
                ));
            }
            config.difficulty = difficulty;
        }

        if let Some(value) = get("BITSCOIN_REWARD") {
            let reward = value
                .parse::<Amount>()
                .map_err(|e| invalid("BITSCOIN_REWARD", &value, e))?;
            if reward.is_zero() {
                return Err(invalid("BITSCOIN_REWARD", &value, "must be positive"));
            }
            config.reward = reward;
        }

        if let Some(value) = get("BITSCOIN_DATA_DIR") {
            config.data_dir = PathBuf::from(value);
            config.wallet_file = config.data_dir.join("bitscoin.dat");
        }

        if let Some(value) = get("BITSCOIN_WALLET_FILE") {
            config.wallet_file = PathBuf::from(value);
        }

        config.wallet_passphrase = get("BITSCOIN_WALLET_PASSPHRASE");

        if let Some(value) = get("BITSCOIN_KDF_ITERATIONS") {
            let iterations = value
                .parse::<u32>()
                .map_err(|e| invalid("BITSCOIN_KDF_ITERATIONS", &value, e))?;
            if iterations == 0 {
                return Err(invalid("BITSCOIN_KDF_ITERATIONS", &value, "must be positive"));
            }
            config.kdf_iterations = iterations;
        }

        if let Some(value) = get("BITSCOIN_HOST") {
            config.host = value;
        }

        if let Some(value) = get("BITSCOIN_PORT") {
            config.port = value
                .parse::<u16>()
                .map_err(|e| invalid("BITSCOIN_PORT", &value, e))?;
        }

        if let Some(value) = get("BITSCOIN_MINER_ADDRESS") {
            let address = value
                .parse::<Address>()
                .map_err(|e| invalid("BITSCOIN_MINER_ADDRESS", &value, e))?;
            config.miner_address = Some(address);
        }

        Ok(config)
    }

    /// Directory holding the block database
    pub fn chain_dir(&self) -> PathBuf {
        self.data_dir.join("chain")
    }
}

fn invalid(key: &'static str, value: &str, reason: impl fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
