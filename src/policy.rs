//! Consensus policy constants, loadable from an optional TOML file.
//!
//! Defaults come from `crate::constants`; a `lumen.toml` in the data
//! directory can override individual values (mainly useful for test
//! networks with shorter proofs and verification windows).

use std::path::Path;

use serde::Deserialize;

use crate::constants;

/// Consensus policy parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Number of dense suffix headers in a chain proof.
    pub k: usize,
    /// Superchain quality parameter for proof scoring.
    pub m: usize,
    /// Backward-replay depth before a sync is complete.
    pub num_blocks_verification: u32,
    /// Sliding window for difficulty retargeting.
    pub difficulty_block_window: u32,
    /// Target block interval in seconds.
    pub block_time_secs: u64,
    /// Flat per-block miner reward.
    pub block_reward: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            k: constants::K,
            m: constants::M,
            num_blocks_verification: constants::NUM_BLOCKS_VERIFICATION,
            difficulty_block_window: constants::DIFFICULTY_BLOCK_WINDOW,
            block_time_secs: constants::BLOCK_TIME_SECS,
            block_reward: constants::BLOCK_REWARD,
        }
    }
}

impl Policy {
    /// Load policy overrides from `lumen.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("lumen.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(policy) => {
                    tracing::info!("Loaded policy from {}", config_path.display());
                    policy
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
