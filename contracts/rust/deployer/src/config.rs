//! Run configuration and the static per-network address registry.

use std::{fs, path::Path, path::PathBuf};

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use url::Url;

/// What a run does and which version it writes.
#[derive(Clone, Debug, Default, Args)]
pub struct UpgradeConfig {
    /// Deploy, send and propose for real. Without this flag the run only logs what it would do.
    #[clap(long, env = "UPGRADE_EXECUTE")]
    pub execute: bool,

    /// Tag of the currently deployed release.
    #[clap(long, env = "UPGRADE_OLD_TAG")]
    pub old_tag: String,

    /// Tag this run records its deployments under.
    #[clap(long, env = "UPGRADE_NEW_TAG")]
    pub new_tag: String,

    /// Start proposing at `--use-nonce` instead of asking the transaction service.
    #[clap(long, env = "UPGRADE_RESTART_NONCE")]
    pub restart_nonce: bool,

    /// Nonce of the first proposal when `--restart-nonce` is set.
    #[clap(long, env = "UPGRADE_USE_NONCE", default_value = "0")]
    pub use_nonce: u64,
}

impl UpgradeConfig {
    pub fn new(old_tag: impl Into<String>, new_tag: impl Into<String>, execute: bool) -> Self {
        Self {
            execute,
            old_tag: old_tag.into(),
            new_tag: new_tag.into(),
            ..Default::default()
        }
    }
}

/// Files the jobs read and write.
#[derive(Clone, Debug, Args)]
pub struct FileNames {
    #[clap(long, env = "UPGRADE_VERSIONS_FILE", default_value = "publish/versions.json")]
    pub versions_file_name: PathBuf,

    #[clap(long, env = "UPGRADE_ASSETS_FILE", default_value = "config/assets.json")]
    pub assets_file_name: PathBuf,

    #[clap(
        long,
        env = "UPGRADE_GOVERNANCE_NAMES_FILE",
        default_value = "config/governanceNames.json"
    )]
    pub governance_names_file_name: PathBuf,

    #[clap(
        long,
        env = "UPGRADE_CONTRACT_GUARDS_FILE",
        default_value = "config/contractGuards.json"
    )]
    pub contract_guards_file_name: PathBuf,

    #[clap(
        long,
        env = "UPGRADE_ASSET_GUARDS_FILE",
        default_value = "config/assetGuards.json"
    )]
    pub asset_guards_file_name: PathBuf,

    /// Guards queued for deprecation, picked up by a separate script.
    #[clap(long, env = "UPGRADE_DEPRECATED_CONTRACT_GUARDS_FILE")]
    pub deprecated_contract_guards_file_name: Option<PathBuf>,

    #[clap(long, env = "UPGRADE_EXTERNAL_ASSET_FILE")]
    pub external_asset_file_name: Option<PathBuf>,
}

impl Default for FileNames {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

impl FileNames {
    /// Default file layout rooted at `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            versions_file_name: dir.join("publish/versions.json"),
            assets_file_name: dir.join("config/assets.json"),
            governance_names_file_name: dir.join("config/governanceNames.json"),
            contract_guards_file_name: dir.join("config/contractGuards.json"),
            asset_guards_file_name: dir.join("config/assetGuards.json"),
            deprecated_contract_guards_file_name: None,
            external_asset_file_name: None,
        }
    }
}

/// Addresses needed to route governance transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeTxProperties {
    /// The Safe that owns the protocol.
    pub protocol_dao_address: Address,
    #[serde(default)]
    pub protocol_treasury_address: Option<Address>,
    pub proxy_admin_address: Address,
    #[serde(default)]
    pub gnosis_multi_send_address: Option<Address>,
    /// Base URL of the Safe transaction service.
    #[serde(default)]
    pub gnosis_api: Option<Url>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assets {
    #[serde(default)]
    pub native_asset_wrapper: Option<Address>,
    #[serde(default)]
    pub weth: Option<Address>,
    #[serde(default)]
    pub usdc: Option<Address>,
    #[serde(default)]
    pub dai: Option<Address>,
    #[serde(default)]
    pub susd: Option<Address>,
    #[serde(default)]
    pub dht: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AaveV3Config {
    pub lending_pool: Address,
    #[serde(default)]
    pub incentives_controller: Option<Address>,
    #[serde(default)]
    pub protocol_data_provider: Option<Address>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingPool {
    pub pool: Address,
    pub cap: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingV2Config {
    #[serde(default)]
    pub whitelisted_pools: Vec<StakingPool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelodromeClConfig {
    pub nonfungible_position_manager: Address,
    pub factory: Address,
    pub voter: Address,
    #[serde(default)]
    pub enabled_gauges: Vec<Address>,
}

/// One integration configured on a network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "feature", rename_all = "snake_case")]
pub enum FeatureConfig {
    AaveV3(AaveV3Config),
    StakingV2(StakingV2Config),
    VelodromeCl(VelodromeClConfig),
}

/// Static addresses of a network. Read once, never written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRegistry {
    pub propose_tx_properties: ProposeTxProperties,
    #[serde(default)]
    pub assets: Assets,
    #[serde(default)]
    pub features: Vec<FeatureConfig>,
}

impl AddressRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read address registry {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("malformed address registry {}", path.display()))
    }

    pub fn new(propose_tx_properties: ProposeTxProperties) -> Self {
        Self {
            propose_tx_properties,
            assets: Assets::default(),
            features: vec![],
        }
    }

    pub fn aave_v3(&self) -> Option<&AaveV3Config> {
        self.features.iter().find_map(|f| match f {
            FeatureConfig::AaveV3(c) => Some(c),
            _ => None,
        })
    }

    pub fn staking_v2(&self) -> Option<&StakingV2Config> {
        self.features.iter().find_map(|f| match f {
            FeatureConfig::StakingV2(c) => Some(c),
            _ => None,
        })
    }

    pub fn velodrome_cl(&self) -> Option<&VelodromeClConfig> {
        self.features.iter().find_map(|f| match f {
            FeatureConfig::VelodromeCl(c) => Some(c),
            _ => None,
        })
    }
}
