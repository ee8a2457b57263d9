use alloy::{
    primitives::{Address, U256},
    providers::Provider,
};
use anyhow::Result;
use derive_more::Display;

pub mod chain;
pub mod config;
pub mod executor;
pub mod guards;
pub mod jobs;
pub mod pool;
pub mod proposals;
pub mod provider;
pub mod runner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod verify;
pub mod versions;

pub use executor::{DryRunExecutor, ExecutionError, Executor, LiveExecutor};
pub use runner::{JobRunner, JobRunnerBuilder, RunError};
pub use versions::{VersionPatch, VersionRecord, VersionStore};

/// EIP-1967 implementation slot, `keccak256("eip1967.proxy.implementation") - 1`.
pub const IMPLEMENTATION_SLOT: &str =
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

/// Logical name of a contract in the versions file.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Contract {
    #[display("Governance")]
    Governance,
    #[display("AssetHandler")]
    AssetHandler,
    #[display("AssetHandlerProxy")]
    AssetHandlerProxy,
    #[display("USDPriceAggregator")]
    UsdPriceAggregator,
    #[display("DhedgeStakingV2NFTJson")]
    DhedgeStakingV2NftJson,
    #[display("DhedgeStakingV2")]
    DhedgeStakingV2,
    #[display("DhedgeStakingV2Proxy")]
    DhedgeStakingV2Proxy,
    #[display("AaveLendingPoolGuardV3")]
    AaveLendingPoolGuardV3,
    #[display("AaveIncentivesControllerV3Guard")]
    AaveIncentivesControllerV3Guard,
    #[display("VelodromeGaugeContractGuard")]
    VelodromeGaugeContractGuard,
}

/// A compiled contract, identified by source file and contract name.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("{source}:{name}")]
pub struct Artifact {
    pub source: &'static str,
    pub name: &'static str,
}

impl Artifact {
    pub const fn new(source: &'static str, name: &'static str) -> Self {
        Self { source, name }
    }

    /// `path/to/File.sol:Name`, the form explorers expect.
    pub fn qualified_name(&self) -> String {
        self.to_string()
    }

    /// Base name of the source file, e.g. `AssetHandler.sol`.
    pub fn file_name(&self) -> &'static str {
        self.source.rsplit('/').next().unwrap_or(self.source)
    }
}

pub const TRANSPARENT_PROXY: Artifact = Artifact::new(
    "@openzeppelin/contracts/proxy/transparent/TransparentUpgradeableProxy.sol",
    "TransparentUpgradeableProxy",
);

impl Contract {
    /// Artifact deployed under this name, `None` for contracts this tool never deploys.
    pub fn artifact(self) -> Option<Artifact> {
        let artifact = match self {
            Contract::Governance | Contract::DhedgeStakingV2NftJson => return None,
            Contract::AssetHandler => {
                Artifact::new("contracts/priceAggregators/AssetHandler.sol", "AssetHandler")
            },
            Contract::UsdPriceAggregator => Artifact::new(
                "contracts/priceAggregators/USDPriceAggregator.sol",
                "USDPriceAggregator",
            ),
            Contract::DhedgeStakingV2 => Artifact::new(
                "contracts/stakingv2/DhedgeStakingV2.sol",
                "DhedgeStakingV2",
            ),
            Contract::AaveLendingPoolGuardV3 => Artifact::new(
                "contracts/guards/contractGuards/AaveLendingPoolGuardV3L2Pool.sol",
                "AaveLendingPoolGuardV3L2Pool",
            ),
            Contract::AaveIncentivesControllerV3Guard => Artifact::new(
                "contracts/guards/contractGuards/AaveIncentivesControllerV3Guard.sol",
                "AaveIncentivesControllerV3Guard",
            ),
            Contract::VelodromeGaugeContractGuard => Artifact::new(
                "contracts/guards/contractGuards/velodrome/VelodromeGaugeContractGuard.sol",
                "VelodromeGaugeContractGuard",
            ),
            Contract::AssetHandlerProxy | Contract::DhedgeStakingV2Proxy => TRANSPARENT_PROXY,
        };
        Some(artifact)
    }
}

/// Implementation address stored in the EIP-1967 slot of `addr`, zero if it isn't a proxy.
pub async fn implementation_address(provider: impl Provider, addr: Address) -> Result<Address> {
    let slot = U256::from_str_radix(IMPLEMENTATION_SLOT, 16)?;
    let storage = provider.get_storage_at(addr, slot).await?;
    Ok(Address::from_slice(&storage.to_be_bytes_vec()[12..]))
}

/// helper function to decide if the contract at given address `addr` is a proxy contract
pub async fn is_proxy_contract(provider: impl Provider, addr: Address) -> Result<bool> {
    // when the implementation address is not equal to zero, it's a proxy
    Ok(implementation_address(provider, addr).await? != Address::ZERO)
}
