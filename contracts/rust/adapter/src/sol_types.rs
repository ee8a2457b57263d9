//! ABI bindings for the contracts touched by the upgrade jobs.
//!
//! Only the functions the deployer calls are declared. Creation bytecode is not embedded here,
//! it is loaded from the compiler output at deploy time.

#![allow(non_camel_case_types, non_snake_case, clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// OpenZeppelin `ProxyAdmin` owning every transparent proxy of the protocol.
    #[sol(rpc)]
    contract ProxyAdmin {
        function upgrade(address proxy, address implementation) external;
    }

    /// Protocol governance, the registry of contract and asset guards.
    #[sol(rpc)]
    contract Governance {
        function setContractGuard(address extContract, address guardAddress) external;
    }

    #[sol(rpc)]
    contract OwnableUpgradeable {
        function transferOwnership(address newOwner) external;
    }

    contract AssetHandler {
        struct Asset {
            address asset;
            uint16 assetType;
            address aggregator;
        }

        function initialize(Asset[] memory assets) external;
    }

    contract DhedgeStakingV2 {
        function initialize(address dhtAddress) external;
        function implInitializer() external;
        function setTokenUriGenerator(address tokenUriGenerator) external;
        function configurePool(address pool, uint256 cap) external;
    }

    /// OpenZeppelin v5 `Initializable` custom error.
    error InvalidInitialization();

    #[sol(rpc)]
    interface IVelodromeCLFactory {
        function getPool(address tokenA, address tokenB, int24 tickSpacing) external view returns (address pool);
    }

    #[sol(rpc)]
    interface IVelodromeCLPool {
        function slot0()
            external
            view
            returns (
                uint160 sqrtPriceX96,
                int24 tick,
                uint16 observationIndex,
                uint16 observationCardinality,
                uint16 observationCardinalityNext,
                bool unlocked
            );
    }
}
