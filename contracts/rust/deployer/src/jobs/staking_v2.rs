use alloy::{primitives::Bytes, sol_types::SolCall};
use anyhow::Result;
use async_trait::async_trait;
use vault_contract_adapter::sol_types::{DhedgeStakingV2, OwnableUpgradeable, ProxyAdmin};

use super::{Job, JobContext};
use crate::{
    executor::{ExecutionError, Executor},
    proposals::ProposedTx,
    versions::VersionPatch,
    Contract,
};

/// Deploys DHT staking v2 behind a proxy, or upgrades it.
#[derive(Clone, Copy, Debug, Default)]
pub struct StakingV2Job;

#[async_trait]
impl Job for StakingV2Job {
    fn name(&self) -> &'static str {
        "staking-v2"
    }

    async fn run(
        &self,
        ctx: &JobContext<'_>,
        exec: &mut dyn Executor,
        patch: &mut VersionPatch,
    ) -> Result<()> {
        let props = &ctx.addresses.propose_tx_properties;
        let impl_initializer = Bytes::from(DhedgeStakingV2::implInitializerCall {}.abi_encode());

        if let Some(proxy) = ctx.latest(Contract::DhedgeStakingV2Proxy) {
            tracing::info!("Will upgrade DhedgeStakingV2 at {proxy:#x}");
            let implementation = exec
                .prepare_upgrade(Contract::DhedgeStakingV2, proxy)
                .await?;
            patch.set(Contract::DhedgeStakingV2Proxy, proxy);
            patch.set(Contract::DhedgeStakingV2, implementation);

            match exec
                .send(
                    implementation,
                    impl_initializer,
                    "DhedgeStakingV2 implInitializer",
                )
                .await
            {
                Ok(()) => {},
                Err(ExecutionError::AlreadyInitialized) => {
                    tracing::info!("Implementation is initialized.")
                },
                Err(err) => return Err(err.into()),
            }
            exec.verify(implementation, Contract::DhedgeStakingV2, Bytes::new())
                .await;

            let upgrade = ProxyAdmin::upgradeCall {
                proxy,
                implementation,
            }
            .abi_encode();
            exec.propose(ProposedTx::new(
                props.proxy_admin_address,
                upgrade,
                "Upgrade DhedgeStakingV2",
            ))
            .await?;
            return Ok(());
        }

        let Some(nft_json) = ctx.new_tag(Contract::DhedgeStakingV2NftJson) else {
            tracing::warn!(
                "DhedgeStakingV2NFTJson not in {}, deploy it first: skipping staking-v2",
                ctx.config.new_tag
            );
            return Ok(());
        };
        let Some(staking) = ctx.addresses.staking_v2() else {
            tracing::warn!("staking_v2 not configured: skipping staking-v2");
            return Ok(());
        };
        let Some(dht) = ctx.addresses.assets.dht else {
            tracing::warn!("dht asset not configured: skipping staking-v2");
            return Ok(());
        };

        tracing::info!("Will deploy DhedgeStakingV2");
        let init = DhedgeStakingV2::initializeCall { dhtAddress: dht }.abi_encode();
        let deployment = exec
            .deploy_proxy(
                Contract::DhedgeStakingV2,
                props.proxy_admin_address,
                init.into(),
            )
            .await?;
        patch.set(Contract::DhedgeStakingV2Proxy, deployment.proxy);
        patch.set(Contract::DhedgeStakingV2, deployment.implementation);
        exec.verify(
            deployment.implementation,
            Contract::DhedgeStakingV2,
            Bytes::new(),
        )
        .await;

        exec.send(
            deployment.implementation,
            impl_initializer,
            "DhedgeStakingV2 implInitializer",
        )
        .await?;

        let uri_generator = DhedgeStakingV2::setTokenUriGeneratorCall {
            tokenUriGenerator: nft_json,
        }
        .abi_encode();
        exec.send(deployment.proxy, uri_generator.into(), "setTokenUriGenerator")
            .await?;

        for pool in &staking.whitelisted_pools {
            let configure = DhedgeStakingV2::configurePoolCall {
                pool: pool.pool,
                cap: pool.cap,
            }
            .abi_encode();
            exec.send(deployment.proxy, configure.into(), "configurePool")
                .await?;
            tracing::info!(pool = %pool.pool, cap = %pool.cap, "pool configured");
        }

        let transfer = OwnableUpgradeable::transferOwnershipCall {
            newOwner: props.protocol_dao_address,
        }
        .abi_encode();
        exec.send(
            deployment.proxy,
            transfer.into(),
            "transfer DhedgeStakingV2 ownership",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use vault_contract_adapter::evm::RevertKind;

    use super::*;
    use crate::{
        config::{FeatureConfig, StakingPool, StakingV2Config},
        executor::LiveExecutor,
        testing::{run_job, Fixture, MockChain, RecordingProposer, RecordingVerifier},
    };

    fn staking_fixture() -> Fixture {
        Fixture::new()
            .with_new(Contract::DhedgeStakingV2NftJson, Address::repeat_byte(0x4e))
            .with_registry(|registry| {
                registry.assets.dht = Some(Address::repeat_byte(0xd7));
                registry.features.push(FeatureConfig::StakingV2(StakingV2Config {
                    whitelisted_pools: vec![
                        StakingPool {
                            pool: Address::repeat_byte(0x01),
                            cap: U256::from(1000),
                        },
                        StakingPool {
                            pool: Address::repeat_byte(0x02),
                            cap: U256::from(2000),
                        },
                    ],
                }));
            })
    }

    #[tokio::test]
    async fn test_first_deploy_configures_and_hands_over() {
        let fixture = staking_fixture();
        let chain = MockChain::new();
        let mut exec = LiveExecutor::new(
            chain.clone(),
            RecordingProposer::default(),
            RecordingVerifier::default(),
        );

        let patch = run_job(&StakingV2Job, &fixture.ctx(), &mut exec)
            .await
            .unwrap();
        let proxy = patch.get(Contract::DhedgeStakingV2Proxy).unwrap();
        let implementation = patch.get(Contract::DhedgeStakingV2).unwrap();

        let sent = chain.sent();
        let targets: Vec<_> = sent.iter().map(|(to, _)| *to).collect();
        assert_eq!(
            targets,
            vec![implementation, proxy, proxy, proxy, proxy]
        );
        let selectors: Vec<_> = sent.iter().map(|(_, data)| data[..4].to_vec()).collect();
        assert_eq!(
            selectors,
            vec![
                DhedgeStakingV2::implInitializerCall::SELECTOR.to_vec(),
                DhedgeStakingV2::setTokenUriGeneratorCall::SELECTOR.to_vec(),
                DhedgeStakingV2::configurePoolCall::SELECTOR.to_vec(),
                DhedgeStakingV2::configurePoolCall::SELECTOR.to_vec(),
                OwnableUpgradeable::transferOwnershipCall::SELECTOR.to_vec(),
            ]
        );
    }

    #[rstest]
    #[case::no_nft_json(|f: Fixture| Fixture { versions: Fixture::new().versions, ..f })]
    #[case::no_feature(|f: Fixture| f.with_registry(|r| r.features.clear()))]
    #[case::no_dht(|f: Fixture| f.with_registry(|r| r.assets.dht = None))]
    #[tokio::test]
    async fn test_first_deploy_skips_without_prerequisites(
        #[case] strip: fn(Fixture) -> Fixture,
    ) {
        let fixture = strip(staking_fixture());
        let chain = MockChain::new();
        let mut exec = LiveExecutor::new(
            chain.clone(),
            RecordingProposer::default(),
            RecordingVerifier::default(),
        );

        let patch = run_job(&StakingV2Job, &fixture.ctx(), &mut exec)
            .await
            .unwrap();
        assert!(patch.is_empty());
        assert!(chain.deployed_artifacts().is_empty());
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_swallows_already_initialized() {
        let proxy = Address::repeat_byte(0x5b);
        let fixture = Fixture::new().with_new(Contract::DhedgeStakingV2Proxy, proxy);
        let chain = MockChain::new()
            .with_proxy(proxy)
            .with_send_failure(
                DhedgeStakingV2::implInitializerCall::SELECTOR,
                RevertKind::AlreadyInitialized,
            );
        let mut exec = LiveExecutor::new(
            chain.clone(),
            RecordingProposer::default(),
            RecordingVerifier::default(),
        );

        let patch = run_job(&StakingV2Job, &fixture.ctx(), &mut exec)
            .await
            .unwrap();
        assert_eq!(patch.get(Contract::DhedgeStakingV2Proxy), Some(proxy));
        assert!(patch.get(Contract::DhedgeStakingV2).is_some());
        assert_eq!(exec.proposer().proposals().len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_aborts_on_other_revert() {
        let proxy = Address::repeat_byte(0x5b);
        let fixture = Fixture::new().with_new(Contract::DhedgeStakingV2Proxy, proxy);
        let chain = MockChain::new().with_proxy(proxy).with_send_failure(
            DhedgeStakingV2::implInitializerCall::SELECTOR,
            RevertKind::Reason("Ownable: caller is not the owner".to_string()),
        );
        let mut exec = LiveExecutor::new(
            chain.clone(),
            RecordingProposer::default(),
            RecordingVerifier::default(),
        );

        let mut patch = VersionPatch::new();
        let err = StakingV2Job
            .run(&fixture.ctx(), &mut exec, &mut patch)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::Reverted { .. })
        ));
        assert!(exec.proposer().proposals().is_empty());
        // the implementation is on chain even though the upgrade stopped
        assert!(patch.get(Contract::DhedgeStakingV2).is_some());
    }

    #[tokio::test]
    async fn test_failed_configure_keeps_proxy() {
        let fixture = staking_fixture();
        let chain = MockChain::new().with_send_failure(
            DhedgeStakingV2::configurePoolCall::SELECTOR,
            RevertKind::Reason("cap too high".to_string()),
        );
        let mut exec = LiveExecutor::new(
            chain.clone(),
            RecordingProposer::default(),
            RecordingVerifier::default(),
        );

        let mut patch = VersionPatch::new();
        StakingV2Job
            .run(&fixture.ctx(), &mut exec, &mut patch)
            .await
            .unwrap_err();

        let proxy = patch.get(Contract::DhedgeStakingV2Proxy).unwrap();
        let admin = fixture.registry.propose_tx_properties.proxy_admin_address;
        assert_eq!(chain.proxy_admin(proxy), Some(admin));
        assert!(patch.get(Contract::DhedgeStakingV2).is_some());
        // ownership was never handed over
        let transfer = OwnableUpgradeable::transferOwnershipCall::SELECTOR;
        assert!(chain.sent().iter().all(|(_, data)| !data.starts_with(&transfer)));
    }
}
