use alloy::{primitives::Bytes, sol_types::SolCall};
use anyhow::Result;
use async_trait::async_trait;
use vault_contract_adapter::sol_types::{AssetHandler, OwnableUpgradeable, ProxyAdmin};

use super::{Job, JobContext};
use crate::{executor::Executor, proposals::ProposedTx, versions::VersionPatch, Contract};

/// Deploys the asset handler behind a proxy, or upgrades the existing one.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssetHandlerJob;

#[async_trait]
impl Job for AssetHandlerJob {
    fn name(&self) -> &'static str {
        "asset-handler"
    }

    async fn run(
        &self,
        ctx: &JobContext<'_>,
        exec: &mut dyn Executor,
        patch: &mut VersionPatch,
    ) -> Result<()> {
        let props = &ctx.addresses.propose_tx_properties;

        if let Some(proxy) = ctx.latest(Contract::AssetHandlerProxy) {
            tracing::info!("Will upgrade AssetHandler at {proxy:#x}");
            let implementation = exec.prepare_upgrade(Contract::AssetHandler, proxy).await?;
            patch.set(Contract::AssetHandlerProxy, proxy);
            patch.set(Contract::AssetHandler, implementation);
            exec.verify(implementation, Contract::AssetHandler, Bytes::new())
                .await;

            let upgrade = ProxyAdmin::upgradeCall {
                proxy,
                implementation,
            }
            .abi_encode();
            exec.propose(ProposedTx::new(
                props.proxy_admin_address,
                upgrade,
                "Upgrade Asset Handler",
            ))
            .await?;
            return Ok(());
        }

        tracing::info!("Will deploy AssetHandler");
        if ctx.latest(Contract::UsdPriceAggregator).is_none() {
            let aggregator = exec
                .deploy(Contract::UsdPriceAggregator, Bytes::new())
                .await?;
            patch.set(Contract::UsdPriceAggregator, aggregator);
            exec.verify(aggregator, Contract::UsdPriceAggregator, Bytes::new())
                .await;
        }

        let init = AssetHandler::initializeCall { assets: vec![] }.abi_encode();
        let deployment = exec
            .deploy_proxy(
                Contract::AssetHandler,
                props.proxy_admin_address,
                init.into(),
            )
            .await?;
        patch.set(Contract::AssetHandlerProxy, deployment.proxy);
        patch.set(Contract::AssetHandler, deployment.implementation);

        let transfer = OwnableUpgradeable::transferOwnershipCall {
            newOwner: props.protocol_dao_address,
        }
        .abi_encode();
        exec.send(
            deployment.proxy,
            transfer.into(),
            "transfer AssetHandler ownership",
        )
        .await?;
        exec.verify(
            deployment.implementation,
            Contract::AssetHandler,
            Bytes::new(),
        )
        .await;
        Ok(())
    }
}
