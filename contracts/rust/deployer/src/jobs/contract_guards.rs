use alloy::{
    primitives::{Address, Bytes},
    sol_types::SolCall,
};
use anyhow::Result;
use async_trait::async_trait;
use vault_contract_adapter::sol_types::Governance;

use super::{Job, JobContext};
use crate::{
    config::AddressRegistry,
    executor::{ExecutionError, Executor},
    guards::ContractGuardRecord,
    proposals::ProposedTx,
    versions::VersionPatch,
    Contract,
};

/// How a deployed guard gets wired to the contract it guards.
#[derive(Clone, Copy, Debug)]
pub enum GuardTarget {
    /// Register the guard for one contract through governance and record it in the guard file.
    Register {
        /// The guarded contract, if the network has it.
        target: fn(&AddressRegistry) -> Option<Address>,
        /// Description stored in the guard file.
        description: &'static str,
        /// Description of the `setContractGuard` proposal.
        proposal: &'static str,
    },
    /// Deploy only. The guard is wired to its targets elsewhere.
    DeployOnly {
        enabled: fn(&AddressRegistry) -> bool,
    },
}

/// Deploys a contract guard and, depending on the guard, registers it with governance.
#[derive(Clone, Copy, Debug)]
pub struct ContractGuardJob {
    name: &'static str,
    guard: Contract,
    /// What has to be configured for the job to run, for the skip warning.
    requires: &'static str,
    target: GuardTarget,
}

impl ContractGuardJob {
    pub fn aave_v3_lending_pool() -> Self {
        Self {
            name: "aave-v3-lending-pool-guard",
            guard: Contract::AaveLendingPoolGuardV3,
            requires: "aave_v3 lending_pool",
            target: GuardTarget::Register {
                target: |registry| registry.aave_v3().map(|aave| aave.lending_pool),
                description: "Aave V3 Lending Pool contract",
                proposal: "setContractGuard for Aave V3 Lending Pool",
            },
        }
    }

    pub fn aave_v3_incentives_controller() -> Self {
        Self {
            name: "aave-v3-incentives-controller-guard",
            guard: Contract::AaveIncentivesControllerV3Guard,
            requires: "aave_v3 incentives_controller",
            target: GuardTarget::Register {
                target: |registry| registry.aave_v3().and_then(|aave| aave.incentives_controller),
                description: "Aave Incentives Controller V3 contract",
                proposal: "setContractGuard for AaveIncentivesControllerV3Guard",
            },
        }
    }

    pub fn velodrome_gauge() -> Self {
        Self {
            name: "velodrome-gauge-guard",
            guard: Contract::VelodromeGaugeContractGuard,
            requires: "velodrome_cl",
            target: GuardTarget::DeployOnly {
                enabled: |registry| registry.velodrome_cl().is_some(),
            },
        }
    }
}

#[async_trait]
impl Job for ContractGuardJob {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        ctx: &JobContext<'_>,
        exec: &mut dyn Executor,
        patch: &mut VersionPatch,
    ) -> Result<()> {
        let registration = match self.target {
            GuardTarget::Register {
                target,
                description,
                proposal,
            } => {
                let Some(target) = target(ctx.addresses) else {
                    tracing::warn!("{} not configured for {}: skipping.", self.requires, self.name);
                    return Ok(());
                };
                let Some(governance) = ctx.old(Contract::Governance) else {
                    tracing::warn!(
                        "Governance not in {} for {}: skipping.",
                        ctx.config.old_tag,
                        self.name
                    );
                    return Ok(());
                };
                Some((target, governance, description, proposal))
            },
            GuardTarget::DeployOnly { enabled } => {
                if !enabled(ctx.addresses) {
                    tracing::warn!("{} not configured for {}: skipping.", self.requires, self.name);
                    return Ok(());
                }
                None
            },
        };

        let artifact = self
            .guard
            .artifact()
            .ok_or(ExecutionError::NoArtifact(self.guard))?;
        tracing::info!("Will deploy {}", artifact.name);
        let guard_address = exec.deploy(self.guard, Bytes::new()).await?;
        patch.set(self.guard, guard_address);
        exec.verify(guard_address, self.guard, Bytes::new()).await;

        if let Some((target, governance, description, proposal)) = registration {
            let data = Governance::setContractGuardCall {
                extContract: target,
                guardAddress: guard_address,
            }
            .abi_encode();
            exec.propose(ProposedTx::new(governance, data, proposal))
                .await?;

            let record =
                ContractGuardRecord::new(target, artifact.name, guard_address, description);
            exec.record_guard(&ctx.filenames.contract_guards_file_name, record)
                .await?;
        }
        Ok(())
    }
}
