//! Every side effect of a job goes through an [`Executor`].
//!
//! [`DryRunExecutor`] only logs what would happen and hands out placeholder addresses, so a
//! dry run never touches the chain, the transaction service or the disk. [`LiveExecutor`]
//! performs the actions through a [`Chain`], a [`Proposer`] and a [`Verifier`].

use std::path::Path;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use vault_contract_adapter::evm::RevertKind;

use crate::{
    chain::{Chain, ProxyDeployment},
    guards::{self, ContractGuardRecord, GuardFileError},
    proposals::{ProposalReceipt, ProposedTx, Proposer},
    verify::{try_verify, Verifier},
    Artifact, Contract,
};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The initializer was already run. Jobs re-running an initializer treat this as success.
    #[error("contract is already initialized")]
    AlreadyInitialized,

    #[error("execution reverted: {reason}")]
    Reverted { reason: String },

    #[error("{0:#x} is not an EIP-1967 proxy")]
    NotAProxy(Address),

    #[error("no deployable artifact for {0}")]
    NoArtifact(Contract),

    #[error("artifact {artifact}: {message}")]
    Artifact { artifact: Artifact, message: String },

    #[error("proposal failed: {0}")]
    Proposal(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    GuardFile(#[from] GuardFileError),
}

impl From<RevertKind> for ExecutionError {
    fn from(kind: RevertKind) -> Self {
        match kind {
            RevertKind::AlreadyInitialized => ExecutionError::AlreadyInitialized,
            RevertKind::Reason(reason) => ExecutionError::Reverted { reason },
            RevertKind::Unknown(data) => ExecutionError::Reverted {
                reason: format!("custom error {data}"),
            },
        }
    }
}

fn artifact_of(contract: Contract) -> Result<Artifact, ExecutionError> {
    contract
        .artifact()
        .ok_or(ExecutionError::NoArtifact(contract))
}

#[async_trait]
pub trait Executor: Send {
    /// Whether actions are actually performed.
    fn is_live(&self) -> bool;

    /// Deploy `contract` with ABI-encoded constructor arguments.
    async fn deploy(
        &mut self,
        contract: Contract,
        constructor_args: Bytes,
    ) -> Result<Address, ExecutionError>;

    /// Deploy `contract` behind a transparent proxy owned by `admin`, calling `init_data` on it.
    async fn deploy_proxy(
        &mut self,
        contract: Contract,
        admin: Address,
        init_data: Bytes,
    ) -> Result<ProxyDeployment, ExecutionError>;

    /// Deploy a new implementation of `contract` for the existing `proxy`.
    async fn prepare_upgrade(
        &mut self,
        contract: Contract,
        proxy: Address,
    ) -> Result<Address, ExecutionError>;

    /// Send a transaction from the deployer.
    async fn send(
        &mut self,
        to: Address,
        data: Bytes,
        description: &str,
    ) -> Result<(), ExecutionError>;

    /// Hand a governance transaction to the proposer.
    async fn propose(&mut self, tx: ProposedTx) -> Result<(), ExecutionError>;

    /// Verify source code of a deployed contract. Failures are logged, never returned.
    async fn verify(&mut self, address: Address, contract: Contract, constructor_args: Bytes);

    /// Upsert a guard into the guard file at `path`.
    async fn record_guard(
        &mut self,
        path: &Path,
        record: ContractGuardRecord,
    ) -> Result<(), ExecutionError>;
}

/// Logs intended actions instead of performing them.
#[derive(Clone, Debug, Default)]
pub struct DryRunExecutor {
    actions: Vec<String>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything that would have been done, in order.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    fn log(&mut self, action: String) {
        tracing::info!("[dry run] {action}");
        self.actions.push(action);
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    fn is_live(&self) -> bool {
        false
    }

    async fn deploy(
        &mut self,
        contract: Contract,
        _constructor_args: Bytes,
    ) -> Result<Address, ExecutionError> {
        let artifact = artifact_of(contract)?;
        self.log(format!("deploy {}", artifact.qualified_name()));
        Ok(Address::random())
    }

    async fn deploy_proxy(
        &mut self,
        contract: Contract,
        admin: Address,
        _init_data: Bytes,
    ) -> Result<ProxyDeployment, ExecutionError> {
        let artifact = artifact_of(contract)?;
        self.log(format!(
            "deploy {} behind a proxy administered by {admin:#x}",
            artifact.qualified_name()
        ));
        Ok(ProxyDeployment {
            proxy: Address::random(),
            implementation: Address::random(),
        })
    }

    async fn prepare_upgrade(
        &mut self,
        contract: Contract,
        proxy: Address,
    ) -> Result<Address, ExecutionError> {
        let artifact = artifact_of(contract)?;
        self.log(format!(
            "prepare upgrade of {proxy:#x} to {}",
            artifact.qualified_name()
        ));
        Ok(Address::random())
    }

    async fn send(
        &mut self,
        to: Address,
        _data: Bytes,
        description: &str,
    ) -> Result<(), ExecutionError> {
        self.log(format!("send {description} to {to:#x}"));
        Ok(())
    }

    async fn propose(&mut self, tx: ProposedTx) -> Result<(), ExecutionError> {
        self.log(format!("propose {} to {:#x}", tx.description, tx.target));
        Ok(())
    }

    async fn verify(&mut self, address: Address, contract: Contract, _constructor_args: Bytes) {
        self.log(format!("verify {contract} at {address:#x}"));
    }

    async fn record_guard(
        &mut self,
        path: &Path,
        record: ContractGuardRecord,
    ) -> Result<(), ExecutionError> {
        self.log(format!(
            "record {} for {:#x} in {}",
            record.guard_name,
            record.contract_address,
            path.display()
        ));
        Ok(())
    }
}

/// Performs actions on a real chain.
#[derive(Debug)]
pub struct LiveExecutor<C, P, V> {
    chain: C,
    proposer: P,
    verifier: V,
}

impl<C: Chain, P: Proposer, V: Verifier> LiveExecutor<C, P, V> {
    pub fn new(chain: C, proposer: P, verifier: V) -> Self {
        Self {
            chain,
            proposer,
            verifier,
        }
    }

    pub fn proposer(&self) -> &P {
        &self.proposer
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }
}

#[async_trait]
impl<C: Chain, P: Proposer, V: Verifier> Executor for LiveExecutor<C, P, V> {
    fn is_live(&self) -> bool {
        true
    }

    async fn deploy(
        &mut self,
        contract: Contract,
        constructor_args: Bytes,
    ) -> Result<Address, ExecutionError> {
        let artifact = artifact_of(contract)?;
        let address = self.chain.deploy(artifact, constructor_args).await?;
        tracing::info!("{contract} deployed at {address:#x}");
        Ok(address)
    }

    async fn deploy_proxy(
        &mut self,
        contract: Contract,
        admin: Address,
        init_data: Bytes,
    ) -> Result<ProxyDeployment, ExecutionError> {
        let artifact = artifact_of(contract)?;
        let deployment = self.chain.deploy_proxy(artifact, admin, init_data).await?;
        tracing::info!(
            "{contract} proxy deployed at {:#x}, implementation at {:#x}",
            deployment.proxy,
            deployment.implementation
        );
        Ok(deployment)
    }

    async fn prepare_upgrade(
        &mut self,
        contract: Contract,
        proxy: Address,
    ) -> Result<Address, ExecutionError> {
        let artifact = artifact_of(contract)?;
        let implementation = self.chain.prepare_upgrade(proxy, artifact).await?;
        tracing::info!("{contract} implementation deployed at {implementation:#x}");
        Ok(implementation)
    }

    async fn send(
        &mut self,
        to: Address,
        data: Bytes,
        description: &str,
    ) -> Result<(), ExecutionError> {
        tracing::info!("sending {description} to {to:#x}");
        let tx_hash = self.chain.send(to, data).await?;
        tracing::info!(%tx_hash, "{description} mined");
        Ok(())
    }

    async fn propose(&mut self, tx: ProposedTx) -> Result<(), ExecutionError> {
        match self.proposer.propose(&tx).await {
            Ok(ProposalReceipt::Queued {
                safe_tx_hash,
                nonce,
            }) => {
                tracing::info!(%safe_tx_hash, nonce, "proposed {}", tx.description);
                Ok(())
            },
            Ok(ProposalReceipt::Executed { tx_hash }) => {
                tracing::info!(%tx_hash, "executed {}", tx.description);
                Ok(())
            },
            Err(err) => {
                tracing::error!("proposing {} failed: {err:#}", tx.description);
                Err(ExecutionError::Proposal(format!("{err:#}")))
            },
        }
    }

    async fn verify(&mut self, address: Address, contract: Contract, constructor_args: Bytes) {
        let Some(artifact) = contract.artifact() else {
            tracing::warn!("cannot verify {contract}: no artifact");
            return;
        };
        try_verify(
            &self.verifier,
            address,
            &artifact.qualified_name(),
            &constructor_args,
        )
        .await;
    }

    async fn record_guard(
        &mut self,
        path: &Path,
        record: ContractGuardRecord,
    ) -> Result<(), ExecutionError> {
        guards::upsert_guard_file(path, record)?;
        Ok(())
    }
}
