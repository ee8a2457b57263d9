//! Deploying and calling contracts on a chain.

use std::{fs, path::PathBuf};

use alloy::{
    network::TransactionBuilder,
    primitives::{Address, Bytes, B256},
    providers::Provider,
    rpc::types::{TransactionReceipt, TransactionRequest},
    sol_types::SolValue,
    transports::TransportError,
};
use async_trait::async_trait;
use clap::ValueEnum;
use derive_more::Display;
use serde_json::Value;
use vault_contract_adapter::evm::classify_revert;

use crate::{executor::ExecutionError, is_proxy_contract, Artifact, TRANSPARENT_PROXY};

/// Addresses produced by a proxied deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyDeployment {
    pub proxy: Address,
    pub implementation: Address,
}

#[async_trait]
pub trait Chain: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ExecutionError>;

    /// Deploy `artifact`, appending `constructor_args` to its creation code.
    async fn deploy(
        &self,
        artifact: Artifact,
        constructor_args: Bytes,
    ) -> Result<Address, ExecutionError>;

    /// Deploy `artifact` and a transparent proxy in front of it, initialised with `init_data`.
    async fn deploy_proxy(
        &self,
        artifact: Artifact,
        admin: Address,
        init_data: Bytes,
    ) -> Result<ProxyDeployment, ExecutionError>;

    /// Check that `proxy` is an EIP-1967 proxy and deploy a new implementation for it.
    ///
    /// The proxy itself is not touched, pointing it at the new implementation is up to governance.
    async fn prepare_upgrade(
        &self,
        proxy: Address,
        artifact: Artifact,
    ) -> Result<Address, ExecutionError>;

    /// Send a call and wait for it to be mined.
    async fn send(&self, to: Address, data: Bytes) -> Result<B256, ExecutionError>;
}

/// Compiler whose output layout the artifact directory follows.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, ValueEnum)]
pub enum ArtifactFormat {
    /// `out/<File>.sol/<Name>.json` with `bytecode.object`.
    #[default]
    #[display("foundry")]
    Foundry,
    /// `artifacts/<source path>/<Name>.json` with `bytecode`.
    #[display("hardhat")]
    Hardhat,
}

/// Creation bytecode of compiled contracts.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    format: ArtifactFormat,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, format: ArtifactFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        let file = format!("{}.json", artifact.name);
        match self.format {
            ArtifactFormat::Foundry => self.root.join(artifact.file_name()).join(file),
            ArtifactFormat::Hardhat => self.root.join(artifact.source).join(file),
        }
    }

    pub fn bytecode(&self, artifact: Artifact) -> Result<Bytes, ExecutionError> {
        let err = |message: String| ExecutionError::Artifact { artifact, message };
        let path = self.path(artifact);
        let content = fs::read_to_string(&path)
            .map_err(|e| err(format!("cannot read {}: {e}", path.display())))?;
        let json: Value = serde_json::from_str(&content)
            .map_err(|e| err(format!("malformed {}: {e}", path.display())))?;
        let code = match &json["bytecode"] {
            Value::String(code) => code.as_str(),
            Value::Object(obj) => obj.get("object").and_then(Value::as_str).unwrap_or_default(),
            _ => "",
        };
        if code.contains("__$") {
            return Err(err("bytecode has unlinked libraries".to_string()));
        }
        let code: Bytes = code
            .parse()
            .map_err(|e| err(format!("invalid bytecode: {e}")))?;
        if code.is_empty() {
            return Err(err("no creation bytecode (abstract contract?)".to_string()));
        }
        Ok(code)
    }
}

/// Map a failed RPC call to an [`ExecutionError`], decoding revert data when there is some.
pub fn classify_transport_error(err: TransportError) -> ExecutionError {
    match err.as_error_resp().and_then(|payload| payload.as_revert_data()) {
        Some(data) => classify_revert(&data).into(),
        None => ExecutionError::Transport(err.to_string()),
    }
}

/// [`Chain`] backed by an alloy provider with a wallet.
#[derive(Clone, Debug)]
pub struct AlloyChain<P> {
    provider: P,
    artifacts: ArtifactStore,
}

impl<P: Provider> AlloyChain<P> {
    pub fn new(provider: P, artifacts: ArtifactStore) -> Self {
        Self {
            provider,
            artifacts,
        }
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<TransactionReceipt, ExecutionError> {
        let pending_tx = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(classify_transport_error)?;
        let tx_hash = *pending_tx.tx_hash();
        tracing::info!(%tx_hash, "waiting for tx to be mined");
        let receipt = pending_tx
            .get_receipt()
            .await
            .map_err(|err| ExecutionError::Transport(err.to_string()))?;
        tracing::info!(%receipt.gas_used, %tx_hash, "tx mined");
        if !receipt.status() {
            return Err(ExecutionError::Reverted {
                reason: format!("transaction {tx_hash} reverted"),
            });
        }
        Ok(receipt)
    }
}

#[async_trait]
impl<P: Provider> Chain for AlloyChain<P> {
    async fn chain_id(&self) -> Result<u64, ExecutionError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(classify_transport_error)
    }

    async fn deploy(
        &self,
        artifact: Artifact,
        constructor_args: Bytes,
    ) -> Result<Address, ExecutionError> {
        let mut code = self.artifacts.bytecode(artifact)?.to_vec();
        code.extend_from_slice(&constructor_args);
        tracing::info!("deploying {}", artifact.name);
        let receipt = self
            .submit(TransactionRequest::default().with_deploy_code(code))
            .await?;
        let addr = receipt
            .contract_address
            .ok_or_else(|| ExecutionError::Transport("receipt has no contract address".into()))?;
        tracing::info!("deployed {} at {addr:#x}", artifact.name);
        Ok(addr)
    }

    async fn deploy_proxy(
        &self,
        artifact: Artifact,
        admin: Address,
        init_data: Bytes,
    ) -> Result<ProxyDeployment, ExecutionError> {
        let implementation = self.deploy(artifact, Bytes::new()).await?;
        let args = (implementation, admin, init_data).abi_encode_params();
        let proxy = self.deploy(TRANSPARENT_PROXY, args.into()).await?;
        Ok(ProxyDeployment {
            proxy,
            implementation,
        })
    }

    async fn prepare_upgrade(
        &self,
        proxy: Address,
        artifact: Artifact,
    ) -> Result<Address, ExecutionError> {
        let is_proxy = is_proxy_contract(&self.provider, proxy)
            .await
            .map_err(|err| ExecutionError::Transport(format!("{err:#}")))?;
        if !is_proxy {
            return Err(ExecutionError::NotAProxy(proxy));
        }
        self.deploy(artifact, Bytes::new()).await
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<B256, ExecutionError> {
        let receipt = self
            .submit(TransactionRequest::default().with_to(to).with_input(data))
            .await?;
        Ok(receipt.transaction_hash)
    }
}
