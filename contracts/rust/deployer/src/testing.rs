//! In-memory stand-ins for the chain, the proposer and the verifier, and a versions fixture.

use std::{
    collections::HashMap,
    fs,
    sync::{Arc, Mutex},
};

use alloy::primitives::{Address, Bytes, B256};
use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use vault_contract_adapter::evm::RevertKind;

use crate::{
    chain::{Chain, ProxyDeployment},
    config::{AddressRegistry, FileNames, ProposeTxProperties, UpgradeConfig},
    executor::{ExecutionError, Executor},
    jobs::{Job, JobContext},
    proposals::{ProposalReceipt, ProposedTx, Proposer},
    verify::Verifier,
    versions::{Network, VersionPatch, VersionRecord, VersionStore},
    Artifact, Contract, TRANSPARENT_PROXY,
};

/// Registry with governance addresses set and no features.
pub fn registry() -> AddressRegistry {
    AddressRegistry::new(ProposeTxProperties {
        protocol_dao_address: Address::repeat_byte(0xda),
        protocol_treasury_address: None,
        proxy_admin_address: Address::repeat_byte(0xad),
        gnosis_multi_send_address: None,
        gnosis_api: None,
    })
}

/// Run `job` on an empty patch and return what it recorded.
pub async fn run_job(
    job: &dyn Job,
    ctx: &JobContext<'_>,
    exec: &mut dyn Executor,
) -> Result<VersionPatch> {
    let mut patch = VersionPatch::new();
    job.run(ctx, exec, &mut patch).await?;
    Ok(patch)
}

/// Versions with an old tag `v1` and an empty new tag `v2`, files in a temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub config: UpgradeConfig,
    pub versions: VersionStore,
    pub filenames: FileNames,
    pub registry: AddressRegistry,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let filenames = FileNames::in_dir(dir.path());
        for file in [
            &filenames.versions_file_name,
            &filenames.contract_guards_file_name,
        ] {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).expect("failed to create fixture dirs");
            }
        }

        let network = Network {
            chain_id: 10,
            name: "optimism".to_string(),
        };
        let mut versions = VersionStore::new();
        versions.insert(
            "v1",
            VersionRecord::new(network.clone(), "2024-01-01T00:00:00+00:00"),
        );
        versions.insert("v2", VersionRecord::new(network, "2024-01-01T00:00:00+00:00"));

        Self {
            dir,
            config: UpgradeConfig::new("v1", "v2", true),
            versions,
            filenames,
            registry: registry(),
        }
    }

    fn with_contract(mut self, tag: &str, contract: Contract, address: Address) -> Self {
        let record = self.versions.get_mut(tag).expect("fixture tag missing");
        record
            .contracts
            .insert(contract.to_string(), address.to_checksum(None).into());
        self
    }

    pub fn with_old(self, contract: Contract, address: Address) -> Self {
        self.with_contract("v1", contract, address)
    }

    pub fn with_new(self, contract: Contract, address: Address) -> Self {
        self.with_contract("v2", contract, address)
    }

    pub fn without_new_tag(mut self) -> Self {
        self.versions.remove("v2");
        self
    }

    pub fn with_registry(mut self, f: impl FnOnce(&mut AddressRegistry)) -> Self {
        f(&mut self.registry);
        self
    }

    pub fn ctx(&self) -> JobContext<'_> {
        JobContext {
            config: &self.config,
            versions: &self.versions,
            filenames: &self.filenames,
            addresses: &self.registry,
        }
    }
}

#[derive(Debug, Default)]
struct ChainState {
    next_address: u64,
    deployed: Vec<(Artifact, Address)>,
    /// proxy -> (implementation, admin)
    proxies: HashMap<Address, (Address, Address)>,
    sent: Vec<(Address, Bytes)>,
    send_failures: Vec<([u8; 4], RevertKind)>,
    deploy_failures: Vec<(&'static str, RevertKind)>,
}

/// A chain that hands out sequential addresses and records every call.
///
/// Clones share state, so a test can keep a handle while an executor owns another.
#[derive(Clone, Debug, Default)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().expect("mock chain state poisoned")
    }

    /// Pretend `proxy` is an existing EIP-1967 proxy.
    pub fn with_proxy(self, proxy: Address) -> Self {
        self.state()
            .proxies
            .insert(proxy, (Address::repeat_byte(0xee), Address::ZERO));
        self
    }

    /// Calls whose data starts with `selector` revert with `kind`.
    pub fn with_send_failure(self, selector: [u8; 4], kind: RevertKind) -> Self {
        self.state().send_failures.push((selector, kind));
        self
    }

    /// Deployments of the artifact called `name` revert with `kind`.
    pub fn with_deploy_failure(self, name: &'static str, kind: RevertKind) -> Self {
        self.state().deploy_failures.push((name, kind));
        self
    }

    /// Names of deployed artifacts, in order.
    pub fn deployed_artifacts(&self) -> Vec<&'static str> {
        self.state().deployed.iter().map(|(a, _)| a.name).collect()
    }

    pub fn proxy_admin(&self, proxy: Address) -> Option<Address> {
        self.state().proxies.get(&proxy).map(|(_, admin)| *admin)
    }

    /// Successful calls, in order.
    pub fn sent(&self) -> Vec<(Address, Bytes)> {
        self.state().sent.clone()
    }

    fn deploy_now(&self, artifact: Artifact) -> Result<Address, ExecutionError> {
        let mut state = self.state();
        if let Some((_, kind)) = state
            .deploy_failures
            .iter()
            .find(|(name, _)| *name == artifact.name)
        {
            return Err(kind.clone().into());
        }
        state.next_address += 1;
        let mut bytes = [0u8; 20];
        bytes[..4].copy_from_slice(&[0xc0, 0xde, 0x00, 0x00]);
        bytes[12..].copy_from_slice(&state.next_address.to_be_bytes());
        let address = Address::from(bytes);
        state.deployed.push((artifact, address));
        Ok(address)
    }
}

#[async_trait]
impl Chain for MockChain {
    async fn chain_id(&self) -> Result<u64, ExecutionError> {
        Ok(10)
    }

    async fn deploy(
        &self,
        artifact: Artifact,
        _constructor_args: Bytes,
    ) -> Result<Address, ExecutionError> {
        self.deploy_now(artifact)
    }

    async fn deploy_proxy(
        &self,
        artifact: Artifact,
        admin: Address,
        _init_data: Bytes,
    ) -> Result<ProxyDeployment, ExecutionError> {
        let implementation = self.deploy_now(artifact)?;
        let proxy = self.deploy_now(TRANSPARENT_PROXY)?;
        self.state().proxies.insert(proxy, (implementation, admin));
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
        if !self.state().proxies.contains_key(&proxy) {
            return Err(ExecutionError::NotAProxy(proxy));
        }
        self.deploy_now(artifact)
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<B256, ExecutionError> {
        let mut state = self.state();
        if let Some((_, kind)) = state
            .send_failures
            .iter()
            .find(|(selector, _)| data.starts_with(selector))
        {
            return Err(kind.clone().into());
        }
        state.sent.push((to, data));
        Ok(B256::with_last_byte(state.sent.len() as u8))
    }
}

/// Keeps proposals instead of submitting them.
#[derive(Clone, Debug, Default)]
pub struct RecordingProposer {
    proposals: Vec<ProposedTx>,
    failure: Option<String>,
}

impl RecordingProposer {
    /// A proposer whose service always rejects.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            proposals: vec![],
            failure: Some(message.into()),
        }
    }

    pub fn proposals(&self) -> &[ProposedTx] {
        &self.proposals
    }
}

#[async_trait]
impl Proposer for RecordingProposer {
    async fn propose(&mut self, tx: &ProposedTx) -> Result<ProposalReceipt> {
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        self.proposals.push(tx.clone());
        let nonce = self.proposals.len() as u64 - 1;
        Ok(ProposalReceipt::Queued {
            safe_tx_hash: B256::with_last_byte(nonce as u8),
            nonce,
        })
    }
}

/// Remembers verification requests.
#[derive(Debug, Default)]
pub struct RecordingVerifier {
    verified: Mutex<Vec<(Address, String)>>,
    failing: bool,
}

impl RecordingVerifier {
    /// A verifier that records the request, then fails.
    pub fn failing() -> Self {
        Self {
            verified: Mutex::default(),
            failing: true,
        }
    }

    /// Every `(address, qualified name)` asked for, failed or not.
    pub fn verified(&self) -> Vec<(Address, String)> {
        self.verified
            .lock()
            .expect("recording verifier poisoned")
            .clone()
    }
}

#[async_trait]
impl Verifier for RecordingVerifier {
    async fn verify(
        &self,
        address: Address,
        qualified_name: &str,
        _constructor_args: &Bytes,
    ) -> Result<()> {
        self.verified
            .lock()
            .expect("recording verifier poisoned")
            .push((address, qualified_name.to_string()));
        if self.failing {
            bail!("explorer unavailable");
        }
        Ok(())
    }
}
