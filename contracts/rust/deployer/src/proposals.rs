//! Governance transactions are never sent by the deployer for the protocol owner. They are handed
//! to a [`Proposer`]: on production networks a Safe transaction service, locally the deployer
//! key itself.

use alloy::primitives::{Address, Bytes, B256};
use anyhow::Result;
use async_trait::async_trait;

pub mod direct;
pub mod multisig;

pub use direct::DirectProposer;
pub use multisig::SafeProposer;

/// A call to be executed by the protocol owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposedTx {
    pub target: Address,
    pub data: Bytes,
    pub description: String,
}

impl ProposedTx {
    pub fn new(target: Address, data: impl Into<Bytes>, description: impl Into<String>) -> Self {
        Self {
            target,
            data: data.into(),
            description: description.into(),
        }
    }
}

/// What happened to a proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalReceipt {
    /// Queued in the multisig, waiting for signatures.
    Queued { safe_tx_hash: B256, nonce: u64 },
    /// Executed right away.
    Executed { tx_hash: B256 },
}

#[async_trait]
pub trait Proposer: Send + Sync {
    async fn propose(&mut self, tx: &ProposedTx) -> Result<ProposalReceipt>;
}

#[async_trait]
impl<T: Proposer + ?Sized> Proposer for Box<T> {
    async fn propose(&mut self, tx: &ProposedTx) -> Result<ProposalReceipt> {
        (**self).propose(tx).await
    }
}
